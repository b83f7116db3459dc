//! A Tokio codec mapping byte streams to Umbra message streams.
//!
//! Framing: `magic(4) ‖ command(12) ‖ body_len(4 LE) ‖ sha256d
//! checksum(4) ‖ body`. The command string is the message's type tag; the
//! checksum covers the body.

use std::fmt;
use std::io::{Cursor, Write};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use umbra_chain::{
    block::{Block, CountedHeader},
    parameters::{Magic, Network},
    serialization::{sha256d, SerializationError as Error, WireDeserialize, WireSerialize},
    transaction::Transaction,
};

use crate::constants::{MAX_PROTOCOL_MESSAGE_LEN, MIN_BLOCK_PAYLOAD_LEN};

use super::command::Command;
use super::inv::Inventory;
use super::message::{
    BlockLocator, BlockTxn, CompactBlock, GetBlockTxn, Message, Nonce, Reject, SendCompact,
    Version,
};

/// The length of a framed message header.
const HEADER_LEN: usize = 24usize;

/// A codec which produces Umbra messages from byte streams and vice versa.
pub struct Codec {
    builder: Builder,
    state: DecodeState,
}

/// A builder for specifying [`Codec`] options.
pub struct Builder {
    /// The network magic to expect and emit.
    network: Network,
    /// The maximum allowable body length.
    max_len: usize,
    /// An optional label for reporting metrics.
    metrics_label: Option<String>,
}

impl Codec {
    /// Return a builder for constructing a [`Codec`].
    pub fn builder() -> Builder {
        Builder {
            network: Network::Mainnet,
            max_len: MAX_PROTOCOL_MESSAGE_LEN,
            metrics_label: None,
        }
    }
}

impl Builder {
    /// Finalize the builder and return a [`Codec`].
    pub fn finish(self) -> Codec {
        Codec {
            builder: self,
            state: DecodeState::Head,
        }
    }

    /// Configure the codec for the given [`Network`].
    pub fn for_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    /// Configure the codec's maximum accepted body size, in bytes.
    pub fn with_max_body_len(mut self, len: usize) -> Self {
        self.max_len = len;
        self
    }

    /// Configure the codec for the given peer address label.
    pub fn with_metrics_label(mut self, metrics_label: String) -> Self {
        self.metrics_label = Some(metrics_label);
        self
    }
}

// ======== Encoding =========

impl Encoder<Message> for Codec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut body = Vec::new();
        self.write_body(&item, &mut body)?;

        if body.len() > self.builder.max_len {
            return Err(Error::Parse("body length exceeded maximum size"));
        }

        if let Some(label) = self.builder.metrics_label.clone() {
            metrics::counter!("bytes.written", "addr" => label)
                .increment((body.len() + HEADER_LEN) as u64);
        }

        let command = item.command();
        trace!(%item, len = body.len());

        let mut header = [0u8; HEADER_LEN];
        let mut header_writer = Cursor::new(&mut header[..]);
        header_writer.write_all(&Magic::from(self.builder.network).0[..])?;
        header_writer.write_all(&command.bytes())?;
        header_writer.write_u32::<LittleEndian>(body.len() as u32)?;
        header_writer.write_all(&sha256d::Checksum::from(&body[..]).0)?;

        dst.reserve(HEADER_LEN + body.len());
        dst.extend_from_slice(&header);
        dst.extend_from_slice(&body);

        Ok(())
    }
}

impl Codec {
    /// Write the body of the message into the given writer. The body is
    /// written before the header so the header can carry its checksum.
    fn write_body<W: Write>(&self, msg: &Message, mut writer: W) -> Result<(), Error> {
        match msg {
            Message::Version(inner) => inner.wire_serialize(&mut writer)?,
            Message::Verack => { /* Empty payload -- no-op */ }
            Message::Ping(nonce) => nonce.0.wire_serialize(&mut writer)?,
            Message::Pong(nonce) => nonce.0.wire_serialize(&mut writer)?,
            Message::Reject(inner) => inner.wire_serialize(&mut writer)?,
            Message::GetAddr => { /* Empty payload -- no-op */ }
            Message::Addr(addrs) => addrs.wire_serialize(&mut writer)?,
            Message::GetHeaders(locator) => locator.wire_serialize(&mut writer)?,
            Message::Headers(headers) => headers.wire_serialize(&mut writer)?,
            Message::GetBlocks(locator) => locator.wire_serialize(&mut writer)?,
            Message::Inv(inventory) => inventory.wire_serialize(&mut writer)?,
            Message::GetData(inventory) => inventory.wire_serialize(&mut writer)?,
            Message::NotFound(inventory) => inventory.wire_serialize(&mut writer)?,
            Message::Block(block) => block.wire_serialize(&mut writer)?,
            Message::Tx(transaction) => transaction.wire_serialize(&mut writer)?,
            Message::Mempool => { /* Empty payload -- no-op */ }
            Message::CompactBlock(inner) => inner.wire_serialize(&mut writer)?,
            Message::GetBlockTxn(inner) => inner.wire_serialize(&mut writer)?,
            Message::BlockTxn(inner) => inner.wire_serialize(&mut writer)?,
            Message::SendCompact(inner) => inner.wire_serialize(&mut writer)?,
            Message::FeeFilter(rate) => rate.wire_serialize(&mut writer)?,
            Message::SendHeaders => { /* Empty payload -- no-op */ }
            Message::Unknown(_) => {
                return Err(Error::Parse("refusing to encode an unknown command"))
            }
        }
        Ok(())
    }
}

// ======== Decoding =========

enum DecodeState {
    Head,
    Body {
        body_len: usize,
        command: Command,
        checksum: sha256d::Checksum,
    },
}

impl fmt::Debug for DecodeState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecodeState::Head => write!(f, "DecodeState::Head"),
            DecodeState::Body {
                body_len,
                command,
                checksum,
            } => f
                .debug_struct("DecodeState::Body")
                .field("body_len", &body_len)
                .field("command", &command)
                .field("checksum", &checksum)
                .finish(),
        }
    }
}

impl Decoder for Codec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        use Error::Parse;
        // Take the state out; every early return below leaves `Head` in
        // place or restores the partial body state explicitly.
        match std::mem::replace(&mut self.state, DecodeState::Head) {
            DecodeState::Head => {
                // Wait until an entire header is available.
                if src.len() < HEADER_LEN {
                    return Ok(None);
                }

                let header = src.split_to(HEADER_LEN);
                let mut header_reader = Cursor::new(&header);
                let magic = Magic(<[u8; 4]>::wire_deserialize(&mut header_reader)?);
                let command = Command::wire_deserialize(&mut header_reader)?;
                let body_len = header_reader.read_u32::<LittleEndian>()? as usize;
                let checksum =
                    sha256d::Checksum(<[u8; 4]>::wire_deserialize(&mut header_reader)?);
                trace!(?magic, ?command, body_len, "read header from src buffer");

                if magic != Magic::from(self.builder.network) {
                    return Err(Parse("supplied magic did not meet expectations"));
                }
                if body_len > self.builder.max_len {
                    return Err(Parse("body length exceeded maximum size"));
                }
                if command == Command::Block && body_len < MIN_BLOCK_PAYLOAD_LEN {
                    return Err(Parse("block body below the minimum size"));
                }

                if let Some(label) = self.builder.metrics_label.clone() {
                    metrics::counter!("bytes.read", "addr" => label)
                        .increment((body_len + HEADER_LEN) as u64);
                }

                // Reserve space for the body and the following header.
                src.reserve(body_len + HEADER_LEN);

                self.state = DecodeState::Body {
                    body_len,
                    command,
                    checksum,
                };

                // Now that the state is updated, recurse to attempt body
                // decoding.
                self.decode(src)
            }
            DecodeState::Body {
                body_len,
                command,
                checksum,
            } => {
                if src.len() < body_len {
                    // Wait for the full body.
                    self.state = DecodeState::Body {
                        body_len,
                        command,
                        checksum,
                    };
                    return Ok(None);
                }

                let body = src.split_to(body_len);

                if checksum != sha256d::Checksum::from(&body[..]) {
                    return Err(Parse(
                        "supplied message checksum does not match computed checksum",
                    ));
                }

                let mut body_reader = Cursor::new(&body);
                let msg = match command {
                    Command::Version => {
                        Message::Version(Version::wire_deserialize(&mut body_reader)?)
                    }
                    Command::Verack => Message::Verack,
                    Command::Ping => {
                        Message::Ping(Nonce(u64::wire_deserialize(&mut body_reader)?))
                    }
                    Command::Pong => {
                        Message::Pong(Nonce(u64::wire_deserialize(&mut body_reader)?))
                    }
                    Command::Reject => {
                        Message::Reject(Reject::wire_deserialize(&mut body_reader)?)
                    }
                    Command::GetAddr => Message::GetAddr,
                    Command::Addr => {
                        Message::Addr(Vec::<String>::wire_deserialize(&mut body_reader)?)
                    }
                    Command::GetHeaders => {
                        Message::GetHeaders(BlockLocator::wire_deserialize(&mut body_reader)?)
                    }
                    Command::Headers => Message::Headers(Vec::<CountedHeader>::wire_deserialize(
                        &mut body_reader,
                    )?),
                    Command::GetBlocks => {
                        Message::GetBlocks(BlockLocator::wire_deserialize(&mut body_reader)?)
                    }
                    Command::Inv => Message::Inv(Inventory::wire_deserialize(&mut body_reader)?),
                    Command::GetData => {
                        Message::GetData(Inventory::wire_deserialize(&mut body_reader)?)
                    }
                    Command::NotFound => {
                        Message::NotFound(Inventory::wire_deserialize(&mut body_reader)?)
                    }
                    Command::Block => {
                        Message::Block(<Arc<Block>>::wire_deserialize(&mut body_reader)?)
                    }
                    Command::Tx => {
                        Message::Tx(<Arc<Transaction>>::wire_deserialize(&mut body_reader)?)
                    }
                    Command::Mempool => Message::Mempool,
                    Command::CmpctBlock => {
                        Message::CompactBlock(CompactBlock::wire_deserialize(&mut body_reader)?)
                    }
                    Command::GetBlockTxn => {
                        Message::GetBlockTxn(GetBlockTxn::wire_deserialize(&mut body_reader)?)
                    }
                    Command::BlockTxn => {
                        Message::BlockTxn(BlockTxn::wire_deserialize(&mut body_reader)?)
                    }
                    Command::SendCmpct => {
                        Message::SendCompact(SendCompact::wire_deserialize(&mut body_reader)?)
                    }
                    Command::FeeFilter => {
                        Message::FeeFilter(i64::wire_deserialize(&mut body_reader)?)
                    }
                    Command::SendHeaders => Message::SendHeaders,
                    // The dispatcher penalizes these; the body is dropped.
                    Command::Unknown(name) => Message::Unknown(name),
                };
                trace!("finished message decoding");
                Ok(Some(msg))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::RejectReason;
    use futures::prelude::*;
    use tokio_util::codec::{FramedRead, FramedWrite};

    async fn roundtrip(msg: Message) -> Message {
        let mut bytes = Vec::new();
        {
            let mut fw = FramedWrite::new(&mut bytes, Codec::builder().finish());
            fw.send(msg).await.expect("message should be serialized");
        }
        let mut fr = FramedRead::new(Cursor::new(&bytes), Codec::builder().finish());
        fr.next()
            .await
            .expect("a next message should be available")
            .expect("that message should deserialize")
    }

    #[tokio::test]
    async fn version_message_round_trip() {
        let msg = Message::Version(Version::new(
            crate::constants::PROTOCOL_VERSION,
            540_000,
            1_713_000_000,
            "/umbra-test/".to_string(),
        ));
        assert_eq!(roundtrip(msg.clone()).await, msg);
    }

    #[tokio::test]
    async fn empty_payload_messages_round_trip() {
        for msg in [
            Message::Verack,
            Message::GetAddr,
            Message::Mempool,
            Message::SendHeaders,
        ] {
            assert_eq!(roundtrip(msg.clone()).await, msg);
        }
    }

    #[tokio::test]
    async fn every_payload_message_round_trips() {
        use umbra_chain::block;
        let msgs = vec![
            Message::Ping(Nonce(0x9082_4908_8927_9238)),
            Message::Pong(Nonce(7)),
            Message::Reject(Reject::new("tx", RejectReason::Duplicate, "dup")),
            Message::Addr(vec!["203.0.113.6:8655".to_string()]),
            Message::GetHeaders(BlockLocator::open_ended(block::Hash([1; 32]))),
            Message::GetBlocks(BlockLocator {
                start: block::Hash([1; 32]),
                stop: Some(block::Hash([2; 32])),
            }),
            Message::Inv(Inventory::blocks(vec![block::Hash([3; 32])])),
            Message::GetData(Inventory::txs(vec![umbra_chain::transaction::Hash([4; 32])])),
            Message::NotFound(Inventory::txs(vec![umbra_chain::transaction::Hash([5; 32])])),
            Message::SendCompact(SendCompact {
                announce: true,
                version: 1,
            }),
            Message::FeeFilter(12_345),
        ];
        for msg in msgs {
            assert_eq!(roundtrip(msg.clone()).await, msg);
        }
    }

    #[tokio::test]
    async fn block_tx_and_headers_round_trip() {
        use chrono::TimeZone;
        use std::sync::Arc;
        use umbra_chain::block;
        use umbra_chain::transaction::{Memo, Transaction, TxType};
        use umbra_chain::transparent::{Input, OutPoint, Output, Script};
        use umbra_chain::work::difficulty::CompactDifficulty;

        let coinbase = Transaction::new(
            1,
            TxType::Transparent,
            vec![Input {
                previous_outpoint: OutPoint::coinbase_sentinel(),
                signature_script: Script(vec![0x01]),
                sequence: 0xffff_ffff,
            }],
            vec![Output {
                value: 2_500_000_000,
                pk_script: Script::pay_to_pubkey_hash(&[7; 20]),
            }],
            0,
            Memo::empty(),
        );
        let merkle_root: block::merkle::Root = std::iter::once(coinbase.hash()).collect();
        let header = block::Header::new(
            1,
            block::Hash([0xee; 32]),
            merkle_root,
            chrono::Utc.timestamp_opt(1_713_000_100, 0).single().unwrap(),
            CompactDifficulty(0x1d00ffff),
            42,
            vec![0xab; 8],
        );
        let block = Arc::new(block::Block {
            header: header.clone(),
            transactions: vec![Arc::new(coinbase.clone())],
        });

        let msgs = vec![
            Message::Tx(Arc::new(coinbase)),
            Message::Block(block.clone()),
            Message::Headers(vec![CountedHeader {
                header,
                transaction_count: block.transactions.len(),
            }]),
        ];
        for msg in msgs {
            assert_eq!(roundtrip(msg.clone()).await, msg);
        }
    }

    #[tokio::test]
    async fn wrong_magic_is_rejected() {
        let msg = Message::Ping(Nonce(1));
        let mut bytes = Vec::new();
        {
            let mut fw = FramedWrite::new(
                &mut bytes,
                Codec::builder().for_network(Network::Testnet).finish(),
            );
            fw.send(msg).await.unwrap();
        }
        let mut fr = FramedRead::new(Cursor::new(&bytes), Codec::builder().finish());
        fr.next()
            .await
            .expect("a next message should be available")
            .expect_err("mainnet codec must reject testnet magic");
    }

    #[tokio::test]
    async fn corrupted_checksum_is_rejected() {
        let msg = Message::Ping(Nonce(1));
        let mut bytes = Vec::new();
        {
            let mut fw = FramedWrite::new(&mut bytes, Codec::builder().finish());
            fw.send(msg).await.unwrap();
        }
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let mut fr = FramedRead::new(Cursor::new(&bytes), Codec::builder().finish());
        fr.next()
            .await
            .expect("a next message should be available")
            .expect_err("corrupted body must fail the checksum");
    }

    #[tokio::test]
    async fn oversized_body_is_rejected_at_both_ends() {
        let msg = Message::Addr(vec!["x".repeat(64); 4]);
        let mut bytes = Vec::new();
        {
            let mut fw = FramedWrite::new(&mut bytes, Codec::builder().finish());
            fw.send(msg.clone()).await.unwrap();
        }
        let body_len = bytes.len() - 24;

        // A sender capped below the body size refuses to encode.
        let mut small = Vec::new();
        let mut fw = FramedWrite::new(
            &mut small,
            Codec::builder().with_max_body_len(body_len - 1).finish(),
        );
        fw.send(msg).await.expect_err("encode must fail over the cap");

        // A receiver capped below the body size refuses to decode.
        let mut fr = FramedRead::new(
            Cursor::new(&bytes),
            Codec::builder().with_max_body_len(body_len - 1).finish(),
        );
        fr.next()
            .await
            .expect("a next message should be available")
            .expect_err("decode must fail over the cap");
    }

    #[tokio::test]
    async fn unknown_command_decodes_to_the_unknown_variant() {
        // Hand-build a frame with an unenforced command and empty body.
        let mut frame = Vec::new();
        frame.extend_from_slice(&Magic::from(Network::Mainnet).0);
        let mut command = [0u8; 12];
        command[..5].copy_from_slice(b"alert");
        frame.extend_from_slice(&command);
        frame.extend_from_slice(&0u32.to_le_bytes());
        frame.extend_from_slice(&sha256d::Checksum::from(&[][..]).0);

        let mut fr = FramedRead::new(Cursor::new(&frame), Codec::builder().finish());
        let msg = fr.next().await.unwrap().unwrap();
        assert_eq!(msg, Message::Unknown("alert".to_string()));
    }

    #[tokio::test]
    async fn undersized_block_body_is_rejected() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&Magic::from(Network::Mainnet).0);
        frame.extend_from_slice(&Command::Block.bytes());
        frame.extend_from_slice(&10u32.to_le_bytes());
        let body = [0u8; 10];
        frame.extend_from_slice(&sha256d::Checksum::from(&body[..]).0);
        frame.extend_from_slice(&body);

        let mut fr = FramedRead::new(Cursor::new(&frame), Codec::builder().finish());
        fr.next()
            .await
            .expect("a next message should be available")
            .expect_err("an 80-byte floor applies to block bodies");
    }
}
