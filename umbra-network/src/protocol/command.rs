//! The 12-byte ASCII command tag leading every framed message.

use umbra_chain::{SerializationError, WireDeserialize, WireSerialize};

/// The closed set of message types the receiver enforces.
///
/// Anything else on the wire decodes to [`Command::Unknown`], which the
/// dispatcher treats as a protocol violation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Version,
    Verack,
    Ping,
    Pong,
    Reject,
    GetAddr,
    Addr,
    GetHeaders,
    Headers,
    GetBlocks,
    Inv,
    GetData,
    NotFound,
    Block,
    Tx,
    Mempool,
    CmpctBlock,
    GetBlockTxn,
    BlockTxn,
    SendCmpct,
    FeeFilter,
    SendHeaders,
    /// A command outside the enforced set; carries the raw tag for the
    /// reject response.
    Unknown(String),
}

impl Command {
    pub fn name(&self) -> &str {
        match self {
            Command::Version => "version",
            Command::Verack => "verack",
            Command::Ping => "ping",
            Command::Pong => "pong",
            Command::Reject => "reject",
            Command::GetAddr => "getaddr",
            Command::Addr => "addr",
            Command::GetHeaders => "getheaders",
            Command::Headers => "headers",
            Command::GetBlocks => "getblocks",
            Command::Inv => "inv",
            Command::GetData => "getdata",
            Command::NotFound => "notfound",
            Command::Block => "block",
            Command::Tx => "tx",
            Command::Mempool => "mempool",
            Command::CmpctBlock => "cmpctblock",
            Command::GetBlockTxn => "getblocktxn",
            Command::BlockTxn => "blocktxn",
            Command::SendCmpct => "sendcmpct",
            Command::FeeFilter => "feefilter",
            Command::SendHeaders => "sendheaders",
            Command::Unknown(name) => name,
        }
    }

    /// The NUL-padded wire form.
    pub fn bytes(&self) -> [u8; 12] {
        let mut bytes = [0u8; 12];
        let name = self.name().as_bytes();
        bytes[..name.len()].copy_from_slice(name);
        bytes
    }
}

impl WireSerialize for Command {
    fn wire_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.bytes().wire_serialize(&mut target)
    }
}

impl WireDeserialize for Command {
    fn wire_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let raw = <[u8; 12]>::wire_deserialize(&mut reader)?;
        let end = raw.iter().position(|&byte| byte == 0).unwrap_or(12);
        if raw[end..].iter().any(|&byte| byte != 0) {
            return Err(SerializationError::Parse("command has embedded NUL"));
        }
        let name = std::str::from_utf8(&raw[..end])
            .map_err(|_| SerializationError::Parse("command is not ascii"))?;
        Ok(match name {
            "version" => Command::Version,
            "verack" => Command::Verack,
            "ping" => Command::Ping,
            "pong" => Command::Pong,
            "reject" => Command::Reject,
            "getaddr" => Command::GetAddr,
            "addr" => Command::Addr,
            "getheaders" => Command::GetHeaders,
            "headers" => Command::Headers,
            "getblocks" => Command::GetBlocks,
            "inv" => Command::Inv,
            "getdata" => Command::GetData,
            "notfound" => Command::NotFound,
            "block" => Command::Block,
            "tx" => Command::Tx,
            "mempool" => Command::Mempool,
            "cmpctblock" => Command::CmpctBlock,
            "getblocktxn" => Command::GetBlockTxn,
            "blocktxn" => Command::BlockTxn,
            "sendcmpct" => Command::SendCmpct,
            "feefilter" => Command::FeeFilter,
            "sendheaders" => Command::SendHeaders,
            other => Command::Unknown(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_roundtrip_through_the_padded_form() {
        for command in [
            Command::Version,
            Command::SendHeaders,
            Command::CmpctBlock,
            Command::FeeFilter,
        ] {
            let bytes = command.bytes();
            let parsed = Command::wire_deserialize(&bytes[..]).unwrap();
            assert_eq!(parsed, command);
        }
    }

    #[test]
    fn unenforced_commands_parse_as_unknown() {
        let mut raw = [0u8; 12];
        raw[..5].copy_from_slice(b"alert");
        assert_eq!(
            Command::wire_deserialize(&raw[..]).unwrap(),
            Command::Unknown("alert".to_string())
        );
    }

    #[test]
    fn embedded_nul_is_malformed() {
        let mut raw = [0u8; 12];
        raw[..4].copy_from_slice(b"ve\0k");
        assert!(Command::wire_deserialize(&raw[..]).is_err());
    }
}
