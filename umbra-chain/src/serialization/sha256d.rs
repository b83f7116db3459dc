//! The double-SHA256 hash used throughout the chain.

use sha2::{Digest, Sha256};
use std::io;

/// An `io::Write` adapter that double-SHA256s everything written to it.
///
/// Writing serialized bytes straight into the hasher avoids a buffer
/// allocation per hash.
#[derive(Default)]
pub struct Writer {
    hash: Sha256,
}

impl Writer {
    /// Consume the writer and produce the double hash.
    pub fn finish(self) -> [u8; 32] {
        let result1 = self.hash.finalize();
        let result2 = Sha256::digest(&result1);
        let mut buffer = [0u8; 32];
        buffer[0..32].copy_from_slice(&result2[0..32]);
        buffer
    }
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hash.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Double-hash a byte slice in one call.
pub fn digest(data: &[u8]) -> [u8; 32] {
    use io::Write;
    let mut writer = Writer::default();
    writer
        .write_all(data)
        .expect("writing to a hasher never fails");
    writer.finish()
}

/// Implements the conventions shared by every sha256d-derived identifier:
/// raw 32-byte wire transport, and hex rendering/parsing in big-endian
/// byte order (the u256 display convention, so leading zeros read as
/// difficulty).
macro_rules! impl_digest_conventions {
    ($name:ident, $label:expr) => {
        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                for byte in self.0.iter().rev() {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, concat!($label, "({})"), self)
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::serialization::SerializationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                use crate::serialization::SerializationError::Parse;
                let decoded = hex::decode(s).map_err(|_| Parse("hex decoding error"))?;
                if decoded.len() != 32 {
                    return Err(Parse("hashes are 64 hex digits"));
                }
                let mut bytes = [0u8; 32];
                for (slot, byte) in bytes.iter_mut().zip(decoded.into_iter().rev()) {
                    *slot = byte;
                }
                Ok($name(bytes))
            }
        }

        impl crate::serialization::WireSerialize for $name {
            fn wire_serialize<W: std::io::Write>(
                &self,
                mut target: W,
            ) -> Result<(), std::io::Error> {
                target.write_all(&self.0)
            }
        }

        impl crate::serialization::WireDeserialize for $name {
            fn wire_deserialize<R: std::io::Read>(
                mut reader: R,
            ) -> Result<Self, crate::serialization::SerializationError> {
                let mut bytes = [0u8; 32];
                reader.read_exact(&mut bytes)?;
                Ok($name(bytes))
            }
        }
    };
}

pub(crate) use impl_digest_conventions;

/// The first four bytes of a sha256d digest, used as the message checksum in
/// the network framing.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Checksum(pub [u8; 4]);

impl<'a> From<&'a [u8]> for Checksum {
    fn from(bytes: &'a [u8]) -> Self {
        let digest = digest(bytes);
        let mut checksum = [0u8; 4];
        checksum[0..4].copy_from_slice(&digest[0..4]);
        Self(checksum)
    }
}

impl std::fmt::Debug for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("Checksum")
            .field(&hex::encode(self.0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_hash_of_empty_input() {
        // sha256d("") is a well-known vector
        assert_eq!(
            hex::encode(digest(b"")),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn writer_matches_one_shot_digest() {
        use std::io::Write;
        let mut writer = Writer::default();
        writer.write_all(b"umbra").unwrap();
        assert_eq!(writer.finish(), digest(b"umbra"));
    }
}
