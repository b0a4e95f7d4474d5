//! # Codec Module
//!
//! This module implements the subset of BER (Basic Encoding Rules) used by
//! LDAP: definite-length TLV elements with single-octet identifiers.
//!
//! ## TLV Format
//!
//! - Identifier octet: class (2 bits), constructed flag (1 bit), tag number (5 bits)
//! - Length: short form (< 128) or long form `0x80 | n` followed by `n` octets
//! - Content: `length` octets
//!
//! ## Tags used by LDAP
//!
//! | Type | Tag | Description |
//! |------|-----|-------------|
//! | BOOLEAN | 0x01 | |
//! | INTEGER | 0x02 | message ids, limits |
//! | OCTET STRING | 0x04 | DNs, attribute values |
//! | NULL | 0x05 | unbind request body |
//! | ENUMERATED | 0x0A | result codes, scopes |
//! | SEQUENCE | 0x30 | LDAPMessage envelope |
//! | SET | 0x31 | attribute value sets |
//!
//! Protocol ops use APPLICATION tags and choices use context-specific tags.

mod buffer;
mod reader;
mod types;

pub use buffer::Buffer;
pub use reader::Reader;
pub use types::*;

/// Trait for types that can be written as a BER element
pub trait BerEncode {
    fn encode(&self, buf: &mut Buffer) -> crate::Result<()>;
}

/// Trait for types that can be read from a BER element
pub trait BerDecode: Sized {
    fn decode(reader: &mut Reader) -> crate::Result<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pair {
        name: String,
        value: i64,
    }

    impl BerEncode for Pair {
        fn encode(&self, buf: &mut Buffer) -> crate::Result<()> {
            buf.start_sequence(SEQUENCE)?;
            buf.write_string(OCTET_STRING, &self.name)?;
            buf.write_integer(INTEGER, self.value)?;
            buf.end_sequence()
        }
    }

    impl BerDecode for Pair {
        fn decode(reader: &mut Reader) -> crate::Result<Self> {
            let mut seq = reader.read_sequence(SEQUENCE)?;
            Ok(Pair {
                name: seq.read_string(OCTET_STRING)?,
                value: seq.read_integer(INTEGER)?,
            })
        }
    }

    #[test]
    fn test_encode_decode_struct() {
        let mut buf = Buffer::new();
        Pair { name: "sizeLimit".into(), value: 1000 }.encode(&mut buf).unwrap();

        let data = buf.to_bytes();
        let (len, status) = parse_package(&data);
        assert_eq!(status, PackageStatus::Full);
        assert_eq!(len, data.len());

        let mut reader = Reader::new(&data);
        let pair = Pair::decode(&mut reader).unwrap();
        assert_eq!(pair.name, "sizeLimit");
        assert_eq!(pair.value, 1000);
    }
}
