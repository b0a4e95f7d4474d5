//! BER type definitions

/// Universal tags used by LDAP
pub const BOOLEAN: u8 = 0x01;
pub const INTEGER: u8 = 0x02;
pub const OCTET_STRING: u8 = 0x04;
pub const NULL: u8 = 0x05;
pub const ENUMERATED: u8 = 0x0A;
pub const SEQUENCE: u8 = 0x30;
pub const SET: u8 = 0x31;

/// Tag class (high two bits of the identifier octet)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagClass {
    Universal,
    Application,
    ContextSpecific,
    Private,
}

impl TagClass {
    pub fn from_tag(tag: u8) -> Self {
        match tag >> 6 {
            0 => TagClass::Universal,
            1 => TagClass::Application,
            2 => TagClass::ContextSpecific,
            _ => TagClass::Private,
        }
    }
}

/// Build a context-specific primitive tag, e.g. `[3]` → `0x83`
pub const fn context(number: u8) -> u8 {
    0x80 | (number & 0x1F)
}

/// Build a context-specific constructed tag, e.g. `[0]` → `0xA0`
pub const fn context_constructed(number: u8) -> u8 {
    0xA0 | (number & 0x1F)
}

/// Element head: identifier octet plus decoded length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Head {
    /// Identifier octet
    pub tag: u8,
    /// Length of the content octets
    pub length: usize,
    /// Number of octets used by the identifier and length
    pub header_len: usize,
}

impl Head {
    pub fn new(tag: u8, length: usize, header_len: usize) -> Self {
        Self { tag, length, header_len }
    }

    pub fn class(&self) -> TagClass {
        TagClass::from_tag(self.tag)
    }

    pub fn is_constructed(&self) -> bool {
        self.tag & 0x20 != 0
    }

    /// Tag number within its class
    pub fn number(&self) -> u8 {
        self.tag & 0x1F
    }

    /// Total encoded size of the element
    pub fn total_len(&self) -> usize {
        self.header_len + self.length
    }
}

/// Package parse result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageStatus {
    /// Package is complete
    Full,
    /// Package data is incomplete (need more bytes)
    Less,
    /// Package is invalid
    Error,
}

/// Decode an element head from the start of `data`.
///
/// Returns `Ok(None)` if more bytes are needed to decode the head itself.
pub fn decode_head(data: &[u8]) -> Result<Option<Head>, &'static str> {
    if data.len() < 2 {
        return Ok(None);
    }
    let tag = data[0];
    if tag & 0x1F == 0x1F {
        return Err("multi-octet tags are not supported");
    }

    let first = data[1];
    if first & 0x80 == 0 {
        return Ok(Some(Head::new(tag, first as usize, 2)));
    }

    let octets = (first & 0x7F) as usize;
    if octets == 0 {
        return Err("indefinite length is not supported");
    }
    if octets > 4 {
        return Err("length field too large");
    }
    if data.len() < 2 + octets {
        return Ok(None);
    }

    let length = data[2..2 + octets]
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | *b as usize);
    Ok(Some(Head::new(tag, length, 2 + octets)))
}

/// Parse an LDAPMessage frame from a byte stream
/// Returns (package_length, status)
pub fn parse_package(data: &[u8]) -> (usize, PackageStatus) {
    if data.is_empty() {
        return (0, PackageStatus::Less);
    }
    if data[0] != SEQUENCE {
        return (0, PackageStatus::Error);
    }

    let head = match decode_head(data) {
        Ok(Some(head)) => head,
        Ok(None) => return (0, PackageStatus::Less),
        Err(_) => return (0, PackageStatus::Error),
    };

    if head.length > crate::consts::MAX_PACKAGE_LENGTH {
        return (0, PackageStatus::Error);
    }

    let total = head.total_len();
    if data.len() < total {
        return (0, PackageStatus::Less);
    }

    (total, PackageStatus::Full)
}
