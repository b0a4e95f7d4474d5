//! Reader for reading BER encoded data

use std::io::{Cursor, Read};
use byteorder::ReadBytesExt;
use crate::{LdapError, Result};
use super::types::{decode_head, Head};

/// Reader for reading BER encoded data
pub struct Reader<'a> {
    /// Reference to the original data
    data: &'a [u8],
    /// Cursor for reading
    cursor: Cursor<&'a [u8]>,
}

impl<'a> Reader<'a> {
    /// Create a new reader from bytes
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            cursor: Cursor::new(data),
        }
    }

    /// Get current position
    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    /// Get remaining bytes
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position()
    }

    /// Check if has more data
    pub fn has_more(&self) -> bool {
        self.remaining() > 0
    }

    /// Peek the next head without consuming
    pub fn peek_head(&self) -> Result<Head> {
        let rest = &self.data[self.position()..];
        let head = decode_head(rest)
            .map_err(LdapError::decoding)?
            .ok_or_else(|| LdapError::decoding("unexpected EOF reading element head"))?;
        if head.total_len() > rest.len() {
            return Err(LdapError::decoding(format!(
                "element 0x{:02X} declares {} bytes but only {} remain",
                head.tag,
                head.length,
                rest.len() - head.header_len
            )));
        }
        Ok(head)
    }

    /// Peek the next tag without consuming
    pub fn peek_tag(&self) -> Option<u8> {
        self.data.get(self.position()).copied()
    }

    /// Read a head, leaving the cursor at the start of the content
    pub fn read_head(&mut self) -> Result<Head> {
        let head = self.peek_head()?;
        self.advance(head.header_len);
        Ok(head)
    }

    fn advance(&mut self, n: usize) {
        self.cursor.set_position(self.cursor.position() + n as u64);
    }

    fn expect_head(&mut self, tag: u8) -> Result<Head> {
        let head = self.read_head()?;
        if head.tag != tag {
            return Err(LdapError::decoding(format!(
                "expected tag 0x{:02X}, found 0x{:02X}",
                tag, head.tag
            )));
        }
        Ok(head)
    }

    fn read_content(&mut self, len: usize) -> Result<&'a [u8]> {
        let start = self.position();
        let end = start + len;
        if end > self.data.len() {
            return Err(LdapError::decoding("unexpected EOF reading element content"));
        }
        self.advance(len);
        Ok(&self.data[start..end])
    }

    /// Read BOOLEAN
    pub fn read_boolean(&mut self, tag: u8) -> Result<bool> {
        let head = self.expect_head(tag)?;
        if head.length != 1 {
            return Err(LdapError::decoding(format!("invalid BOOLEAN length {}", head.length)));
        }
        let value = self
            .cursor
            .read_u8()
            .map_err(|_| LdapError::decoding("unexpected EOF reading BOOLEAN"))?;
        Ok(value != 0)
    }

    /// Read INTEGER
    pub fn read_integer(&mut self, tag: u8) -> Result<i64> {
        let head = self.expect_head(tag)?;
        if head.length == 0 || head.length > 8 {
            return Err(LdapError::decoding(format!("invalid INTEGER length {}", head.length)));
        }
        let mut value: i64 = 0;
        for i in 0..head.length {
            let b = self
                .cursor
                .read_u8()
                .map_err(|_| LdapError::decoding("unexpected EOF reading INTEGER"))?;
            if i == 0 && b & 0x80 != 0 {
                value = -1;
            }
            value = (value << 8) | b as i64;
        }
        Ok(value)
    }

    /// Read ENUMERATED
    pub fn read_enumerated(&mut self, tag: u8) -> Result<i64> {
        self.read_integer(tag)
    }

    /// Read OCTET STRING
    pub fn read_octet_string(&mut self, tag: u8) -> Result<Vec<u8>> {
        let head = self.expect_head(tag)?;
        let mut value = vec![0u8; head.length];
        self.cursor
            .read_exact(&mut value)
            .map_err(|_| LdapError::decoding("unexpected EOF reading OCTET STRING"))?;
        Ok(value)
    }

    /// Read a UTF-8 string stored as OCTET STRING
    pub fn read_string(&mut self, tag: u8) -> Result<String> {
        let bytes = self.read_octet_string(tag)?;
        String::from_utf8(bytes).map_err(|e| LdapError::decoding(format!("invalid UTF-8 string: {}", e)))
    }

    /// Read NULL
    pub fn read_null(&mut self, tag: u8) -> Result<()> {
        let head = self.expect_head(tag)?;
        if head.length != 0 {
            return Err(LdapError::decoding(format!("invalid NULL length {}", head.length)));
        }
        Ok(())
    }

    /// Read a constructed element and return a reader over its content
    pub fn read_sequence(&mut self, tag: u8) -> Result<Reader<'a>> {
        let head = self.expect_head(tag)?;
        let content = self.read_content(head.length)?;
        Ok(Reader::new(content))
    }

    /// Read any element, returning its head and content octets
    pub fn read_element(&mut self) -> Result<(Head, &'a [u8])> {
        let head = self.read_head()?;
        let content = self.read_content(head.length)?;
        Ok((head, content))
    }

    /// Skip the next element
    pub fn skip_element(&mut self) -> Result<()> {
        self.read_element().map(|_| ())
    }
}
