//! Buffer for writing BER encoded data

use bytes::{BufMut, BytesMut};
use crate::{LdapError, Result};

/// Buffer for writing BER encoded data.
///
/// Constructed elements are opened with [`Buffer::start_sequence`] and
/// closed with [`Buffer::end_sequence`]; the length octets are inserted
/// once the content size is known.
#[derive(Debug)]
pub struct Buffer {
    buf: BytesMut,
    /// Content start offsets of the currently open constructed elements
    open: Vec<usize>,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    /// Create a new empty buffer
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            open: Vec::new(),
        }
    }

    /// Create a new buffer with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            open: Vec::new(),
        }
    }

    /// Get the current length
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Convert to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.buf.to_vec()
    }

    /// Get a reference to the underlying bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the buffer, failing if an element is still open
    pub fn into_vec(self) -> Result<Vec<u8>> {
        if !self.open.is_empty() {
            return Err(LdapError::encoding(format!("{} unterminated elements", self.open.len())));
        }
        Ok(self.buf.to_vec())
    }

    fn put_length(buf: &mut BytesMut, len: usize) -> Result<()> {
        if len < 0x80 {
            buf.put_u8(len as u8);
        } else if len <= 0xFF {
            buf.put_u8(0x81);
            buf.put_u8(len as u8);
        } else if len <= 0xFFFF {
            buf.put_u8(0x82);
            buf.put_u16(len as u16);
        } else if len <= 0xFF_FFFF {
            buf.put_u8(0x83);
            buf.put_u8((len >> 16) as u8);
            buf.put_u16(len as u16);
        } else if len <= u32::MAX as usize {
            buf.put_u8(0x84);
            buf.put_u32(len as u32);
        } else {
            return Err(LdapError::encoding(format!("element too large: {} bytes", len)));
        }
        Ok(())
    }

    /// Write a primitive element with the given content
    pub fn write_element(&mut self, tag: u8, content: &[u8]) -> Result<()> {
        self.buf.put_u8(tag);
        Self::put_length(&mut self.buf, content.len())?;
        self.buf.extend_from_slice(content);
        Ok(())
    }

    /// Write BOOLEAN
    pub fn write_boolean(&mut self, tag: u8, value: bool) -> Result<()> {
        self.write_element(tag, &[if value { 0xFF } else { 0x00 }])
    }

    /// Write INTEGER (minimal two's complement)
    pub fn write_integer(&mut self, tag: u8, value: i64) -> Result<()> {
        let bytes = value.to_be_bytes();
        let mut start = 0;
        while start < bytes.len() - 1 {
            let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
                || (bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0);
            if !redundant {
                break;
            }
            start += 1;
        }
        self.write_element(tag, &bytes[start..])
    }

    /// Write ENUMERATED
    pub fn write_enumerated(&mut self, tag: u8, value: i64) -> Result<()> {
        self.write_integer(tag, value)
    }

    /// Write OCTET STRING
    pub fn write_octet_string(&mut self, tag: u8, value: &[u8]) -> Result<()> {
        self.write_element(tag, value)
    }

    /// Write a UTF-8 string as OCTET STRING
    pub fn write_string(&mut self, tag: u8, value: &str) -> Result<()> {
        self.write_element(tag, value.as_bytes())
    }

    /// Write NULL
    pub fn write_null(&mut self, tag: u8) -> Result<()> {
        self.write_element(tag, &[])
    }

    /// Open a constructed element (SEQUENCE, SET or a tagged choice)
    pub fn start_sequence(&mut self, tag: u8) -> Result<()> {
        self.buf.put_u8(tag);
        self.open.push(self.buf.len());
        Ok(())
    }

    /// Close the innermost open constructed element
    pub fn end_sequence(&mut self) -> Result<()> {
        let start = self
            .open
            .pop()
            .ok_or_else(|| LdapError::encoding("end_sequence without matching start"))?;
        let content = self.buf.split_off(start);
        Self::put_length(&mut self.buf, content.len())?;
        self.buf.unsplit(content);
        Ok(())
    }
}
