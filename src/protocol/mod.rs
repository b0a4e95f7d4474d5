//! # Protocol Module
//!
//! This module defines the LDAPv3 protocol structures (RFC 4511): requests,
//! responses, filters, controls and the LDAPMessage envelope.
//!
//! ## Protocol Overview
//!
//! Every PDU is a BER `SEQUENCE` with no additional framing:
//!
//! | Field | Type | Description |
//! |-------|------|-------------|
//! | messageID | INTEGER | correlates responses with their request, 0 for unsolicited notifications |
//! | protocolOp | APPLICATION n | request or response body |
//! | controls | [0] SEQUENCE OF Control | optional |

mod consts;
mod filter;
mod message;
mod request;
mod response;
mod types;

pub use consts::*;
pub use filter::Filter;
pub use message::{LdapMessage, ProtocolOp};
pub use request::*;
pub use response::*;
pub use types::{Attribute, Control, Modification};

use crate::{Result, codec};

/// Protocol interface for client-side encoding/decoding
pub trait Protocol: Send + Sync {
    /// Parse package boundary, returns (length, status)
    fn parse_package(&self, buff: &[u8]) -> (usize, codec::PackageStatus);

    /// Encode a request with its message id
    fn request_pack(&self, message_id: i32, request: &Request) -> Result<Vec<u8>>;

    /// Decode a complete frame
    fn response_unpack(&self, pkg: &[u8]) -> Result<LdapMessage>;
}

/// Default LDAPv3 protocol implementation
#[derive(Debug, Default, Clone)]
pub struct LdapProtocol;

impl LdapProtocol {
    pub fn new() -> Self {
        Self
    }
}

impl Protocol for LdapProtocol {
    fn parse_package(&self, buff: &[u8]) -> (usize, codec::PackageStatus) {
        codec::parse_package(buff)
    }

    fn request_pack(&self, message_id: i32, request: &Request) -> Result<Vec<u8>> {
        let mut buf = codec::Buffer::with_capacity(128);
        buf.start_sequence(codec::SEQUENCE)?;
        buf.write_integer(codec::INTEGER, message_id as i64)?;
        request.write_op(&mut buf)?;
        Control::write_list(request.controls(), &mut buf)?;
        buf.end_sequence()?;
        buf.into_vec()
    }

    fn response_unpack(&self, pkg: &[u8]) -> Result<LdapMessage> {
        LdapMessage::decode(pkg)
    }
}
