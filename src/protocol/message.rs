//! LDAPMessage envelope

use crate::codec::{self, Buffer, Reader};
use crate::{LdapError, Result};
use super::consts::*;
use super::request::Request;
use super::response::*;
use super::Control;

/// Protocol op carried by an LDAPMessage
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolOp {
    Request(Request),
    BindResponse(BindResult),
    SearchResultEntry(SearchResultEntry),
    SearchResultReference(SearchResultReference),
    SearchResultDone(LdapResult),
    ModifyResponse(LdapResult),
    AddResponse(LdapResult),
    DeleteResponse(LdapResult),
    ModifyDnResponse(LdapResult),
    CompareResponse(CompareResult),
    ExtendedResponse(ExtendedResult),
    IntermediateResponse(IntermediateResponse),
}

impl ProtocolOp {
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolOp::Request(r) => r.name(),
            ProtocolOp::BindResponse(_) => "bindResponse",
            ProtocolOp::SearchResultEntry(_) => "searchResultEntry",
            ProtocolOp::SearchResultReference(_) => "searchResultReference",
            ProtocolOp::SearchResultDone(_) => "searchResultDone",
            ProtocolOp::ModifyResponse(_) => "modifyResponse",
            ProtocolOp::AddResponse(_) => "addResponse",
            ProtocolOp::DeleteResponse(_) => "delResponse",
            ProtocolOp::ModifyDnResponse(_) => "modDNResponse",
            ProtocolOp::CompareResponse(_) => "compareResponse",
            ProtocolOp::ExtendedResponse(_) => "extendedResponse",
            ProtocolOp::IntermediateResponse(_) => "intermediateResponse",
        }
    }

    fn controls(&self) -> &[Control] {
        match self {
            ProtocolOp::Request(r) => r.controls(),
            ProtocolOp::BindResponse(r) => &r.result.controls,
            ProtocolOp::SearchResultEntry(r) => &r.controls,
            ProtocolOp::SearchResultReference(r) => &r.controls,
            ProtocolOp::SearchResultDone(r)
            | ProtocolOp::ModifyResponse(r)
            | ProtocolOp::AddResponse(r)
            | ProtocolOp::DeleteResponse(r)
            | ProtocolOp::ModifyDnResponse(r) => &r.controls,
            ProtocolOp::CompareResponse(r) => &r.result.controls,
            ProtocolOp::ExtendedResponse(r) => &r.result.controls,
            ProtocolOp::IntermediateResponse(r) => &r.controls,
        }
    }

    fn set_controls(&mut self, controls: Vec<Control>) {
        match self {
            ProtocolOp::Request(r) => r.set_controls(controls),
            ProtocolOp::BindResponse(r) => r.result.controls = controls,
            ProtocolOp::SearchResultEntry(r) => r.controls = controls,
            ProtocolOp::SearchResultReference(r) => r.controls = controls,
            ProtocolOp::SearchResultDone(r)
            | ProtocolOp::ModifyResponse(r)
            | ProtocolOp::AddResponse(r)
            | ProtocolOp::DeleteResponse(r)
            | ProtocolOp::ModifyDnResponse(r) => r.controls = controls,
            ProtocolOp::CompareResponse(r) => r.result.controls = controls,
            ProtocolOp::ExtendedResponse(r) => r.result.controls = controls,
            ProtocolOp::IntermediateResponse(r) => r.controls = controls,
        }
    }

    fn write_to(&self, buf: &mut Buffer) -> Result<()> {
        let result_op = |buf: &mut Buffer, tag: u8, result: &LdapResult| -> Result<()> {
            buf.start_sequence(tag)?;
            result.write_components(buf)?;
            buf.end_sequence()
        };
        match self {
            ProtocolOp::Request(r) => r.write_op(buf),
            ProtocolOp::BindResponse(r) => r.write_to(buf),
            ProtocolOp::SearchResultEntry(r) => r.write_to(buf),
            ProtocolOp::SearchResultReference(r) => r.write_to(buf),
            ProtocolOp::SearchResultDone(r) => result_op(buf, SEARCH_RESULT_DONE, r),
            ProtocolOp::ModifyResponse(r) => result_op(buf, MODIFY_RESPONSE, r),
            ProtocolOp::AddResponse(r) => result_op(buf, ADD_RESPONSE, r),
            ProtocolOp::DeleteResponse(r) => result_op(buf, DEL_RESPONSE, r),
            ProtocolOp::ModifyDnResponse(r) => result_op(buf, MODIFY_DN_RESPONSE, r),
            ProtocolOp::CompareResponse(r) => result_op(buf, COMPARE_RESPONSE, &r.result),
            ProtocolOp::ExtendedResponse(r) => r.write_to(buf),
            ProtocolOp::IntermediateResponse(r) => r.write_to(buf),
        }
    }

    fn read_from(reader: &mut Reader) -> Result<Self> {
        let tag = reader
            .peek_tag()
            .ok_or_else(|| LdapError::decoding("missing protocol op"))?;
        if let Some(request) = Request::read_op(reader, tag)? {
            return Ok(ProtocolOp::Request(request));
        }

        let mut op = reader.read_sequence(tag)?;
        let decoded = match tag {
            BIND_RESPONSE => ProtocolOp::BindResponse(BindResult::read_from(&mut op)?),
            SEARCH_RESULT_ENTRY => ProtocolOp::SearchResultEntry(SearchResultEntry::read_from(&mut op)?),
            SEARCH_RESULT_REFERENCE => {
                ProtocolOp::SearchResultReference(SearchResultReference::read_from(&mut op)?)
            }
            SEARCH_RESULT_DONE => ProtocolOp::SearchResultDone(LdapResult::read_components(&mut op)?),
            MODIFY_RESPONSE => ProtocolOp::ModifyResponse(LdapResult::read_components(&mut op)?),
            ADD_RESPONSE => ProtocolOp::AddResponse(LdapResult::read_components(&mut op)?),
            DEL_RESPONSE => ProtocolOp::DeleteResponse(LdapResult::read_components(&mut op)?),
            MODIFY_DN_RESPONSE => ProtocolOp::ModifyDnResponse(LdapResult::read_components(&mut op)?),
            COMPARE_RESPONSE => ProtocolOp::CompareResponse(CompareResult {
                result: LdapResult::read_components(&mut op)?,
            }),
            EXTENDED_RESPONSE => ProtocolOp::ExtendedResponse(ExtendedResult::read_from(&mut op)?),
            INTERMEDIATE_RESPONSE => {
                ProtocolOp::IntermediateResponse(IntermediateResponse::read_from(&mut op)?)
            }
            other => return Err(LdapError::decoding(format!("unknown protocol op 0x{:02X}", other))),
        };
        Ok(decoded)
    }
}

/// LDAPMessage: message id, protocol op and controls
///
/// Controls live on the op values and are moved to the message-level
/// `[0] Controls` element when encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct LdapMessage {
    pub message_id: i32,
    pub op: ProtocolOp,
}

impl LdapMessage {
    pub fn new(message_id: i32, op: ProtocolOp) -> Self {
        Self { message_id, op }
    }

    pub fn request(message_id: i32, request: Request) -> Self {
        Self::new(message_id, ProtocolOp::Request(request))
    }

    /// Encode to a complete frame
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Buffer::with_capacity(128);
        self.write_to(&mut buf)?;
        buf.into_vec()
    }

    pub fn write_to(&self, buf: &mut Buffer) -> Result<()> {
        buf.start_sequence(codec::SEQUENCE)?;
        buf.write_integer(codec::INTEGER, self.message_id as i64)?;
        self.op.write_to(buf)?;
        Control::write_list(self.op.controls(), buf)?;
        buf.end_sequence()
    }

    /// Decode one complete frame
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data);
        let mut message = reader.read_sequence(codec::SEQUENCE)?;
        if reader.has_more() {
            return Err(LdapError::decoding(format!("{} trailing bytes after message", reader.remaining())));
        }

        let message_id = message.read_integer(codec::INTEGER)?;
        if !(0..=i32::MAX as i64).contains(&message_id) {
            return Err(LdapError::decoding(format!("invalid message id {}", message_id)));
        }
        let mut op = ProtocolOp::read_from(&mut message)?;
        if message.peek_tag() == Some(CONTROLS) {
            op.set_controls(Control::read_list(&mut message)?);
        }
        Ok(Self { message_id: message_id as i32, op })
    }
}
