//! Response types and result codes

use std::fmt;
use crate::codec::{self, Buffer, Reader};
use crate::{LdapError, Result};
use super::consts::*;
use super::{Attribute, Control};

/// LDAP result code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultCode(pub i32);

impl ResultCode {
    pub const SUCCESS: ResultCode = ResultCode(0);
    pub const OPERATIONS_ERROR: ResultCode = ResultCode(1);
    pub const PROTOCOL_ERROR: ResultCode = ResultCode(2);
    pub const TIME_LIMIT_EXCEEDED: ResultCode = ResultCode(3);
    pub const SIZE_LIMIT_EXCEEDED: ResultCode = ResultCode(4);
    pub const COMPARE_FALSE: ResultCode = ResultCode(5);
    pub const COMPARE_TRUE: ResultCode = ResultCode(6);
    pub const AUTH_METHOD_NOT_SUPPORTED: ResultCode = ResultCode(7);
    pub const STRONG_AUTH_REQUIRED: ResultCode = ResultCode(8);
    pub const REFERRAL: ResultCode = ResultCode(10);
    pub const ADMIN_LIMIT_EXCEEDED: ResultCode = ResultCode(11);
    pub const UNAVAILABLE_CRITICAL_EXTENSION: ResultCode = ResultCode(12);
    pub const CONFIDENTIALITY_REQUIRED: ResultCode = ResultCode(13);
    pub const SASL_BIND_IN_PROGRESS: ResultCode = ResultCode(14);
    pub const NO_SUCH_ATTRIBUTE: ResultCode = ResultCode(16);
    pub const UNDEFINED_ATTRIBUTE_TYPE: ResultCode = ResultCode(17);
    pub const INAPPROPRIATE_MATCHING: ResultCode = ResultCode(18);
    pub const CONSTRAINT_VIOLATION: ResultCode = ResultCode(19);
    pub const ATTRIBUTE_OR_VALUE_EXISTS: ResultCode = ResultCode(20);
    pub const INVALID_ATTRIBUTE_SYNTAX: ResultCode = ResultCode(21);
    pub const NO_SUCH_OBJECT: ResultCode = ResultCode(32);
    pub const ALIAS_PROBLEM: ResultCode = ResultCode(33);
    pub const INVALID_DN_SYNTAX: ResultCode = ResultCode(34);
    pub const INVALID_CREDENTIALS: ResultCode = ResultCode(49);
    pub const INSUFFICIENT_ACCESS_RIGHTS: ResultCode = ResultCode(50);
    pub const BUSY: ResultCode = ResultCode(51);
    pub const UNAVAILABLE: ResultCode = ResultCode(52);
    pub const UNWILLING_TO_PERFORM: ResultCode = ResultCode(53);
    pub const NAMING_VIOLATION: ResultCode = ResultCode(64);
    pub const OBJECT_CLASS_VIOLATION: ResultCode = ResultCode(65);
    pub const NOT_ALLOWED_ON_NON_LEAF: ResultCode = ResultCode(66);
    pub const ENTRY_ALREADY_EXISTS: ResultCode = ResultCode(68);
    pub const OTHER: ResultCode = ResultCode(80);
    pub const CLIENT_SIDE_SERVER_DOWN: ResultCode = ResultCode(81);
    pub const CLIENT_SIDE_LOCAL_ERROR: ResultCode = ResultCode(82);
    pub const CLIENT_SIDE_ENCODING_ERROR: ResultCode = ResultCode(83);
    pub const CLIENT_SIDE_DECODING_ERROR: ResultCode = ResultCode(84);
    pub const CLIENT_SIDE_TIMEOUT: ResultCode = ResultCode(85);
    pub const CLIENT_SIDE_AUTH_UNKNOWN: ResultCode = ResultCode(86);
    pub const CLIENT_SIDE_FILTER_ERROR: ResultCode = ResultCode(87);
    pub const CLIENT_SIDE_USER_CANCELLED: ResultCode = ResultCode(88);
    pub const CLIENT_SIDE_PARAM_ERROR: ResultCode = ResultCode(89);
    pub const CLIENT_SIDE_NO_MEMORY: ResultCode = ResultCode(90);
    pub const CLIENT_SIDE_CONNECT_ERROR: ResultCode = ResultCode(91);
    pub const CANCELLED: ResultCode = ResultCode(118);

    pub fn as_i32(self) -> i32 {
        self.0
    }

    /// Whether a response carrying this code fails the operation
    pub fn is_exceptional(self) -> bool {
        !matches!(
            self,
            ResultCode::SUCCESS
                | ResultCode::COMPARE_FALSE
                | ResultCode::COMPARE_TRUE
                | ResultCode::SASL_BIND_IN_PROGRESS
        )
    }

    /// Codes generated locally by the client rather than sent by a server
    pub fn is_client_side(self) -> bool {
        (81..=91).contains(&self.0)
    }

    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "Success",
            1 => "Operations Error",
            2 => "Protocol Error",
            3 => "Time Limit Exceeded",
            4 => "Size Limit Exceeded",
            5 => "Compare False",
            6 => "Compare True",
            7 => "Authentication Method Not Supported",
            8 => "Strong Authentication Required",
            10 => "Referral",
            11 => "Administrative Limit Exceeded",
            12 => "Unavailable Critical Extension",
            13 => "Confidentiality Required",
            14 => "SASL Bind In Progress",
            16 => "No Such Attribute",
            17 => "Undefined Attribute Type",
            18 => "Inappropriate Matching",
            19 => "Constraint Violation",
            20 => "Attribute Or Value Exists",
            21 => "Invalid Attribute Syntax",
            32 => "No Such Entry",
            33 => "Alias Problem",
            34 => "Invalid DN Syntax",
            49 => "Invalid Credentials",
            50 => "Insufficient Access Rights",
            51 => "Busy",
            52 => "Unavailable",
            53 => "Unwilling To Perform",
            64 => "Naming Violation",
            65 => "Object Class Violation",
            66 => "Not Allowed On Non-Leaf",
            68 => "Entry Already Exists",
            80 => "Other",
            81 => "Server Connection Closed",
            82 => "Local Error",
            83 => "Encoding Error",
            84 => "Decoding Error",
            85 => "Client-Side Timeout",
            86 => "Unknown Authentication Mechanism",
            87 => "Filter Error",
            88 => "Cancelled by User",
            89 => "Parameter Error",
            90 => "Out of Memory",
            91 => "Connect Error",
            118 => "Cancelled",
            _ => "Undefined",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

/// The LDAPResult components shared by every response
#[derive(Debug, Clone, PartialEq)]
pub struct LdapResult {
    pub result_code: ResultCode,
    pub matched_dn: String,
    pub diagnostic_message: String,
    pub referrals: Vec<String>,
    pub controls: Vec<Control>,
}

impl LdapResult {
    pub fn new(result_code: ResultCode, matched_dn: impl Into<String>, diagnostic_message: impl Into<String>) -> Self {
        Self {
            result_code,
            matched_dn: matched_dn.into(),
            diagnostic_message: diagnostic_message.into(),
            referrals: Vec::new(),
            controls: Vec::new(),
        }
    }

    pub fn success() -> Self {
        Self::new(ResultCode::SUCCESS, "", "")
    }

    pub fn is_success(&self) -> bool {
        self.result_code == ResultCode::SUCCESS
    }

    /// Convert into `Err` when the result code is exceptional
    pub fn into_result(self) -> Result<LdapResult> {
        if self.result_code.is_exceptional() {
            Err(LdapError::from_result(self))
        } else {
            Ok(self)
        }
    }

    /// Write resultCode, matchedDN, diagnosticMessage and referral
    pub(crate) fn write_components(&self, buf: &mut Buffer) -> Result<()> {
        buf.write_enumerated(codec::ENUMERATED, self.result_code.0 as i64)?;
        buf.write_string(codec::OCTET_STRING, &self.matched_dn)?;
        buf.write_string(codec::OCTET_STRING, &self.diagnostic_message)?;
        if !self.referrals.is_empty() {
            buf.start_sequence(REFERRAL)?;
            for uri in &self.referrals {
                buf.write_string(codec::OCTET_STRING, uri)?;
            }
            buf.end_sequence()?;
        }
        Ok(())
    }

    pub(crate) fn read_components(reader: &mut Reader) -> Result<Self> {
        let code = reader.read_enumerated(codec::ENUMERATED)?;
        let matched_dn = reader.read_string(codec::OCTET_STRING)?;
        let diagnostic_message = reader.read_string(codec::OCTET_STRING)?;
        let mut referrals = Vec::new();
        if reader.peek_tag() == Some(REFERRAL) {
            let mut seq = reader.read_sequence(REFERRAL)?;
            while seq.has_more() {
                referrals.push(seq.read_string(codec::OCTET_STRING)?);
            }
        }
        Ok(Self {
            result_code: ResultCode(code as i32),
            matched_dn,
            diagnostic_message,
            referrals,
            controls: Vec::new(),
        })
    }
}

/// Bind response
#[derive(Debug, Clone, PartialEq)]
pub struct BindResult {
    pub result: LdapResult,
    pub server_sasl_credentials: Option<Vec<u8>>,
}

impl BindResult {
    pub fn is_sasl_bind_in_progress(&self) -> bool {
        self.result.result_code == ResultCode::SASL_BIND_IN_PROGRESS
    }

    pub(crate) fn write_to(&self, buf: &mut Buffer) -> Result<()> {
        buf.start_sequence(BIND_RESPONSE)?;
        self.result.write_components(buf)?;
        if let Some(creds) = &self.server_sasl_credentials {
            buf.write_octet_string(SERVER_SASL_CREDS, creds)?;
        }
        buf.end_sequence()
    }

    pub(crate) fn read_from(reader: &mut Reader) -> Result<Self> {
        let result = LdapResult::read_components(reader)?;
        let server_sasl_credentials = if reader.peek_tag() == Some(SERVER_SASL_CREDS) {
            Some(reader.read_octet_string(SERVER_SASL_CREDS)?)
        } else {
            None
        };
        Ok(Self { result, server_sasl_credentials })
    }
}

/// Compare response
#[derive(Debug, Clone, PartialEq)]
pub struct CompareResult {
    pub result: LdapResult,
}

impl CompareResult {
    /// Whether the assertion matched
    pub fn matched(&self) -> bool {
        self.result.result_code == ResultCode::COMPARE_TRUE
    }
}

/// Extended response
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedResult {
    pub result: LdapResult,
    pub name: Option<String>,
    pub value: Option<Vec<u8>>,
}

impl ExtendedResult {
    pub fn new(result: LdapResult) -> Self {
        Self { result, name: None, value: None }
    }

    pub fn is_notice_of_disconnection(&self) -> bool {
        self.name.as_deref() == Some(OID_NOTICE_OF_DISCONNECTION)
    }

    pub(crate) fn write_to(&self, buf: &mut Buffer) -> Result<()> {
        buf.start_sequence(EXTENDED_RESPONSE)?;
        self.result.write_components(buf)?;
        if let Some(name) = &self.name {
            buf.write_string(EXTENDED_RESPONSE_NAME, name)?;
        }
        if let Some(value) = &self.value {
            buf.write_octet_string(EXTENDED_RESPONSE_VALUE, value)?;
        }
        buf.end_sequence()
    }

    pub(crate) fn read_from(reader: &mut Reader) -> Result<Self> {
        let result = LdapResult::read_components(reader)?;
        let name = if reader.peek_tag() == Some(EXTENDED_RESPONSE_NAME) {
            Some(reader.read_string(EXTENDED_RESPONSE_NAME)?)
        } else {
            None
        };
        let value = if reader.peek_tag() == Some(EXTENDED_RESPONSE_VALUE) {
            Some(reader.read_octet_string(EXTENDED_RESPONSE_VALUE)?)
        } else {
            None
        };
        Ok(Self { result, name, value })
    }
}

/// Search result entry
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResultEntry {
    pub dn: String,
    pub attributes: Vec<Attribute>,
    pub controls: Vec<Control>,
}

impl SearchResultEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: Vec::new(),
            controls: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// First value of the named attribute as UTF-8
    pub fn first_value(&self, name: &str) -> Option<String> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .and_then(|a| a.values.first())
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }

    pub(crate) fn write_to(&self, buf: &mut Buffer) -> Result<()> {
        buf.start_sequence(SEARCH_RESULT_ENTRY)?;
        buf.write_string(codec::OCTET_STRING, &self.dn)?;
        Attribute::write_list(&self.attributes, buf)?;
        buf.end_sequence()
    }

    pub(crate) fn read_from(reader: &mut Reader) -> Result<Self> {
        let dn = reader.read_string(codec::OCTET_STRING)?;
        let attributes = Attribute::read_list(reader)?;
        Ok(Self { dn, attributes, controls: Vec::new() })
    }
}

/// Search result reference (continuation URIs)
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResultReference {
    pub uris: Vec<String>,
    pub controls: Vec<Control>,
}

impl SearchResultReference {
    pub(crate) fn write_to(&self, buf: &mut Buffer) -> Result<()> {
        buf.start_sequence(SEARCH_RESULT_REFERENCE)?;
        for uri in &self.uris {
            buf.write_string(codec::OCTET_STRING, uri)?;
        }
        buf.end_sequence()
    }

    pub(crate) fn read_from(reader: &mut Reader) -> Result<Self> {
        let mut uris = Vec::new();
        while reader.has_more() {
            uris.push(reader.read_string(codec::OCTET_STRING)?);
        }
        Ok(Self { uris, controls: Vec::new() })
    }
}

/// Intermediate response
#[derive(Debug, Clone, PartialEq)]
pub struct IntermediateResponse {
    pub name: Option<String>,
    pub value: Option<Vec<u8>>,
    pub controls: Vec<Control>,
}

impl IntermediateResponse {
    pub(crate) fn write_to(&self, buf: &mut Buffer) -> Result<()> {
        buf.start_sequence(INTERMEDIATE_RESPONSE)?;
        if let Some(name) = &self.name {
            buf.write_string(INTERMEDIATE_NAME, name)?;
        }
        if let Some(value) = &self.value {
            buf.write_octet_string(INTERMEDIATE_VALUE, value)?;
        }
        buf.end_sequence()
    }

    pub(crate) fn read_from(reader: &mut Reader) -> Result<Self> {
        let name = if reader.peek_tag() == Some(INTERMEDIATE_NAME) {
            Some(reader.read_string(INTERMEDIATE_NAME)?)
        } else {
            None
        };
        let value = if reader.peek_tag() == Some(INTERMEDIATE_VALUE) {
            Some(reader.read_octet_string(INTERMEDIATE_VALUE)?)
        } else {
            None
        };
        Ok(Self { name, value, controls: Vec::new() })
    }
}
