//! Protocol constants

/// Protocol op tags (APPLICATION class)
pub const BIND_REQUEST: u8 = 0x60;
pub const BIND_RESPONSE: u8 = 0x61;
pub const UNBIND_REQUEST: u8 = 0x42;
pub const SEARCH_REQUEST: u8 = 0x63;
pub const SEARCH_RESULT_ENTRY: u8 = 0x64;
pub const SEARCH_RESULT_DONE: u8 = 0x65;
pub const MODIFY_REQUEST: u8 = 0x66;
pub const MODIFY_RESPONSE: u8 = 0x67;
pub const ADD_REQUEST: u8 = 0x68;
pub const ADD_RESPONSE: u8 = 0x69;
pub const DEL_REQUEST: u8 = 0x4A;
pub const DEL_RESPONSE: u8 = 0x6B;
pub const MODIFY_DN_REQUEST: u8 = 0x6C;
pub const MODIFY_DN_RESPONSE: u8 = 0x6D;
pub const COMPARE_REQUEST: u8 = 0x6E;
pub const COMPARE_RESPONSE: u8 = 0x6F;
pub const ABANDON_REQUEST: u8 = 0x50;
pub const SEARCH_RESULT_REFERENCE: u8 = 0x73;
pub const EXTENDED_REQUEST: u8 = 0x77;
pub const EXTENDED_RESPONSE: u8 = 0x78;
pub const INTERMEDIATE_RESPONSE: u8 = 0x79;

/// Context tags inside protocol ops
pub const CONTROLS: u8 = 0xA0;
pub const AUTH_SIMPLE: u8 = 0x80;
pub const AUTH_SASL: u8 = 0xA3;
pub const REFERRAL: u8 = 0xA3;
pub const SERVER_SASL_CREDS: u8 = 0x87;
pub const NEW_SUPERIOR: u8 = 0x80;
pub const EXTENDED_REQUEST_NAME: u8 = 0x80;
pub const EXTENDED_REQUEST_VALUE: u8 = 0x81;
pub const EXTENDED_RESPONSE_NAME: u8 = 0x8A;
pub const EXTENDED_RESPONSE_VALUE: u8 = 0x8B;
pub const INTERMEDIATE_NAME: u8 = 0x80;
pub const INTERMEDIATE_VALUE: u8 = 0x81;

/// LDAP protocol version sent in bind requests
pub const LDAP_VERSION: i64 = 3;

/// StartTLS extended operation
pub const OID_START_TLS: &str = "1.3.6.1.4.1.1466.20037";
/// Notice of disconnection unsolicited notification
pub const OID_NOTICE_OF_DISCONNECTION: &str = "1.3.6.1.4.1.1466.20036";
/// Persistent search control
pub const OID_PERSISTENT_SEARCH: &str = "2.16.840.1.113730.3.4.3";
/// Content synchronization request control
pub const OID_SYNC_REQUEST: &str = "1.3.6.1.4.1.4203.1.9.1.1";

/// Sync request mode asking for refresh followed by persist
pub const SYNC_MODE_REFRESH_AND_PERSIST: i64 = 3;

/// Search scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum SearchScope {
    BaseObject = 0,
    SingleLevel = 1,
    WholeSubtree = 2,
    Subordinates = 3,
}

impl SearchScope {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(SearchScope::BaseObject),
            1 => Some(SearchScope::SingleLevel),
            2 => Some(SearchScope::WholeSubtree),
            3 => Some(SearchScope::Subordinates),
            _ => None,
        }
    }

    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

/// Alias dereferencing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum DerefAliases {
    Never = 0,
    InSearching = 1,
    FindingBaseObject = 2,
    Always = 3,
}

impl DerefAliases {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(DerefAliases::Never),
            1 => Some(DerefAliases::InSearching),
            2 => Some(DerefAliases::FindingBaseObject),
            3 => Some(DerefAliases::Always),
            _ => None,
        }
    }

    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

/// Modify request change type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum ModificationType {
    Add = 0,
    Delete = 1,
    Replace = 2,
    Increment = 3,
}

impl ModificationType {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(ModificationType::Add),
            1 => Some(ModificationType::Delete),
            2 => Some(ModificationType::Replace),
            3 => Some(ModificationType::Increment),
            _ => None,
        }
    }

    pub fn as_i64(self) -> i64 {
        self as i64
    }
}
