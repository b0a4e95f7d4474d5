//! Request types

use crate::codec::{self, Buffer, Reader};
use crate::{LdapError, Result};
use super::consts::*;
use super::{Attribute, Control, Filter, Modification};

/// Add request
#[derive(Debug, Clone, PartialEq)]
pub struct AddRequest {
    pub dn: String,
    pub attributes: Vec<Attribute>,
    pub controls: Vec<Control>,
}

impl AddRequest {
    pub fn new(dn: impl Into<String>, attributes: Vec<Attribute>) -> Self {
        Self { dn: dn.into(), attributes, controls: Vec::new() }
    }
}

/// Delete request
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRequest {
    pub dn: String,
    pub controls: Vec<Control>,
}

impl DeleteRequest {
    pub fn new(dn: impl Into<String>) -> Self {
        Self { dn: dn.into(), controls: Vec::new() }
    }
}

/// Modify request
#[derive(Debug, Clone, PartialEq)]
pub struct ModifyRequest {
    pub dn: String,
    pub changes: Vec<Modification>,
    pub controls: Vec<Control>,
}

impl ModifyRequest {
    pub fn new(dn: impl Into<String>, changes: Vec<Modification>) -> Self {
        Self { dn: dn.into(), changes, controls: Vec::new() }
    }
}

/// Modify DN request
#[derive(Debug, Clone, PartialEq)]
pub struct ModifyDnRequest {
    pub dn: String,
    pub new_rdn: String,
    pub delete_old_rdn: bool,
    pub new_superior: Option<String>,
    pub controls: Vec<Control>,
}

impl ModifyDnRequest {
    pub fn new(dn: impl Into<String>, new_rdn: impl Into<String>, delete_old_rdn: bool) -> Self {
        Self {
            dn: dn.into(),
            new_rdn: new_rdn.into(),
            delete_old_rdn,
            new_superior: None,
            controls: Vec::new(),
        }
    }
}

/// Compare request
#[derive(Debug, Clone, PartialEq)]
pub struct CompareRequest {
    pub dn: String,
    pub attribute: String,
    pub assertion_value: Vec<u8>,
    pub controls: Vec<Control>,
}

impl CompareRequest {
    pub fn new(dn: impl Into<String>, attribute: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            dn: dn.into(),
            attribute: attribute.into(),
            assertion_value: value.into(),
            controls: Vec::new(),
        }
    }
}

/// Search request
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub base_dn: String,
    pub scope: SearchScope,
    pub deref_aliases: DerefAliases,
    pub size_limit: i32,
    pub time_limit: i32,
    pub types_only: bool,
    pub filter: Filter,
    pub attributes: Vec<String>,
    pub controls: Vec<Control>,
}

impl SearchRequest {
    pub fn new(base_dn: impl Into<String>, scope: SearchScope, filter: Filter) -> Self {
        Self {
            base_dn: base_dn.into(),
            scope,
            deref_aliases: DerefAliases::Never,
            size_limit: 0,
            time_limit: 0,
            types_only: false,
            filter,
            attributes: Vec::new(),
            controls: Vec::new(),
        }
    }

    /// Base-scoped `(objectClass=*)` search on the root DSE returning no attributes
    pub fn heartbeat() -> Self {
        let mut request = Self::new("", SearchScope::BaseObject, Filter::object_class_present());
        request.attributes.push("1.1".to_string());
        request
    }

    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_control(mut self, control: Control) -> Self {
        self.controls.push(control);
        self
    }

    /// A search that streams changes indefinitely and never completes by itself
    pub fn is_persistent(&self) -> bool {
        self.controls.iter().any(|c| {
            c.oid == OID_PERSISTENT_SEARCH
                || c.sync_request_mode() == Some(SYNC_MODE_REFRESH_AND_PERSIST)
        })
    }
}

/// Bind credentials
#[derive(Debug, Clone, PartialEq)]
pub enum BindAuthentication {
    Simple(Vec<u8>),
    Sasl {
        mechanism: String,
        credentials: Option<Vec<u8>>,
    },
}

/// Bind request
#[derive(Debug, Clone, PartialEq)]
pub struct BindRequest {
    pub name: String,
    pub authentication: BindAuthentication,
    pub controls: Vec<Control>,
}

impl BindRequest {
    pub fn simple(name: impl Into<String>, password: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            authentication: BindAuthentication::Simple(password.into()),
            controls: Vec::new(),
        }
    }

    pub fn anonymous() -> Self {
        Self::simple("", Vec::new())
    }

    pub fn sasl(mechanism: impl Into<String>, credentials: Option<Vec<u8>>) -> Self {
        Self {
            name: String::new(),
            authentication: BindAuthentication::Sasl {
                mechanism: mechanism.into(),
                credentials,
            },
            controls: Vec::new(),
        }
    }
}

/// Extended request
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedRequest {
    pub oid: String,
    pub value: Option<Vec<u8>>,
    pub controls: Vec<Control>,
}

impl ExtendedRequest {
    pub fn new(oid: impl Into<String>, value: Option<Vec<u8>>) -> Self {
        Self { oid: oid.into(), value, controls: Vec::new() }
    }

    pub fn start_tls() -> Self {
        Self::new(OID_START_TLS, None)
    }

    pub fn is_start_tls(&self) -> bool {
        self.oid == OID_START_TLS
    }
}

/// Abandon request
#[derive(Debug, Clone, PartialEq)]
pub struct AbandonRequest {
    pub message_id: i32,
    pub controls: Vec<Control>,
}

impl AbandonRequest {
    pub fn new(message_id: i32) -> Self {
        Self { message_id, controls: Vec::new() }
    }
}

/// Unbind request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnbindRequest {
    pub controls: Vec<Control>,
}

/// Any client request
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Add(AddRequest),
    Delete(DeleteRequest),
    Modify(ModifyRequest),
    ModifyDn(ModifyDnRequest),
    Compare(CompareRequest),
    Search(SearchRequest),
    Extended(ExtendedRequest),
    Bind(BindRequest),
    Abandon(AbandonRequest),
    Unbind(UnbindRequest),
}

impl Request {
    pub fn controls(&self) -> &[Control] {
        match self {
            Request::Add(r) => &r.controls,
            Request::Delete(r) => &r.controls,
            Request::Modify(r) => &r.controls,
            Request::ModifyDn(r) => &r.controls,
            Request::Compare(r) => &r.controls,
            Request::Search(r) => &r.controls,
            Request::Extended(r) => &r.controls,
            Request::Bind(r) => &r.controls,
            Request::Abandon(r) => &r.controls,
            Request::Unbind(r) => &r.controls,
        }
    }

    pub(crate) fn set_controls(&mut self, controls: Vec<Control>) {
        let slot = match self {
            Request::Add(r) => &mut r.controls,
            Request::Delete(r) => &mut r.controls,
            Request::Modify(r) => &mut r.controls,
            Request::ModifyDn(r) => &mut r.controls,
            Request::Compare(r) => &mut r.controls,
            Request::Search(r) => &mut r.controls,
            Request::Extended(r) => &mut r.controls,
            Request::Bind(r) => &mut r.controls,
            Request::Abandon(r) => &mut r.controls,
            Request::Unbind(r) => &mut r.controls,
        };
        *slot = controls;
    }

    /// Short name used in log lines
    pub fn name(&self) -> &'static str {
        match self {
            Request::Add(_) => "add",
            Request::Delete(_) => "delete",
            Request::Modify(_) => "modify",
            Request::ModifyDn(_) => "modifyDN",
            Request::Compare(_) => "compare",
            Request::Search(_) => "search",
            Request::Extended(r) if r.is_start_tls() => "startTLS",
            Request::Extended(_) => "extended",
            Request::Bind(_) => "bind",
            Request::Abandon(_) => "abandon",
            Request::Unbind(_) => "unbind",
        }
    }

    /// Bind and StartTLS must run alone on the connection
    pub fn is_bind_or_start_tls(&self) -> bool {
        match self {
            Request::Bind(_) => true,
            Request::Extended(r) => r.is_start_tls(),
            _ => false,
        }
    }

    pub fn is_timeout_eligible(&self) -> bool {
        match self {
            Request::Search(r) => !r.is_persistent(),
            _ => true,
        }
    }

    /// Write the protocol op element
    pub(crate) fn write_op(&self, buf: &mut Buffer) -> Result<()> {
        match self {
            Request::Bind(r) => {
                buf.start_sequence(BIND_REQUEST)?;
                buf.write_integer(codec::INTEGER, LDAP_VERSION)?;
                buf.write_string(codec::OCTET_STRING, &r.name)?;
                match &r.authentication {
                    BindAuthentication::Simple(password) => buf.write_octet_string(AUTH_SIMPLE, password)?,
                    BindAuthentication::Sasl { mechanism, credentials } => {
                        buf.start_sequence(AUTH_SASL)?;
                        buf.write_string(codec::OCTET_STRING, mechanism)?;
                        if let Some(credentials) = credentials {
                            buf.write_octet_string(codec::OCTET_STRING, credentials)?;
                        }
                        buf.end_sequence()?;
                    }
                }
                buf.end_sequence()
            }
            Request::Unbind(_) => buf.write_null(UNBIND_REQUEST),
            Request::Search(r) => {
                buf.start_sequence(SEARCH_REQUEST)?;
                buf.write_string(codec::OCTET_STRING, &r.base_dn)?;
                buf.write_enumerated(codec::ENUMERATED, r.scope.as_i64())?;
                buf.write_enumerated(codec::ENUMERATED, r.deref_aliases.as_i64())?;
                buf.write_integer(codec::INTEGER, r.size_limit as i64)?;
                buf.write_integer(codec::INTEGER, r.time_limit as i64)?;
                buf.write_boolean(codec::BOOLEAN, r.types_only)?;
                r.filter.write_to(buf)?;
                buf.start_sequence(codec::SEQUENCE)?;
                for attribute in &r.attributes {
                    buf.write_string(codec::OCTET_STRING, attribute)?;
                }
                buf.end_sequence()?;
                buf.end_sequence()
            }
            Request::Modify(r) => {
                buf.start_sequence(MODIFY_REQUEST)?;
                buf.write_string(codec::OCTET_STRING, &r.dn)?;
                buf.start_sequence(codec::SEQUENCE)?;
                for change in &r.changes {
                    buf.start_sequence(codec::SEQUENCE)?;
                    buf.write_enumerated(codec::ENUMERATED, change.operation.as_i64())?;
                    change.attribute.write_to(buf)?;
                    buf.end_sequence()?;
                }
                buf.end_sequence()?;
                buf.end_sequence()
            }
            Request::Add(r) => {
                buf.start_sequence(ADD_REQUEST)?;
                buf.write_string(codec::OCTET_STRING, &r.dn)?;
                Attribute::write_list(&r.attributes, buf)?;
                buf.end_sequence()
            }
            Request::Delete(r) => buf.write_string(DEL_REQUEST, &r.dn),
            Request::ModifyDn(r) => {
                buf.start_sequence(MODIFY_DN_REQUEST)?;
                buf.write_string(codec::OCTET_STRING, &r.dn)?;
                buf.write_string(codec::OCTET_STRING, &r.new_rdn)?;
                buf.write_boolean(codec::BOOLEAN, r.delete_old_rdn)?;
                if let Some(superior) = &r.new_superior {
                    buf.write_string(NEW_SUPERIOR, superior)?;
                }
                buf.end_sequence()
            }
            Request::Compare(r) => {
                buf.start_sequence(COMPARE_REQUEST)?;
                buf.write_string(codec::OCTET_STRING, &r.dn)?;
                buf.start_sequence(codec::SEQUENCE)?;
                buf.write_string(codec::OCTET_STRING, &r.attribute)?;
                buf.write_octet_string(codec::OCTET_STRING, &r.assertion_value)?;
                buf.end_sequence()?;
                buf.end_sequence()
            }
            Request::Abandon(r) => buf.write_integer(ABANDON_REQUEST, r.message_id as i64),
            Request::Extended(r) => {
                buf.start_sequence(EXTENDED_REQUEST)?;
                buf.write_string(EXTENDED_REQUEST_NAME, &r.oid)?;
                if let Some(value) = &r.value {
                    buf.write_octet_string(EXTENDED_REQUEST_VALUE, value)?;
                }
                buf.end_sequence()
            }
        }
    }

    /// Read a request protocol op; `None` if the tag is not a request
    pub(crate) fn read_op(reader: &mut Reader, tag: u8) -> Result<Option<Self>> {
        let request = match tag {
            BIND_REQUEST => {
                let mut op = reader.read_sequence(tag)?;
                let version = op.read_integer(codec::INTEGER)?;
                if version != LDAP_VERSION {
                    return Err(LdapError::decoding(format!("unsupported LDAP version {}", version)));
                }
                let name = op.read_string(codec::OCTET_STRING)?;
                let authentication = match op.peek_tag() {
                    Some(AUTH_SIMPLE) => BindAuthentication::Simple(op.read_octet_string(AUTH_SIMPLE)?),
                    Some(AUTH_SASL) => {
                        let mut sasl = op.read_sequence(AUTH_SASL)?;
                        let mechanism = sasl.read_string(codec::OCTET_STRING)?;
                        let credentials = if sasl.has_more() {
                            Some(sasl.read_octet_string(codec::OCTET_STRING)?)
                        } else {
                            None
                        };
                        BindAuthentication::Sasl { mechanism, credentials }
                    }
                    other => {
                        return Err(LdapError::decoding(format!("invalid bind authentication {:?}", other)))
                    }
                };
                Request::Bind(BindRequest { name, authentication, controls: Vec::new() })
            }
            UNBIND_REQUEST => {
                reader.read_null(tag)?;
                Request::Unbind(UnbindRequest::default())
            }
            SEARCH_REQUEST => {
                let mut op = reader.read_sequence(tag)?;
                let base_dn = op.read_string(codec::OCTET_STRING)?;
                let scope = op.read_enumerated(codec::ENUMERATED)?;
                let scope = SearchScope::from_i64(scope)
                    .ok_or_else(|| LdapError::decoding(format!("invalid search scope {}", scope)))?;
                let deref = op.read_enumerated(codec::ENUMERATED)?;
                let deref_aliases = DerefAliases::from_i64(deref)
                    .ok_or_else(|| LdapError::decoding(format!("invalid deref aliases {}", deref)))?;
                let size_limit = op.read_integer(codec::INTEGER)? as i32;
                let time_limit = op.read_integer(codec::INTEGER)? as i32;
                let types_only = op.read_boolean(codec::BOOLEAN)?;
                let filter = Filter::read_from(&mut op)?;
                let mut attrs = op.read_sequence(codec::SEQUENCE)?;
                let mut attributes = Vec::new();
                while attrs.has_more() {
                    attributes.push(attrs.read_string(codec::OCTET_STRING)?);
                }
                Request::Search(SearchRequest {
                    base_dn,
                    scope,
                    deref_aliases,
                    size_limit,
                    time_limit,
                    types_only,
                    filter,
                    attributes,
                    controls: Vec::new(),
                })
            }
            MODIFY_REQUEST => {
                let mut op = reader.read_sequence(tag)?;
                let dn = op.read_string(codec::OCTET_STRING)?;
                let mut list = op.read_sequence(codec::SEQUENCE)?;
                let mut changes = Vec::new();
                while list.has_more() {
                    let mut change = list.read_sequence(codec::SEQUENCE)?;
                    let kind = change.read_enumerated(codec::ENUMERATED)?;
                    let operation = ModificationType::from_i64(kind)
                        .ok_or_else(|| LdapError::decoding(format!("invalid modification type {}", kind)))?;
                    changes.push(Modification::new(operation, Attribute::read_from(&mut change)?));
                }
                Request::Modify(ModifyRequest { dn, changes, controls: Vec::new() })
            }
            ADD_REQUEST => {
                let mut op = reader.read_sequence(tag)?;
                let dn = op.read_string(codec::OCTET_STRING)?;
                let attributes = Attribute::read_list(&mut op)?;
                Request::Add(AddRequest { dn, attributes, controls: Vec::new() })
            }
            DEL_REQUEST => Request::Delete(DeleteRequest::new(reader.read_string(tag)?)),
            MODIFY_DN_REQUEST => {
                let mut op = reader.read_sequence(tag)?;
                let dn = op.read_string(codec::OCTET_STRING)?;
                let new_rdn = op.read_string(codec::OCTET_STRING)?;
                let delete_old_rdn = op.read_boolean(codec::BOOLEAN)?;
                let new_superior = if op.peek_tag() == Some(NEW_SUPERIOR) {
                    Some(op.read_string(NEW_SUPERIOR)?)
                } else {
                    None
                };
                Request::ModifyDn(ModifyDnRequest { dn, new_rdn, delete_old_rdn, new_superior, controls: Vec::new() })
            }
            COMPARE_REQUEST => {
                let mut op = reader.read_sequence(tag)?;
                let dn = op.read_string(codec::OCTET_STRING)?;
                let mut ava = op.read_sequence(codec::SEQUENCE)?;
                let attribute = ava.read_string(codec::OCTET_STRING)?;
                let assertion_value = ava.read_octet_string(codec::OCTET_STRING)?;
                Request::Compare(CompareRequest { dn, attribute, assertion_value, controls: Vec::new() })
            }
            ABANDON_REQUEST => Request::Abandon(AbandonRequest::new(reader.read_integer(tag)? as i32)),
            EXTENDED_REQUEST => {
                let mut op = reader.read_sequence(tag)?;
                let oid = op.read_string(EXTENDED_REQUEST_NAME)?;
                let value = if op.peek_tag() == Some(EXTENDED_REQUEST_VALUE) {
                    Some(op.read_octet_string(EXTENDED_REQUEST_VALUE)?)
                } else {
                    None
                };
                Request::Extended(ExtendedRequest { oid, value, controls: Vec::new() })
            }
            _ => return Ok(None),
        };
        Ok(Some(request))
    }
}
