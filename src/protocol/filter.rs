//! Search filters as a typed tree

use crate::codec::{self, context, context_constructed, Buffer, Reader};
use crate::{LdapError, Result};

const AND: u8 = context_constructed(0);
const OR: u8 = context_constructed(1);
const NOT: u8 = context_constructed(2);
const EQUALITY: u8 = context_constructed(3);
const SUBSTRINGS: u8 = context_constructed(4);
const GREATER_OR_EQUAL: u8 = context_constructed(5);
const LESS_OR_EQUAL: u8 = context_constructed(6);
const PRESENT: u8 = context(7);
const APPROX: u8 = context_constructed(8);
const EXTENSIBLE: u8 = context_constructed(9);

const SUB_INITIAL: u8 = context(0);
const SUB_ANY: u8 = context(1);
const SUB_FINAL: u8 = context(2);

const MATCHING_RULE: u8 = context(1);
const MATCH_TYPE: u8 = context(2);
const MATCH_VALUE: u8 = context(3);
const DN_ATTRIBUTES: u8 = context(4);

/// Search filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equality(String, Vec<u8>),
    Substrings {
        attribute: String,
        initial: Option<Vec<u8>>,
        any: Vec<Vec<u8>>,
        final_: Option<Vec<u8>>,
    },
    GreaterOrEqual(String, Vec<u8>),
    LessOrEqual(String, Vec<u8>),
    Present(String),
    Approx(String, Vec<u8>),
    Extensible {
        matching_rule: Option<String>,
        attribute: Option<String>,
        value: Vec<u8>,
        dn_attributes: bool,
    },
}

impl Filter {
    pub fn present(attribute: impl Into<String>) -> Self {
        Filter::Present(attribute.into())
    }

    pub fn equality(attribute: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Filter::Equality(attribute.into(), value.into())
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    pub fn not(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// `(objectClass=*)`
    pub fn object_class_present() -> Self {
        Filter::present("objectClass")
    }

    pub fn write_to(&self, buf: &mut Buffer) -> Result<()> {
        match self {
            Filter::And(filters) | Filter::Or(filters) => {
                buf.start_sequence(if matches!(self, Filter::And(_)) { AND } else { OR })?;
                for filter in filters {
                    filter.write_to(buf)?;
                }
                buf.end_sequence()
            }
            Filter::Not(filter) => {
                buf.start_sequence(NOT)?;
                filter.write_to(buf)?;
                buf.end_sequence()
            }
            Filter::Equality(attr, value) => write_assertion(buf, EQUALITY, attr, value),
            Filter::GreaterOrEqual(attr, value) => write_assertion(buf, GREATER_OR_EQUAL, attr, value),
            Filter::LessOrEqual(attr, value) => write_assertion(buf, LESS_OR_EQUAL, attr, value),
            Filter::Approx(attr, value) => write_assertion(buf, APPROX, attr, value),
            Filter::Present(attr) => buf.write_string(PRESENT, attr),
            Filter::Substrings { attribute, initial, any, final_ } => {
                if initial.is_none() && any.is_empty() && final_.is_none() {
                    return Err(LdapError::new(
                        crate::ResultCode::CLIENT_SIDE_FILTER_ERROR,
                        "substring filter without components",
                    ));
                }
                buf.start_sequence(SUBSTRINGS)?;
                buf.write_string(codec::OCTET_STRING, attribute)?;
                buf.start_sequence(codec::SEQUENCE)?;
                if let Some(initial) = initial {
                    buf.write_octet_string(SUB_INITIAL, initial)?;
                }
                for part in any {
                    buf.write_octet_string(SUB_ANY, part)?;
                }
                if let Some(final_) = final_ {
                    buf.write_octet_string(SUB_FINAL, final_)?;
                }
                buf.end_sequence()?;
                buf.end_sequence()
            }
            Filter::Extensible { matching_rule, attribute, value, dn_attributes } => {
                buf.start_sequence(EXTENSIBLE)?;
                if let Some(rule) = matching_rule {
                    buf.write_string(MATCHING_RULE, rule)?;
                }
                if let Some(attr) = attribute {
                    buf.write_string(MATCH_TYPE, attr)?;
                }
                buf.write_octet_string(MATCH_VALUE, value)?;
                if *dn_attributes {
                    buf.write_boolean(DN_ATTRIBUTES, true)?;
                }
                buf.end_sequence()
            }
        }
    }

    pub fn read_from(reader: &mut Reader) -> Result<Self> {
        let tag = reader
            .peek_tag()
            .ok_or_else(|| LdapError::decoding("unexpected EOF reading filter"))?;
        match tag {
            AND | OR => {
                let mut set = reader.read_sequence(tag)?;
                let mut filters = Vec::new();
                while set.has_more() {
                    filters.push(Filter::read_from(&mut set)?);
                }
                Ok(if tag == AND { Filter::And(filters) } else { Filter::Or(filters) })
            }
            NOT => {
                let mut inner = reader.read_sequence(NOT)?;
                Ok(Filter::Not(Box::new(Filter::read_from(&mut inner)?)))
            }
            EQUALITY | GREATER_OR_EQUAL | LESS_OR_EQUAL | APPROX => {
                let mut ava = reader.read_sequence(tag)?;
                let attr = ava.read_string(codec::OCTET_STRING)?;
                let value = ava.read_octet_string(codec::OCTET_STRING)?;
                Ok(match tag {
                    EQUALITY => Filter::Equality(attr, value),
                    GREATER_OR_EQUAL => Filter::GreaterOrEqual(attr, value),
                    LESS_OR_EQUAL => Filter::LessOrEqual(attr, value),
                    _ => Filter::Approx(attr, value),
                })
            }
            PRESENT => Ok(Filter::Present(reader.read_string(PRESENT)?)),
            SUBSTRINGS => {
                let mut seq = reader.read_sequence(SUBSTRINGS)?;
                let attribute = seq.read_string(codec::OCTET_STRING)?;
                let mut parts = seq.read_sequence(codec::SEQUENCE)?;
                let (mut initial, mut any, mut final_) = (None, Vec::new(), None);
                while let Some(part) = parts.peek_tag() {
                    match part {
                        SUB_INITIAL => initial = Some(parts.read_octet_string(SUB_INITIAL)?),
                        SUB_ANY => any.push(parts.read_octet_string(SUB_ANY)?),
                        SUB_FINAL => final_ = Some(parts.read_octet_string(SUB_FINAL)?),
                        other => {
                            return Err(LdapError::decoding(format!("invalid substring tag 0x{:02X}", other)))
                        }
                    }
                }
                Ok(Filter::Substrings { attribute, initial, any, final_ })
            }
            EXTENSIBLE => {
                let mut seq = reader.read_sequence(EXTENSIBLE)?;
                let matching_rule = if seq.peek_tag() == Some(MATCHING_RULE) {
                    Some(seq.read_string(MATCHING_RULE)?)
                } else {
                    None
                };
                let attribute = if seq.peek_tag() == Some(MATCH_TYPE) {
                    Some(seq.read_string(MATCH_TYPE)?)
                } else {
                    None
                };
                let value = seq.read_octet_string(MATCH_VALUE)?;
                let dn_attributes = if seq.peek_tag() == Some(DN_ATTRIBUTES) {
                    seq.read_boolean(DN_ATTRIBUTES)?
                } else {
                    false
                };
                Ok(Filter::Extensible { matching_rule, attribute, value, dn_attributes })
            }
            other => Err(LdapError::decoding(format!("invalid filter tag 0x{:02X}", other))),
        }
    }
}

fn write_assertion(buf: &mut Buffer, tag: u8, attribute: &str, value: &[u8]) -> Result<()> {
    buf.start_sequence(tag)?;
    buf.write_string(codec::OCTET_STRING, attribute)?;
    buf.write_octet_string(codec::OCTET_STRING, value)?;
    buf.end_sequence()
}
