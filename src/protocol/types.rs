//! Shared protocol values: attributes, modifications and controls

use crate::codec::{self, Buffer, Reader};
use crate::Result;
use super::consts::*;

/// Attribute description with its values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub values: Vec<Vec<u8>>,
}

impl Attribute {
    pub fn new<I, V>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Vec<u8>>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub(crate) fn write_to(&self, buf: &mut Buffer) -> Result<()> {
        buf.start_sequence(codec::SEQUENCE)?;
        buf.write_string(codec::OCTET_STRING, &self.name)?;
        buf.start_sequence(codec::SET)?;
        for value in &self.values {
            buf.write_octet_string(codec::OCTET_STRING, value)?;
        }
        buf.end_sequence()?;
        buf.end_sequence()
    }

    pub(crate) fn read_from(reader: &mut Reader) -> Result<Self> {
        let mut seq = reader.read_sequence(codec::SEQUENCE)?;
        let name = seq.read_string(codec::OCTET_STRING)?;
        let mut set = seq.read_sequence(codec::SET)?;
        let mut values = Vec::new();
        while set.has_more() {
            values.push(set.read_octet_string(codec::OCTET_STRING)?);
        }
        Ok(Self { name, values })
    }

    /// Write `SEQUENCE OF Attribute`
    pub(crate) fn write_list(attributes: &[Attribute], buf: &mut Buffer) -> Result<()> {
        buf.start_sequence(codec::SEQUENCE)?;
        for attribute in attributes {
            attribute.write_to(buf)?;
        }
        buf.end_sequence()
    }

    pub(crate) fn read_list(reader: &mut Reader) -> Result<Vec<Attribute>> {
        let mut seq = reader.read_sequence(codec::SEQUENCE)?;
        let mut attributes = Vec::new();
        while seq.has_more() {
            attributes.push(Attribute::read_from(&mut seq)?);
        }
        Ok(attributes)
    }
}

/// One change of a modify request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    pub operation: ModificationType,
    pub attribute: Attribute,
}

impl Modification {
    pub fn new(operation: ModificationType, attribute: Attribute) -> Self {
        Self { operation, attribute }
    }

    pub fn replace<I, V>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Vec<u8>>,
    {
        Self::new(ModificationType::Replace, Attribute::new(name, values))
    }
}

/// Request or response control
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub oid: String,
    pub criticality: bool,
    pub value: Option<Vec<u8>>,
}

impl Control {
    pub fn new(oid: impl Into<String>, criticality: bool, value: Option<Vec<u8>>) -> Self {
        Self {
            oid: oid.into(),
            criticality,
            value,
        }
    }

    /// Persistent search control (`changeTypes`, `changesOnly`, `returnECs`)
    pub fn persistent_search(change_types: i64, changes_only: bool, return_ecs: bool) -> Result<Self> {
        let mut buf = Buffer::new();
        buf.start_sequence(codec::SEQUENCE)?;
        buf.write_integer(codec::INTEGER, change_types)?;
        buf.write_boolean(codec::BOOLEAN, changes_only)?;
        buf.write_boolean(codec::BOOLEAN, return_ecs)?;
        buf.end_sequence()?;
        Ok(Self::new(OID_PERSISTENT_SEARCH, true, Some(buf.into_vec()?)))
    }

    /// Content synchronization request control with the given mode
    pub fn sync_request(mode: i64, cookie: Option<&[u8]>) -> Result<Self> {
        let mut buf = Buffer::new();
        buf.start_sequence(codec::SEQUENCE)?;
        buf.write_enumerated(codec::ENUMERATED, mode)?;
        if let Some(cookie) = cookie {
            buf.write_octet_string(codec::OCTET_STRING, cookie)?;
        }
        buf.end_sequence()?;
        Ok(Self::new(OID_SYNC_REQUEST, true, Some(buf.into_vec()?)))
    }

    /// Mode of a sync request control, if this is one and it decodes
    pub fn sync_request_mode(&self) -> Option<i64> {
        if self.oid != OID_SYNC_REQUEST {
            return None;
        }
        let value = self.value.as_ref()?;
        let mut reader = Reader::new(value);
        let mut seq = reader.read_sequence(codec::SEQUENCE).ok()?;
        seq.read_enumerated(codec::ENUMERATED).ok()
    }

    pub(crate) fn write_to(&self, buf: &mut Buffer) -> Result<()> {
        buf.start_sequence(codec::SEQUENCE)?;
        buf.write_string(codec::OCTET_STRING, &self.oid)?;
        if self.criticality {
            buf.write_boolean(codec::BOOLEAN, true)?;
        }
        if let Some(value) = &self.value {
            buf.write_octet_string(codec::OCTET_STRING, value)?;
        }
        buf.end_sequence()
    }

    pub(crate) fn read_from(reader: &mut Reader) -> Result<Self> {
        let mut seq = reader.read_sequence(codec::SEQUENCE)?;
        let oid = seq.read_string(codec::OCTET_STRING)?;
        let criticality = if seq.peek_tag() == Some(codec::BOOLEAN) {
            seq.read_boolean(codec::BOOLEAN)?
        } else {
            false
        };
        let value = if seq.peek_tag() == Some(codec::OCTET_STRING) {
            Some(seq.read_octet_string(codec::OCTET_STRING)?)
        } else {
            None
        };
        Ok(Self { oid, criticality, value })
    }

    /// Write the message-level `[0] Controls` element, if any
    pub(crate) fn write_list(controls: &[Control], buf: &mut Buffer) -> Result<()> {
        if controls.is_empty() {
            return Ok(());
        }
        buf.start_sequence(CONTROLS)?;
        for control in controls {
            control.write_to(buf)?;
        }
        buf.end_sequence()
    }

    pub(crate) fn read_list(reader: &mut Reader) -> Result<Vec<Control>> {
        let mut seq = reader.read_sequence(CONTROLS)?;
        let mut controls = Vec::new();
        while seq.has_more() {
            controls.push(Control::read_from(&mut seq)?);
        }
        Ok(controls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_list() {
        let controls = vec![
            Control::new("1.2.840.113556.1.4.319", false, Some(vec![0x30, 0x00])),
            Control::new("1.3.6.1.4.1.42.2.27.8.5.1", true, None),
        ];
        let mut buf = Buffer::new();
        Control::write_list(&controls, &mut buf).unwrap();
        let data = buf.to_bytes();
        assert_eq!(data[0], CONTROLS);

        let mut reader = Reader::new(&data);
        assert_eq!(Control::read_list(&mut reader).unwrap(), controls);
    }

    #[test]
    fn test_sync_request_mode() {
        let control = Control::sync_request(SYNC_MODE_REFRESH_AND_PERSIST, Some(b"cookie")).unwrap();
        assert_eq!(control.sync_request_mode(), Some(SYNC_MODE_REFRESH_AND_PERSIST));

        let other = Control::new(OID_PERSISTENT_SEARCH, true, None);
        assert_eq!(other.sync_request_mode(), None);
    }

    #[test]
    fn test_attribute_encoding() {
        let attribute = Attribute::new("objectClass", ["top", "person"]);
        let mut buf = Buffer::new();
        attribute.write_to(&mut buf).unwrap();
        let data = buf.to_bytes();
        let mut reader = Reader::new(&data);
        let decoded = Attribute::read_from(&mut reader).unwrap();
        assert_eq!(decoded.values, vec![b"top".to_vec(), b"person".to_vec()]);
    }
}
