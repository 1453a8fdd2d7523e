use thiserror::Error;

/// Envelope format version this build reads and writes.
pub const ENVELOPE_VERSION: u8 = 1;

/// Well-known key: the value is the hex hash this artifact supersedes.
///
/// Attached as an upload side channel so peers can retire the replaced
/// artifact; the envelope itself is stored out-of-band, never inside the
/// container file.
pub const KEY_REPLACES: &str = "replaces";

/// Errors from metadata envelope encoding and parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The version byte does not match [`ENVELOPE_VERSION`].
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),

    /// A declared length runs past the end of the buffer.
    #[error("envelope truncated")]
    Truncated,

    /// Bytes remain after the declared field count was consumed.
    #[error("{0} trailing bytes after last envelope field")]
    TrailingData(usize),

    /// The same key appears twice in one envelope.
    #[error("duplicate envelope key {0:?}")]
    DuplicateKey(String),

    /// A key is empty, whitespace-only, or not valid UTF-8.
    #[error("invalid envelope key: {0}")]
    InvalidKey(String),

    /// A key or value exceeds the 16-bit length bound.
    #[error("envelope field {key:?} is {len} bytes, limit is 65535")]
    FieldTooLarge { key: String, len: usize },

    /// More fields than the 16-bit count can describe.
    #[error("envelope cannot hold more than 65535 fields")]
    TooManyFields,
}

/// A small key/value metadata blob attached to an artifact out-of-band.
///
/// Keys are unique; insertion order is irrelevant for lookup but preserved
/// for re-serialization, so a parse/encode cycle is byte-identical.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    fields: Vec<(String, Vec<u8>)>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an envelope from key/value pairs, validating each.
    pub fn from_pairs<K, V, I>(pairs: I) -> Result<Self, EnvelopeError>
    where
        K: Into<String>,
        V: Into<Vec<u8>>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut envelope = Self::new();
        for (key, value) in pairs {
            envelope.insert(key, value)?;
        }
        Ok(envelope)
    }

    /// Insert a field, replacing any existing value for the same key.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Result<(), EnvelopeError> {
        let key = key.into();
        let value = value.into();

        if key.trim().is_empty() {
            return Err(EnvelopeError::InvalidKey(key));
        }
        if key.len() > u16::MAX as usize {
            let len = key.len();
            return Err(EnvelopeError::FieldTooLarge { key, len });
        }
        if value.len() > u16::MAX as usize {
            return Err(EnvelopeError::FieldTooLarge {
                key,
                len: value.len(),
            });
        }

        if let Some(existing) = self.fields.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = value;
            return Ok(());
        }

        if self.fields.len() >= u16::MAX as usize {
            return Err(EnvelopeError::TooManyFields);
        }
        self.fields.push((key, value));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Serialize to bytes. An empty envelope costs zero bytes.
    pub fn encode(&self) -> Vec<u8> {
        if self.fields.is_empty() {
            return Vec::new();
        }

        let payload_len: usize = self
            .fields
            .iter()
            .map(|(k, v)| 4 + k.len() + v.len())
            .sum();
        let mut out = Vec::with_capacity(3 + payload_len);

        out.push(ENVELOPE_VERSION);
        out.extend_from_slice(&(self.fields.len() as u16).to_le_bytes());
        for (key, value) in &self.fields {
            out.extend_from_slice(&(key.len() as u16).to_le_bytes());
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(&(value.len() as u16).to_le_bytes());
            out.extend_from_slice(value);
        }

        out
    }

    /// Parse an envelope. Empty input yields an empty envelope.
    ///
    /// Pure function over the input slice: no I/O, and any leftover bytes
    /// after the declared field count are a format error rather than being
    /// silently ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        if bytes.is_empty() {
            return Ok(Self::new());
        }

        let mut pos = 0usize;

        let version = bytes[pos];
        pos += 1;
        if version != ENVELOPE_VERSION {
            return Err(EnvelopeError::UnsupportedVersion(version));
        }

        let field_count = read_u16(bytes, &mut pos)?;
        let mut fields: Vec<(String, Vec<u8>)> = Vec::with_capacity(field_count as usize);

        for _ in 0..field_count {
            let key_len = read_u16(bytes, &mut pos)? as usize;
            let key_bytes = read_slice(bytes, &mut pos, key_len)?;
            let key = std::str::from_utf8(key_bytes)
                .map_err(|_| EnvelopeError::InvalidKey(format!("{key_bytes:02X?}")))?
                .to_owned();

            if fields.iter().any(|(k, _)| *k == key) {
                return Err(EnvelopeError::DuplicateKey(key));
            }

            let value_len = read_u16(bytes, &mut pos)? as usize;
            let value = read_slice(bytes, &mut pos, value_len)?.to_vec();

            fields.push((key, value));
        }

        if pos != bytes.len() {
            return Err(EnvelopeError::TrailingData(bytes.len() - pos));
        }

        Ok(Self { fields })
    }
}

fn read_u16(bytes: &[u8], pos: &mut usize) -> Result<u16, EnvelopeError> {
    let end = pos.checked_add(2).ok_or(EnvelopeError::Truncated)?;
    if end > bytes.len() {
        return Err(EnvelopeError::Truncated);
    }
    let value = u16::from_le_bytes([bytes[*pos], bytes[*pos + 1]]);
    *pos = end;
    Ok(value)
}

fn read_slice<'a>(bytes: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], EnvelopeError> {
    let end = pos.checked_add(len).ok_or(EnvelopeError::Truncated)?;
    if end > bytes.len() {
        return Err(EnvelopeError::Truncated);
    }
    let slice = &bytes[*pos..end];
    *pos = end;
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope::from_pairs([
            (KEY_REPLACES, b"ABCD".to_vec()),
            ("origin", b"peer-7".to_vec()),
            ("note", Vec::new()),
        ])
        .unwrap()
    }

    #[test]
    fn round_trip_preserves_order_and_values() {
        let envelope = sample();
        let bytes = envelope.encode();
        let parsed = Envelope::decode(&bytes).unwrap();

        assert_eq!(parsed, envelope);
        assert_eq!(parsed.encode(), bytes);
    }

    #[test]
    fn empty_envelope_is_zero_bytes() {
        assert!(Envelope::new().encode().is_empty());
        assert!(Envelope::decode(&[]).unwrap().is_empty());
    }

    #[test]
    fn lookup_is_order_independent() {
        let envelope = sample();
        assert_eq!(envelope.get("origin"), Some(b"peer-7".as_slice()));
        assert_eq!(envelope.get(KEY_REPLACES), Some(b"ABCD".as_slice()));
        assert_eq!(envelope.get("missing"), None);
    }

    #[test]
    fn insert_replaces_existing_key() {
        let mut envelope = sample();
        envelope.insert("origin", b"peer-9".to_vec()).unwrap();

        assert_eq!(envelope.len(), 3);
        assert_eq!(envelope.get("origin"), Some(b"peer-9".as_slice()));
    }

    #[test]
    fn rejects_blank_keys() {
        let mut envelope = Envelope::new();
        assert!(matches!(
            envelope.insert("", b"x".to_vec()),
            Err(EnvelopeError::InvalidKey(_))
        ));
        assert!(matches!(
            envelope.insert("   ", b"x".to_vec()),
            Err(EnvelopeError::InvalidKey(_))
        ));
    }

    #[test]
    fn rejects_oversize_value() {
        let mut envelope = Envelope::new();
        let result = envelope.insert("big", vec![0u8; u16::MAX as usize + 1]);
        assert!(matches!(result, Err(EnvelopeError::FieldTooLarge { .. })));
    }

    #[test]
    fn any_truncation_fails() {
        let bytes = sample().encode();
        for cut in 1..bytes.len() {
            let result = Envelope::decode(&bytes[..cut]);
            assert!(result.is_err(), "prefix of {cut} bytes parsed successfully");
        }
    }

    #[test]
    fn trailing_garbage_rejected() {
        let mut bytes = sample().encode();
        bytes.push(0xFF);

        assert_eq!(
            Envelope::decode(&bytes),
            Err(EnvelopeError::TrailingData(1))
        );
    }

    #[test]
    fn wrong_version_rejected() {
        let mut bytes = sample().encode();
        bytes[0] = 2;

        assert_eq!(
            Envelope::decode(&bytes),
            Err(EnvelopeError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn duplicate_key_in_wire_data_rejected() {
        let mut bytes = Vec::new();
        bytes.push(ENVELOPE_VERSION);
        bytes.extend_from_slice(&2u16.to_le_bytes());
        for _ in 0..2 {
            bytes.extend_from_slice(&2u16.to_le_bytes());
            bytes.extend_from_slice(b"ab");
            bytes.extend_from_slice(&1u16.to_le_bytes());
            bytes.push(9);
        }

        assert_eq!(
            Envelope::decode(&bytes),
            Err(EnvelopeError::DuplicateKey("ab".into()))
        );
    }
}
