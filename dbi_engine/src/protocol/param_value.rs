use crate::error::{DbiError, Result};

const TAG_NULL: u8 = 0;
const TAG_TEXT: u8 = 1;
const TAG_BINARY: u8 = 2;

/// Host-side value for one positional parameter.
///
/// Text vs. binary is the caller's explicit choice; nothing is inferred
/// from the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Null,
    Text(String),
    Binary(Vec<u8>),
}

impl ParamValue {
    pub fn text(s: impl Into<String>) -> Self {
        ParamValue::Text(s.into())
    }

    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        ParamValue::Binary(bytes.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let (tag, payload): (u8, &[u8]) = match self {
            ParamValue::Null => (TAG_NULL, &[]),
            ParamValue::Text(s) => (TAG_TEXT, s.as_bytes()),
            ParamValue::Binary(b) => (TAG_BINARY, b.as_slice()),
        };
        let mut out = Vec::with_capacity(5 + payload.len());
        out.push(tag);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    /// Decodes one value and returns it with the number of bytes consumed.
    pub fn deserialize(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 5 {
            return Err(DbiError::ValidationError(
                "ParamValue buffer too short".to_string(),
            ));
        }
        let tag = data[0];
        let len = u32::from_le_bytes([data[1], data[2], data[3], data[4]]) as usize;
        let consumed = 5usize.saturating_add(len);

        if data.len() < consumed {
            return Err(DbiError::ValidationError(
                "ParamValue buffer truncated".to_string(),
            ));
        }

        let payload = &data[5..consumed];

        let value = match tag {
            TAG_NULL => ParamValue::Null,
            TAG_TEXT => {
                let s = std::str::from_utf8(payload).map_err(|_| {
                    DbiError::ValidationError("Invalid UTF-8 in text parameter".to_string())
                })?;
                ParamValue::Text(s.to_string())
            }
            TAG_BINARY => ParamValue::Binary(payload.to_vec()),
            other => {
                return Err(DbiError::ValidationError(format!(
                    "Unknown ParamValue tag: {}",
                    other
                )))
            }
        };

        Ok((value, consumed))
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

impl From<Option<&str>> for ParamValue {
    fn from(s: Option<&str>) -> Self {
        s.map_or(ParamValue::Null, ParamValue::from)
    }
}

impl From<&[u8]> for ParamValue {
    fn from(b: &[u8]) -> Self {
        ParamValue::Binary(b.to_vec())
    }
}

pub fn deserialize_params(data: &[u8]) -> Result<Vec<ParamValue>> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let (p, n) = ParamValue::deserialize(&data[offset..])?;
        out.push(p);
        offset += n;
    }
    Ok(out)
}

pub fn serialize_params(params: &[ParamValue]) -> Vec<u8> {
    params.iter().flat_map(ParamValue::serialize).collect()
}
