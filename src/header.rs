//! Volume header: the `key = value` text stored next to the raw voxel payload

use crate::error::DecodeError;
use crate::types::ElementType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Header key holding the three dimension sizes
pub const DIM_SIZE_KEY: &str = "DimSize";

/// Header key holding the element type token
pub const ELEMENT_TYPE_KEY: &str = "ElementType";

/// Header key naming the payload entry; rendered last
pub const ELEMENT_DATA_FILE_KEY: &str = "ElementDataFile";

const BYTE_ORDER_KEYS: [&str; 2] = ["ElementByteOrderMSB", "BinaryDataByteOrderMSB"];

/// A parsed header value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HeaderValue {
    /// Space separated integers, e.g. `DimSize = 67 41 58`
    Integers(Vec<i64>),
    /// Space separated numbers that are not all integers, e.g. `ElementSpacing = 0.2 0.2 0.2`
    Numbers(Vec<f64>),
    /// Single literal token, e.g. `ElementType = MET_FLOAT`
    Token(String),
}

impl HeaderValue {
    /// A value with internal spaces is a number list; anything else is a token.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.contains(char::is_whitespace) {
            let parts: Vec<&str> = raw.split_whitespace().collect();
            if let Ok(ints) = parts.iter().map(|p| p.parse::<i64>()).collect::<Result<Vec<_>, _>>() {
                return HeaderValue::Integers(ints);
            }
            if let Ok(nums) = parts.iter().map(|p| p.parse::<f64>()).collect::<Result<Vec<_>, _>>() {
                return HeaderValue::Numbers(nums);
            }
        }
        HeaderValue::Token(raw.to_string())
    }

    pub fn as_token(&self) -> Option<&str> {
        match self {
            HeaderValue::Token(token) => Some(token),
            _ => None,
        }
    }

    pub fn as_integers(&self) -> Option<&[i64]> {
        match self {
            HeaderValue::Integers(values) => Some(values),
            _ => None,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Integers(values) => {
                let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                f.write_str(&parts.join(" "))
            }
            HeaderValue::Numbers(values) => {
                let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                f.write_str(&parts.join(" "))
            }
            HeaderValue::Token(token) => f.write_str(token),
        }
    }
}

/// Parsed volume header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeHeader {
    /// Dimension sizes; the first varies fastest in the payload
    pub dims: [usize; 3],

    /// Element type of the payload
    pub element_type: ElementType,

    /// Every other header entry, in file order
    pub fields: Vec<(String, HeaderValue)>,
}

impl VolumeHeader {
    /// Create a header with no pass-through fields
    pub fn new(dims: [usize; 3], element_type: ElementType) -> Self {
        Self {
            dims,
            element_type,
            fields: Vec::new(),
        }
    }

    /// Add or replace a pass-through field
    pub fn with_field(mut self, key: impl Into<String>, value: HeaderValue) -> Self {
        self.set_field(key, value);
        self
    }

    pub fn set_field(&mut self, key: impl Into<String>, value: HeaderValue) {
        let key = key.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    /// Get a pass-through field
    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Number of voxels, `None` on overflow
    pub fn voxel_count(&self) -> Option<usize> {
        self.dims
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
    }

    /// Expected payload length in bytes, `None` on overflow
    pub fn payload_len(&self) -> Option<usize> {
        self.voxel_count()?
            .checked_mul(self.element_type.size_in_bytes())
    }

    /// Whether the payload is stored most-significant byte first
    pub fn is_big_endian(&self) -> bool {
        BYTE_ORDER_KEYS.iter().any(|key| {
            self.get(key)
                .and_then(HeaderValue::as_token)
                .is_some_and(|token| token.eq_ignore_ascii_case("true"))
        })
    }

    /// Parse header text
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let mut dims = None;
        let mut element_type = None;
        let mut fields = Vec::new();

        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, raw) = line.split_once('=').ok_or_else(|| {
                DecodeError::MalformedHeader(format!(
                    "line {} is not a 'key = value' pair: {:?}",
                    line_no + 1,
                    line
                ))
            })?;
            let key = key.trim();
            let value = HeaderValue::parse(raw);

            match key {
                DIM_SIZE_KEY => dims = Some(parse_dims(&value)?),
                ELEMENT_TYPE_KEY => {
                    let token = value.to_string();
                    element_type = Some(
                        ElementType::from_token(&token)
                            .ok_or(DecodeError::UnsupportedElementType(token))?,
                    );
                }
                _ => fields.push((key.to_string(), value)),
            }
        }

        Ok(Self {
            dims: dims.ok_or_else(|| {
                DecodeError::MalformedHeader(format!("missing {}", DIM_SIZE_KEY))
            })?,
            element_type: element_type.ok_or_else(|| {
                DecodeError::MalformedHeader(format!("missing {}", ELEMENT_TYPE_KEY))
            })?,
            fields,
        })
    }

    /// Render back to header text. `ElementDataFile` is kept last, as
    /// MetaImage readers expect.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let mut data_file = None;
        for (key, value) in &self.fields {
            if key == ELEMENT_DATA_FILE_KEY {
                data_file = Some(value);
                continue;
            }
            out.push_str(&format!("{} = {}\n", key, value));
        }
        out.push_str(&format!(
            "{} = {} {} {}\n",
            DIM_SIZE_KEY, self.dims[0], self.dims[1], self.dims[2]
        ));
        out.push_str(&format!("{} = {}\n", ELEMENT_TYPE_KEY, self.element_type));
        if let Some(value) = data_file {
            out.push_str(&format!("{} = {}\n", ELEMENT_DATA_FILE_KEY, value));
        }
        out
    }
}

fn parse_dims(value: &HeaderValue) -> Result<[usize; 3], DecodeError> {
    let ints = value.as_integers().ok_or_else(|| {
        DecodeError::MalformedHeader(format!("{} must be integers, got '{}'", DIM_SIZE_KEY, value))
    })?;
    if ints.len() != 3 {
        return Err(DecodeError::MalformedHeader(format!(
            "expected 3 dimensions, got {}",
            ints.len()
        )));
    }
    let mut dims = [0usize; 3];
    for (slot, &dim) in dims.iter_mut().zip(ints) {
        *slot = usize::try_from(dim)
            .ok()
            .filter(|&d| d > 0)
            .ok_or_else(|| {
                DecodeError::MalformedHeader(format!("dimension sizes must be positive, got {}", dim))
            })?;
    }
    Ok(dims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALLEN_HEADER: &str = "ObjectType = Image\n\
        NDims = 3\n\
        BinaryData = True\n\
        BinaryDataByteOrderMSB = False\n\
        ElementSpacing = 0.2 0.2 0.2\n\
        DimSize = 67 41 58\n\
        ElementType = MET_FLOAT\n\
        ElementDataFile = energy.raw\n";

    #[test]
    fn test_parse_allen_header() {
        let header = VolumeHeader::parse(ALLEN_HEADER).unwrap();
        assert_eq!(header.dims, [67, 41, 58]);
        assert_eq!(header.element_type, ElementType::Float);
        assert_eq!(header.payload_len(), Some(67 * 41 * 58 * 4));
        assert!(!header.is_big_endian());
        assert_eq!(
            header.get("ElementSpacing"),
            Some(&HeaderValue::Numbers(vec![0.2, 0.2, 0.2]))
        );
        assert_eq!(header.get("NDims"), Some(&HeaderValue::Token("3".to_string())));
    }

    #[test]
    fn test_value_kinds() {
        assert_eq!(HeaderValue::parse(" 2 2 2 "), HeaderValue::Integers(vec![2, 2, 2]));
        assert_eq!(HeaderValue::parse("UCHAR"), HeaderValue::Token("UCHAR".to_string()));
        assert_eq!(
            HeaderValue::parse("a b"),
            HeaderValue::Token("a b".to_string())
        );
    }

    #[test]
    fn test_header_errors() {
        let err = VolumeHeader::parse("DimSize = 2 2 2\nElementType = DOUBLE\n").unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedElementType(t) if t == "DOUBLE"));

        let err = VolumeHeader::parse("ElementType = UCHAR\n").unwrap_err();
        assert!(matches!(err, DecodeError::MalformedHeader(_)));

        let err = VolumeHeader::parse("DimSize = 2 2\nElementType = UCHAR\n").unwrap_err();
        assert!(matches!(err, DecodeError::MalformedHeader(_)));

        let err = VolumeHeader::parse("DimSize = 2 0 2\nElementType = UCHAR\n").unwrap_err();
        assert!(matches!(err, DecodeError::MalformedHeader(_)));

        let err = VolumeHeader::parse("DimSize 2 2 2\n").unwrap_err();
        assert!(matches!(err, DecodeError::MalformedHeader(_)));
    }

    #[test]
    fn test_render_keeps_data_file_last() {
        let header = VolumeHeader::parse(ALLEN_HEADER).unwrap();
        let text = header.to_text();
        assert!(text.ends_with("ElementDataFile = energy.raw\n"));
        assert_eq!(VolumeHeader::parse(&text).unwrap(), header);
    }

    #[test]
    fn test_big_endian_flag() {
        let header = VolumeHeader::new([1, 1, 1], ElementType::UInt)
            .with_field("ElementByteOrderMSB", HeaderValue::Token("True".to_string()));
        assert!(header.is_big_endian());
    }
}
