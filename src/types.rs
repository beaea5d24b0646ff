//! Core data types for brainmap

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// Voxel element types recognized in a volume header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    /// Unsigned 8-bit integer (`UCHAR`)
    UChar,
    /// Unsigned 32-bit integer (`UINT`)
    UInt,
    /// 32-bit floating point (`FLOAT`)
    Float,
}

impl ElementType {
    /// Look up a header token. Both the bare token (`UINT`) and the
    /// MetaImage form (`MET_UINT`) are accepted; anything else is rejected.
    pub fn from_token(token: &str) -> Option<Self> {
        let bare = token.trim();
        let bare = bare.strip_prefix("MET_").unwrap_or(bare);
        match bare {
            "UCHAR" => Some(ElementType::UChar),
            "UINT" => Some(ElementType::UInt),
            "FLOAT" => Some(ElementType::Float),
            _ => None,
        }
    }

    /// Token written when rendering a header
    pub fn token(&self) -> &'static str {
        match self {
            ElementType::UChar => "MET_UCHAR",
            ElementType::UInt => "MET_UINT",
            ElementType::Float => "MET_FLOAT",
        }
    }

    /// Size in bytes of one element
    pub fn size_in_bytes(&self) -> usize {
        match self {
            ElementType::UChar => 1,
            ElementType::UInt | ElementType::Float => 4,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// An RGB color triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };

    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse a 6-hex-digit triplet such as `"B0F0FF"`, with or without a leading `#`
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim();
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Self {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
        })
    }

    /// `#rrggbb` form
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Plane of section of an expression experiment. This is the acquisition
/// variant the loader iterates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionPlane {
    Coronal,
    Sagittal,
}

impl SectionPlane {
    /// Tag used in queries and archive file names
    pub fn tag(&self) -> &'static str {
        match self {
            SectionPlane::Coronal => "coronal",
            SectionPlane::Sagittal => "sagittal",
        }
    }
}

impl fmt::Display for SectionPlane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for SectionPlane {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "coronal" => Ok(SectionPlane::Coronal),
            "sagittal" => Ok(SectionPlane::Sagittal),
            other => Err(format!("unknown plane of section '{}'", other)),
        }
    }
}

/// Which product line of experiments to search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductFamily {
    #[default]
    Adult,
    Development,
    Both,
}

impl ProductFamily {
    /// Product abbreviation pattern understood by the query service
    pub fn abbreviation(&self) -> &'static str {
        match self {
            ProductFamily::Adult => "Mouse",
            ProductFamily::Development => "DevMouse",
            ProductFamily::Both => "*Mouse",
        }
    }
}

impl FromStr for ProductFamily {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "adult" => Ok(ProductFamily::Adult),
            "development" => Ok(ProductFamily::Development),
            "both" => Ok(ProductFamily::Both),
            other => Err(format!("unknown product family '{}'", other)),
        }
    }
}

/// Structure graph to fetch the taxonomy from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphSelector {
    Adult,
    Development,
}

impl GraphSelector {
    /// Structure graph id on the ontology service
    pub fn graph_id(&self) -> u32 {
        match self {
            GraphSelector::Adult => 1,
            GraphSelector::Development => 17,
        }
    }
}

impl FromStr for GraphSelector {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "adult" => Ok(GraphSelector::Adult),
            "development" => Ok(GraphSelector::Development),
            other => Err(format!("unknown structure graph '{}'", other)),
        }
    }
}

/// Axis-aligned box of voxel index ranges, one half-open range per axis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoxelRange {
    pub ranges: [Range<usize>; 3],
}

impl VoxelRange {
    pub fn new(x: Range<usize>, y: Range<usize>, z: Range<usize>) -> Self {
        Self { ranges: [x, y, z] }
    }

    /// The whole volume of the given shape
    pub fn full(shape: [usize; 3]) -> Self {
        Self::new(0..shape[0], 0..shape[1], 0..shape[2])
    }

    /// Shape of the sub-volume covered by this range
    pub fn shape(&self) -> [usize; 3] {
        [
            self.ranges[0].len(),
            self.ranges[1].len(),
            self.ranges[2].len(),
        ]
    }

    /// Check that every range lies inside `shape` and is not reversed
    pub fn fits(&self, shape: [usize; 3]) -> bool {
        self.ranges
            .iter()
            .zip(shape.iter())
            .all(|(range, &dim)| range.start <= range.end && range.end <= dim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_tokens() {
        assert_eq!(ElementType::from_token("UCHAR"), Some(ElementType::UChar));
        assert_eq!(ElementType::from_token("MET_UINT"), Some(ElementType::UInt));
        assert_eq!(ElementType::from_token("MET_FLOAT"), Some(ElementType::Float));
        assert_eq!(ElementType::from_token("MET_DOUBLE"), None);
        assert_eq!(ElementType::from_token("uchar"), None);

        assert_eq!(ElementType::UChar.size_in_bytes(), 1);
        assert_eq!(ElementType::UInt.size_in_bytes(), 4);
    }

    #[test]
    fn test_rgb_hex() {
        assert_eq!(Rgb::from_hex("FF7080"), Some(Rgb::new(255, 112, 128)));
        assert_eq!(Rgb::from_hex("#b0f0ff"), Some(Rgb::new(176, 240, 255)));
        assert_eq!(Rgb::from_hex("FFF"), None);
        assert_eq!(Rgb::from_hex("GG0000"), None);
        assert_eq!(Rgb::new(255, 112, 128).to_hex(), "#ff7080");
    }

    #[test]
    fn test_query_vocabulary() {
        assert_eq!("coronal".parse::<SectionPlane>(), Ok(SectionPlane::Coronal));
        assert!("axial".parse::<SectionPlane>().is_err());
        assert_eq!(ProductFamily::Development.abbreviation(), "DevMouse");
        assert_eq!(GraphSelector::Development.graph_id(), 17);
    }

    #[test]
    fn test_voxel_range() {
        let range = VoxelRange::new(0..2, 1..3, 0..1);
        assert_eq!(range.shape(), [2, 2, 1]);
        assert!(range.fits([2, 3, 1]));
        assert!(!range.fits([2, 2, 1]));
        assert_eq!(VoxelRange::full([4, 5, 6]).shape(), [4, 5, 6]);
    }
}
