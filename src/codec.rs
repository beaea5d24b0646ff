//! Volume archive codec
//!
//! An archive is a zip container holding one `.mhd` header entry and one
//! `.raw` payload entry. The payload is a flat column-major voxel buffer of
//! the element type named in the header.

use crate::error::DecodeError;
use crate::header::{HeaderValue, VolumeHeader, ELEMENT_DATA_FILE_KEY};
use crate::types::ElementType;
use crate::utils::{bytes_to_elements, elements_to_bytes, Element};
use crate::volume::{DecodedVolume, Voxels};
use ndarray::{Array3, ShapeBuilder};
use num_traits::{AsPrimitive, Float};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Marker in the name of the header entry
pub const HEADER_EXTENSION: &str = ".mhd";

/// Marker in the name of the payload entry
pub const PAYLOAD_EXTENSION: &str = ".raw";

/// Decoding options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeOptions {
    /// Replace negative values of continuous volumes with the smallest
    /// non-negative value present
    pub clamp_negative: bool,
}

impl DecodeOptions {
    pub fn with_clamp_negative(mut self, clamp: bool) -> Self {
        self.clamp_negative = clamp;
        self
    }
}

/// Decode an archive with default options
pub fn decode(archive: &[u8]) -> Result<DecodedVolume, DecodeError> {
    decode_with(archive, DecodeOptions::default())
}

/// Decode an archive
pub fn decode_with(archive: &[u8], options: DecodeOptions) -> Result<DecodedVolume, DecodeError> {
    let (header_text, payload) = read_container(archive)?;
    let header = VolumeHeader::parse(&header_text)?;
    decode_payload(header, &payload, options)
}

/// Read and decode an archive file
pub fn decode_file(path: impl AsRef<Path>, options: DecodeOptions) -> Result<DecodedVolume, DecodeError> {
    let bytes = std::fs::read(path)?;
    decode_with(&bytes, options)
}

/// Turn a raw payload into a volume according to `header`
pub fn decode_payload(
    header: VolumeHeader,
    payload: &[u8],
    options: DecodeOptions,
) -> Result<DecodedVolume, DecodeError> {
    let expected = header.payload_len().ok_or_else(|| {
        DecodeError::MalformedHeader(format!("dimension sizes {:?} overflow", header.dims))
    })?;
    if payload.len() != expected {
        return Err(DecodeError::SizeMismatch {
            expected,
            actual: payload.len(),
        });
    }

    let big_endian = header.is_big_endian();
    let voxels = match header.element_type {
        ElementType::UChar => label_voxels(header.dims, &bytes_to_elements::<u8>(payload, big_endian)?)?,
        ElementType::UInt => label_voxels(header.dims, &bytes_to_elements::<u32>(payload, big_endian)?)?,
        ElementType::Float => {
            let mut values = bytes_to_elements::<f32>(payload, big_endian)?;
            if options.clamp_negative {
                clamp_negative(&mut values)?;
            }
            Voxels::Intensities(column_major(header.dims, values)?)
        }
    };

    Ok(DecodedVolume::new(header, voxels))
}

fn read_container(archive: &[u8]) -> Result<(String, Vec<u8>), DecodeError> {
    let mut zip = ZipArchive::new(Cursor::new(archive))?;

    let mut header_idx = None;
    let mut payload_idx = None;
    for i in 0..zip.len() {
        let entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let slot = if entry.name().contains(HEADER_EXTENSION) {
            &mut header_idx
        } else if entry.name().contains(PAYLOAD_EXTENSION) {
            &mut payload_idx
        } else {
            continue;
        };
        if slot.replace(i).is_some() {
            return Err(DecodeError::MalformedContainer(format!(
                "more than one entry like '{}'",
                entry.name()
            )));
        }
    }

    let header_idx = header_idx.ok_or_else(|| {
        DecodeError::MalformedContainer(format!("no {} header entry", HEADER_EXTENSION))
    })?;
    let payload_idx = payload_idx.ok_or_else(|| {
        DecodeError::MalformedContainer(format!("no {} payload entry", PAYLOAD_EXTENSION))
    })?;

    let mut header_bytes = Vec::new();
    zip.by_index(header_idx)?.read_to_end(&mut header_bytes)?;
    if !header_bytes.is_ascii() {
        return Err(DecodeError::MalformedHeader("header is not ASCII text".to_string()));
    }
    let header_text = String::from_utf8(header_bytes)
        .map_err(|e| DecodeError::MalformedHeader(e.to_string()))?;

    let mut payload = Vec::new();
    zip.by_index(payload_idx)?.read_to_end(&mut payload)?;

    Ok((header_text, payload))
}

/// Replace every raw label by its position in the sorted list of distinct labels
pub fn remap_labels<T>(raw: &[T]) -> (Vec<u32>, Vec<u32>)
where
    T: AsPrimitive<u32>,
{
    let values: Vec<u32> = raw.iter().map(|v| (*v).as_()).collect();
    let mut ids = values.clone();
    ids.sort_unstable();
    ids.dedup();
    let indices = values
        .iter()
        .map(|v| ids.binary_search(v).unwrap_or_else(|pos| pos) as u32)
        .collect();
    (ids, indices)
}

fn label_voxels<T>(dims: [usize; 3], raw: &[T]) -> Result<Voxels, DecodeError>
where
    T: AsPrimitive<u32>,
{
    let (ids, indices) = remap_labels(raw);
    Ok(Voxels::Labels {
        ids,
        indices: column_major(dims, indices)?,
    })
}

/// Replace negative values with the smallest non-negative value present
pub fn clamp_negative<T: Float>(values: &mut [T]) -> Result<(), DecodeError> {
    let floor = values
        .iter()
        .copied()
        .filter(|v| *v >= T::zero())
        .reduce(|a, b| a.min(b))
        .ok_or(DecodeError::NoNonNegativeValues)?;
    for v in values.iter_mut().filter(|v| **v < T::zero()) {
        *v = floor;
    }
    Ok(())
}

fn column_major<T>(dims: [usize; 3], flat: Vec<T>) -> Result<Array3<T>, DecodeError> {
    Array3::from_shape_vec((dims[0], dims[1], dims[2]).f(), flat)
        .map_err(|e| DecodeError::MalformedContainer(e.to_string()))
}

/// Flatten a grid in payload order (first axis fastest)
pub fn flatten_column_major<T: Copy>(array: &Array3<T>) -> Vec<T> {
    array.t().iter().copied().collect()
}

/// Build an archive from a header and a raw payload. Entries are named
/// `<stem>.mhd` and `<stem>.raw`.
pub fn encode_raw(stem: &str, header: &VolumeHeader, payload: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let raw_name = format!("{}{}", stem, PAYLOAD_EXTENSION);
    let header = header
        .clone()
        .with_field(ELEMENT_DATA_FILE_KEY, HeaderValue::Token(raw_name.clone()));

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.start_file(format!("{}{}", stem, HEADER_EXTENSION), options)?;
    writer.write_all(header.to_text().as_bytes())?;
    writer.start_file(raw_name, options)?;
    writer.write_all(payload)?;
    Ok(writer.finish()?.into_inner())
}

/// Encode a decoded volume back into an archive. Label volumes are written
/// with their original ids.
pub fn encode(stem: &str, volume: &DecodedVolume) -> Result<Vec<u8>, DecodeError> {
    let header = volume.header();
    let big_endian = header.is_big_endian();
    let payload = match (volume.voxels(), header.element_type) {
        (Voxels::Labels { ids, indices }, ElementType::UChar) => {
            let narrow = ids
                .iter()
                .map(|&id| u8::try_from(id))
                .collect::<Result<Vec<u8>, _>>()
                .map_err(|_| {
                    DecodeError::MalformedContainer("label id does not fit in UCHAR".to_string())
                })?;
            raw_label_payload(&narrow, indices, big_endian)
        }
        (Voxels::Labels { ids, indices }, ElementType::UInt) => {
            raw_label_payload(ids, indices, big_endian)
        }
        (Voxels::Intensities(values), ElementType::Float) => {
            elements_to_bytes(&flatten_column_major(values), big_endian)
        }
        (_, element_type) => {
            return Err(DecodeError::MalformedContainer(format!(
                "voxels do not match element type {}",
                element_type
            )))
        }
    };
    encode_raw(stem, header, &payload)
}

fn raw_label_payload<T: Element>(ids: &[T], indices: &Array3<u32>, big_endian: bool) -> Vec<u8> {
    let raw: Vec<T> = flatten_column_major(indices)
        .into_iter()
        .map(|index| ids[index as usize])
        .collect();
    elements_to_bytes(&raw, big_endian)
}
