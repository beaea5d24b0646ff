//! Utility functions

use crate::error::DecodeError;

/// A voxel element that can be read from and written to a raw payload
pub trait Element: Copy + Send + Sync + 'static {
    const SIZE: usize;

    fn from_bytes(chunk: &[u8], big_endian: bool) -> Self;

    fn write_bytes(&self, out: &mut Vec<u8>, big_endian: bool);
}

impl Element for u8 {
    const SIZE: usize = 1;

    fn from_bytes(chunk: &[u8], _big_endian: bool) -> Self {
        chunk[0]
    }

    fn write_bytes(&self, out: &mut Vec<u8>, _big_endian: bool) {
        out.push(*self);
    }
}

macro_rules! impl_element {
    ($ty:ty, $size:expr) => {
        impl Element for $ty {
            const SIZE: usize = $size;

            fn from_bytes(chunk: &[u8], big_endian: bool) -> Self {
                let mut buf = [0u8; $size];
                buf.copy_from_slice(chunk);
                if big_endian {
                    <$ty>::from_be_bytes(buf)
                } else {
                    <$ty>::from_le_bytes(buf)
                }
            }

            fn write_bytes(&self, out: &mut Vec<u8>, big_endian: bool) {
                if big_endian {
                    out.extend_from_slice(&self.to_be_bytes());
                } else {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }
        }
    };
}

impl_element!(u32, 4);
impl_element!(f32, 4);

/// Convert a raw payload to typed elements
pub fn bytes_to_elements<T: Element>(bytes: &[u8], big_endian: bool) -> Result<Vec<T>, DecodeError> {
    if bytes.len() % T::SIZE != 0 {
        return Err(DecodeError::MalformedContainer(format!(
            "payload length {} is not a multiple of the element size {}",
            bytes.len(),
            T::SIZE
        )));
    }
    Ok(bytes
        .chunks_exact(T::SIZE)
        .map(|chunk| T::from_bytes(chunk, big_endian))
        .collect())
}

/// Convert typed elements to a raw payload
pub fn elements_to_bytes<T: Element>(data: &[T], big_endian: bool) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(data.len() * T::SIZE);
    for value in data {
        value.write_bytes(&mut bytes, big_endian);
    }
    bytes
}

/// Format byte size in human-readable form
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
