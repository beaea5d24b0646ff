//! Decoded volumes, color tables and slicing

use crate::error::{Error, Result};
use crate::header::VolumeHeader;
use crate::taxonomy::Taxonomy;
use crate::types::{Rgb, VoxelRange};
use crate::utils::format_bytes;
use ndarray::{s, Array, Array2, Array3, ArrayView2, Axis, Dimension, Ix2, Ix3};

/// Voxel storage of a decoded volume
#[derive(Debug, Clone, PartialEq)]
pub enum Voxels {
    /// Label volume: `indices` holds positions into the ascending, deduplicated `ids`
    Labels { ids: Vec<u32>, indices: Array3<u32> },
    /// Continuous volume (expression energy, density, intensity)
    Intensities(Array3<f32>),
}

/// A label-index or intensity grid of any dimensionality
#[derive(Debug, Clone, PartialEq)]
pub enum Grid<D: Dimension> {
    Labels(Array<u32, D>),
    Intensities(Array<f32, D>),
}

/// Sub-volume returned by `slice`
pub type SliceData = Grid<Ix3>;

/// Section returned by `plane`
pub type PlaneData = Grid<Ix2>;

impl<D: Dimension> Grid<D> {
    pub fn shape(&self) -> &[usize] {
        match self {
            Grid::Labels(a) => a.shape(),
            Grid::Intensities(a) => a.shape(),
        }
    }

    pub fn as_labels(&self) -> Option<&Array<u32, D>> {
        match self {
            Grid::Labels(a) => Some(a),
            Grid::Intensities(_) => None,
        }
    }

    pub fn as_intensities(&self) -> Option<&Array<f32, D>> {
        match self {
            Grid::Labels(_) => None,
            Grid::Intensities(a) => Some(a),
        }
    }
}

/// A volume decoded from an archive. Arrays are column-major: the first
/// axis varies fastest in memory, as in the raw payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedVolume {
    header: VolumeHeader,
    voxels: Voxels,
}

impl DecodedVolume {
    pub fn new(header: VolumeHeader, voxels: Voxels) -> Self {
        Self { header, voxels }
    }

    pub fn header(&self) -> &VolumeHeader {
        &self.header
    }

    pub fn voxels(&self) -> &Voxels {
        &self.voxels
    }

    pub fn shape(&self) -> [usize; 3] {
        self.header.dims
    }

    pub fn is_label(&self) -> bool {
        matches!(self.voxels, Voxels::Labels { .. })
    }

    /// Distinct label ids in ascending order; empty for continuous volumes
    pub fn label_ids(&self) -> &[u32] {
        match &self.voxels {
            Voxels::Labels { ids, .. } => ids,
            Voxels::Intensities(_) => &[],
        }
    }

    /// Index grid of a label volume
    pub fn indices(&self) -> Option<&Array3<u32>> {
        match &self.voxels {
            Voxels::Labels { indices, .. } => Some(indices),
            Voxels::Intensities(_) => None,
        }
    }

    /// Intensity grid of a continuous volume
    pub fn intensities(&self) -> Option<&Array3<f32>> {
        match &self.voxels {
            Voxels::Labels { .. } => None,
            Voxels::Intensities(values) => Some(values),
        }
    }

    /// Original label id at a voxel
    pub fn label_id_at(&self, voxel: [usize; 3]) -> Option<u32> {
        match &self.voxels {
            Voxels::Labels { ids, indices } => indices
                .get(voxel)
                .and_then(|&index| ids.get(index as usize).copied()),
            Voxels::Intensities(_) => None,
        }
    }

    /// Undo the id remapping: the label grid holding original ids
    pub fn raw_labels(&self) -> Option<Array3<u32>> {
        match &self.voxels {
            Voxels::Labels { ids, indices } => {
                Some(indices.mapv(|index| ids[index as usize]))
            }
            Voxels::Intensities(_) => None,
        }
    }

    /// Extract an axis-aligned sub-volume
    pub fn slice(&self, range: &VoxelRange) -> Result<SliceData> {
        check_range(range, self.shape())?;
        let [x, y, z] = range.ranges.clone();
        Ok(match &self.voxels {
            Voxels::Labels { indices, .. } => Grid::Labels(indices.slice(s![x, y, z]).to_owned()),
            Voxels::Intensities(values) => {
                Grid::Intensities(values.slice(s![x, y, z]).to_owned())
            }
        })
    }

    /// Extract the 2D section at `index` along `axis` (0 is coronal, 2 is sagittal)
    pub fn plane(&self, axis: usize, index: usize) -> Result<PlaneData> {
        check_plane(axis, index, self.shape())?;
        Ok(match &self.voxels {
            Voxels::Labels { indices, .. } => {
                Grid::Labels(indices.index_axis(Axis(axis), index).to_owned())
            }
            Voxels::Intensities(values) => {
                Grid::Intensities(values.index_axis(Axis(axis), index).to_owned())
            }
        })
    }

    /// Uncompressed size of the voxel payload
    pub fn size_bytes(&self) -> usize {
        self.header.payload_len().unwrap_or(usize::MAX)
    }

    pub fn summary(&self) -> String {
        let [x, y, z] = self.shape();
        let kind = match &self.voxels {
            Voxels::Labels { ids, .. } => format!("{} labels", ids.len()),
            Voxels::Intensities(_) => "continuous".to_string(),
        };
        format!(
            "{} x {} x {} {} volume ({}), {}",
            x,
            y,
            z,
            self.header.element_type,
            kind,
            format_bytes(self.size_bytes())
        )
    }
}

fn check_range(range: &VoxelRange, shape: [usize; 3]) -> Result<()> {
    if range.fits(shape) {
        Ok(())
    } else {
        Err(Error::OutOfBounds(format!(
            "{:?} does not fit in a volume of shape {:?}",
            range.ranges, shape
        )))
    }
}

fn check_plane(axis: usize, index: usize, shape: [usize; 3]) -> Result<()> {
    if axis >= 3 {
        return Err(Error::InvalidAxis(axis));
    }
    if index >= shape[axis] {
        return Err(Error::OutOfBounds(format!(
            "index {} on axis {} of length {}",
            index, axis, shape[axis]
        )));
    }
    Ok(())
}

/// Colors of a label volume, one per distinct label id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorTable {
    colors: Vec<Rgb>,
}

impl ColorTable {
    /// Look up each label id in the taxonomy; unknown ids are black
    pub fn build(ids: &[u32], taxonomy: &Taxonomy) -> Self {
        Self {
            colors: ids.iter().map(|&id| taxonomy.color_of(id)).collect(),
        }
    }

    /// Color of a label index; indices past the table are black
    pub fn color(&self, index: u32) -> Rgb {
        self.colors
            .get(index as usize)
            .copied()
            .unwrap_or(Rgb::BLACK)
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn as_slice(&self) -> &[Rgb] {
        &self.colors
    }

    /// `#rrggbb` strings in label order
    pub fn hex_list(&self) -> Vec<String> {
        self.colors.iter().map(Rgb::to_hex).collect()
    }
}

/// A decoded volume with an optional color table derived from a taxonomy
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledVolume {
    volume: DecodedVolume,
    color_table: Option<ColorTable>,
}

impl LabeledVolume {
    pub fn new(volume: DecodedVolume) -> Self {
        Self {
            volume,
            color_table: None,
        }
    }

    /// Build the volume and attach a taxonomy in one go
    pub fn with_taxonomy(volume: DecodedVolume, taxonomy: Option<&Taxonomy>) -> Self {
        let mut labeled = Self::new(volume);
        labeled.attach(taxonomy);
        labeled
    }

    /// Build (`Some`) or clear (`None`) the color table. Continuous volumes
    /// never get one.
    pub fn attach(&mut self, taxonomy: Option<&Taxonomy>) {
        self.color_table = match taxonomy {
            Some(taxonomy) if self.volume.is_label() => {
                Some(ColorTable::build(self.volume.label_ids(), taxonomy))
            }
            _ => None,
        };
    }

    pub fn volume(&self) -> &DecodedVolume {
        &self.volume
    }

    pub fn into_volume(self) -> DecodedVolume {
        self.volume
    }

    pub fn color_table(&self) -> Option<&ColorTable> {
        self.color_table.as_ref()
    }

    /// `#rrggbb` color of every remapped index, in index order
    pub fn color_list(&self) -> Result<Vec<String>> {
        if !self.is_label() {
            return Err(Error::NotALabelVolume);
        }
        self.color_table
            .as_ref()
            .map(ColorTable::hex_list)
            .ok_or(Error::NoColorTable)
    }

    pub fn shape(&self) -> [usize; 3] {
        self.volume.shape()
    }

    pub fn is_label(&self) -> bool {
        self.volume.is_label()
    }

    /// Plain index (or intensity) values of a sub-volume
    pub fn slice(&self, range: &VoxelRange) -> Result<SliceData> {
        self.volume.slice(range)
    }

    pub fn plane(&self, axis: usize, index: usize) -> Result<PlaneData> {
        self.volume.plane(axis, index)
    }

    /// RGB values of a sub-volume
    pub fn colored_slice(&self, range: &VoxelRange) -> Result<Array3<Rgb>> {
        let (indices, table) = self.colored_parts()?;
        check_range(range, self.shape())?;
        let [x, y, z] = range.ranges.clone();
        Ok(indices.slice(s![x, y, z]).mapv(|index| table.color(index)))
    }

    /// RGB values of a 2D section
    pub fn colored_plane(&self, axis: usize, index: usize) -> Result<Array2<Rgb>> {
        let (indices, table) = self.colored_parts()?;
        check_plane(axis, index, self.shape())?;
        Ok(indices
            .index_axis(Axis(axis), index)
            .mapv(|label| table.color(label)))
    }

    fn colored_parts(&self) -> Result<(&Array3<u32>, &ColorTable)> {
        let indices = self.volume.indices().ok_or(Error::NotALabelVolume)?;
        let table = self.color_table.as_ref().ok_or(Error::NoColorTable)?;
        Ok((indices, table))
    }
}

/// Split a 2D label section into one boolean mask per distinct value,
/// in ascending value order.
pub fn one_hot(plane: ArrayView2<'_, u32>) -> Vec<(u32, Array2<bool>)> {
    let mut labels: Vec<u32> = plane.iter().copied().collect();
    labels.sort_unstable();
    labels.dedup();
    labels
        .into_iter()
        .map(|label| (label, plane.mapv(|value| value == label)))
        .collect()
}
