//! brainmap - Allen Brain Atlas volumes in Rust
//!
//! Decode the zip archives the Allen Brain Atlas serves for annotation and
//! expression grids (a MetaImage `.mhd` header plus a `.raw` payload), color
//! label volumes from the structure ontology, and keep a directory of
//! downloaded archives behind a bounded in-memory cache.
//!
//! # Features
//!
//! - MetaImage header parsing with `UCHAR`, `UINT` and `FLOAT` payloads
//! - Label remapping to dense indices with per-label colors
//! - Structure taxonomy with parent/child navigation
//! - Dataset loader: local index, insertion-order cache, remote fetch with
//!   per-key coalescing
//! - Affine transforms for point sets
//!
//! # Remote service
//!
//! The loader talks to the outside world through the [`DatasetService`] and
//! [`TaxonomySource`] traits. Enable the `http-client` feature for an
//! implementation backed by `api.brain-map.org`.
//!
//! # Example
//!
//! ```rust,ignore
//! use brainmap::{DatasetLoader, LoaderConfig};
//! use std::sync::Arc;
//!
//! # async fn example(service: Arc<dyn brainmap::DatasetService>) -> Result<(), Box<dyn std::error::Error>> {
//! let loader = DatasetLoader::open(LoaderConfig::new("/data/ish"), service, None).await?;
//!
//! // Decoded on first use, served from the cache afterwards
//! let volume = loader.resolve("Sst").await?;
//! println!("{}", volume.volume().summary());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod codec;
pub mod error;
pub mod header;
#[cfg(feature = "http-client")]
pub mod http;
pub mod index;
pub mod loader;
pub mod service;
pub mod taxonomy;
pub mod transform;
pub mod types;
pub mod utils;
pub mod volume;

// Re-exports
pub use cache::BoundedCache;
pub use codec::{decode, decode_with, encode, DecodeOptions};
pub use error::{DecodeError, Error, LoaderError, Result, ServiceError};
pub use header::{HeaderValue, VolumeHeader};
#[cfg(feature = "http-client")]
pub use http::AllenApiClient;
pub use index::{ArchiveName, LocalIndex};
pub use loader::{DatasetLoader, LoaderConfig};
pub use service::{
    DatasetQuery, DatasetService, Fetcher, SectionDataSet, StructureFileSource, TaxonomySource,
};
pub use taxonomy::{StructureRecord, Taxonomy, TaxonomyNode};
pub use types::{ElementType, GraphSelector, ProductFamily, Rgb, SectionPlane, VoxelRange};
pub use volume::{ColorTable, DecodedVolume, LabeledVolume, PlaneData, SliceData, Voxels};

/// Version of the brainmap crate
pub const BRAINMAP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!BRAINMAP_VERSION.is_empty());
    }
}
