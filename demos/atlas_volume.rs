//! Example: index a folder of atlas archives, decode one and color a section
//!
//! Run with: cargo run --example atlas_volume
//! Set RUST_LOG=brainmap=debug to see the loader at work.

use anyhow::Context;
use async_trait::async_trait;
use brainmap::transform::{apply_transform, points, rotation_z, translation};
use brainmap::{
    codec, DatasetLoader, DatasetQuery, DatasetService, ElementType, GraphSelector, LoaderConfig,
    SectionDataSet, ServiceError, StructureFileSource, Taxonomy, VolumeHeader,
};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// A service that never finds anything, for working from local files only
struct Offline;

#[async_trait]
impl DatasetService for Offline {
    async fn find_datasets(&self, _query: &DatasetQuery) -> Result<Vec<SectionDataSet>, ServiceError> {
        Ok(Vec::new())
    }

    async fn materialize(&self, dataset_id: u64, _destination: &Path) -> Result<(), ServiceError> {
        Err(ServiceError::Materialize(dataset_id, "offline".to_string()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("brainmap {}: Atlas Volume", brainmap::BRAINMAP_VERSION);
    println!("==========================\n");

    let dir = tempfile::tempdir()?;

    // A tiny structure graph: root with two children
    let structures = serde_json::json!([
        {"id": 997, "name": "root", "acronym": "root", "parent_structure_id": null, "color_hex_triplet": "FFFFFF"},
        {"id": 567, "name": "Cerebrum", "acronym": "CH", "parent_structure_id": 997, "color_hex_triplet": "B0F0FF"},
        {"id": 1089, "name": "Hippocampal formation", "acronym": "HPF", "parent_structure_id": 567, "color_hex_triplet": "7ED04B"}
    ]);
    std::fs::write(
        dir.path().join("structures_adult.json"),
        serde_json::to_vec_pretty(&structures)?,
    )?;
    let taxonomy = Taxonomy::fetch(&StructureFileSource::new(dir.path()), GraphSelector::Adult).await?;
    println!("Taxonomy: {} structures", taxonomy.len());
    for id in taxonomy.ancestors(1089) {
        let node = taxonomy.get(id)?;
        println!("  {} ({}) {}", node.acronym(), node.id(), node.color());
    }
    println!();

    // A 4 x 3 x 2 annotation volume
    let data = dir.path().join("data");
    std::fs::create_dir(&data)?;
    let labels: Vec<u32> = (0..24).map(|i| [0, 567, 1089][i % 3]).collect();
    let payload: Vec<u8> = labels.iter().flat_map(|id| id.to_le_bytes()).collect();
    let header = VolumeHeader::new([4, 3, 2], ElementType::UInt);
    std::fs::write(
        data.join("annotation_coronal_P56_1.zip"),
        codec::encode_raw("annotation", &header, &payload)?,
    )?;

    let loader = DatasetLoader::open(LoaderConfig::new(&data), Arc::new(Offline), Some(Arc::new(taxonomy)))
        .await
        .context("opening data folder")?;
    println!("Indexed: {:?}", loader.indexed_keys());

    let volume = loader.resolve("annotation").await?;
    println!("Volume: {}", volume.volume().summary());
    println!("Colors: {:?}", volume.color_list()?);

    let section = volume.colored_plane(2, 0)?;
    println!("First sagittal section:");
    for row in section.rows() {
        let line: Vec<String> = row.iter().map(|c| c.to_string()).collect();
        println!("  {}", line.join(" "));
    }
    println!();

    match loader.resolve("Sst").await {
        Ok(_) => println!("Sst resolved"),
        Err(e) => println!("Sst: {}", e),
    }

    // Move the volume corners into world space
    let corners = points([[0.0, 0.0, 0.0], [4.0, 3.0, 2.0]]);
    let m = translation([10.0, 0.0, 0.0]).dot(&rotation_z(std::f64::consts::FRAC_PI_2));
    println!("Corners after transform:\n{}", apply_transform(corners.view(), &m)?);

    Ok(())
}
