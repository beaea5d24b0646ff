use std::hint::black_box;

use brainmap::codec::{self, remap_labels};
use brainmap::{DecodeOptions, ElementType, VolumeHeader};
use criterion::{criterion_group, criterion_main, Criterion};

/// 67 x 41 x 58, the grid of the 200 um annotation volume
const DIMS: [usize; 3] = [67, 41, 58];

fn label_payload() -> Vec<u8> {
    let voxels = DIMS.iter().product::<usize>();
    let mut payload = Vec::with_capacity(voxels * 4);
    for i in 0..voxels {
        let id = [0u32, 8, 567, 1089, 10671][i % 5];
        payload.extend_from_slice(&id.to_le_bytes());
    }
    payload
}

fn bench_decode(c: &mut Criterion) {
    let payload = label_payload();
    let header = VolumeHeader::new(DIMS, ElementType::UInt);
    let archive = codec::encode_raw("annotation", &header, &payload).expect("encode archive");

    c.bench_function("codec.decode.uint_labels", |b| {
        b.iter(|| codec::decode_with(black_box(&archive), DecodeOptions::default()))
    });

    let ids: Vec<u32> = payload
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    c.bench_function("codec.remap_labels", |b| b.iter(|| remap_labels(black_box(ids.as_slice()))));
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
