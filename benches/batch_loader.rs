use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use gestures::{
    dataset::{ImageStore, Split},
    labels::LabelRegistry,
    loader::{BatchLoader, FeatureGeometry, LoaderOptions},
};
use image::{DynamicImage, Rgb, RgbImage};
use tempfile::{TempDir, tempdir};

const IMAGE_COUNT: usize = 64;

fn setup_store() -> (TempDir, ImageStore) {
    let dir = tempdir().expect("tempdir");
    let labels = LabelRegistry::in_memory();
    let mut store = ImageStore::open(dir.path(), Split::Train, &labels);
    let names = labels.builtin_names().to_vec();
    for i in 0..IMAGE_COUNT {
        let shade = (i * 4) as u8;
        let pixel = Rgb([shade, 90, 255 - shade]);
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(320, 240, pixel));
        store
            .add(&labels, &image, &names[i % names.len()])
            .expect("seed image");
    }
    (dir, store)
}

fn bench_epoch(c: &mut Criterion) {
    let (_dir, store) = setup_store();
    for augment in [false, true] {
        let options = LoaderOptions {
            batch_size: 16,
            shuffle: true,
            augment,
            geometry: FeatureGeometry::default(),
            seed: Some(7),
        };
        c.bench_with_input(
            BenchmarkId::new(if augment { "epoch_augmented" } else { "epoch" }, IMAGE_COUNT),
            &options,
            |b, options| {
                let mut loader = BatchLoader::new(store.snapshot(), options.clone());
                b.iter(|| {
                    loader.start_epoch();
                    while let Some(batch) = loader.next_batch() {
                        black_box(batch);
                    }
                });
            },
        );
    }
}

criterion_group!(benches, bench_epoch);
criterion_main!(benches);
