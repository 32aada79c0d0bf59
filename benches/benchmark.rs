use criterion::{black_box, criterion_group, criterion_main, Criterion};
use msmalign::metrics::pearson;
use msmalign::{icosphere, BrainMesh, CoordSystem, GiftiImage};
use ndarray::Array1;

fn parse_gifti(xml: &str) -> GiftiImage {
    GiftiImage::from_xml(xml).unwrap()
}

fn mesh_from_gifti(img: &GiftiImage) -> BrainMesh {
    BrainMesh::from_gifti(img).unwrap()
}

fn bench_gifti(c: &mut Criterion) {
    // 10242 vertices, the resolution of fsaverage5
    let img = icosphere(5, 100.0).to_gifti(&CoordSystem::default());
    let xml = img.to_xml().unwrap();

    c.bench_function("gifti_to_xml", |b| b.iter(|| black_box(&img).to_xml().unwrap()));
    c.bench_function("gifti_from_xml", |b| b.iter(|| parse_gifti(black_box(&xml))));
    c.bench_function("mesh_from_gifti", |b| b.iter(|| mesh_from_gifti(black_box(&img))));
}

fn bench_metrics(c: &mut Criterion) {
    let a: Array1<f32> = Array1::from_shape_fn(10242, |i| (i as f32 * 0.01).sin());
    let b: Array1<f32> = Array1::from_shape_fn(10242, |i| (i as f32 * 0.01 + 0.5).sin());
    c.bench_function("pearson", |bench| bench.iter(|| pearson(black_box(a.view()), black_box(b.view()))));
}

criterion_group!(benches, bench_gifti, bench_metrics);
criterion_main!(benches);
