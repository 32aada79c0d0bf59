///
/// brain_align -- msmalign example application that aligns synthetic contrast maps between two subjects
///
/// The maps live on a generated icosphere with 642 vertices. The target subject's maps are the
/// source subject's maps rotated around the z axis, which the registration should largely undo.
///
/// Requires an installed MSM (FSLDIR set, or msm on the PATH).
/// To run this application, run 'cargo run --release' in the demos/brain_align directory.
///

use msmalign::{icosphere, Alignment, CoordSystem, MsmModel, ToolEnvironment};
use ndarray::Array2;

fn main() {
    println!("=====[ brain_align -- msmalign surface alignment example application ]=====");
    let tool_env = ToolEnvironment::discover().unwrap();
    println!("Using MSM installed at {}.", tool_env.install_root.display());

    let dir = std::env::temp_dir().join("brain_align");
    std::fs::create_dir_all(&dir).unwrap();
    let mesh_file = dir.join("ico3.surf.gii");
    let mesh = icosphere(3, 100.0);
    mesh.to_gifti(&CoordSystem::default()).to_file(&mesh_file).unwrap();
    println!("Wrote sphere with {} vertices and {} faces to {}.", mesh.num_vertices(), mesh.num_faces(), mesh_file.display());

    // Smooth maps: one low-frequency pattern per contrast, evaluated at every vertex
    let pattern = |contrast: usize, x: f32, y: f32, z: f32| -> f32 {
        let k = (contrast + 1) as f32;
        (k * x / 100.0).sin() + (k * y / 100.0).cos() * (z / 100.0)
    };
    let angle: f32 = 0.2;
    let num_contrasts = 5;
    let source = Array2::from_shape_fn((num_contrasts, mesh.num_vertices()), |(c, v)| {
        let p = &mesh.vertices[v * 3..v * 3 + 3];
        pattern(c, p[0], p[1], p[2])
    });
    let target = Array2::from_shape_fn((num_contrasts, mesh.num_vertices()), |(c, v)| {
        let p = &mesh.vertices[v * 3..v * 3 + 3];
        let (x, y) = (p[0] * angle.cos() - p[1] * angle.sin(), p[0] * angle.sin() + p[1] * angle.cos());
        pattern(c, x, y, p[2])
    });

    let mut model = MsmModel::new(tool_env).with_epsilon(0.1);
    println!("Fitting the alignment on {} contrasts, this may take a while...", num_contrasts);
    model.fit(source.view(), target.view(), &mesh_file).unwrap();

    let model_file = dir.join("transformed.surf.gii");
    model.save_model(&model_file).unwrap();
    println!("Saved the transformed mesh to {}.", model_file.display());

    let baseline = model.metric().mean_rowwise(source.view(), target.view()).unwrap();
    let score = model.score(source.view(), target.view()).unwrap();
    println!(
        "Mean Pearson correlation with the target: {:.3} before alignment, {:.3} after alignment.",
        baseline, score
    );
}
