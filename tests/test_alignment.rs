use approx::assert_abs_diff_eq;
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use msmalign::packager::write_contrast_rows;
use msmalign::register::{REGISTERED_SPHERE_ASCII, REPROJECTED_DPV};
use msmalign::resample::resampled_path;
use msmalign::{
    icosphere, read_gifti, Alignment, CoordSystem, GiftiImage, MsmError, MsmModel, ProcessRunner, Result, ToolArg,
    ToolEnvironment, ToolInvocation,
};

/// Stands in for the registration tools. The registration is the identity: the transformed mesh
/// is the input mesh, and resampling returns the first input map unchanged.
#[derive(Clone, Default)]
struct FakeTools {
    calls: Rc<RefCell<Vec<ToolInvocation>>>,
    msm_exit: Rc<Cell<i32>>,
}

fn path_arg<F: Fn(&ToolArg) -> Option<&PathBuf>>(inv: &ToolInvocation, pick: F) -> PathBuf {
    inv.args.iter().find_map(|a| pick(a)).cloned().unwrap()
}

impl FakeTools {
    fn programs(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.program_name()).collect()
    }

    fn msm(&self, inv: &ToolInvocation) -> Result<i32> {
        if self.msm_exit.get() != 0 {
            return Ok(self.msm_exit.get());
        }
        let in_mesh = path_arg(inv, |a| if let ToolArg::InMesh(p) = a { Some(p) } else { None });
        let ref_data = path_arg(inv, |a| if let ToolArg::RefData(p) = a { Some(p) } else { None });
        let conf = path_arg(inv, |a| if let ToolArg::Conf(p) = a { Some(p) } else { None });
        let prefix = path_arg(inv, |a| if let ToolArg::OutputPrefix(p) = a { Some(p) } else { None });

        assert!(fs::read_to_string(conf)?.contains("--lambda="));
        fs::copy(in_mesh, prefix.join(REGISTERED_SPHERE_ASCII))?;
        let target = read_gifti(ref_data)?;
        let dpv: String = target.darrays[0]
            .data
            .to_f32()
            .iter()
            .enumerate()
            .map(|(i, v)| format!("{} 0 0 0 {}\n", i, v))
            .collect();
        fs::write(prefix.join(REPROJECTED_DPV), dpv)?;
        Ok(0)
    }

    fn surf2surf(&self, inv: &ToolInvocation) -> Result<i32> {
        let input = path_arg(inv, |a| if let ToolArg::Input(p) = a { Some(p) } else { None });
        let output = path_arg(inv, |a| if let ToolArg::OutputFile(p) = a { Some(p) } else { None });
        fs::copy(input, output)?;
        Ok(0)
    }

    fn msmresample(&self, inv: &ToolInvocation) -> Result<i32> {
        let positional: Vec<&PathBuf> = inv
            .args
            .iter()
            .filter_map(|a| if let ToolArg::Positional(p) = a { Some(p) } else { None })
            .collect();
        assert!(positional[0].is_file());
        let labels = read_gifti(path_arg(inv, |a| if let ToolArg::Labels(p) = a { Some(p) } else { None }))?;
        assert_eq!(2, labels.darrays.len());

        let mut out = GiftiImage::new();
        out.add_data_array(labels.darrays[0].clone());
        out.to_file(resampled_path(positional[1]))?;
        Ok(0)
    }
}

impl ProcessRunner for FakeTools {
    fn run(&self, invocation: &ToolInvocation) -> Result<i32> {
        self.calls.borrow_mut().push(invocation.clone());
        match invocation.program_name().as_str() {
            "msm" => self.msm(invocation),
            "surf2surf" => self.surf2surf(invocation),
            "msmresample" => self.msmresample(invocation),
            other => panic!("unexpected program {}", other),
        }
    }
}

struct Fixture {
    dir: tempfile::TempDir,
    mesh: PathBuf,
    tools: FakeTools,
}

impl Fixture {
    fn new() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mesh = dir.path().join("ico3.surf.gii");
        icosphere(3, 100.0).to_gifti(&CoordSystem::default()).to_file(&mesh).unwrap();
        Fixture {
            dir,
            mesh,
            tools: FakeTools::default(),
        }
    }

    fn model(&self) -> MsmModel {
        MsmModel::new(ToolEnvironment::new("/opt/fsl")).with_runner(Box::new(self.tools.clone()))
    }
}

fn contrast_maps(rows: usize, phase: f32) -> Array2<f32> {
    Array2::from_shape_fn((rows, 642), |(r, c)| (r as f32 + 1.0) * (c as f32 * 0.1 + phase).sin())
}

#[test]
fn fit_then_transform_gives_one_map_per_input_row() {
    let fx = Fixture::new();
    let source = contrast_maps(4, 0.0);
    let target = contrast_maps(4, 0.3);

    let mut model = fx.model();
    model.fit(source.view(), target.view(), &fx.mesh).unwrap();
    assert!(model.is_fitted());
    assert_eq!(vec!["msm", "surf2surf"], fx.tools.programs());

    let predicted = model.transform(source.view()).unwrap();
    assert_eq!((4, 642), predicted.dim());
    assert_eq!(source, predicted);

    let single = model.transform_map(source.index_axis(Axis(0), 2)).unwrap();
    assert_eq!(642, single.len());
    assert_eq!(source.index_axis(Axis(0), 2), single.view());
}

#[test]
fn the_reprojected_target_is_kept_after_fit() {
    let fx = Fixture::new();
    let source = contrast_maps(2, 0.0);
    let target = contrast_maps(2, 1.0);

    let mut model = fx.model();
    model.fit(source.view(), target.view(), &fx.mesh).unwrap();

    let reprojected = model.reprojected_target().unwrap();
    assert_eq!(1, reprojected.darrays.len());
    assert_eq!(target.row(0).to_vec(), reprojected.darrays[0].data.to_f32());
}

#[test]
fn a_loaded_model_transforms_like_the_fitted_one() {
    let fx = Fixture::new();
    let source = contrast_maps(3, 0.0);
    let target = contrast_maps(3, 0.5);

    let mut fitted = fx.model();
    fitted.fit(source.view(), target.view(), &fx.mesh).unwrap();
    let model_path = fx.dir.path().join("transformed.surf.gii");
    fitted.save_model(&model_path).unwrap();

    let mut loaded = fx.model();
    loaded.load_model(&model_path, &fx.mesh).unwrap();
    assert_eq!(fitted.transform(source.view()).unwrap(), loaded.transform(source.view()).unwrap());

    let once = loaded.fitted().cloned();
    loaded.load_model(&model_path, &fx.mesh).unwrap();
    assert_eq!(once.as_ref(), loaded.fitted());
}

#[test]
fn mismatching_coordinate_systems_are_rejected_before_running_the_tool() {
    let fx = Fixture::new();
    let mut shifted = CoordSystem::default();
    shifted.xform[2][3] = 12.5;
    let rows = contrast_maps(2, 0.0).outer_iter().map(|r| r.to_vec()).collect::<Vec<_>>();
    let source = write_contrast_rows(rows.clone(), &shifted, fx.dir.path(), "source").unwrap();
    let target = write_contrast_rows(rows, &CoordSystem::default(), fx.dir.path(), "target").unwrap();

    let mut model = fx.model();
    let res = model.fit_files(&source, &target, &fx.mesh);
    assert!(matches!(res, Err(MsmError::CoordSystemMismatch(_))));
    assert!(!model.is_fitted());
    assert!(fx.tools.programs().is_empty());
}

#[test]
fn a_target_in_another_coordinate_system_is_rejected_before_running_the_tool() {
    let fx = Fixture::new();
    let mut shifted = CoordSystem::default();
    shifted.xform[0][3] = -4.0;
    let rows = contrast_maps(2, 0.0).outer_iter().map(|r| r.to_vec()).collect::<Vec<_>>();
    let source = write_contrast_rows(rows.clone(), &CoordSystem::default(), fx.dir.path(), "source").unwrap();
    let target = write_contrast_rows(rows, &shifted, fx.dir.path(), "target").unwrap();

    let mut model = fx.model();
    let res = model.fit_files(&source, &target, &fx.mesh);
    assert!(matches!(res, Err(MsmError::CoordSystemMismatch(_))));
    assert!(!model.is_fitted());
    assert!(fx.tools.programs().is_empty());
}

#[test]
fn a_model_fitted_on_two_maps_transforms_any_number_of_new_maps() {
    let fx = Fixture::new();
    let mut model = fx.model();
    model
        .fit(contrast_maps(2, 0.0).view(), contrast_maps(2, 0.7).view(), &fx.mesh)
        .unwrap();

    let mut rng = StdRng::seed_from_u64(7);
    let fresh = Array2::from_shape_fn((4, 642), |_| rng.random_range(-1.0f32..1.0));
    let predicted = model.transform(fresh.view()).unwrap();
    assert_eq!((4, 642), predicted.dim());
    assert_eq!(fresh, predicted);
    assert_eq!(4, fx.tools.programs().iter().filter(|p| *p == "msmresample").count());
}

#[test]
fn an_unfitted_model_cannot_transform() {
    let fx = Fixture::new();
    let model = fx.model();
    let res = model.transform(contrast_maps(1, 0.0).view());
    assert!(matches!(res, Err(MsmError::NotFitted)));
    assert!(fx.tools.programs().is_empty());
}

#[test]
fn scoring_needs_as_many_source_as_target_maps() {
    let fx = Fixture::new();
    let source = contrast_maps(3, 0.0);
    let target = contrast_maps(3, 0.2);
    let mut model = fx.model();
    model.fit(source.view(), target.view(), &fx.mesh).unwrap();
    let num_calls = fx.tools.programs().len();

    let res = model.score(source.view(), contrast_maps(2, 0.2).view());
    assert!(matches!(res, Err(MsmError::ShapeMismatch(_))));
    assert_eq!(num_calls, fx.tools.programs().len());

    assert_abs_diff_eq!(1.0, model.score(source.view(), source.view()).unwrap(), epsilon = 1e-6);
    assert!(model.score(source.view(), target.view()).unwrap() < 1.0);
}

#[test]
fn a_failed_fit_keeps_the_previous_alignment() {
    let fx = Fixture::new();
    let source = contrast_maps(2, 0.0);
    let mut model = fx.model();
    model.fit(source.view(), contrast_maps(2, 0.4).view(), &fx.mesh).unwrap();
    let before = model.fitted().cloned();

    fx.tools.msm_exit.set(3);
    let res = model.fit(source.view(), contrast_maps(2, 2.0).view(), &fx.mesh);
    match res {
        Err(MsmError::ToolFailed(command, 3)) => assert!(command.contains("--inmesh=")),
        _ => panic!("expected the registration to fail"),
    }
    assert_eq!(before.as_ref(), model.fitted());
}

#[test]
fn scratch_directories_are_removed() {
    let fx = Fixture::new();
    let source = contrast_maps(1, 0.0);
    let mut model = fx.model();
    model.fit(source.view(), source.view(), &fx.mesh).unwrap();
    model.transform(source.view()).unwrap();

    let calls = fx.tools.calls.borrow();
    let in_data = path_arg(&calls[0], |a| if let ToolArg::InData(p) = a { Some(p) } else { None });
    let labels = path_arg(&calls[2], |a| if let ToolArg::Labels(p) = a { Some(p) } else { None });
    assert!(!in_data.parent().unwrap().exists());
    assert!(!labels.parent().unwrap().exists());
    assert!(fx.mesh.is_file());
}
