//! The alignment model: a reusable mapping of one subject's surface data onto another's.
//!
//! A model starts out unfitted. [`Alignment::fit`] (or [`MsmModel::fit_files`]) registers a
//! source subject onto a target subject, [`Alignment::load_model`] restores a previously saved
//! registration without running the tool. Both replace the fitted state as a whole, so a failed
//! fit leaves an earlier fit untouched.

use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use std::path::{Path, PathBuf};

use crate::command::{ProcessRunner, SystemRunner};
use crate::config::RegistrationConfig;
use crate::environment::ToolEnvironment;
use crate::error::{MsmError, Result};
use crate::gifti::{read_gifti, CoordSystem, GiftiImage};
use crate::metrics::ScoreMetric;
use crate::packager::{contrast_array, duplicate_for_resampling, write_contrast_rows};
use crate::register::RegistrationInvoker;
use crate::resample::ResamplingInvoker;

/// The operations of an alignment between two subjects.
///
/// Contrast maps are passed as one map per row, one column per mesh vertex.
pub trait Alignment {
    /// Fit the alignment from `source` onto `target` maps living on the mesh at `mesh_path`.
    /// Both must have the same number of rows.
    fn fit(&mut self, source: ArrayView2<f32>, target: ArrayView2<f32>, mesh_path: &Path) -> Result<&mut Self>;

    /// Map source maps onto the target. The output has one row per input row.
    fn transform(&self, source: ArrayView2<f32>) -> Result<Array2<f32>>;

    /// Transform `source` and compare it with `target` row by row.
    fn score(&self, source: ArrayView2<f32>, target: ArrayView2<f32>) -> Result<f64>;

    /// Restore a fitted alignment from a saved transformed mesh and the mesh it was fitted on.
    fn load_model(&mut self, model_path: &Path, mesh_path: &Path) -> Result<&mut Self>;

    /// Persist the fitted alignment to `model_path`, to be restored with [`Alignment::load_model`].
    fn save_model(&self, model_path: &Path) -> Result<()>;
}

/// The state of a fitted model.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedAlignment {
    /// The source mesh warped into correspondence with the target mesh.
    pub transformed_mesh: GiftiImage,
    /// The mesh the data lives on, needed to write inputs for later transform calls.
    pub mesh: GiftiImage,
    pub mesh_path: PathBuf,
    pub coordsys: CoordSystem,
    /// The first target contrast resampled during fit, if the tool produced it.
    pub reprojected_target: Option<GiftiImage>,
}

/// An [`Alignment`] computed by the external registration tool.
///
/// The score is the mean row-wise Pearson correlation: higher is better, 1 is a perfect match.
pub struct MsmModel {
    tool_env: ToolEnvironment,
    runner: Box<dyn ProcessRunner>,
    config: RegistrationConfig,
    verbose: bool,
    debug: bool,
    fitted: Option<FittedAlignment>,
}

impl MsmModel {
    /// Create an unfitted model that runs the tool from `tool_env` with the default configuration.
    pub fn new(tool_env: ToolEnvironment) -> MsmModel {
        MsmModel {
            tool_env,
            runner: Box::new(SystemRunner),
            config: RegistrationConfig::default(),
            verbose: false,
            debug: false,
            fitted: None,
        }
    }

    pub fn with_runner(mut self, runner: Box<dyn ProcessRunner>) -> MsmModel {
        self.runner = runner;
        self
    }

    pub fn with_config(mut self, config: RegistrationConfig) -> MsmModel {
        self.config = config;
        self
    }

    /// Use the regularization strength `epsilon` (the tool's lambda) in every stage.
    pub fn with_epsilon(mut self, epsilon: f64) -> MsmModel {
        self.config = self.config.with_epsilon(epsilon);
        self
    }

    pub fn verbose(mut self, verbose: bool) -> MsmModel {
        self.verbose = verbose;
        self
    }

    pub fn debug(mut self, debug: bool) -> MsmModel {
        self.debug = debug;
        self
    }

    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    pub fn metric(&self) -> ScoreMetric {
        ScoreMetric::Pearson
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn fitted(&self) -> Option<&FittedAlignment> {
        self.fitted.as_ref()
    }

    /// The target contrast resampled through the registration during the last fit.
    pub fn reprojected_target(&self) -> Option<&GiftiImage> {
        self.fitted.as_ref().and_then(|f| f.reprojected_target.as_ref())
    }

    fn fitted_or_err(&self) -> Result<&FittedAlignment> {
        self.fitted.as_ref().ok_or(MsmError::NotFitted)
    }

    /// Fit from contrast maps stored in GIFTI files, one list per subject.
    ///
    /// Each subject's files are merged in order. Arrays that carry a coordinate system other than
    /// the mesh's are rejected before the tool is run.
    pub fn fit_files<P: AsRef<Path>, Q: AsRef<Path>>(
        &mut self,
        source_files: &[P],
        target_files: &[Q],
        mesh_path: &Path,
    ) -> Result<&mut MsmModel> {
        if source_files.len() != target_files.len() {
            return Err(MsmError::ShapeMismatch(format!(
                "{} source contrast files but {} target contrast files",
                source_files.len(),
                target_files.len()
            )));
        }
        let mesh = read_gifti(mesh_path)?;
        let coordsys = mesh.coordsys().cloned().unwrap_or_default();

        let invoker = RegistrationInvoker::new(&self.tool_env, self.runner.as_ref())
            .verbose(self.verbose)
            .debug(self.debug);
        let output = invoker.register(source_files, mesh_path, target_files, None, &self.config)?;

        self.fitted = Some(FittedAlignment {
            transformed_mesh: output.transformed_mesh,
            mesh,
            mesh_path: mesh_path.to_path_buf(),
            coordsys,
            reprojected_target: output.reprojected,
        });
        info!("Fitted alignment on mesh {}", mesh_path.display());
        Ok(self)
    }

    /// Transform a single contrast map.
    pub fn transform_map(&self, source: ArrayView1<f32>) -> Result<Array1<f32>> {
        let batch = self.transform(source.insert_axis(Axis(0)))?;
        Ok(batch.index_axis(Axis(0), 0).to_owned())
    }

    /// Transform the first contrast map stored in a GIFTI file. Its coordinate system must match the mesh.
    pub fn transform_file<P: AsRef<Path>>(&self, contrast_file: P) -> Result<Array1<f32>> {
        let fitted = self.fitted_or_err()?;
        let mut img = read_gifti(contrast_file)?;
        img.darrays.truncate(1);
        let img = duplicate_for_resampling(img, &fitted.coordsys)?;

        let scratch = Scratch::new(fitted)?;
        Ok(Array1::from(scratch.resample(self, img, 0)?))
    }
}

/// A scratch directory holding the fitted meshes for the resampling tool, removed on drop.
struct Scratch {
    dir: tempfile::TempDir,
    transformed_mesh: PathBuf,
    mesh: PathBuf,
}

impl Scratch {
    fn new(fitted: &FittedAlignment) -> Result<Scratch> {
        let dir = tempfile::Builder::new().prefix("msmalign-transform").tempdir()?;
        let transformed_mesh = dir.path().join("transformed_mesh.surf.gii");
        fitted.transformed_mesh.to_file(&transformed_mesh)?;
        let mesh = dir.path().join("mesh.surf.gii");
        fitted.mesh.to_file(&mesh)?;
        debug!("Transform scratch directory: {}", dir.path().display());
        Ok(Scratch {
            dir,
            transformed_mesh,
            mesh,
        })
    }

    fn resample(&self, model: &MsmModel, img: GiftiImage, idx: usize) -> Result<Vec<f32>> {
        let contrast_file = self.dir.path().join(format!("source_{}.func.gii", idx));
        img.to_file(&contrast_file)?;
        let prefix = self.dir.path().join(format!("predicted_contrast_{}", idx));
        ResamplingInvoker::new(&model.tool_env, model.runner.as_ref()).resample(
            &self.transformed_mesh,
            &contrast_file,
            &self.mesh,
            &prefix,
        )
    }
}

impl Alignment for MsmModel {
    fn fit(&mut self, source: ArrayView2<f32>, target: ArrayView2<f32>, mesh_path: &Path) -> Result<&mut Self> {
        if source.nrows() != target.nrows() {
            return Err(MsmError::ShapeMismatch(format!(
                "{} source maps but {} target maps",
                source.nrows(),
                target.nrows()
            )));
        }
        let coordsys = read_gifti(mesh_path)?.coordsys().cloned().unwrap_or_default();

        // The tool needs file paths, so every map is written to its own file first.
        let scratch = tempfile::Builder::new().prefix("msmalign-maps").tempdir()?;
        let rows = |maps: ArrayView2<f32>| maps.outer_iter().map(|r| r.to_vec()).collect::<Vec<Vec<f32>>>();
        let source_files = write_contrast_rows(rows(source), &coordsys, scratch.path(), "source")?;
        let target_files = write_contrast_rows(rows(target), &coordsys, scratch.path(), "target")?;

        self.fit_files(&source_files, &target_files, mesh_path)
    }

    fn transform(&self, source: ArrayView2<f32>) -> Result<Array2<f32>> {
        let fitted = self.fitted_or_err()?;
        if source.nrows() == 0 {
            return Ok(Array2::zeros((0, source.ncols())));
        }

        let scratch = Scratch::new(fitted)?;
        let mut predicted: Vec<f32> = Vec::new();
        let mut num_values = None;
        for (idx, row) in source.outer_iter().enumerate() {
            let mut img = GiftiImage::new();
            img.add_data_array(contrast_array(row.to_vec(), &fitted.coordsys));
            let img = duplicate_for_resampling(img, &fitted.coordsys)?;

            let values = scratch.resample(self, img, idx)?;
            match num_values {
                None => num_values = Some(values.len()),
                Some(n) if n != values.len() => {
                    return Err(MsmError::ShapeMismatch(format!(
                        "resampled map {} has {} values, expected {}",
                        idx,
                        values.len(),
                        n
                    )))
                }
                _ => {}
            }
            predicted.extend(values);
        }

        let shape = (source.nrows(), num_values.unwrap_or(0));
        Array2::from_shape_vec(shape, predicted).map_err(|e| MsmError::ShapeMismatch(e.to_string()))
    }

    fn score(&self, source: ArrayView2<f32>, target: ArrayView2<f32>) -> Result<f64> {
        self.fitted_or_err()?;
        if source.nrows() != target.nrows() {
            return Err(MsmError::ShapeMismatch(format!(
                "{} source maps but {} target maps",
                source.nrows(),
                target.nrows()
            )));
        }
        let predicted = self.transform(source)?;
        self.metric().mean_rowwise(predicted.view(), target)
    }

    fn load_model(&mut self, model_path: &Path, mesh_path: &Path) -> Result<&mut Self> {
        let transformed_mesh = read_gifti(model_path)?;
        let mesh = read_gifti(mesh_path)?;
        let coordsys = mesh.coordsys().cloned().unwrap_or_default();

        self.fitted = Some(FittedAlignment {
            transformed_mesh,
            mesh,
            mesh_path: mesh_path.to_path_buf(),
            coordsys,
            reprojected_target: None,
        });
        info!("Loaded transformed mesh from {}", model_path.display());
        Ok(self)
    }

    /// Write the transformed mesh. A ".gz" file name gives a compressed file.
    fn save_model(&self, model_path: &Path) -> Result<()> {
        let fitted = self.fitted_or_err()?;
        fitted.transformed_mesh.to_file(model_path)?;
        info!("Saved transformed mesh to {}", model_path.display());
        Ok(())
    }
}
