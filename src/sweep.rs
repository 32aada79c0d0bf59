//! Hyperparameter sweeps: fit one alignment per parameter value and score it on held-out maps.
//!
//! With a model directory, a sweep keeps its train/test split in `train.json` and `test.json`
//! and one transformed mesh per value in `<parameter>_<value>/transformed_in_mesh.surf.gii`.
//! A later run on the same directory reuses both and only fits the values that are missing.

use log::{info, warn};
use ndarray::{Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::RegistrationConfig;
use crate::error::{MsmError, Result};
use crate::metrics::ScoreMetric;
use crate::model::Alignment;
use crate::register::TRANSFORMED_MESH_FILE;

pub const TRAIN_SPLIT_FILE: &str = "train.json";
pub const TEST_SPLIT_FILE: &str = "test.json";

/// Split the indices `0..n` into a training and a test set.
///
/// The test set holds `fraction * n` indices (rounded), but both sets get at least one index when
/// `n >= 2`. The same `seed` always gives the same split.
pub fn train_test_split(n: usize, fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let mut num_test = (fraction.max(0.0).min(1.0) * n as f64).round() as usize;
    if n >= 2 {
        num_test = num_test.max(1).min(n - 1);
    }
    let train = indices.split_off(num_test);
    (train, indices)
}

/// The split stored in `model_dir`, or a new one that is then stored there.
fn persistent_split(n: usize, fraction: f64, seed: u64, model_dir: &Path) -> Result<(Vec<usize>, Vec<usize>)> {
    let train_path = model_dir.join(TRAIN_SPLIT_FILE);
    let test_path = model_dir.join(TEST_SPLIT_FILE);
    if train_path.is_file() && test_path.is_file() {
        let train: Vec<usize> = serde_json::from_str(&fs::read_to_string(&train_path)?)?;
        let test: Vec<usize> = serde_json::from_str(&fs::read_to_string(&test_path)?)?;
        if train.is_empty() || test.is_empty() || train.iter().chain(test.iter()).any(|&i| i >= n) {
            return Err(MsmError::ShapeMismatch(format!(
                "the split stored in {} does not fit {} contrast maps",
                model_dir.display(),
                n
            )));
        }
        info!("Reusing train/test split from {}", model_dir.display());
        return Ok((train, test));
    }

    let (train, test) = train_test_split(n, fraction, seed);
    fs::create_dir_all(model_dir)?;
    fs::write(&train_path, serde_json::to_string(&train)?)?;
    fs::write(&test_path, serde_json::to_string(&test)?)?;
    Ok((train, test))
}

/// Similarity of the transformed test maps and, as baseline, the untransformed test maps to the target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepScores {
    pub pearson: f64,
    pub baseline_pearson: f64,
    pub r2: f64,
    pub baseline_r2: f64,
    pub cosine: f64,
    pub baseline_cosine: f64,
}

/// The outcome for one parameter value. `scores` is `None` if fitting or scoring failed, `error` then says why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepPoint {
    pub parameter: &'static str,
    pub value: f64,
    pub scores: Option<SweepScores>,
    pub error: Option<String>,
}

impl SweepPoint {
    pub fn is_skipped(&self) -> bool {
        self.scores.is_none()
    }
}

/// Serialize sweep results to pretty-printed JSON.
pub fn to_json(points: &[SweepPoint]) -> Result<String> {
    Ok(serde_json::to_string_pretty(points)?)
}

/// Where the transformed mesh for one parameter value is kept inside a model directory.
pub fn model_path(model_dir: &Path, parameter: &str, value: f64) -> PathBuf {
    model_dir.join(format!("{}_{}", parameter, value)).join(TRANSFORMED_MESH_FILE)
}

/// Maps contrast rows into train and test sets.
struct Split {
    source_train: Array2<f32>,
    target_train: Array2<f32>,
    source_test: Array2<f32>,
    target_test: Array2<f32>,
}

impl Split {
    fn new(
        source: ArrayView2<f32>,
        target: ArrayView2<f32>,
        fraction: f64,
        seed: u64,
        model_dir: Option<&Path>,
    ) -> Result<Split> {
        if source.dim() != target.dim() {
            return Err(MsmError::ShapeMismatch(format!(
                "source maps have shape {:?} but target maps have shape {:?}",
                source.dim(),
                target.dim()
            )));
        }
        if source.nrows() < 2 {
            return Err(MsmError::ShapeMismatch(String::from("a sweep needs at least two contrast maps")));
        }
        let (train, test) = match model_dir {
            Some(dir) => persistent_split(source.nrows(), fraction, seed, dir)?,
            None => train_test_split(source.nrows(), fraction, seed),
        };
        Ok(Split {
            source_train: source.select(Axis(0), &train),
            target_train: target.select(Axis(0), &train),
            source_test: source.select(Axis(0), &test),
            target_test: target.select(Axis(0), &test),
        })
    }

    fn score<A: Alignment>(&self, model: &A) -> Result<SweepScores> {
        let predicted = model.transform(self.source_test.view())?;
        let compare = |metric: ScoreMetric, maps: ArrayView2<f32>| metric.mean_rowwise(maps, self.target_test.view());
        Ok(SweepScores {
            pearson: compare(ScoreMetric::Pearson, predicted.view())?,
            baseline_pearson: compare(ScoreMetric::Pearson, self.source_test.view())?,
            r2: compare(ScoreMetric::R2, predicted.view())?,
            baseline_r2: compare(ScoreMetric::R2, self.source_test.view())?,
            cosine: compare(ScoreMetric::CosineDistance, predicted.view())?,
            baseline_cosine: compare(ScoreMetric::CosineDistance, self.source_test.view())?,
        })
    }

    /// Fit the model on the training maps, or load it from `model_path` if that was saved before.
    fn evaluate<A: Alignment>(&self, mut model: A, mesh_path: &Path, model_path: Option<&Path>) -> Result<SweepScores> {
        match model_path {
            Some(path) if path.is_file() => {
                info!("Reusing transformed mesh {}", path.display());
                model.load_model(path, mesh_path)?;
            }
            Some(path) => {
                model.fit(self.source_train.view(), self.target_train.view(), mesh_path)?;
                if let Some(dir) = path.parent() {
                    fs::create_dir_all(dir)?;
                }
                model.save_model(path)?;
            }
            None => {
                model.fit(self.source_train.view(), self.target_train.view(), mesh_path)?;
            }
        }
        self.score(&model)
    }
}

fn run_sweep<A, F>(
    parameter: &'static str,
    values: &[f64],
    split: &Split,
    mesh_path: &Path,
    model_dir: Option<&Path>,
    mut make_model: F,
) -> Vec<SweepPoint>
where
    A: Alignment,
    F: FnMut(f64) -> A,
{
    let mut points = Vec::with_capacity(values.len());
    for &value in values {
        info!("Evaluating {}={}", parameter, value);
        let path = model_dir.map(|dir| model_path(dir, parameter, value));
        let point = match split.evaluate(make_model(value), mesh_path, path.as_deref()) {
            Ok(scores) => {
                info!(
                    "{}={}: {} {:.4} (baseline {:.4})",
                    parameter,
                    value,
                    ScoreMetric::Pearson.name(),
                    scores.pearson,
                    scores.baseline_pearson
                );
                SweepPoint {
                    parameter,
                    value,
                    scores: Some(scores),
                    error: None,
                }
            }
            Err(e) => {
                warn!("Skipping {}={}: {}", parameter, value, e);
                SweepPoint {
                    parameter,
                    value,
                    scores: None,
                    error: Some(e.to_string()),
                }
            }
        };
        points.push(point);
    }
    points
}

/// Sweep over the regularization strength (lambda).
#[derive(Debug, Clone, PartialEq)]
pub struct LambdaSweep {
    pub config: RegistrationConfig,
    pub epsilons: Vec<f64>,
    pub test_fraction: f64,
    pub seed: u64,
    /// Keep the split and the fitted models here, and reuse them on later runs.
    pub model_dir: Option<PathBuf>,
}

impl LambdaSweep {
    pub fn new(epsilons: Vec<f64>) -> LambdaSweep {
        LambdaSweep {
            config: RegistrationConfig::default(),
            epsilons,
            test_fraction: 0.2,
            seed: 0,
            model_dir: None,
        }
    }

    pub fn with_model_dir<P: AsRef<Path>>(mut self, model_dir: P) -> LambdaSweep {
        self.model_dir = Some(model_dir.as_ref().to_path_buf());
        self
    }

    /// Run the sweep. `make_model` builds an unfitted model from the configuration of each point.
    pub fn run<A, F>(
        &self,
        source: ArrayView2<f32>,
        target: ArrayView2<f32>,
        mesh_path: &Path,
        mut make_model: F,
    ) -> Result<Vec<SweepPoint>>
    where
        A: Alignment,
        F: FnMut(RegistrationConfig) -> A,
    {
        let model_dir = self.model_dir.as_deref();
        let split = Split::new(source, target, self.test_fraction, self.seed, model_dir)?;
        Ok(run_sweep("epsilon", &self.epsilons, &split, mesh_path, model_dir, |e| {
            make_model(self.config.clone().with_epsilon(e))
        }))
    }
}

/// Sweep over the smoothing applied to the input data (sigma_in).
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothnessSweep {
    pub config: RegistrationConfig,
    pub sigmas: Vec<f64>,
    pub test_fraction: f64,
    pub seed: u64,
    pub model_dir: Option<PathBuf>,
}

impl SmoothnessSweep {
    pub fn new(sigmas: Vec<f64>) -> SmoothnessSweep {
        SmoothnessSweep {
            config: RegistrationConfig::default(),
            sigmas,
            test_fraction: 0.2,
            seed: 0,
            model_dir: None,
        }
    }

    pub fn with_model_dir<P: AsRef<Path>>(mut self, model_dir: P) -> SmoothnessSweep {
        self.model_dir = Some(model_dir.as_ref().to_path_buf());
        self
    }

    pub fn run<A, F>(
        &self,
        source: ArrayView2<f32>,
        target: ArrayView2<f32>,
        mesh_path: &Path,
        mut make_model: F,
    ) -> Result<Vec<SweepPoint>>
    where
        A: Alignment,
        F: FnMut(RegistrationConfig) -> A,
    {
        let model_dir = self.model_dir.as_deref();
        let split = Split::new(source, target, self.test_fraction, self.seed, model_dir)?;
        Ok(run_sweep("sigma_in", &self.sigmas, &split, mesh_path, model_dir, |s| {
            make_model(self.config.clone().with_sigma_in(s))
        }))
    }
}
