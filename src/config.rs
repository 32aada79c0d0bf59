//! Hyperparameters of a registration run, and their on-disk configuration file format.
//!
//! A configuration file has one option per line, each line of the form `--option=v1,v2,...`
//! with one value per multi-resolution stage, or a bare `--switch`.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{MsmError, Result};

/// Optimization mode of one resolution stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationMode {
    Affine,
    Discrete,
}

impl OptimizationMode {
    pub fn name(&self) -> &'static str {
        match self {
            OptimizationMode::Affine => "AFFINE",
            OptimizationMode::Discrete => "DISCRETE",
        }
    }
}

impl FromStr for OptimizationMode {
    type Err = MsmError;

    fn from_str(s: &str) -> Result<OptimizationMode> {
        match s.trim() {
            "AFFINE" => Ok(OptimizationMode::Affine),
            "DISCRETE" => Ok(OptimizationMode::Discrete),
            other => Err(MsmError::InvalidConfig(format!("unknown optimization mode '{}'", other))),
        }
    }
}

/// Number of iterations, either the same for every stage or given per stage as in `"5,2,3,4"`.
#[derive(Debug, Clone, PartialEq)]
pub enum Iterations {
    Uniform(u32),
    PerStage(String),
}

/// Registration hyperparameters. Every vector holds one value per resolution stage.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationConfig {
    pub simval: Vec<u32>,
    pub sigma_in: Vec<f64>,
    pub sigma_ref: Vec<f64>,
    pub lambda: Vec<f64>,
    pub iterations: Vec<u32>,
    pub opt: Vec<OptimizationMode>,
    pub cp_grid: Vec<u32>,
    pub sg_grid: Vec<u32>,
    pub data_grid: Vec<u32>,
    pub regexp: Option<f64>,
    /// `--VN`: variance normalize the input data.
    pub variance_normalize: bool,
    /// `--rescaleL`
    pub rescale_labels: bool,
    /// `--IN`: intensity normalize the input data.
    pub intensity_normalize: bool,
    /// Options not known to this crate, kept verbatim as (name, value).
    pub extra: Vec<(String, Option<String>)>,
}

impl Default for RegistrationConfig {
    /// The tool-documented 5 stage strain configuration: one affine stage, then four discrete ones.
    fn default() -> RegistrationConfig {
        RegistrationConfig {
            simval: vec![3, 2, 2, 2, 2],
            sigma_in: vec![2., 2., 2., 2., 1.],
            sigma_ref: vec![2., 2., 2., 2., 1.],
            lambda: vec![0., 0.1, 0.2, 0.3, 0.4],
            iterations: vec![50, 3, 3, 3, 3],
            opt: vec![
                OptimizationMode::Affine,
                OptimizationMode::Discrete,
                OptimizationMode::Discrete,
                OptimizationMode::Discrete,
                OptimizationMode::Discrete,
            ],
            cp_grid: vec![6, 1, 2, 3, 4],
            sg_grid: vec![6, 3, 4, 5, 6],
            data_grid: vec![6, 4, 4, 5, 6],
            regexp: Some(2.),
            variance_normalize: true,
            rescale_labels: true,
            intensity_normalize: false,
            extra: Vec::new(),
        }
    }
}

impl RegistrationConfig {
    fn empty() -> RegistrationConfig {
        RegistrationConfig {
            simval: Vec::new(),
            sigma_in: Vec::new(),
            sigma_ref: Vec::new(),
            lambda: Vec::new(),
            iterations: Vec::new(),
            opt: Vec::new(),
            cp_grid: Vec::new(),
            sg_grid: Vec::new(),
            data_grid: Vec::new(),
            regexp: None,
            variance_normalize: false,
            rescale_labels: false,
            intensity_normalize: false,
            extra: Vec::new(),
        }
    }

    /// Read a configuration file, e.g., one of the default configurations shipped with the tool.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<RegistrationConfig> {
        std::fs::read_to_string(path)?.parse()
    }

    /// The number of resolution stages, as given by the optimization modes.
    pub fn num_stages(&self) -> usize {
        self.opt.len()
    }

    /// Use the regularization strength `epsilon` (the tool's lambda) for every stage.
    pub fn with_epsilon(mut self, epsilon: f64) -> RegistrationConfig {
        self.lambda = vec![epsilon; self.num_stages()];
        self
    }

    /// Use the input smoothing `sigma` for every stage.
    pub fn with_sigma_in(mut self, sigma: f64) -> RegistrationConfig {
        self.sigma_in = vec![sigma; self.num_stages()];
        self
    }

    pub fn with_iterations(mut self, iterations: &Iterations) -> Result<RegistrationConfig> {
        self.iterations = match iterations {
            Iterations::Uniform(n) => vec![*n; self.num_stages()],
            Iterations::PerStage(s) => parse_list(s, "it")?,
        };
        Ok(self)
    }

    /// Render the configuration file content, one option per line.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

fn join<T: ToString>(values: &[T]) -> String {
    values.iter().map(|v| v.to_string()).collect::<Vec<String>>().join(",")
}

fn parse_list<T: FromStr>(value: &str, option: &str) -> Result<Vec<T>> {
    value
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|_| MsmError::InvalidConfig(format!("invalid value '{}' for --{}", v, option)))
        })
        .collect()
}

impl fmt::Display for RegistrationConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut lines: Vec<String> = Vec::new();
        let mut list = |name: &str, joined: String, empty: bool| {
            if !empty {
                lines.push(format!("--{}={}", name, joined));
            }
        };
        list("simval", join(&self.simval), self.simval.is_empty());
        list("sigma_in", join(&self.sigma_in), self.sigma_in.is_empty());
        list("sigma_ref", join(&self.sigma_ref), self.sigma_ref.is_empty());
        list("lambda", join(&self.lambda), self.lambda.is_empty());
        list("it", join(&self.iterations), self.iterations.is_empty());
        let opt: Vec<&str> = self.opt.iter().map(|o| o.name()).collect();
        list("opt", opt.join(","), opt.is_empty());
        list("CPgrid", join(&self.cp_grid), self.cp_grid.is_empty());
        list("SGgrid", join(&self.sg_grid), self.sg_grid.is_empty());
        list("datagrid", join(&self.data_grid), self.data_grid.is_empty());
        if let Some(regexp) = self.regexp {
            lines.push(format!("--regexp={}", regexp));
        }
        if self.variance_normalize {
            lines.push(String::from("--VN"));
        }
        if self.rescale_labels {
            lines.push(String::from("--rescaleL"));
        }
        if self.intensity_normalize {
            lines.push(String::from("--IN"));
        }
        for (name, value) in &self.extra {
            match value {
                Some(v) => lines.push(format!("--{}={}", name, v)),
                None => lines.push(format!("--{}", name)),
            }
        }
        write!(f, "{}", lines.join("\n"))
    }
}

impl FromStr for RegistrationConfig {
    type Err = MsmError;

    fn from_str(text: &str) -> Result<RegistrationConfig> {
        let mut cfg = RegistrationConfig::empty();
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let option = line
                .strip_prefix("--")
                .ok_or_else(|| MsmError::InvalidConfig(format!("line '{}' does not start with --", line)))?;
            let (name, value) = match option.find('=') {
                Some(idx) => (&option[..idx], Some(&option[idx + 1..])),
                None => (option, None),
            };
            let required = || value.ok_or_else(|| MsmError::InvalidConfig(format!("--{} needs a value", name)));
            match name {
                "simval" => cfg.simval = parse_list(required()?, name)?,
                "sigma_in" => cfg.sigma_in = parse_list(required()?, name)?,
                "sigma_ref" => cfg.sigma_ref = parse_list(required()?, name)?,
                "lambda" => cfg.lambda = parse_list(required()?, name)?,
                "it" => cfg.iterations = parse_list(required()?, name)?,
                "opt" => cfg.opt = parse_list(required()?, name)?,
                "CPgrid" => cfg.cp_grid = parse_list(required()?, name)?,
                "SGgrid" => cfg.sg_grid = parse_list(required()?, name)?,
                "datagrid" => cfg.data_grid = parse_list(required()?, name)?,
                "regexp" => {
                    let v = required()?;
                    cfg.regexp = Some(
                        v.trim()
                            .parse()
                            .map_err(|_| MsmError::InvalidConfig(format!("invalid value '{}' for --regexp", v)))?,
                    )
                }
                "VN" => cfg.variance_normalize = true,
                "rescaleL" => cfg.rescale_labels = true,
                "IN" => cfg.intensity_normalize = true,
                _ => cfg.extra.push((name.to_string(), value.map(str::to_string))),
            }
        }
        Ok(cfg)
    }
}
