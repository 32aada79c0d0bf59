//! Alignment of cortical surface data between subjects with the MSM surface registration tool.
//!
//! The heavy lifting is done by the external `msm` executables. This crate prepares their inputs
//! (GIFTI files in a consistent coordinate system), runs them, and reads their outputs back, so
//! that a fitted registration can be used like a model: fit it on one set of contrast maps, then
//! transform further maps of the source subject onto the target subject.

pub mod command;
pub mod config;
pub mod coordsys;
pub mod dpv;
pub mod environment;
pub mod error;
pub mod gifti;
pub mod mesh;
pub mod metrics;
pub mod model;
pub mod packager;
pub mod register;
pub mod resample;
pub mod sweep;
pub mod util;

pub use command::{ProcessRunner, SystemRunner, ToolArg, ToolInvocation};
pub use config::{Iterations, OptimizationMode, RegistrationConfig};
pub use coordsys::{is_same_coordsys, prepare_darrays};
pub use dpv::{read_dpv, DpvFile};
pub use environment::ToolEnvironment;
pub use error::{MsmError, Result};
pub use gifti::{read_gifti, CoordSystem, GiftiData, GiftiDataArray, GiftiImage};
pub use mesh::{icosphere, read_mesh, BrainMesh};
pub use metrics::ScoreMetric;
pub use model::{Alignment, FittedAlignment, MsmModel};
pub use packager::{duplicate_for_resampling, package_contrast_files};
pub use register::{RegistrationInvoker, RegistrationOutput};
pub use resample::ResamplingInvoker;
pub use sweep::{train_test_split, LambdaSweep, SmoothnessSweep, SweepPoint};
