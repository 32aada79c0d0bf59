//! Projecting contrast maps through a computed registration with the tool's resampling utility.

use std::path::{Path, PathBuf};

use crate::command::{run_checked, ProcessRunner, ToolArg, ToolInvocation};
use crate::environment::ToolEnvironment;
use crate::error::{MsmError, Result};
use crate::gifti::read_gifti;

/// The suffix the resampling tool appends to its output prefix.
pub const RESAMPLED_SUFFIX: &str = ".func.gii";

pub struct ResamplingInvoker<'a> {
    tool_env: &'a ToolEnvironment,
    runner: &'a dyn ProcessRunner,
}

impl<'a> ResamplingInvoker<'a> {
    pub fn new(tool_env: &'a ToolEnvironment, runner: &'a dyn ProcessRunner) -> ResamplingInvoker<'a> {
        ResamplingInvoker { tool_env, runner }
    }

    pub fn invocation(
        &self,
        transformed_mesh: &Path,
        output_prefix: &Path,
        contrast_file: &Path,
        original_mesh: &Path,
    ) -> ToolInvocation {
        ToolInvocation::new(self.tool_env.resample_binary())
            .arg(ToolArg::Positional(transformed_mesh.to_path_buf()))
            .arg(ToolArg::Positional(output_prefix.to_path_buf()))
            .arg(ToolArg::Labels(contrast_file.to_path_buf()))
            .arg(ToolArg::Project(original_mesh.to_path_buf()))
    }

    /// Resample the first contrast map in `contrast_file` from the deformed `transformed_mesh` onto
    /// `original_mesh`. The tool writes `<output_prefix>.func.gii`, whose first array is returned.
    pub fn resample(
        &self,
        transformed_mesh: &Path,
        contrast_file: &Path,
        original_mesh: &Path,
        output_prefix: &Path,
    ) -> Result<Vec<f32>> {
        let inv = self.invocation(transformed_mesh, output_prefix, contrast_file, original_mesh);
        run_checked(self.runner, &inv)?;

        let output = resampled_path(output_prefix);
        let img = read_gifti(&output)?;
        img.darrays
            .first()
            .map(|d| d.data.to_f32())
            .ok_or_else(|| MsmError::InvalidGiftiFormat(format!("{} has no data arrays", output.display())))
    }
}

/// The file written by the resampling tool for `output_prefix`.
pub fn resampled_path(output_prefix: &Path) -> PathBuf {
    let mut name = output_prefix.as_os_str().to_os_string();
    name.push(RESAMPLED_SUFFIX);
    PathBuf::from(name)
}


#[cfg(test)]
mod test {
    use super::*;

    struct Fails;

    impl ProcessRunner for Fails {
        fn run(&self, _invocation: &ToolInvocation) -> Result<i32> {
            Ok(1)
        }
    }

    #[test]
    fn the_resampling_command_line_is_built_from_its_inputs() {
        let tool_env = ToolEnvironment::new("/opt/fsl");
        let invoker = ResamplingInvoker::new(&tool_env, &Fails);
        let inv = invoker.invocation(
            Path::new("/s/transformed.surf.gii"),
            Path::new("/s/predicted_0"),
            Path::new("/s/source_0.func.gii"),
            Path::new("/s/mesh.surf.gii"),
        );
        assert_eq!(
            "/opt/fsl/bin/msmresample /s/transformed.surf.gii /s/predicted_0 -labels /s/source_0.func.gii -project /s/mesh.surf.gii",
            inv.to_string()
        );
        assert_eq!(PathBuf::from("/s/predicted_0.func.gii"), resampled_path(Path::new("/s/predicted_0")));
    }

    #[test]
    fn a_failing_resampling_is_an_error() {
        let tool_env = ToolEnvironment::new("/opt/fsl");
        let res = ResamplingInvoker::new(&tool_env, &Fails).resample(
            Path::new("/s/t.surf.gii"),
            Path::new("/s/c.func.gii"),
            Path::new("/s/m.surf.gii"),
            Path::new("/s/p"),
        );
        assert!(matches!(res, Err(MsmError::ToolFailed(_, 1))));
    }
}
