//! Running the external registration tool on two subjects' contrast maps.

use log::{debug, info};

use std::fs;
use std::path::{Path, PathBuf};

use crate::command::{run_checked, ProcessRunner, ToolArg, ToolInvocation};
use crate::config::RegistrationConfig;
use crate::dpv::read_dpv;
use crate::environment::ToolEnvironment;
use crate::error::{MsmError, Result};
use crate::gifti::{read_gifti, GiftiData, GiftiImage};
use crate::packager::package_contrast_files;
use crate::util::uncompressed_copy;

pub const CONFIG_FILE_NAME: &str = "msm_config";
/// The ASCII mesh written by the registration tool into its output prefix.
pub const REGISTERED_SPHERE_ASCII: &str = "sphere.reg.asc";
/// The data-per-vertex file holding the target contrast resampled through the registration.
pub const REPROJECTED_DPV: &str = "transformed_and_reprojected.dpv";
pub const TRANSFORMED_MESH_FILE: &str = "transformed_in_mesh.surf.gii";
/// Output type for the format converter: binary GIFTI with compressed data arrays.
pub const GIFTI_BIN_GZ: &str = "GIFTI_BIN_GZ";

/// The result of one registration run.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationOutput {
    /// The source mesh with its vertices moved into correspondence with the target mesh.
    pub transformed_mesh: GiftiImage,
    /// The target contrast resampled through the registration, with the header of the first target array.
    pub reprojected: Option<GiftiImage>,
}

/// Builds the registration and conversion command lines and runs them through a [`ProcessRunner`].
pub struct RegistrationInvoker<'a> {
    tool_env: &'a ToolEnvironment,
    runner: &'a dyn ProcessRunner,
    verbose: bool,
    debug: bool,
}

impl<'a> RegistrationInvoker<'a> {
    pub fn new(tool_env: &'a ToolEnvironment, runner: &'a dyn ProcessRunner) -> RegistrationInvoker<'a> {
        RegistrationInvoker {
            tool_env,
            runner,
            verbose: false,
            debug: false,
        }
    }

    /// Pass `--verbose` to the tool.
    pub fn verbose(mut self, verbose: bool) -> RegistrationInvoker<'a> {
        self.verbose = verbose;
        self
    }

    /// Pass `--debug --levels=1` to the tool, which runs only the first resolution level.
    pub fn debug(mut self, debug: bool) -> RegistrationInvoker<'a> {
        self.debug = debug;
        self
    }

    /// The registration command line for the given inputs, writing its outputs under `output_dir`.
    pub fn registration_invocation(
        &self,
        source_mesh: &Path,
        target_mesh: &Path,
        source_data: &Path,
        target_data: &Path,
        config_path: &Path,
        output_dir: &Path,
    ) -> ToolInvocation {
        // The tool concatenates file names to the prefix, so it must end with a separator.
        let mut prefix = output_dir.as_os_str().to_os_string();
        prefix.push("/");

        ToolInvocation::new(self.tool_env.msm_binary())
            .arg(ToolArg::InMesh(source_mesh.to_path_buf()))
            .arg(ToolArg::RefMesh(target_mesh.to_path_buf()))
            .arg(ToolArg::InData(source_data.to_path_buf()))
            .arg(ToolArg::RefData(target_data.to_path_buf()))
            .arg(ToolArg::Conf(config_path.to_path_buf()))
            .arg(ToolArg::OutputPrefix(PathBuf::from(prefix)))
            .arg(ToolArg::Format(String::from("ASCII")))
            .arg_if(self.verbose, ToolArg::Verbose)
            .arg_if(self.debug, ToolArg::Debug)
            .arg_if(self.debug, ToolArg::Levels(1))
    }

    /// The command line converting the ASCII mesh at `input` into a binary GIFTI mesh at `output`.
    pub fn conversion_invocation(&self, input: &Path, output: &Path) -> ToolInvocation {
        ToolInvocation::new(self.tool_env.surf2surf_binary())
            .arg(ToolArg::Input(input.to_path_buf()))
            .arg(ToolArg::OutputFile(output.to_path_buf()))
            .arg(ToolArg::OutputType(String::from(GIFTI_BIN_GZ)))
    }

    /// Register the source subject onto the target subject.
    ///
    /// The contrast maps of each subject are packaged into one file in the coordinate system of
    /// that subject's mesh. `target_mesh` defaults to `source_mesh`. All intermediate files live in
    /// a scratch directory that is removed when this function returns, whether it succeeds or not.
    pub fn register<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        source_contrasts: &[P],
        source_mesh: &Path,
        target_contrasts: &[Q],
        target_mesh: Option<&Path>,
        config: &RegistrationConfig,
    ) -> Result<RegistrationOutput> {
        let target_mesh = target_mesh.unwrap_or(source_mesh);
        let scratch = tempfile::Builder::new().prefix("msmalign-fit").tempdir()?;
        let dir = scratch.path();
        debug!("Registration scratch directory: {}", dir.display());

        let config_path = dir.join(CONFIG_FILE_NAME);
        fs::write(&config_path, config.render())?;

        let source_data = dir.join("source_subject.func.gii");
        package_contrast_files(source_contrasts, source_mesh, &source_data)?;
        let target_data = dir.join("target_subject.func.gii");
        package_contrast_files(target_contrasts, target_mesh, &target_data)?;

        let in_dir = dir.join("inmesh");
        let ref_dir = dir.join("refmesh");
        fs::create_dir(&in_dir)?;
        fs::create_dir(&ref_dir)?;
        let source_mesh = uncompressed_copy(source_mesh, &in_dir)?;
        let target_mesh = uncompressed_copy(target_mesh, &ref_dir)?;

        let output_dir = dir.join("out");
        fs::create_dir(&output_dir)?;
        let registration = self.registration_invocation(
            &source_mesh,
            &target_mesh,
            &source_data,
            &target_data,
            &config_path,
            &output_dir,
        );
        run_checked(self.runner, &registration)?;

        let mesh_ascii = output_dir.join(REGISTERED_SPHERE_ASCII);
        let mesh_gii = output_dir.join(TRANSFORMED_MESH_FILE);
        run_checked(self.runner, &self.conversion_invocation(&mesh_ascii, &mesh_gii))?;
        let transformed_mesh = read_gifti(&mesh_gii)?;

        let dpv_path = output_dir.join(REPROJECTED_DPV);
        let reprojected = if dpv_path.is_file() {
            let first_target = target_contrasts
                .first()
                .ok_or_else(|| MsmError::ShapeMismatch(String::from("no target contrast map")))?;
            Some(reprojected_contrast(&dpv_path, first_target.as_ref())?)
        } else {
            debug!("No {} written, skipping reprojected target", REPROJECTED_DPV);
            None
        };

        info!("Registration finished, transformed mesh has {} data arrays", transformed_mesh.darrays.len());
        Ok(RegistrationOutput {
            transformed_mesh,
            reprojected,
        })
    }
}

/// Build an image with the header of the first array of `template_path` and the values of the
/// scalar column of the DPV file at `dpv_path`.
pub fn reprojected_contrast(dpv_path: &Path, template_path: &Path) -> Result<GiftiImage> {
    let values = read_dpv(dpv_path)?.value;
    let mut img = read_gifti(template_path)?;
    if img.darrays.is_empty() {
        return Err(MsmError::InvalidGiftiFormat(format!("{} has no data arrays", template_path.display())));
    }
    img.darrays.truncate(1);
    let darray = &mut img.darrays[0];
    darray.dims = vec![values.len()];
    darray.data = GiftiData::Float32(values);
    Ok(img)
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::gifti::{GiftiDataArray, NIFTI_INTENT_NONE};

    struct NoRunner;

    impl ProcessRunner for NoRunner {
        fn run(&self, _invocation: &ToolInvocation) -> Result<i32> {
            Ok(0)
        }
    }

    #[test]
    fn the_registration_command_line_has_all_flags() {
        let tool_env = ToolEnvironment::new("/opt/fsl");
        let invoker = RegistrationInvoker::new(&tool_env, &NoRunner).verbose(true).debug(true);
        let inv = invoker.registration_invocation(
            Path::new("/s/in.gii"),
            Path::new("/s/ref.gii"),
            Path::new("/s/in.func.gii"),
            Path::new("/s/ref.func.gii"),
            Path::new("/s/msm_config"),
            Path::new("/s/out"),
        );
        assert_eq!(
            "/opt/fsl/bin/msm --inmesh=/s/in.gii --refmesh=/s/ref.gii --indata=/s/in.func.gii \
             --refdata=/s/ref.func.gii --conf=/s/msm_config -o /s/out/ -f ASCII --verbose --debug --levels=1",
            inv.to_string()
        );

        let quiet = RegistrationInvoker::new(&tool_env, &NoRunner);
        let inv = quiet.conversion_invocation(Path::new("/s/out/sphere.reg.asc"), Path::new("/s/out/m.surf.gii"));
        assert_eq!(
            "/opt/fsl/bin/surf2surf -i /s/out/sphere.reg.asc -o /s/out/m.surf.gii --outputtype=GIFTI_BIN_GZ",
            inv.to_string()
        );
    }

    #[test]
    fn the_reprojected_contrast_keeps_the_template_header() {
        let dir = tempfile::tempdir().unwrap();
        let dpv = dir.path().join("r.dpv");
        fs::write(&dpv, "0 0 0 1 0.5\n1 0 1 0 1.5\n2 1 0 0 2.5\n").unwrap();

        let mut template = GiftiImage::new();
        template.meta.push((String::from("Subject"), String::from("sub-04")));
        let mut first = GiftiDataArray::from_f32(vec![9.0, 9.0, 9.0]);
        first.meta.push((String::from("Name"), String::from("story-math")));
        template.add_data_array(first);
        template.add_data_array(GiftiDataArray::from_f32(vec![7.0, 7.0, 7.0]));
        let template_path = dir.path().join("t.func.gii");
        template.to_file(&template_path).unwrap();

        let img = reprojected_contrast(&dpv, &template_path).unwrap();
        assert_eq!(1, img.darrays.len());
        assert_eq!(template.meta, img.meta);
        assert_eq!(template.darrays[0].meta, img.darrays[0].meta);
        assert_eq!(NIFTI_INTENT_NONE, img.darrays[0].intent);
        assert_eq!(GiftiData::Float32(vec![0.5, 1.5, 2.5]), img.darrays[0].data);
    }
}
