//! Discovery of the installed registration tool.
//!
//! The install root is taken from the `FSLDIR` environment variable, or derived from the
//! location of an `fsl` (or `msm`) executable on the search path. It is resolved once and
//! then passed explicitly to everything that runs the tool.

use log::{debug, info};

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::config::RegistrationConfig;
use crate::error::{MsmError, Result};

pub const FSLDIR_VAR: &str = "FSLDIR";
pub const FSL_CONFIG_PATH_VAR: &str = "FSL_CONFIG_PATH";
pub const DEFAULT_CONFIG_RELPATH: &str = "config/basic_configs/config_standard_MSM_strain";

pub const MSM_BINARY: &str = "msm";
pub const MSMRESAMPLE_BINARY: &str = "msmresample";
pub const SURF2SURF_BINARY: &str = "surf2surf";

/// Paths of an installed registration tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolEnvironment {
    pub install_root: PathBuf,
    pub default_config: PathBuf,
}

impl ToolEnvironment {
    /// Use the tool installed under `install_root`, with the default config shipped with it.
    pub fn new<P: AsRef<Path>>(install_root: P) -> ToolEnvironment {
        let install_root = install_root.as_ref().to_path_buf();
        let default_config = install_root.join(DEFAULT_CONFIG_RELPATH);
        ToolEnvironment {
            install_root,
            default_config,
        }
    }

    /// Locate the tool from the process environment.
    pub fn discover() -> Result<ToolEnvironment> {
        ToolEnvironment::discover_from(
            env::var_os(FSLDIR_VAR),
            env::var_os(FSL_CONFIG_PATH_VAR),
            env::var_os("PATH"),
        )
    }

    /// Locate the tool from explicitly given environment values.
    pub fn discover_from(
        fsldir: Option<OsString>,
        config_path: Option<OsString>,
        search_path: Option<OsString>,
    ) -> Result<ToolEnvironment> {
        let root = match fsldir.filter(|d| !d.is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => {
                let exe = ["fsl", MSM_BINARY]
                    .iter()
                    .find_map(|name| find_executable(name, search_path.as_ref()))
                    .ok_or_else(|| MsmError::ToolNotFound(String::from("FSL is not installed or is not in PATH")))?;
                debug!("Found executable {}", exe.display());
                // <root>/bin/<exe>
                exe.parent()
                    .and_then(Path::parent)
                    .map(Path::to_path_buf)
                    .ok_or_else(|| MsmError::ToolNotFound(format!("cannot derive install root from {}", exe.display())))?
            }
        };

        let mut tool_env = ToolEnvironment::new(&root);
        if let Some(cfg) = config_path.filter(|c| !c.is_empty()) {
            tool_env.default_config = PathBuf::from(cfg);
        }

        if !tool_env.msm_binary().is_file() {
            return Err(MsmError::ToolNotFound(format!(
                "no {} executable at {}",
                MSM_BINARY,
                tool_env.msm_binary().display()
            )));
        }

        info!("FSLDIR: {}", tool_env.install_root.display());
        info!("FSL_CONFIG_PATH: {}", tool_env.default_config.display());
        Ok(tool_env)
    }

    pub fn binary(&self, name: &str) -> PathBuf {
        self.install_root.join("bin").join(name)
    }

    pub fn msm_binary(&self) -> PathBuf {
        self.binary(MSM_BINARY)
    }

    pub fn resample_binary(&self) -> PathBuf {
        self.binary(MSMRESAMPLE_BINARY)
    }

    pub fn surf2surf_binary(&self) -> PathBuf {
        self.binary(SURF2SURF_BINARY)
    }

    /// Parse the default configuration file shipped with the tool.
    pub fn load_default_config(&self) -> Result<RegistrationConfig> {
        RegistrationConfig::from_file(&self.default_config)
    }
}

/// Find an executable file called `name` in the directories of `search_path`.
pub fn find_executable(name: &str, search_path: Option<&OsString>) -> Option<PathBuf> {
    let search_path = search_path?;
    env::split_paths(search_path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}


#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    fn fake_install() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        fs::write(dir.path().join("bin").join("fsl"), "").unwrap();
        fs::write(dir.path().join("bin").join(MSM_BINARY), "").unwrap();
        dir
    }

    #[test]
    fn the_install_root_is_taken_from_fsldir() {
        let install = fake_install();
        let tool_env = ToolEnvironment::discover_from(Some(install.path().into()), None, None).unwrap();

        assert_eq!(install.path(), tool_env.install_root);
        assert_eq!(install.path().join(DEFAULT_CONFIG_RELPATH), tool_env.default_config);
        assert_eq!(install.path().join("bin").join("msmresample"), tool_env.resample_binary());
    }

    #[test]
    fn the_install_root_is_derived_from_the_search_path() {
        let install = fake_install();
        let search_path = env::join_paths(vec![PathBuf::from("/nonexistent/bin"), install.path().join("bin")]).unwrap();
        let tool_env =
            ToolEnvironment::discover_from(None, Some(OsString::from("/my/config")), Some(search_path)).unwrap();

        assert_eq!(install.path(), tool_env.install_root);
        assert_eq!(PathBuf::from("/my/config"), tool_env.default_config);
    }

    #[test]
    fn a_missing_tool_is_reported() {
        let empty = tempfile::tempdir().unwrap();
        let res = ToolEnvironment::discover_from(None, None, Some(empty.path().into()));
        assert!(matches!(res, Err(MsmError::ToolNotFound(_))));

        let res = ToolEnvironment::discover_from(Some(empty.path().into()), None, None);
        assert!(matches!(res, Err(MsmError::ToolNotFound(_))));
    }
}
