//! Zip bundle download, extraction, and installer invocation tasks

use std::path::Path;

use super::{CommandSpec, InstallTask};

const BUNDLE_FILE: &str = "app-bundle.zip";

/// Download the installer bundle and extract it into the staging directory.
///
/// Uses `curl` and `tar`, both shipped with current Windows builds.
#[derive(Debug, Clone)]
pub struct FetchBundle {
    pub url: String,
    description: String,
}

impl FetchBundle {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let description = format!("Download and extract {url}");
        Self { url, description }
    }
}

impl InstallTask for FetchBundle {
    fn description(&self) -> &str {
        &self.description
    }

    fn commands(&self, work_dir: &Path) -> Vec<CommandSpec> {
        let archive = work_dir.join(BUNDLE_FILE).to_string_lossy().into_owned();
        let dest = work_dir.to_string_lossy().into_owned();
        vec![
            CommandSpec::new("curl", ["-fsSL", self.url.as_str(), "-o", archive.as_str()]),
            CommandSpec::new("tar", ["-xf", archive.as_str(), "-C", dest.as_str()]),
        ]
    }
}

/// Silently install an MSI extracted from the bundle
#[derive(Debug, Clone)]
pub struct MsiInstall {
    /// File name inside the staging directory
    pub file: String,
    description: String,
}

impl MsiInstall {
    pub fn new(file: impl Into<String>) -> Self {
        let file = file.into();
        let description = format!("Install {file}");
        Self { file, description }
    }
}

impl InstallTask for MsiInstall {
    fn description(&self) -> &str {
        &self.description
    }

    fn commands(&self, work_dir: &Path) -> Vec<CommandSpec> {
        let path = work_dir.join(&self.file).to_string_lossy().into_owned();
        vec![CommandSpec::new(
            "msiexec",
            ["/i", path.as_str(), "/qn", "/norestart"],
        )]
    }
}

/// Silently install an EXE-based installer extracted from the bundle
#[derive(Debug, Clone)]
pub struct ExeInstall {
    /// File name inside the staging directory
    pub file: String,
    /// Silent-mode arguments passed to the installer
    pub args: Vec<String>,
    description: String,
}

impl ExeInstall {
    pub fn new(file: impl Into<String>) -> Self {
        let file = file.into();
        let description = format!("Install {file}");
        Self {
            file,
            args: vec!["/install".into(), "/quiet".into(), "/norestart".into()],
            description,
        }
    }

    /// Override the silent-mode arguments
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

impl InstallTask for ExeInstall {
    fn description(&self) -> &str {
        &self.description
    }

    fn commands(&self, work_dir: &Path) -> Vec<CommandSpec> {
        let path = work_dir.join(&self.file);
        vec![CommandSpec::new(
            path.to_string_lossy(),
            self.args.clone(),
        )]
    }
}
