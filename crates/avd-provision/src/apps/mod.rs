//! Application install tasks for the template build VM
//!
//! Each task implements [`InstallTask`]: an optional satisfied-check plus
//! the silent install commands to run. The runner applies the same
//! partial-failure policy as the provisioner, with local installers instead
//! of cloud resources: one package's failure is logged and the run moves on.

mod bundle;
mod runner;
mod winget;

pub use bundle::{ExeInstall, FetchBundle, MsiInstall};
pub use runner::{Exec, InstallLog, InstallReport, InstallRunner, SystemExec};
pub use winget::WingetInstall;

use std::fmt;
use std::path::Path;

use serde::Serialize;

/// A command line to launch, without shell interpretation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Result of running one install task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallOutcome {
    Installed,
    /// The satisfied-check passed, nothing to do
    AlreadySatisfied,
    Failed(String),
}

impl InstallOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::AlreadySatisfied => "already satisfied",
            Self::Failed(_) => "failed",
        }
    }
}

/// One application install step
pub trait InstallTask {
    /// Human-readable description of what this task installs
    fn description(&self) -> &str;

    /// Command that succeeds (exit 0) when the task is already satisfied.
    /// `None` means the task always runs.
    fn check(&self) -> Option<CommandSpec> {
        None
    }

    /// Commands to run, in order, relative to the staging directory
    fn commands(&self, work_dir: &Path) -> Vec<CommandSpec>;
}
