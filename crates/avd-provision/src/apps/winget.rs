//! Package-manager install task

use std::path::Path;

use super::{CommandSpec, InstallTask};

/// Install a package from the public winget source
#[derive(Debug, Clone)]
pub struct WingetInstall {
    /// Exact package identifier, e.g. `Notepad++.Notepad++`
    pub id: String,
    description: String,
}

impl WingetInstall {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let description = format!("Install {id} via winget");
        Self { id, description }
    }
}

impl InstallTask for WingetInstall {
    fn description(&self) -> &str {
        &self.description
    }

    fn check(&self) -> Option<CommandSpec> {
        Some(CommandSpec::new(
            "winget",
            ["list", "--exact", "--id", self.id.as_str()],
        ))
    }

    fn commands(&self, _work_dir: &Path) -> Vec<CommandSpec> {
        vec![CommandSpec::new(
            "winget",
            [
                "install",
                "--exact",
                "--id",
                self.id.as_str(),
                "--silent",
                "--accept-package-agreements",
                "--accept-source-agreements",
            ],
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn winget_install_is_silent_and_exact() {
        let task = WingetInstall::new("Notepad++.Notepad++");
        let cmds = task.commands(&PathBuf::from("."));

        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].program, "winget");
        assert!(cmds[0].args.contains(&"--silent".to_string()));
        assert!(cmds[0].args.contains(&"Notepad++.Notepad++".to_string()));
    }

    #[test]
    fn winget_check_queries_by_exact_id() {
        let task = WingetInstall::new("Notepad++.Notepad++");
        let check = task.check().unwrap();
        assert!(check.args.contains(&"list".to_string()));
        assert!(check.args.contains(&"--exact".to_string()));
    }
}
