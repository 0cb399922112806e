//! Install task runner
//!
//! Runs tasks sequentially, narrating every step to standard output and a
//! timestamped log file. One task's failure is recorded and the run
//! continues with the next task.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

use tempfile::TempDir;

use super::{CommandSpec, InstallOutcome, InstallTask};

/// Launches install commands
pub trait Exec {
    /// Run a command to completion in `cwd`. `quiet` suppresses the
    /// command's own output (used for satisfied-checks).
    fn run(&self, cmd: &CommandSpec, cwd: &Path, quiet: bool) -> Result<(), String>;
}

/// Launches commands via the local process table
pub struct SystemExec;

impl Exec for SystemExec {
    fn run(&self, cmd: &CommandSpec, cwd: &Path, quiet: bool) -> Result<(), String> {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args).current_dir(cwd);
        if quiet {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let status = command
            .status()
            .map_err(|e| format!("failed to launch {}: {e}", cmd.program))?;

        if status.success() {
            Ok(())
        } else {
            Err(format!("{} exited with {status}", cmd.program))
        }
    }
}

/// Timestamped log file; every line also goes to standard output
pub struct InstallLog {
    path: PathBuf,
    file: File,
}

impl InstallLog {
    /// Create `install-<unix-seconds>.log` under `dir`
    pub fn create(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let path = dir.join(format!("install-{stamp}.log"));
        let file = File::create(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Narrate a line to stdout and the log file
    pub fn say(&mut self, line: &str) {
        println!("{line}");
        let _ = writeln!(self.file, "{line}");
    }
}

/// Aggregate result of an install run
#[derive(Debug)]
pub struct InstallReport {
    /// (description, outcome) per task, in run order
    pub results: Vec<(String, InstallOutcome)>,
}

impl InstallReport {
    /// True if any task failed; drives a non-zero exit status
    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|(_, outcome)| outcome.is_failed())
    }
}

/// Runs install tasks against a fresh staging directory
pub struct InstallRunner<'a> {
    exec: &'a dyn Exec,
    log: InstallLog,
    work_dir: TempDir,
}

impl<'a> InstallRunner<'a> {
    pub fn new(exec: &'a dyn Exec, log_dir: &Path) -> io::Result<Self> {
        Ok(Self {
            exec,
            log: InstallLog::create(log_dir)?,
            work_dir: TempDir::new()?,
        })
    }

    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    /// Run every task. Failures are recorded per task; the run never aborts.
    pub fn run(&mut self, tasks: &[Box<dyn InstallTask>]) -> InstallReport {
        let total = tasks.len();
        let mut results = Vec::with_capacity(total);

        for (index, task) in tasks.iter().enumerate() {
            let desc = task.description().to_string();
            self.log.say(&format!("[{}/{total}] {desc}", index + 1));

            let outcome = self.run_task(task.as_ref());
            match &outcome {
                InstallOutcome::Installed => self.log.say("  done"),
                InstallOutcome::AlreadySatisfied => self.log.say("  already satisfied, skipping"),
                InstallOutcome::Failed(detail) => self.log.say(&format!("  FAILED: {detail}")),
            }
            results.push((desc, outcome));
        }

        InstallReport { results }
    }

    fn run_task(&mut self, task: &dyn InstallTask) -> InstallOutcome {
        let work = self.work_dir.path().to_path_buf();

        if let Some(check) = task.check() {
            if self.exec.run(&check, &work, true).is_ok() {
                return InstallOutcome::AlreadySatisfied;
            }
        }

        for cmd in task.commands(&work) {
            self.log.say(&format!("  > {cmd}"));
            if let Err(detail) = self.exec.run(&cmd, &work, false) {
                return InstallOutcome::Failed(detail);
            }
        }
        InstallOutcome::Installed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::{ExeInstall, FetchBundle, MsiInstall, WingetInstall};
    use std::cell::RefCell;

    /// Records launched programs; fails those listed in `fail`
    struct FakeExec {
        fail: Vec<&'static str>,
        satisfied_checks: bool,
        launched: RefCell<Vec<String>>,
    }

    impl FakeExec {
        fn new(fail: Vec<&'static str>) -> Self {
            Self {
                fail,
                satisfied_checks: false,
                launched: RefCell::new(vec![]),
            }
        }
    }

    impl Exec for FakeExec {
        fn run(&self, cmd: &CommandSpec, _cwd: &Path, quiet: bool) -> Result<(), String> {
            if quiet {
                return if self.satisfied_checks {
                    Ok(())
                } else {
                    Err("not installed".into())
                };
            }
            self.launched.borrow_mut().push(cmd.program.clone());
            if self.fail.iter().any(|f| cmd.program.contains(f)) {
                Err(format!("{} exited with code 1603", cmd.program))
            } else {
                Ok(())
            }
        }
    }

    fn tasks() -> Vec<Box<dyn InstallTask>> {
        vec![
            Box::new(FetchBundle::new("https://example.com/apps.zip")),
            Box::new(MsiInstall::new("host.msi")),
            Box::new(ExeInstall::new("setup.exe")),
            Box::new(WingetInstall::new("Notepad++.Notepad++")),
        ]
    }

    #[test]
    fn one_failure_does_not_stop_later_tasks() {
        let exec = FakeExec::new(vec!["msiexec"]);
        let log_dir = TempDir::new().unwrap();
        let mut runner = InstallRunner::new(&exec, log_dir.path()).unwrap();

        let report = runner.run(&tasks());

        assert_eq!(report.results.len(), 4);
        assert!(report.results[1].1.is_failed());
        assert_eq!(report.results[3].1, InstallOutcome::Installed);
        assert!(report.has_failures());
        // winget install still ran after the msiexec failure
        assert!(exec.launched.borrow().iter().any(|p| p == "winget"));
    }

    #[test]
    fn satisfied_check_skips_the_install() {
        let mut exec = FakeExec::new(vec![]);
        exec.satisfied_checks = true;
        let log_dir = TempDir::new().unwrap();
        let mut runner = InstallRunner::new(&exec, log_dir.path()).unwrap();

        let report = runner.run(&[Box::new(WingetInstall::new("Notepad++.Notepad++")) as Box<dyn InstallTask>]);

        assert_eq!(report.results[0].1, InstallOutcome::AlreadySatisfied);
        assert!(exec.launched.borrow().is_empty());
        assert!(!report.has_failures());
    }

    #[test]
    fn clean_run_has_no_failures() {
        let exec = FakeExec::new(vec![]);
        let log_dir = TempDir::new().unwrap();
        let mut runner = InstallRunner::new(&exec, log_dir.path()).unwrap();

        let report = runner.run(&tasks());
        assert!(!report.has_failures());
        assert!(report
            .results
            .iter()
            .all(|(_, o)| *o == InstallOutcome::Installed));
    }

    #[test]
    fn log_file_records_every_step() {
        let exec = FakeExec::new(vec!["msiexec"]);
        let log_dir = TempDir::new().unwrap();
        let mut runner = InstallRunner::new(&exec, log_dir.path()).unwrap();
        let log_path = runner.log_path().to_path_buf();

        runner.run(&tasks());
        drop(runner);

        let contents = std::fs::read_to_string(log_path).unwrap();
        assert!(contents.contains("Install host.msi"));
        assert!(contents.contains("FAILED"));
        assert!(contents.contains("winget"));
    }
}
