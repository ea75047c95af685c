// Process-backed handler driving an external 7-Zip executable

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{debug, info, warn};
use crate::core::compression::common::{ArchiveHandler, ProgressHooks};
use crate::core::compression::exit_codes::{ExitCodeTable, ExitOutcome};
use crate::core::file_ops::volumes::require_archive;
use crate::models::{ArchiveError, FileTemplate, OperationKind, OperationSpec};

/// Runs a child process to completion and reports its exit code
pub trait ProcessRunner: Send + Sync {
    fn run(&self, program: &Path, args: &[String], working_dir: Option<&Path>) -> Result<i32, ArchiveError>;
}

/// Runner that spawns real processes with stdin closed
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, program: &Path, args: &[String], working_dir: Option<&Path>) -> Result<i32, ArchiveError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd.output()
            .map_err(|e| ArchiveError::backend(
                "process",
                format!("Failed to run {}: {}", program.display(), e),
            ))?;

        if !output.stderr.is_empty() {
            debug!(stderr = %String::from_utf8_lossy(&output.stderr).trim(), "child stderr");
        }

        output.status.code().ok_or_else(|| ArchiveError::backend(
            "process",
            format!("{} was terminated by a signal", program.display()),
        ))
    }
}

/// Arguments for one invocation of the external tool
///
/// Kept as an argument vector; [`CommandLine::render`] produces the textual
/// form `[-r] [-t<format>] [-v<size>] [-p"<password>"] <verb> "<archive>" [<template> ...]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLine {
    pub recurse: bool,
    pub format: Option<&'static str>,
    pub volume_size: u64,
    pub password: Option<String>,
    pub multi_volume: bool,
    pub assume_yes: bool,
    pub verb: char,
    pub archive: PathBuf,
    pub templates: Vec<String>,
}

impl CommandLine {
    pub fn new(verb: char, archive: impl Into<PathBuf>) -> Self {
        Self {
            verb,
            archive: archive.into(),
            ..Self::default()
        }
    }

    pub fn args(&self) -> Vec<String> {
        self.build(false)
    }

    /// Textual form with quoted archive path and password
    pub fn render(&self) -> String {
        self.build(true).join(" ")
    }

    /// Like [`CommandLine::render`] with the password masked, for logs
    pub fn redacted(&self) -> String {
        let mut masked = self.clone();
        if masked.password.is_some() {
            masked.password = Some("***".to_string());
        }
        masked.render()
    }

    fn build(&self, quoted: bool) -> Vec<String> {
        let mut args = Vec::new();
        if self.recurse {
            args.push("-r".to_string());
        }
        if let Some(format) = self.format {
            args.push(format!("-t{}", format));
        }
        if self.volume_size > 0 {
            args.push(format!("-v{}", self.volume_size));
        }
        if let Some(password) = &self.password {
            if quoted {
                args.push(format!("-p\"{}\"", password));
            } else {
                args.push(format!("-p{}", password));
            }
        }
        if self.multi_volume {
            args.push("-va".to_string());
        }
        if self.assume_yes {
            args.push("-y".to_string());
        }
        args.push(self.verb.to_string());

        let archive = self.archive.to_string_lossy();
        if quoted {
            args.push(format!("\"{}\"", archive));
        } else {
            args.push(archive.into_owned());
        }
        args.extend(self.templates.iter().cloned());
        args
    }
}

/// Passwords are quoted on the tool's command line, so quotes are rejected
fn checked_password(spec: &OperationSpec) -> Result<Option<String>, ArchiveError> {
    match spec.password() {
        Some(pw) if pw.contains('"') => Err(ArchiveError::InvalidSpec(
            "Password must not contain a double quote".to_string(),
        )),
        Some(pw) => Ok(Some(pw.to_string())),
        None => Ok(None),
    }
}

/// The child runs in another directory, so relative archive paths are
/// resolved against the caller's working directory first
fn absolute_archive(path: &Path) -> Result<PathBuf, ArchiveError> {
    Ok(std::path::absolute(path)?)
}

/// Templates grouped by recursion mode; non-recursive group first
fn group_templates(templates: &[FileTemplate]) -> Vec<(bool, Vec<String>)> {
    let mut groups = Vec::new();
    for recurse in [false, true] {
        let patterns: Vec<String> = templates
            .iter()
            .filter(|t| t.recurse == recurse)
            .map(|t| t.pattern.clone())
            .collect();
        if !patterns.is_empty() {
            groups.push((recurse, patterns));
        }
    }
    groups
}

/// Handler bound to one resolved executable
pub struct ProcessHandler {
    executable: PathBuf,
    exit_codes: ExitCodeTable,
    runner: Arc<dyn ProcessRunner>,
}

impl ProcessHandler {
    pub fn new(executable: impl Into<PathBuf>, exit_codes: ExitCodeTable) -> Self {
        Self::with_runner(executable, exit_codes, Arc::new(SystemRunner))
    }

    pub fn with_runner(
        executable: impl Into<PathBuf>,
        exit_codes: ExitCodeTable,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            executable: executable.into(),
            exit_codes,
            runner,
        }
    }

    fn executable_name(&self) -> String {
        self.executable
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.executable.display().to_string())
    }

    fn execute(&self, command: &CommandLine, working_dir: Option<&Path>) -> Result<ExitOutcome, ArchiveError> {
        info!(
            executable = %self.executable.display(),
            command = %command.redacted(),
            "running archive tool"
        );
        let code = self.runner.run(&self.executable, &command.args(), working_dir)?;
        let outcome = self.exit_codes.lookup(code);
        debug!(code, table = self.exit_codes.version(), result = %outcome.description(), "archive tool exited");
        Ok(outcome)
    }

    fn failure(&self, operation: OperationKind, code: i32, outcome: &ExitOutcome) -> ArchiveError {
        warn!(code, action = operation.action(), "archive tool failed");
        ArchiveError::ProcessExit {
            executable: self.executable_name(),
            action: operation.action().to_string(),
            code,
            description: outcome.description(),
        }
    }

    fn run_checked(&self, operation: OperationKind, command: &CommandLine, working_dir: Option<&Path>) -> Result<(), ArchiveError> {
        let outcome = self.execute(command, working_dir)?;
        if outcome.is_success() {
            return Ok(());
        }
        let code = match &outcome {
            ExitOutcome::Known(entry) => entry.code,
            ExitOutcome::Unknown(code) => *code,
        };
        Err(self.failure(operation, code, &outcome))
    }

    /// Command for extract/test, switching to the first volume when needed
    fn read_command(&self, verb: char, spec: &OperationSpec) -> Result<CommandLine, ArchiveError> {
        let password = checked_password(spec)?;
        let location = require_archive(&spec.archive_path)?;

        let mut command = CommandLine::new(verb, absolute_archive(&location.path)?);
        command.multi_volume = location.multi_volume;
        command.password = password;
        Ok(command)
    }
}

impl ArchiveHandler for ProcessHandler {
    fn name(&self) -> &str {
        "process"
    }

    fn reports_percent(&self) -> bool {
        false
    }

    fn compress(&self, spec: &OperationSpec, hooks: &dyn ProgressHooks) -> Result<(), ArchiveError> {
        let password = checked_password(spec)?;
        let archive = absolute_archive(&spec.archive_path)?;

        let groups = if spec.file_templates.is_empty() {
            vec![(false, vec!["*".to_string()])]
        } else {
            group_templates(&spec.file_templates)
        };

        for (recurse, templates) in groups {
            if hooks.cancel_requested() {
                return Err(ArchiveError::UserCancelled);
            }

            let mut command = CommandLine::new('a', &archive);
            command.recurse = recurse;
            command.format = spec.archive_kind.tool_name();
            command.volume_size = spec.volume_size;
            command.password = password.clone();
            command.templates = templates;

            self.run_checked(OperationKind::Compress, &command, Some(&spec.file_directory))?;
        }

        Ok(())
    }

    fn decompress(&self, spec: &OperationSpec, hooks: &dyn ProgressHooks) -> Result<(), ArchiveError> {
        let base = self.read_command('x', spec)?;

        let groups = if spec.file_templates.is_empty() {
            vec![(false, Vec::new())]
        } else {
            group_templates(&spec.file_templates)
        };

        for (recurse, templates) in groups {
            if hooks.cancel_requested() {
                return Err(ArchiveError::UserCancelled);
            }

            let mut command = base.clone();
            command.recurse = recurse;
            command.assume_yes = true;
            command.templates = templates;

            self.run_checked(OperationKind::Decompress, &command, Some(&spec.file_directory))?;
        }

        Ok(())
    }

    fn test(&self, spec: &OperationSpec, _hooks: &dyn ProgressHooks) -> Result<bool, ArchiveError> {
        let command = self.read_command('t', spec)?;
        let outcome = self.execute(&command, None)?;

        match outcome {
            ExitOutcome::Known(ref entry) if entry.code == 0 => Ok(true),
            ExitOutcome::Known(ref entry) if entry.code == 2 => Ok(false),
            ExitOutcome::Known(ref entry) => Err(self.failure(OperationKind::Test, entry.code, &outcome)),
            ExitOutcome::Unknown(code) => Err(self.failure(OperationKind::Test, code, &outcome)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::compression::common::SilentProgress;
    use crate::core::file_ops::volumes::first_volume_path;
    use crate::models::{ArchiveKind, ErrorKind};
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records every invocation and answers with a fixed exit code
    struct RecordingRunner {
        code: i32,
        calls: Mutex<Vec<Vec<String>>>,
        working_dirs: Mutex<Vec<Option<PathBuf>>>,
    }

    impl RecordingRunner {
        fn new(code: i32) -> Arc<Self> {
            Arc::new(Self {
                code,
                calls: Mutex::new(Vec::new()),
                working_dirs: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }

        fn working_dirs(&self) -> Vec<Option<PathBuf>> {
            self.working_dirs.lock().unwrap().clone()
        }
    }

    impl ProcessRunner for RecordingRunner {
        fn run(&self, _program: &Path, args: &[String], working_dir: Option<&Path>) -> Result<i32, ArchiveError> {
            self.calls.lock().unwrap().push(args.to_vec());
            self.working_dirs.lock().unwrap().push(working_dir.map(Path::to_path_buf));
            Ok(self.code)
        }
    }

    fn handler(runner: &Arc<RecordingRunner>) -> ProcessHandler {
        let runner: Arc<dyn ProcessRunner> = runner.clone();
        ProcessHandler::with_runner("/opt/tools/7za", ExitCodeTable::seven_zip(), runner)
    }

    #[test]
    fn test_render_command_line() {
        let mut command = CommandLine::new('a', "/out/data.7z");
        command.recurse = true;
        command.format = Some("7z");
        command.volume_size = 1024;
        command.password = Some("pw".to_string());
        command.templates = vec!["*.txt".to_string()];

        assert_eq!(command.render(), "-r -t7z -v1024 -p\"pw\" a \"/out/data.7z\" *.txt");
        assert_eq!(command.redacted(), "-r -t7z -v1024 -p\"***\" a \"/out/data.7z\" *.txt");
        assert_eq!(
            command.args(),
            vec!["-r", "-t7z", "-v1024", "-ppw", "a", "/out/data.7z", "*.txt"]
        );
    }

    #[test]
    fn test_compress_splits_by_recursion_mode() {
        let runner = RecordingRunner::new(0);
        let spec = OperationSpec::new("/out/data.7z", "/src")
            .with_kind(ArchiveKind::SevenZip)
            .with_template("*.txt", true)
            .with_template("*.log", false);

        handler(&runner).compress(&spec, &SilentProgress).unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], vec!["-t7z", "a", "/out/data.7z", "*.log"]);
        assert_eq!(calls[1], vec!["-r", "-t7z", "a", "/out/data.7z", "*.txt"]);
    }

    #[test]
    fn test_compress_without_templates() {
        let runner = RecordingRunner::new(1);
        let spec = OperationSpec::new("/out/data.zip", "/src").with_kind(ArchiveKind::Zip);

        handler(&runner).compress(&spec, &SilentProgress).unwrap();
        assert_eq!(runner.calls(), vec![vec!["-tzip", "a", "/out/data.zip", "*"]]);
    }

    #[test]
    fn test_password_with_quote_is_rejected() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("data.7z");
        fs::write(&archive, b"x").unwrap();

        let runner = RecordingRunner::new(0);
        let spec = OperationSpec::new(&archive, temp.path()).with_password("bad\"pw");

        let result = handler(&runner).compress(&spec, &SilentProgress);
        assert!(matches!(result, Err(ArchiveError::InvalidSpec(_))));
        let result = handler(&runner).decompress(&spec, &SilentProgress);
        assert!(matches!(result, Err(ArchiveError::InvalidSpec(_))));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_multi_volume_detection() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("archive.7z");
        let first = first_volume_path(&archive);
        fs::write(&first, b"x").unwrap();

        let runner = RecordingRunner::new(0);
        let spec = OperationSpec::new(&archive, temp.path());
        handler(&runner).decompress(&spec, &SilentProgress).unwrap();

        let first = first.to_string_lossy().into_owned();
        assert_eq!(runner.calls(), vec![vec!["-va".to_string(), "-y".to_string(), "x".to_string(), first]]);
    }

    #[test]
    fn test_multi_volume_test_uses_first_volume() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("archive.7z");
        let first = first_volume_path(&archive);
        fs::write(&first, b"x").unwrap();

        let runner = RecordingRunner::new(0);
        let spec = OperationSpec::new(&archive, temp.path());
        assert!(handler(&runner).test(&spec, &SilentProgress).unwrap());

        let first = first.to_string_lossy().into_owned();
        assert_eq!(runner.calls(), vec![vec!["-va".to_string(), "t".to_string(), first]]);
    }

    #[test]
    fn test_extract_splits_by_recursion_mode() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("archive.7z");
        fs::write(&archive, b"x").unwrap();
        let dest = temp.path().join("out");

        let runner = RecordingRunner::new(0);
        let spec = OperationSpec::new(&archive, &dest)
            .with_template("*.txt", true)
            .with_template("*.log", false);
        handler(&runner).decompress(&spec, &SilentProgress).unwrap();

        let archive = archive.to_string_lossy().into_owned();
        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], vec!["-y", "x", archive.as_str(), "*.log"]);
        assert_eq!(calls[1], vec!["-r", "-y", "x", archive.as_str(), "*.txt"]);
        assert_eq!(runner.working_dirs(), vec![Some(dest.clone()), Some(dest)]);
    }

    #[test]
    fn test_relative_archive_resolved_before_compress() {
        let runner = RecordingRunner::new(0);
        let spec = OperationSpec::new("backups/out.7z", "/src").with_kind(ArchiveKind::SevenZip);
        handler(&runner).compress(&spec, &SilentProgress).unwrap();

        let expected = std::env::current_dir().unwrap().join("backups/out.7z");
        let calls = runner.calls();
        assert_eq!(calls[0][2], expected.to_string_lossy());
        assert_eq!(runner.working_dirs(), vec![Some(PathBuf::from("/src"))]);
    }

    #[test]
    fn test_relative_archive_resolved_before_extract() {
        // A directory under the current one, addressed by a relative path
        let local = tempfile::Builder::new().prefix("relative-archive").tempdir_in(".").unwrap();
        let archive = local.path().join("data.7z");
        assert!(archive.is_relative());
        fs::write(&archive, b"x").unwrap();
        let dest = TempDir::new().unwrap();

        let runner = RecordingRunner::new(0);
        let spec = OperationSpec::new(&archive, dest.path());
        handler(&runner).decompress(&spec, &SilentProgress).unwrap();

        let expected = std::path::absolute(&archive).unwrap();
        assert_eq!(runner.calls(), vec![vec![
            "-y".to_string(),
            "x".to_string(),
            expected.to_string_lossy().into_owned(),
        ]]);
        assert_eq!(runner.working_dirs(), vec![Some(dest.path().to_path_buf())]);
    }

    #[test]
    fn test_missing_archive_spawns_nothing() {
        let temp = TempDir::new().unwrap();
        let runner = RecordingRunner::new(0);
        let spec = OperationSpec::new(temp.path().join("archive.7z"), temp.path());

        let result = handler(&runner).test(&spec, &SilentProgress);
        assert!(matches!(result, Err(ArchiveError::ArchiveNotFound(_))));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_exit_code_mapping_for_test() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("archive.7z");
        fs::write(&archive, b"x").unwrap();
        let spec = OperationSpec::new(&archive, temp.path());

        assert!(handler(&RecordingRunner::new(0)).test(&spec, &SilentProgress).unwrap());
        assert!(!handler(&RecordingRunner::new(2)).test(&spec, &SilentProgress).unwrap());

        for code in [1, 7, 8, 42] {
            let err = handler(&RecordingRunner::new(code)).test(&spec, &SilentProgress).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BackendExecution);
            let msg = err.to_string();
            assert!(msg.contains("7za"), "{}", msg);
            assert!(msg.contains(&code.to_string()), "{}", msg);
        }
    }

    #[test]
    fn test_compress_failure_reports_exit_code() {
        let runner = RecordingRunner::new(8);
        let spec = OperationSpec::new("/out/data.7z", "/src").with_kind(ArchiveKind::SevenZip);

        let err = handler(&runner).compress(&spec, &SilentProgress).unwrap_err();
        match err {
            ArchiveError::ProcessExit { executable, action, code, .. } => {
                assert_eq!(executable, "7za");
                assert_eq!(action, "compress");
                assert_eq!(code, 8);
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
