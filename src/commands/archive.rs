use std::path::PathBuf;
use std::time::Duration;
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use crate::core::compression::ArchiveEngine;
use crate::models::{ArchiveError, ArchiveKind, BackendOverride, EngineConfig, FileTemplate, OperationSpec};
use crate::utils::progress::{ProgressSink, SinkError};

#[derive(Parser)]
#[command(name = "archive-engine")]
#[command(about = "Compress, extract and test 7z/zip archives", long_about = None)]
pub struct Cli {
    /// JSON engine configuration
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an archive from files in a directory
    Compress {
        #[command(flatten)]
        target: TargetArgs,

        /// Archive format (default: from the archive extension)
        #[arg(long, value_enum)]
        kind: Option<KindArg>,

        /// Split into volumes of this many bytes
        #[arg(long, default_value = "0")]
        volume_size: u64,
    },

    /// Extract an archive into a directory
    Extract {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Verify an archive
    Test {
        /// Archive file (or its first volume)
        #[arg(short, long)]
        archive: PathBuf,

        #[arg(long)]
        password: Option<String>,

        /// Use the external 7-Zip executable
        #[arg(long)]
        use_process: bool,
    },
}

#[derive(Args)]
pub struct TargetArgs {
    /// Archive file (or its first volume)
    #[arg(short, long)]
    pub archive: PathBuf,

    /// Directory to compress from or extract into
    #[arg(short, long)]
    pub dir: PathBuf,

    /// File template, `PATTERN` or `PATTERN:r` to recurse (repeatable)
    #[arg(short, long = "template")]
    pub templates: Vec<String>,

    #[arg(long)]
    pub password: Option<String>,

    /// Use the external 7-Zip executable
    #[arg(long)]
    pub use_process: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum KindArg {
    #[value(name = "7z")]
    SevenZip,
    Zip,
}

impl From<KindArg> for ArchiveKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::SevenZip => ArchiveKind::SevenZip,
            KindArg::Zip => ArchiveKind::Zip,
        }
    }
}

/// Parse `PATTERN` or `PATTERN:r`
pub fn parse_template(text: &str) -> FileTemplate {
    match text.strip_suffix(":r") {
        Some(pattern) => FileTemplate::new(pattern, true),
        None => FileTemplate::new(text, false),
    }
}

fn backend_override(use_process: bool) -> BackendOverride {
    if use_process {
        BackendOverride::Process
    } else {
        BackendOverride::Auto
    }
}

fn build_spec(target: TargetArgs) -> OperationSpec {
    let mut spec = OperationSpec::new(target.archive, target.dir)
        .with_backend_override(backend_override(target.use_process));
    spec.file_templates = target.templates.iter().map(|t| parse_template(t)).collect();
    spec.password = target.password;
    spec
}

/// Terminal progress bar
pub struct ConsoleProgress {
    bar: ProgressBar,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ConsoleProgress {
    fn set_phase_text(&self, text: &str) {
        self.bar.set_message(text.to_string());
    }

    fn set_percent(&self, percent: u8) {
        self.bar.set_position(percent as u64);
    }

    fn set_percent_max(&self, max: u8) {
        if max == 0 {
            self.bar.set_style(ProgressStyle::default_spinner());
        }
        self.bar.set_length(max as u64);
    }

    fn set_allow_cancel(&self, _allow: bool) {}

    fn check_cancelled(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig, ArchiveError> {
    match path {
        Some(path) => EngineConfig::from_json_file(path),
        None => Ok(EngineConfig::default()),
    }
}

/// Run one CLI command to completion
pub fn execute(cli: Cli) -> Result<(), ArchiveError> {
    let config = load_config(cli.config.as_ref())?;
    let engine = ArchiveEngine::new(config);
    let progress = ConsoleProgress::new();

    let result = match cli.command {
        Commands::Compress { target, kind, volume_size } => {
            let mut spec = build_spec(target).with_volume_size(volume_size);
            if let Some(kind) = kind {
                spec = spec.with_kind(kind.into());
            }
            engine
                .compress(&spec, Some(&progress))
                .map(|()| format!("Created {}", spec.archive_path.display()))
        }
        Commands::Extract { target } => {
            let spec = build_spec(target);
            engine
                .decompress(&spec, Some(&progress))
                .map(|()| format!("Extracted into {}", spec.file_directory.display()))
        }
        Commands::Test { archive, password, use_process } => {
            let mut spec = OperationSpec::new(archive, PathBuf::new())
                .with_backend_override(backend_override(use_process));
            spec.password = password;
            engine.test_archive(&spec, Some(&progress)).and_then(|ok| {
                if ok {
                    Ok("Everything is Ok".to_string())
                } else {
                    Err(ArchiveError::backend("test", format!("{} is damaged", spec.archive_path.display())))
                }
            })
        }
    };

    match result {
        Ok(message) => {
            progress.finish(&message);
            Ok(())
        }
        Err(e) => {
            progress.finish("Failed");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_template() {
        assert_eq!(parse_template("*.txt"), FileTemplate::new("*.txt", false));
        assert_eq!(parse_template("sub/*.log:r"), FileTemplate::new("sub/*.log", true));
    }

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from([
            "archive-engine", "compress", "-a", "out.7z", "-d", "src",
            "-t", "*.txt:r", "-t", "*.log", "--kind", "7z", "--volume-size", "1024",
        ])
        .unwrap();

        match cli.command {
            Commands::Compress { target, kind, volume_size } => {
                assert_eq!(volume_size, 1024);
                assert!(matches!(kind, Some(KindArg::SevenZip)));
                let spec = build_spec(target);
                assert_eq!(spec.file_templates.len(), 2);
                assert!(spec.file_templates[0].recurse);
                assert_eq!(spec.backend_override, BackendOverride::Auto);
            }
            _ => panic!("expected compress"),
        }
    }

    #[test]
    fn test_execute_round_trip() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::write(source.path().join("a.txt"), b"hello").unwrap();
        let archive = dest.path().join("out.zip");
        let archive_arg = archive.to_string_lossy().into_owned();

        let cli = Cli::try_parse_from([
            "archive-engine", "compress", "-a", archive_arg.as_str(),
            "-d", source.path().to_str().unwrap(),
        ])
        .unwrap();
        execute(cli).unwrap();

        let cli = Cli::try_parse_from(["archive-engine", "test", "-a", archive_arg.as_str()]).unwrap();
        execute(cli).unwrap();

        let out = dest.path().join("x");
        let cli = Cli::try_parse_from([
            "archive-engine", "extract", "-a", archive_arg.as_str(), "-d", out.to_str().unwrap(),
        ])
        .unwrap();
        execute(cli).unwrap();
        assert_eq!(fs::read(out.join("a.txt")).unwrap(), b"hello");
    }
}
