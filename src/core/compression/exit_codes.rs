// Exit-code table for the external compressor

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How an exit code should be treated
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ExitStatus {
    Success,
    /// Non-fatal problems; the operation still counts as done
    Warning,
    FatalError,
    CommandLineError,
    OutOfMemory,
    /// The tool itself was interrupted
    UserStopped,
}

impl ExitStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitStatus::Success | ExitStatus::Warning)
    }
}

/// One row of the table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExitCodeEntry {
    pub code: i32,
    pub status: ExitStatus,
    pub description: String,
}

impl ExitCodeEntry {
    pub fn new(code: i32, status: ExitStatus, description: impl Into<String>) -> Self {
        Self {
            code,
            status,
            description: description.into(),
        }
    }
}

/// Outcome of looking up an exit code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Known(ExitCodeEntry),
    Unknown(i32),
}

impl ExitOutcome {
    pub fn is_success(&self) -> bool {
        match self {
            ExitOutcome::Known(entry) => entry.status.is_success(),
            ExitOutcome::Unknown(_) => false,
        }
    }

    pub fn description(&self) -> String {
        match self {
            ExitOutcome::Known(entry) => entry.description.clone(),
            ExitOutcome::Unknown(code) => format!("Unknown result (code {})", code),
        }
    }
}

/// Versioned lookup table from exit code to meaning
///
/// Starts from the codes documented by 7-Zip; other tool versions can
/// extend or override it through [`ExitCodeTable::with_entries`].
#[derive(Debug, Clone)]
pub struct ExitCodeTable {
    version: String,
    entries: BTreeMap<i32, ExitCodeEntry>,
}

impl ExitCodeTable {
    /// Table for 7-Zip 9.20 and later
    pub fn seven_zip() -> Self {
        let entries = [
            ExitCodeEntry::new(0, ExitStatus::Success, "No error"),
            ExitCodeEntry::new(
                1,
                ExitStatus::Warning,
                "Warning (non-fatal error, e.g. locked files were skipped)",
            ),
            ExitCodeEntry::new(2, ExitStatus::FatalError, "Fatal error"),
            ExitCodeEntry::new(7, ExitStatus::CommandLineError, "Command line error"),
            ExitCodeEntry::new(
                8,
                ExitStatus::OutOfMemory,
                "Not enough memory for operation",
            ),
            ExitCodeEntry::new(
                255,
                ExitStatus::UserStopped,
                "User stopped the process",
            ),
        ];

        Self {
            version: "7-zip/9.20".to_string(),
            entries: entries.into_iter().map(|e| (e.code, e)).collect(),
        }
    }

    /// Add entries, replacing any existing rows with the same code
    pub fn with_entries<I>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = ExitCodeEntry>,
    {
        let mut extended = false;
        for entry in entries {
            extended = true;
            self.entries.insert(entry.code, entry);
        }
        if extended && !self.version.ends_with("+custom") {
            self.version.push_str("+custom");
        }
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn lookup(&self, code: i32) -> ExitOutcome {
        match self.entries.get(&code) {
            Some(entry) => ExitOutcome::Known(entry.clone()),
            None => ExitOutcome::Unknown(code),
        }
    }
}

impl Default for ExitCodeTable {
    fn default() -> Self {
        Self::seven_zip()
    }
}
