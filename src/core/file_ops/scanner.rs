use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use globset::{GlobBuilder, GlobMatcher};
use rayon::prelude::*;
use walkdir::WalkDir;
use crate::models::{ArchiveError, FileTemplate};

/// A template split into its directory part and a file-name matcher
#[derive(Debug, Clone)]
struct CompiledTemplate {
    /// Directory below the base, '/'-separated, empty for the base itself
    dir: String,
    name: GlobMatcher,
    recurse: bool,
}

impl CompiledTemplate {
    fn matches(&self, parent: &str, file_name: &str) -> bool {
        let in_scope = if self.recurse {
            self.dir.is_empty()
                || parent == self.dir
                || parent
                    .strip_prefix(self.dir.as_str())
                    .map_or(false, |rest| rest.starts_with('/'))
        } else {
            parent == self.dir
        };
        in_scope && self.name.is_match(file_name)
    }
}

/// Expands file templates into concrete file lists
///
/// Patterns are matched against file names only; a directory part in the
/// pattern (`logs/*.txt`) selects where the match starts. Results are
/// relative, '/'-separated, deduplicated and sorted.
pub struct FileScanner {
    case_insensitive: bool,
}

impl FileScanner {
    /// Scanner with the platform's case rules (insensitive on Windows)
    pub fn new() -> Self {
        Self {
            case_insensitive: cfg!(windows),
        }
    }

    pub fn with_case_insensitive(case_insensitive: bool) -> Self {
        Self { case_insensitive }
    }

    fn compile(&self, templates: &[FileTemplate]) -> Result<Vec<CompiledTemplate>, ArchiveError> {
        templates
            .iter()
            .map(|template| {
                let normalized = normalize_name(&template.pattern);
                let (dir, name) = match normalized.rsplit_once('/') {
                    Some((dir, name)) => (dir.to_string(), name.to_string()),
                    None => (String::new(), normalized.clone()),
                };
                let name = if name.is_empty() { "*".to_string() } else { name };

                let matcher = GlobBuilder::new(&name)
                    .case_insensitive(self.case_insensitive)
                    .literal_separator(true)
                    .build()
                    .map_err(|e| ArchiveError::InvalidSpec(
                        format!("Invalid file template '{}': {}", template.pattern, e)
                    ))?
                    .compile_matcher();

                Ok(CompiledTemplate {
                    dir,
                    name: matcher,
                    recurse: template.recurse,
                })
            })
            .collect()
    }

    /// List files under `base_dir` selected by `templates`
    ///
    /// An empty template list selects every file directly in `base_dir`.
    pub fn scan(&self, base_dir: &Path, templates: &[FileTemplate]) -> Result<Vec<String>, ArchiveError> {
        let default_template = [FileTemplate::new("*", false)];
        let templates = if templates.is_empty() { &default_template[..] } else { templates };
        let compiled = self.compile(templates)?;

        let found = compiled
            .par_iter()
            .map(|template| self.scan_template(base_dir, template))
            .collect::<Result<Vec<_>, ArchiveError>>()?;

        let unique: BTreeSet<String> = found.into_iter().flatten().collect();
        Ok(unique.into_iter().collect())
    }

    fn scan_template(&self, base_dir: &Path, template: &CompiledTemplate) -> Result<Vec<String>, ArchiveError> {
        let root: PathBuf = if template.dir.is_empty() {
            base_dir.to_path_buf()
        } else {
            base_dir.join(&template.dir)
        };
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let max_depth = if template.recurse { usize::MAX } else { 1 };
        let mut files = Vec::new();

        for entry in WalkDir::new(&root)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy();
            if !template.name.is_match(file_name.as_ref()) {
                continue;
            }

            let relative = entry.path().strip_prefix(base_dir)
                .map_err(|e| ArchiveError::backend(
                    "scanner",
                    format!("Failed to calculate relative path: {}", e),
                ))?;
            files.push(normalize_name(&relative.to_string_lossy()));
        }

        Ok(files)
    }

    /// Filter archive entry names by the templates, entry by entry
    pub fn filter_entries<'a, I>(&self, names: I, templates: &[FileTemplate]) -> Result<Vec<String>, ArchiveError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let compiled = self.compile(templates)?;
        Ok(names
            .into_iter()
            .filter(|name| entry_matches(&compiled, name))
            .map(str::to_string)
            .collect())
    }

}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn entry_matches(compiled: &[CompiledTemplate], name: &str) -> bool {
    let normalized = normalize_name(name);
    let (parent, file_name) = match normalized.rsplit_once('/') {
        Some((parent, file_name)) => (parent, file_name),
        None => ("", normalized.as_str()),
    };
    compiled.iter().any(|t| t.matches(parent, file_name))
}

/// '/'-separated name without a leading "./" or trailing '/'
pub fn normalize_name(name: &str) -> String {
    let replaced = name.replace('\\', "/");
    let trimmed = replaced.trim_start_matches("./").trim_matches('/');
    trimmed.to_string()
}
