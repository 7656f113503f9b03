//! File access inside a run directory.
//!
//! Every path supplied by a caller is checked against the run root before it
//! touches the filesystem.

use crate::error::{GatewayError, Result};
use std::path::{Component, Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// Names checked first when looking for the validation report.
const VALIDATION_FILES: [&str; 2] = ["Validation.md", "validation.md"];

/// Percent-encoded `.`, `/` and `\`.
const ENCODED_SEPARATORS: [&str; 3] = ["%2e", "%2f", "%5c"];

/// Every file under `root`, as `/`-separated relative paths, sorted.
pub fn list_files(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let rel = entry.path().strip_prefix(root).ok()?;
            Some(to_slash(rel))
        })
        .collect();
    files.sort();
    files
}

/// Like [`list_files`], keeping only the given extensions (case-insensitive).
pub fn list_data_files(root: &Path, extensions: &[String]) -> Vec<String> {
    list_files(root)
        .into_iter()
        .filter(|rel| {
            Path::new(rel)
                .extension()
                .map(|ext| {
                    let ext = ext.to_string_lossy();
                    extensions.iter().any(|e| ext.eq_ignore_ascii_case(e))
                })
                .unwrap_or(false)
        })
        .collect()
}

fn to_slash(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Lexical containment check for a caller-supplied relative path.
///
/// Returns the normalized relative path. Both `/` and `\` count as
/// separators; `.` segments are dropped and `..` may only cancel a previous
/// segment.
pub fn check_relative(rel: &str) -> Result<PathBuf> {
    let reject = || {
        warn!("Rejected path outside the run directory: {:?}", rel);
        GatewayError::PathTraversalRejected(rel.to_string())
    };

    if rel.trim().is_empty() || rel.contains('\0') {
        return Err(reject());
    }
    let lowered = rel.to_ascii_lowercase();
    if ENCODED_SEPARATORS.iter().any(|enc| lowered.contains(enc)) {
        return Err(reject());
    }
    if rel.starts_with('/') || rel.starts_with('\\') || has_drive_prefix(rel) {
        return Err(reject());
    }
    if Path::new(rel)
        .components()
        .any(|c| matches!(c, Component::RootDir | Component::Prefix(_)))
    {
        return Err(reject());
    }

    let mut parts: Vec<&str> = Vec::new();
    for segment in rel.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(reject());
                }
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Err(reject());
    }

    Ok(parts.iter().collect())
}

fn has_drive_prefix(rel: &str) -> bool {
    let bytes = rel.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Resolves `rel` under `root`, rejecting anything that escapes it.
///
/// Besides the lexical check, an existing target is canonicalized so a
/// symlink pointing outside the root is rejected too.
pub fn resolve_within(root: &Path, rel: &str) -> Result<PathBuf> {
    let relative = check_relative(rel)?;
    let candidate = root.join(relative);

    if candidate.exists() {
        let canonical_root = root.canonicalize()?;
        let canonical = candidate.canonicalize()?;
        if !canonical.starts_with(&canonical_root) {
            warn!(
                "Rejected path resolving outside the run directory: {:?}",
                rel
            );
            return Err(GatewayError::PathTraversalRejected(rel.to_string()));
        }
        return Ok(canonical);
    }

    Ok(candidate)
}

/// Resolves a regular file inside `root` for download.
pub fn resolve_file(root: &Path, rel: &str) -> Result<PathBuf> {
    let path = resolve_within(root, rel)?;
    if !path.is_file() {
        return Err(GatewayError::NotFound(rel.to_string()));
    }
    Ok(path)
}

/// Returns the run's validation report, if any.
///
/// `Validation.md` and `validation.md` are preferred; otherwise the first
/// top-level Markdown file with "validation" in its name, by name.
pub fn validation_report(root: &Path) -> Option<String> {
    let direct = VALIDATION_FILES
        .iter()
        .map(|name| root.join(name))
        .find(|path| path.is_file());

    let path = direct.or_else(|| {
        let mut matches: Vec<PathBuf> = std::fs::read_dir(root)
            .ok()?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| {
                path.file_name()
                    .map(|n| n.to_string_lossy().to_lowercase())
                    .is_some_and(|n| n.ends_with(".md") && n.contains("validation"))
            })
            .collect();
        matches.sort();
        matches.into_iter().next()
    })?;

    let bytes = std::fs::read(path).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}
