//! Media path safety checks.
//!
//! Every path in a blueprint crosses a process/trust boundary, so it must
//! be a plain relative path that cannot escape the configured media root:
//! no leading `/` or `\`, no drive or UNC prefix, no `..` segment.

use std::path::{Component, Path, PathBuf};

use crate::error::CoreError;

/// Check that `path` is relative and stays inside whatever root it is
/// later joined onto.
///
/// Returns a human-readable reason on failure (no field name), so callers
/// can prefix it with the offending field.
pub fn check_relative_path(path: &str) -> Result<(), String> {
    if path.trim().is_empty() {
        return Err("must not be empty".to_string());
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(format!("'{path}' must be relative, not absolute"));
    }
    if path.contains('\0') {
        return Err(format!("'{path}' contains a NUL byte"));
    }
    // Windows drive letters (`C:`) are not caught by `Path` on unix hosts.
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return Err(format!("'{path}' must not start with a drive prefix"));
    }
    if path.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(format!("'{path}' must not contain '..' segments"));
    }
    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(format!("'{path}' must not contain '..' segments"));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("'{path}' must be relative, not absolute"));
            }
        }
    }
    Ok(())
}

/// A directory that relative media paths are resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRoot {
    root: PathBuf,
}

impl MediaRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Join a validated relative path onto the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, CoreError> {
        check_relative_path(relative).map_err(CoreError::Validation)?;
        Ok(self.root.join(relative))
    }
}
