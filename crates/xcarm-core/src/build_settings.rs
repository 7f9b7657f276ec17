//! Literal placeholder patching of `project.pbxproj` build settings.
//!
//! Unity exports the Xcode project with empty signing settings such as
//! `DEVELOPMENT_TEAM = "";`. These are filled in by exact substring
//! replacement rather than by parsing the pbxproj format, and the original
//! text is kept so the file can be put back byte-for-byte afterward.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Errors raised while patching or restoring a build settings file.
#[derive(Error, Debug)]
pub enum BuildSettingsError {
    /// None of the placeholder text was present in the file.
    #[error("Placeholder '{placeholder}' not found in {}", .path.display())]
    PlaceholderNotFound { path: PathBuf, placeholder: String },

    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An exact find/replace pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiteralPatch {
    pub find: String,
    pub replace: String,
}

impl LiteralPatch {
    pub fn new(find: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            find: find.into(),
            replace: replace.into(),
        }
    }

    /// The patch that fills an empty `KEY = "";` assignment with `KEY = value;`.
    pub fn empty_setting(key: &str, value: &str) -> Self {
        Self::new(format!("{} = \"\";", key), format!("{} = {};", key, value))
    }
}

/// Result of applying a patch to some text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchedText {
    pub text: String,
    pub original: String,
    pub replacements: usize,
}

impl PatchedText {
    /// True when the placeholder was not found and the text is unchanged.
    pub fn is_miss(&self) -> bool {
        self.replacements == 0
    }
}

/// Apply one literal patch to `contents`.
pub fn apply_patch(contents: &str, patch: &LiteralPatch) -> PatchedText {
    let replacements = if patch.find.is_empty() {
        0
    } else {
        contents.matches(patch.find.as_str()).count()
    };
    let text = if replacements > 0 {
        contents.replace(patch.find.as_str(), &patch.replace)
    } else {
        contents.to_string()
    };
    PatchedText {
        text,
        original: contents.to_string(),
        replacements,
    }
}

/// Replace every empty `key = "";` assignment with `key = new_value;`.
///
/// A miss is not an error here; check [`PatchedText::is_miss`].
pub fn patch_build_setting(contents: &str, key: &str, new_value: &str) -> PatchedText {
    apply_patch(contents, &LiteralPatch::empty_setting(key, new_value))
}

/// A build settings file that has been patched on disk.
///
/// Holds the original bytes. Call [`restore`](Self::restore) to write them
/// back; if the value is dropped first, the restore happens in `Drop` and any
/// failure is logged.
#[derive(Debug)]
pub struct PatchedFile {
    path: PathBuf,
    original: String,
    restored: bool,
}

impl PatchedFile {
    /// Read `path`, apply `patches` in order and write the result.
    ///
    /// Misses are logged as warnings, or returned as
    /// [`BuildSettingsError::PlaceholderNotFound`] when `strict` is set. In
    /// strict mode nothing is written unless every patch matched.
    pub fn apply(path: &Path, patches: &[LiteralPatch], strict: bool) -> Result<Self, BuildSettingsError> {
        let original = std::fs::read_to_string(path).map_err(|source| BuildSettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut text = original.clone();
        for patch in patches {
            let patched = apply_patch(&text, patch);
            if patched.is_miss() {
                if strict {
                    return Err(BuildSettingsError::PlaceholderNotFound {
                        path: path.to_path_buf(),
                        placeholder: patch.find.clone(),
                    });
                }
                warn!(
                    path = %path.display(),
                    placeholder = %patch.find,
                    "Placeholder not found, build will use the project's own signing settings"
                );
            } else {
                info!(placeholder = %patch.find, count = patched.replacements, "Patched build setting");
            }
            text = patched.text;
        }

        std::fs::write(path, &text).map_err(|source| BuildSettingsError::Write {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            original,
            restored: false,
        })
    }

    /// Write the original contents back.
    pub fn restore(mut self) -> Result<(), BuildSettingsError> {
        self.restored = true;
        self.write_original()
    }

    /// Keep the patched contents on disk.
    pub fn keep(mut self) {
        self.restored = true;
    }

    fn write_original(&self) -> Result<(), BuildSettingsError> {
        std::fs::write(&self.path, &self.original).map_err(|source| BuildSettingsError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

impl Drop for PatchedFile {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        if let Err(e) = self.write_original() {
            warn!(error = %e, "Failed to restore build settings");
        }
    }
}
