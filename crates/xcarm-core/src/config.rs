//! Persistent configuration for xcarm.
//!
//! Settings are read from JSON. Lookup order is an explicit `--config` path,
//! then `xcarm.json` in the project folder, then `~/.xcarm/config.json`, then
//! built-in defaults. Signing identifiers that used to be hard-coded in
//! build scripts live here instead.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use xcarm_core::config::XcarmConfig;
//!
//! let config = XcarmConfig::discover(None, Path::new("Builds/iOS")).unwrap();
//! println!("scheme: {}", config.scheme);
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::build_settings::LiteralPatch;
use crate::runner::RevertMode;
use crate::xcodebuild::{DestinationKind, DEFAULT_ACTIONS};

const CONFIG_FILENAME: &str = "config.json";
/// Per-project config file name, looked up in the project folder.
pub const PROJECT_CONFIG_FILENAME: &str = "xcarm.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Returns the xcarm directory path (`~/.xcarm/`), if a home directory exists.
pub fn xcarm_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".xcarm"))
}

/// xcarm configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XcarmConfig {
    /// `.xcodeproj` bundle name relative to the project folder. Discovered when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xcodeproj: Option<String>,
    /// Shared scheme to arm and test.
    pub scheme: String,
    /// Section of the scheme holding the launch arguments, e.g. `LaunchAction`.
    pub section: String,
    /// Launch argument injected into the scheme.
    pub test_flag: String,
    /// Signing team written over the empty `DEVELOPMENT_TEAM` placeholder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioning_profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    /// Whether the device argument is a UDID or a device name.
    pub destination: DestinationKind,
    /// Optional `platform=` prefix for the destination, e.g. `iOS`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
    pub actions: Vec<String>,
    pub extra_args: Vec<String>,
    /// Command used to build and test: program followed by leading arguments,
    /// e.g. `["xcrun", "xcodebuild"]`.
    pub xcodebuild: Vec<String>,
    /// Additional exact find/replace pairs applied to `project.pbxproj`.
    pub literal_patches: Vec<LiteralPatch>,
    /// Fail instead of warning when a placeholder is missing.
    pub strict_placeholders: bool,
    pub revert: RevertMode,
}

impl Default for XcarmConfig {
    fn default() -> Self {
        Self {
            xcodeproj: None,
            scheme: "Unity-iPhone".to_string(),
            section: "LaunchAction".to_string(),
            test_flag: "-start_test".to_string(),
            team_id: None,
            provisioning_profile: None,
            certificate: None,
            destination: DestinationKind::Id,
            platform: None,
            configuration: None,
            actions: DEFAULT_ACTIONS.iter().map(|a| a.to_string()).collect(),
            extra_args: Vec::new(),
            xcodebuild: vec!["xcodebuild".to_string()],
            literal_patches: Vec::new(),
            strict_placeholders: false,
            revert: RevertMode::Restore,
        }
    }
}

impl XcarmConfig {
    /// Load config from an explicit file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Find and load the config that applies to `project_folder`.
    ///
    /// An explicit path must exist. The implicit locations are optional and
    /// fall through to [`Default`] when absent, but a file that exists and
    /// fails to parse is still an error.
    pub fn discover(explicit: Option<&Path>, project_folder: &Path) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let candidates = std::iter::once(project_folder.join(PROJECT_CONFIG_FILENAME))
            .chain(xcarm_dir().map(|dir| dir.join(CONFIG_FILENAME)));
        for path in candidates {
            if path.is_file() {
                debug!(path = %path.display(), "Loading config");
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    /// The placeholder patches implied by this config, team id first.
    pub fn pbxproj_patches(&self) -> Vec<LiteralPatch> {
        self.team_id
            .iter()
            .map(|team| LiteralPatch::empty_setting("DEVELOPMENT_TEAM", team))
            .chain(self.literal_patches.iter().cloned())
            .collect()
    }
}
