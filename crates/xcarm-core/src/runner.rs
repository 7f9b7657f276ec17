//! One armed test run: inject the flag, patch signing, run `xcodebuild`, revert.
//!
//! A run walks through [`RunState`]:
//!
//! ```text
//! Loaded -> FlagInjected -> Persisted -> TestInvoked -> [Reverted]
//! ```
//!
//! The scheme and the pbxproj are held by scoped guards ([`ArmedScheme`] and
//! [`PatchedFile`]) from the moment they are written. With
//! [`RevertMode::Restore`] both are put back after the tool exits, whatever
//! its exit code, and also when the run bails out early with an error.
//! [`RevertMode::KeepArmed`] leaves both in place so the project can be
//! launched from Xcode with the flag still set.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::build_settings::{BuildSettingsError, LiteralPatch, PatchedFile};
use crate::config::XcarmConfig;
use crate::project::{ProjectError, ProjectLayout};
use crate::scheme::{FlagChange, SchemeDocument, SchemeError, SectionPath};
use crate::xcodebuild::{Destination, SigningOverrides, Xcodebuild, XcodebuildError};

/// What happens to the mutated files once the tool exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevertMode {
    /// Remove the injected flag and restore the pbxproj.
    #[default]
    Restore,
    /// Leave the scheme armed and the pbxproj patched.
    KeepArmed,
}

/// Progress of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Loaded,
    FlagInjected,
    Persisted,
    TestInvoked,
    Reverted,
}

/// Errors that abort a run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error(transparent)]
    Scheme(#[from] SchemeError),

    #[error(transparent)]
    BuildSettings(#[from] BuildSettingsError),

    #[error(transparent)]
    Xcodebuild(#[from] XcodebuildError),

    #[error("Invalid section path: {0}")]
    InvalidSection(String),
}

// ---------------------------------------------------------------------------
// ArmedScheme
// ---------------------------------------------------------------------------

/// A scheme file that currently carries an injected flag.
///
/// Dropping it without calling [`disarm`](Self::disarm) or
/// [`keep`](Self::keep) reverts the change and logs any failure. Reverting
/// writes back the bytes that were read at arm time, so formatting the
/// serializer would normalize is kept.
#[derive(Debug)]
pub struct ArmedScheme {
    path: PathBuf,
    original: String,
    document: SchemeDocument,
    change: FlagChange,
    released: bool,
}

impl ArmedScheme {
    /// Load the scheme, ensure the flag and write it back.
    ///
    /// The file is only rewritten when the flag was actually inserted.
    pub fn arm(path: &Path, section: &SectionPath, flag: &str) -> Result<Self, SchemeError> {
        let original = std::fs::read_to_string(path).map_err(|source| SchemeError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut document = SchemeDocument::parse(&original)?;
        info!(state = ?RunState::Loaded, path = %path.display());

        let change = document.ensure_flag(section, flag)?;
        info!(state = ?RunState::FlagInjected, inserted = change.is_inserted(), flag);
        if let FlagChange::AlreadyPresent { enabled: false, .. } = change {
            warn!(flag, "Flag is present in the scheme but disabled; leaving it as is");
        }

        if change.is_inserted() {
            document.save(path)?;
        }
        info!(state = ?RunState::Persisted);

        Ok(Self {
            path: path.to_path_buf(),
            original,
            document,
            change,
            released: false,
        })
    }

    pub fn change(&self) -> &FlagChange {
        &self.change
    }

    /// Remove the injected entry and persist. Returns whether the file changed.
    pub fn disarm(mut self) -> Result<bool, SchemeError> {
        self.released = true;
        self.revert()
    }

    /// Leave the flag in place.
    pub fn keep(mut self) {
        self.released = true;
    }

    fn revert(&mut self) -> Result<bool, SchemeError> {
        let changed = self.document.revert_flag(&self.change)?;
        if changed {
            std::fs::write(&self.path, &self.original).map_err(|source| SchemeError::Write {
                path: self.path.clone(),
                source,
            })?;
            debug!(path = %self.path.display(), "Scheme restored");
        }
        Ok(changed)
    }
}

impl Drop for ArmedScheme {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.revert() {
            warn!(error = %e, path = %self.path.display(), "Failed to disarm scheme");
        }
    }
}

// ---------------------------------------------------------------------------
// RunPlan
// ---------------------------------------------------------------------------

/// Everything needed to perform one run.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub layout: ProjectLayout,
    pub section: SectionPath,
    pub flag: String,
    pub patches: Vec<LiteralPatch>,
    pub strict_placeholders: bool,
    pub xcodebuild: Xcodebuild,
    pub revert: RevertMode,
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Exit code of the build tool.
    pub exit_code: i32,
    pub flag_change: FlagChange,
    pub final_state: RunState,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

impl RunPlan {
    /// Build a plan from configuration for the project under `folder`.
    pub fn from_config(
        config: &XcarmConfig,
        folder: &Path,
        destination: Destination,
    ) -> Result<Self, RunError> {
        let layout = ProjectLayout::resolve(folder, config.xcodeproj.as_deref(), &config.scheme)?;
        let section: SectionPath = config.section.parse().map_err(RunError::InvalidSection)?;

        let project_arg = layout
            .xcodeproj
            .strip_prefix(folder)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| layout.xcodeproj.clone());
        let mut xcodebuild = Xcodebuild::new(project_arg, config.scheme.clone(), destination);
        if let Some((program, program_args)) = config.xcodebuild.split_first() {
            xcodebuild.program = program.clone();
            xcodebuild.program_args = program_args.to_vec();
        }
        xcodebuild.platform = config.platform.clone();
        xcodebuild.configuration = config.configuration.clone();
        xcodebuild.actions = config.actions.clone();
        xcodebuild.extra_args = config.extra_args.clone();
        xcodebuild.working_dir = Some(folder.to_path_buf());
        xcodebuild.signing = SigningOverrides {
            team_id: None,
            provisioning_profile: config.provisioning_profile.clone(),
            certificate: config.certificate.clone(),
        };

        Ok(Self {
            layout,
            section,
            flag: config.test_flag.clone(),
            patches: config.pbxproj_patches(),
            strict_placeholders: config.strict_placeholders,
            xcodebuild,
            revert: config.revert,
        })
    }

    /// Arm, patch, run and (depending on [`RevertMode`]) revert.
    ///
    /// A nonzero exit from the build tool is not an error: it is reported in
    /// [`RunOutcome::exit_code`] after the files have been restored.
    pub fn execute(&self) -> Result<RunOutcome, RunError> {
        let scheme_path = self.layout.existing_scheme()?;
        let armed = ArmedScheme::arm(&scheme_path, &self.section, &self.flag)?;

        let patched = if self.patches.is_empty() {
            None
        } else {
            let pbxproj = self.layout.existing_pbxproj()?;
            Some(PatchedFile::apply(&pbxproj, &self.patches, self.strict_placeholders)?)
        };

        let exit_code = self.xcodebuild.run()?;
        info!(state = ?RunState::TestInvoked, exit_code);

        let flag_change = armed.change().clone();
        let final_state = match self.revert {
            RevertMode::KeepArmed => {
                armed.keep();
                if let Some(patched) = patched {
                    patched.keep();
                }
                info!(path = %scheme_path.display(), "Leaving scheme armed");
                RunState::TestInvoked
            }
            RevertMode::Restore => {
                let restored = patched.map(PatchedFile::restore).transpose();
                armed.disarm()?;
                restored?;
                info!(state = ?RunState::Reverted);
                RunState::Reverted
            }
        };

        Ok(RunOutcome {
            exit_code,
            flag_change,
            final_state,
        })
    }
}
