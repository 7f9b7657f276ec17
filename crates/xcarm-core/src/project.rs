//! Locating the Xcode project files inside an exported project folder.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Project name Unity uses for iOS exports.
pub const UNITY_PROJECT: &str = "Unity-iPhone.xcodeproj";

#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("Project folder not found: {}", .0.display())]
    FolderNotFound(PathBuf),

    #[error("No .xcodeproj found in {}", .0.display())]
    NoXcodeProject(PathBuf),

    #[error("Several .xcodeproj found in {}: {}; set `xcodeproj` to choose one", .folder.display(), .candidates.join(", "))]
    AmbiguousXcodeProject { folder: PathBuf, candidates: Vec<String> },

    #[error("Scheme file not found: {}", .0.display())]
    SchemeNotFound(PathBuf),

    #[error("Build settings file not found: {}", .0.display())]
    PbxprojNotFound(PathBuf),
}

/// Resolved paths of one Xcode project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    pub folder: PathBuf,
    pub xcodeproj: PathBuf,
    pub scheme_name: String,
}

impl ProjectLayout {
    /// Resolve the layout under `folder`.
    ///
    /// `xcodeproj` names the project bundle relative to the folder. When it is
    /// `None` the folder is searched: a single `.xcodeproj` is used as is, and
    /// among several the Unity export name wins.
    pub fn resolve(folder: &Path, xcodeproj: Option<&str>, scheme_name: &str) -> Result<Self, ProjectError> {
        if !folder.is_dir() {
            return Err(ProjectError::FolderNotFound(folder.to_path_buf()));
        }

        let xcodeproj = match xcodeproj {
            Some(name) => folder.join(name),
            None => discover_xcodeproj(folder)?,
        };

        Ok(Self {
            folder: folder.to_path_buf(),
            xcodeproj,
            scheme_name: scheme_name.to_string(),
        })
    }

    /// `<xcodeproj>/xcshareddata/xcschemes/<scheme>.xcscheme`
    pub fn scheme_path(&self) -> PathBuf {
        self.xcodeproj
            .join("xcshareddata")
            .join("xcschemes")
            .join(format!("{}.xcscheme", self.scheme_name))
    }

    /// `<xcodeproj>/project.pbxproj`
    pub fn pbxproj_path(&self) -> PathBuf {
        self.xcodeproj.join("project.pbxproj")
    }

    /// The scheme path, checked to exist.
    pub fn existing_scheme(&self) -> Result<PathBuf, ProjectError> {
        let path = self.scheme_path();
        if path.is_file() {
            Ok(path)
        } else {
            Err(ProjectError::SchemeNotFound(path))
        }
    }

    /// The pbxproj path, checked to exist.
    pub fn existing_pbxproj(&self) -> Result<PathBuf, ProjectError> {
        let path = self.pbxproj_path();
        if path.is_file() {
            Ok(path)
        } else {
            Err(ProjectError::PbxprojNotFound(path))
        }
    }
}

fn discover_xcodeproj(folder: &Path) -> Result<PathBuf, ProjectError> {
    let escaped = glob::Pattern::escape(&folder.to_string_lossy());
    let pattern = format!("{}/*.xcodeproj", escaped);
    let mut candidates: Vec<PathBuf> = glob::glob(&pattern)
        .into_iter()
        .flatten()
        .filter_map(Result::ok)
        .filter(|path| path.is_dir())
        .collect();
    candidates.sort();

    match candidates.len() {
        0 => Err(ProjectError::NoXcodeProject(folder.to_path_buf())),
        1 => Ok(candidates.remove(0)),
        _ => candidates
            .iter()
            .find(|path| path.file_name().is_some_and(|name| name == UNITY_PROJECT))
            .cloned()
            .ok_or_else(|| ProjectError::AmbiguousXcodeProject {
                folder: folder.to_path_buf(),
                candidates: candidates
                    .iter()
                    .filter_map(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .collect(),
            }),
    }
}
