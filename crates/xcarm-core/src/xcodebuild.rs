//! Construction and execution of the `xcodebuild` test command.
//!
//! [`Xcodebuild`] assembles the argument vector for a clean/build/test run
//! against one device, prints nothing itself and runs the tool with inherited
//! stdio so build output streams straight to the terminal.
//!
//! # Example
//!
//! ```
//! use std::path::PathBuf;
//! use xcarm_core::xcodebuild::{Destination, Xcodebuild};
//!
//! let cmd = Xcodebuild::new(
//!     PathBuf::from("Unity-iPhone.xcodeproj"),
//!     "MainApp",
//!     Destination::Id("1234".into()),
//! );
//! let args = cmd.args();
//! assert!(args.contains(&"MainApp".to_string()));
//! assert!(args.contains(&"id=1234".to_string()));
//! ```

use std::fmt;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Errors from launching `xcodebuild`.
#[derive(Error, Debug)]
pub enum XcodebuildError {
    /// The tool could not be started (usually: not on `PATH`).
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// How a destination device is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    #[default]
    Id,
    Name,
}

/// The device a test run targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Device UDID (`id=...`).
    Id(String),
    /// Device name as shown by Xcode (`name=...`).
    Name(String),
}

impl Destination {
    pub fn new(kind: DestinationKind, value: impl Into<String>) -> Self {
        match kind {
            DestinationKind::Id => Destination::Id(value.into()),
            DestinationKind::Name => Destination::Name(value.into()),
        }
    }


    /// The `-destination` specifier, optionally scoped to a platform.
    pub fn specifier(&self, platform: Option<&str>) -> String {
        let selector = match self {
            Destination::Id(id) => format!("id={}", id),
            Destination::Name(name) => format!("name={}", name),
        };
        match platform {
            Some(platform) => format!("platform={},{}", platform, selector),
            None => selector,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.specifier(None))
    }
}

/// Code-signing overrides passed to `xcodebuild` as build settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SigningOverrides {
    pub team_id: Option<String>,
    pub provisioning_profile: Option<String>,
    pub certificate: Option<String>,
}

impl SigningOverrides {
    fn settings(&self) -> Vec<String> {
        [
            ("DEVELOPMENT_TEAM", &self.team_id),
            ("PROVISIONING_PROFILE", &self.provisioning_profile),
            ("CODE_SIGN_IDENTITY", &self.certificate),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_ref().map(|v| format!("{}={}", key, v)))
        .collect()
    }
}

/// Default build actions.
pub const DEFAULT_ACTIONS: [&str; 3] = ["clean", "build", "test"];

/// A fully described `xcodebuild` invocation.
#[derive(Debug, Clone)]
pub struct Xcodebuild {
    pub program: String,
    /// Arguments placed before the xcodebuild arguments, e.g. `xcodebuild` when
    /// `program` is `xcrun`.
    pub program_args: Vec<String>,
    pub project: PathBuf,
    pub scheme: String,
    pub destination: Destination,
    pub platform: Option<String>,
    pub configuration: Option<String>,
    pub actions: Vec<String>,
    pub signing: SigningOverrides,
    pub extra_args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl Xcodebuild {
    pub fn new(project: PathBuf, scheme: impl Into<String>, destination: Destination) -> Self {
        Self {
            program: "xcodebuild".to_string(),
            program_args: Vec::new(),
            project,
            scheme: scheme.into(),
            destination,
            platform: None,
            configuration: None,
            actions: DEFAULT_ACTIONS.iter().map(|a| a.to_string()).collect(),
            signing: SigningOverrides::default(),
            extra_args: Vec::new(),
            working_dir: None,
        }
    }

    /// Arguments passed to the program, in order.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-project".to_string(),
            self.project.to_string_lossy().into_owned(),
            "-scheme".to_string(),
            self.scheme.clone(),
            "-destination".to_string(),
            self.destination.specifier(self.platform.as_deref()),
        ];
        if let Some(configuration) = &self.configuration {
            args.push("-configuration".to_string());
            args.push(configuration.clone());
        }
        args.extend(self.actions.iter().cloned());
        args.extend(self.signing.settings());
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Shell-quoted rendering of the full command, for display.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.program_args.iter().map(String::as_str))
            .chain(self.args().iter().map(String::as_str))
            .map(shell_escape)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run the command and wait for it to exit.
    ///
    /// Blocks without a timeout. Returns the process exit code; on Unix a
    /// signal-terminated process yields `128 + signal`.
    ///
    /// # Errors
    ///
    /// [`XcodebuildError::Spawn`] if the program cannot be started.
    pub fn run(&self) -> Result<i32, XcodebuildError> {
        let mut command = Command::new(&self.program);
        command.args(&self.program_args).args(self.args());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        info!(command = %self.command_line(), "Running xcodebuild");
        let status = command.status().map_err(|source| XcodebuildError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let code = exit_code(status);
        info!(code, "xcodebuild exited");
        Ok(code)
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

/// Shell-escape a string using single quotes. Internal single quotes become `'\''`.
fn shell_escape(s: &str) -> String {
    if !s.is_empty()
        && s.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '=' | ',' | ':')
        })
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main_app(destination: Destination) -> Xcodebuild {
        Xcodebuild::new(PathBuf::from("Unity-iPhone.xcodeproj"), "MainApp", destination)
    }

    #[test]
    fn id_destination_args() {
        let args = main_app(Destination::Id("1234".into())).args();
        assert_eq!(
            args,
            vec![
                "-project",
                "Unity-iPhone.xcodeproj",
                "-scheme",
                "MainApp",
                "-destination",
                "id=1234",
                "clean",
                "build",
                "test",
            ]
        );
    }

    #[test]
    fn name_destination_args() {
        let args = main_app(Destination::Name("iPhone 15".into())).args();
        assert!(args.contains(&"name=iPhone 15".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("id=")));
    }

    #[test]
    fn platform_prefix() {
        let dest = Destination::Id("1234".into());
        assert_eq!(dest.specifier(Some("iOS")), "platform=iOS,id=1234");
        assert_eq!(dest.to_string(), "id=1234");
    }

    #[test]
    fn destination_from_kind() {
        assert_eq!(Destination::new(DestinationKind::Name, "iPad"), Destination::Name("iPad".into()));
        assert_eq!(Destination::new(DestinationKind::Id, "AB"), Destination::Id("AB".into()));
    }

    #[test]
    fn signing_and_configuration_args() {
        let mut cmd = main_app(Destination::Id("1234".into()));
        cmd.configuration = Some("Release".into());
        cmd.signing = SigningOverrides {
            team_id: Some("ABC123".into()),
            provisioning_profile: Some("0000-PROFILE".into()),
            certificate: None,
        };
        cmd.extra_args = vec!["-allowProvisioningUpdates".into()];
        cmd.actions = vec!["test".into()];

        let args = cmd.args();
        let tail: Vec<&str> = args[6..].iter().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "-configuration",
                "Release",
                "test",
                "DEVELOPMENT_TEAM=ABC123",
                "PROVISIONING_PROFILE=0000-PROFILE",
                "-allowProvisioningUpdates",
            ]
        );
    }

    #[test]
    fn command_line_quotes_spaces() {
        let cmd = main_app(Destination::Name("iPhone 15 Pro".into()));
        let line = cmd.command_line();
        assert!(line.starts_with("xcodebuild -project Unity-iPhone.xcodeproj -scheme MainApp"));
        assert!(line.contains("-destination 'name=iPhone 15 Pro'"));
    }

    #[test]
    fn command_line_includes_program_args() {
        let mut cmd = main_app(Destination::Id("1234".into()));
        cmd.program = "xcrun".into();
        cmd.program_args = vec!["xcodebuild".into()];
        assert!(cmd.command_line().starts_with("xcrun xcodebuild -project "));
    }

    #[test]
    fn shell_escape_single_quotes() {
        assert_eq!(shell_escape("it's"), "'it'\\''s'");
        assert_eq!(shell_escape(""), "''");
        assert_eq!(shell_escape("id=1234"), "id=1234");
    }

    #[test]
    fn run_missing_program() {
        let mut cmd = main_app(Destination::Id("1234".into()));
        cmd.program = "/nonexistent/xcodebuild-missing".into();
        match cmd.run() {
            Err(XcodebuildError::Spawn { program, .. }) => {
                assert_eq!(program, "/nonexistent/xcodebuild-missing");
            }
            other => panic!("Expected Spawn error, got: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn run_returns_exit_code() {
        let mut cmd = main_app(Destination::Id("1234".into()));
        cmd.program = "false".into();
        assert_eq!(cmd.run().unwrap(), 1);

        cmd.program = "true".into();
        assert_eq!(cmd.run().unwrap(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn run_passes_program_args_first() {
        let mut cmd = main_app(Destination::Id("1234".into()));
        cmd.program = "sh".into();
        cmd.program_args = vec![
            "-c".into(),
            r#"[ "$1" = "-project" ] && [ "$6" = "id=1234" ] && exit 7; exit 1"#.into(),
            "xcodebuild".into(),
        ];
        assert_eq!(cmd.run().unwrap(), 7);
    }
}
