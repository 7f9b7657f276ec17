//! CLI for arming Xcode schemes with a test flag and running xcodebuild.
//!
//! # Usage
//!
//! ```bash
//! # Arm the scheme, run clean/build/test on a device by UDID, then revert
//! xcarm run Builds/iOS 00008030-001A2B3C4D5E
//!
//! # Target a device by name and leave the scheme armed for Xcode
//! xcarm run Builds/iOS "iPhone 15" --by-name --keep-armed
//!
//! # Print the xcodebuild command without touching anything
//! xcarm run Builds/iOS 1234 --scheme MainApp --dry-run
//!
//! # Arm or disarm the scheme without running tests
//! xcarm arm Builds/iOS
//! xcarm disarm Builds/iOS
//!
//! # Fill the empty DEVELOPMENT_TEAM placeholders in project.pbxproj
//! xcarm sign Builds/iOS --team-id ABC123
//!
//! # List simulators to pick a device
//! xcarm devices --booted
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Args, Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use xcarm_core::build_settings::{BuildSettingsError, PatchedFile};
use xcarm_core::config::{ConfigError, XcarmConfig};
use xcarm_core::project::{ProjectError, ProjectLayout};
use xcarm_core::runner::{ArmedScheme, RevertMode, RunError, RunPlan};
use xcarm_core::scheme::{FlagChange, SchemeDocument, SchemeError, SectionPath};
use xcarm_core::simctl::Simctl;
use xcarm_core::xcodebuild::{Destination, DestinationKind, XcodebuildError};

/// Arm Xcode schemes with a test launch argument and run xcodebuild.
#[derive(Parser)]
#[command(name = "xcarm")]
#[command(about = "Inject a test flag into an Xcode scheme and run xcodebuild against a device")]
#[command(version)]
struct Cli {
    /// Output format: text or json
    #[arg(short, long, default_value = "text", global = true)]
    format: OutputFormat,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Arguments shared by every command that works on a project folder.
#[derive(Args)]
struct ProjectArgs {
    /// Folder containing the exported .xcodeproj
    project: PathBuf,

    /// Config file (defaults to <project>/xcarm.json, then ~/.xcarm/config.json)
    #[arg(short, long, env = "XCARM_CONFIG")]
    config: Option<PathBuf>,

    /// Shared scheme name
    #[arg(short, long)]
    scheme: Option<String>,

    /// Scheme section holding the launch arguments, e.g. LaunchAction
    #[arg(long)]
    section: Option<String>,

    /// Launch argument to inject
    #[arg(long)]
    flag: Option<String>,

    /// .xcodeproj bundle name inside the project folder
    #[arg(long)]
    xcodeproj: Option<String>,
}

impl ProjectArgs {
    fn load_config(&self) -> Result<XcarmConfig, CliError> {
        let mut config = XcarmConfig::discover(self.config.as_deref(), &self.project)?;
        if let Some(scheme) = &self.scheme {
            config.scheme = scheme.clone();
        }
        if let Some(section) = &self.section {
            config.section = section.clone();
        }
        if let Some(flag) = &self.flag {
            config.test_flag = flag.clone();
        }
        if let Some(xcodeproj) = &self.xcodeproj {
            config.xcodeproj = Some(xcodeproj.clone());
        }
        debug!(project = %self.project.display(), scheme = %config.scheme, "Config resolved");
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Arm the scheme, run xcodebuild on a device, then revert
    Run {
        #[command(flatten)]
        project: ProjectArgs,

        /// Device UDID, or device name with --by-name
        device: String,

        /// Treat DEVICE as a device name instead of a UDID
        #[arg(long)]
        by_name: bool,

        /// Leave the scheme armed and the pbxproj patched after the run
        #[arg(long)]
        keep_armed: bool,

        /// Print the xcodebuild command and exit without changing any file
        #[arg(long)]
        dry_run: bool,

        /// Signing team written over empty DEVELOPMENT_TEAM settings
        #[arg(long, env = "XCARM_TEAM_ID")]
        team_id: Option<String>,

        /// Provisioning profile passed as PROVISIONING_PROFILE
        #[arg(long)]
        profile: Option<String>,

        /// Signing certificate passed as CODE_SIGN_IDENTITY
        #[arg(long)]
        certificate: Option<String>,

        /// Destination platform, e.g. iOS
        #[arg(long)]
        platform: Option<String>,

        /// Build configuration, e.g. Debug
        #[arg(long)]
        configuration: Option<String>,
    },

    /// Inject the test flag into the scheme and leave it there
    Arm {
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Remove the test flag from the scheme
    Disarm {
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Patch signing placeholders in project.pbxproj and keep the result
    Sign {
        #[command(flatten)]
        project: ProjectArgs,

        /// Signing team written over empty DEVELOPMENT_TEAM settings
        #[arg(long, env = "XCARM_TEAM_ID")]
        team_id: Option<String>,

        /// Fail if a placeholder is not found
        #[arg(long)]
        strict: bool,
    },

    /// List available simulator devices
    Devices {
        /// Only show booted devices
        #[arg(long)]
        booted: bool,
    },
}

/// Exit code used when a run was interrupted with Ctrl-C.
const INTERRUPTED_EXIT: u8 = 130;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Keep xcarm alive on the first Ctrl-C.
///
/// xcodebuild shares the terminal's process group and receives the same
/// SIGINT, so `status()` returns and the run guards revert the scheme and the
/// pbxproj. A second Ctrl-C exits immediately.
fn install_interrupt_handler() {
    let result = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            std::process::exit(i32::from(INTERRUPTED_EXIT));
        }
        eprintln!("\nInterrupted, reverting once xcodebuild exits (Ctrl-C again to abort)");
    });
    if let Err(e) = result {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

#[derive(Debug)]
enum CliError {
    /// Config, project layout or missing input.
    Usage(String),
    /// The scheme is malformed or lacks the section.
    Document(String),
    Io(String),
    /// xcodebuild (or simctl) could not be started.
    Tool(String),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Usage(_) => ExitCode::from(2),
            CliError::Document(_) => ExitCode::from(3),
            CliError::Io(_) => ExitCode::from(4),
            CliError::Tool(_) => ExitCode::from(5),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Usage(msg) => write!(f, "{}", msg),
            CliError::Document(msg) => write!(f, "Scheme error: {}", msg),
            CliError::Io(msg) => write!(f, "IO error: {}", msg),
            CliError::Tool(msg) => write!(f, "Tool error: {}", msg),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Usage(e.to_string())
    }
}

impl From<ProjectError> for CliError {
    fn from(e: ProjectError) -> Self {
        CliError::Usage(e.to_string())
    }
}

impl From<SchemeError> for CliError {
    fn from(e: SchemeError) -> Self {
        match e {
            SchemeError::MissingSection(_) | SchemeError::Xml(_) => CliError::Document(e.to_string()),
            SchemeError::Read { .. } | SchemeError::Write { .. } => CliError::Io(e.to_string()),
        }
    }
}

impl From<BuildSettingsError> for CliError {
    fn from(e: BuildSettingsError) -> Self {
        match e {
            BuildSettingsError::PlaceholderNotFound { .. } => CliError::Usage(e.to_string()),
            BuildSettingsError::Read { .. } | BuildSettingsError::Write { .. } => {
                CliError::Io(e.to_string())
            }
        }
    }
}

impl From<XcodebuildError> for CliError {
    fn from(e: XcodebuildError) -> Self {
        CliError::Tool(e.to_string())
    }
}

impl From<RunError> for CliError {
    fn from(e: RunError) -> Self {
        match e {
            RunError::Project(e) => e.into(),
            RunError::Scheme(e) => e.into(),
            RunError::BuildSettings(e) => e.into(),
            RunError::Xcodebuild(e) => e.into(),
            RunError::InvalidSection(msg) => CliError::Usage(msg),
        }
    }
}

/// The tool's exit code as a process exit byte.
///
/// Negative codes (Windows NTSTATUS values) do not fit and are reported as 1.
fn exit_byte(code: i32) -> u8 {
    u8::try_from(code).unwrap_or_else(|_| {
        debug!(exit_code = code, "Exit code out of range, reporting 1");
        1
    })
}

fn parse_section(config: &XcarmConfig) -> Result<SectionPath, CliError> {
    config.section.parse().map_err(CliError::Usage)
}

fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let json = cli.format == OutputFormat::Json;
    let quiet = cli.quiet;

    match cli.command {
        Command::Run {
            project,
            device,
            by_name,
            keep_armed,
            dry_run,
            team_id,
            profile,
            certificate,
            platform,
            configuration,
        } => {
            let mut config = project.load_config()?;
            if by_name {
                config.destination = DestinationKind::Name;
            }
            if keep_armed {
                config.revert = RevertMode::KeepArmed;
            }
            if team_id.is_some() {
                config.team_id = team_id;
            }
            if profile.is_some() {
                config.provisioning_profile = profile;
            }
            if certificate.is_some() {
                config.certificate = certificate;
            }
            if platform.is_some() {
                config.platform = platform;
            }
            if configuration.is_some() {
                config.configuration = configuration;
            }

            let destination = Destination::new(config.destination, device);
            let plan = RunPlan::from_config(&config, &project.project, destination)?;
            let command_line = plan.xcodebuild.command_line();

            if dry_run {
                if json {
                    println!(
                        "{}",
                        serde_json::json!({
                            "command": plan.xcodebuild.program,
                            "args": plan.xcodebuild.program_args.iter().cloned().chain(plan.xcodebuild.args()).collect::<Vec<_>>(),
                            "scheme_path": plan.layout.scheme_path(),
                            "flag": plan.flag,
                        })
                    );
                } else {
                    println!("{}", command_line);
                }
                return Ok(ExitCode::SUCCESS);
            }

            if !quiet {
                eprintln!("Running: {}", command_line);
            }
            install_interrupt_handler();
            let outcome = plan.execute()?;

            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "exit_code": outcome.exit_code,
                        "inserted": outcome.flag_change.is_inserted(),
                        "state": format!("{:?}", outcome.final_state),
                    })
                );
            } else if !quiet {
                match config.revert {
                    RevertMode::Restore => eprintln!("Scheme restored"),
                    RevertMode::KeepArmed => {
                        eprintln!("Scheme left armed with {}", plan.flag)
                    }
                }
                eprintln!("xcodebuild exited with code {}", outcome.exit_code);
            }

            if INTERRUPTED.load(Ordering::SeqCst) {
                return Ok(ExitCode::from(INTERRUPTED_EXIT));
            }
            Ok(ExitCode::from(exit_byte(outcome.exit_code)))
        }

        Command::Arm { project } => {
            let config = project.load_config()?;
            let section = parse_section(&config)?;
            let layout = ProjectLayout::resolve(&project.project, config.xcodeproj.as_deref(), &config.scheme)?;
            let scheme_path = layout.existing_scheme()?;

            let armed = ArmedScheme::arm(&scheme_path, &section, &config.test_flag)?;
            let change = armed.change().clone();
            armed.keep();

            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "scheme_path": scheme_path,
                        "flag": config.test_flag,
                        "inserted": change.is_inserted(),
                    })
                );
            } else if !quiet {
                match change {
                    FlagChange::Inserted { .. } => {
                        eprintln!("Armed {} with {}", scheme_path.display(), config.test_flag)
                    }
                    FlagChange::AlreadyPresent { enabled: true, .. } => {
                        eprintln!("{} already armed with {}", scheme_path.display(), config.test_flag)
                    }
                    FlagChange::AlreadyPresent { enabled: false, .. } => eprintln!(
                        "{} has {} but it is disabled; left unchanged",
                        scheme_path.display(),
                        config.test_flag
                    ),
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Disarm { project } => {
            let config = project.load_config()?;
            let section = parse_section(&config)?;
            let layout = ProjectLayout::resolve(&project.project, config.xcodeproj.as_deref(), &config.scheme)?;
            let scheme_path = layout.existing_scheme()?;

            let mut document = SchemeDocument::load(&scheme_path)?;
            let removed = document.remove_flag(&section, &config.test_flag)?;
            if removed > 0 {
                document.save(&scheme_path)?;
            }

            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "scheme_path": scheme_path,
                        "flag": config.test_flag,
                        "removed": removed,
                    })
                );
            } else if !quiet {
                if removed > 0 {
                    eprintln!("Removed {} from {}", config.test_flag, scheme_path.display());
                } else {
                    eprintln!("{} was not armed", scheme_path.display());
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Sign {
            project,
            team_id,
            strict,
        } => {
            let mut config = project.load_config()?;
            if team_id.is_some() {
                config.team_id = team_id;
            }
            let patches = config.pbxproj_patches();
            if patches.is_empty() {
                return Err(CliError::Usage(
                    "Nothing to patch: pass --team-id or set literal_patches in the config".into(),
                ));
            }

            let layout = ProjectLayout::resolve(&project.project, config.xcodeproj.as_deref(), &config.scheme)?;
            let pbxproj = layout.existing_pbxproj()?;
            PatchedFile::apply(&pbxproj, &patches, strict || config.strict_placeholders)?.keep();

            if json {
                println!(
                    "{}",
                    serde_json::json!({ "pbxproj": pbxproj, "patches": patches.len() })
                );
            } else if !quiet {
                eprintln!("Patched {}", pbxproj.display());
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Devices { booted } => {
            let devices = Simctl::list_devices()
                .map_err(|e| CliError::Tool(format!("Failed to list devices: {}", e)))?;
            let devices: Vec<_> = devices
                .into_iter()
                .filter(|d| !booted || d.is_booted())
                .collect();

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&devices).map_err(|e| CliError::Io(e.to_string()))?
                );
            } else if devices.is_empty() {
                eprintln!("No simulator devices found");
            } else {
                for device in &devices {
                    let state = if device.is_booted() { " (Booted)" } else { "" };
                    println!("{} -- {}{}", device.udid, device.name, state);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
