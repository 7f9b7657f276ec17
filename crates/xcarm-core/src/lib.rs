//! # xcarm-core
//!
//! Core library for arming an Xcode scheme with a test launch argument and
//! driving an `xcodebuild` test run against a single device.
//!
//! ## Modules
//!
//! - [`scheme`] - Typed `.xcscheme` tree with idempotent flag injection and revert
//! - [`build_settings`] - Literal placeholder patching of `project.pbxproj`
//! - [`xcodebuild`] - Destination selectors and the blocking test invocation
//! - [`project`] - Locating the `.xcodeproj`, scheme and pbxproj in a project folder
//! - [`config`] - JSON configuration (scheme, signing identifiers, revert mode)
//! - [`runner`] - The per-run state machine with scoped revert guards
//! - [`simctl`] - Wrapper around `xcrun simctl` for listing simulator devices
//!
//! ## External Dependencies
//!
//! - **Xcode** (for `xcodebuild` and `xcrun simctl`)
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use xcarm_core::config::XcarmConfig;
//! use xcarm_core::runner::RunPlan;
//! use xcarm_core::xcodebuild::Destination;
//!
//! let folder = Path::new("Builds/iOS");
//! let config = XcarmConfig::discover(None, folder).expect("bad config");
//! let plan = RunPlan::from_config(&config, folder, Destination::Id("00008030-001A".into()))
//!     .expect("project not found");
//!
//! println!("{}", plan.xcodebuild.command_line());
//! let outcome = plan.execute().expect("run failed");
//! std::process::exit(outcome.exit_code);
//! ```

pub mod build_settings;
pub mod config;
pub mod project;
pub mod runner;
pub mod scheme;
pub mod simctl;
pub mod xcodebuild;
