//! Shared fixtures: an exported Unity project on disk and a stand-in build tool.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use xcarm_core::config::XcarmConfig;

pub const SCHEME_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Scheme
   LastUpgradeVersion = "1010"
   version = "1.3">
   <BuildAction
      parallelizeBuildables = "YES"
      buildImplicitDependencies = "YES">
      <BuildActionEntries>
         <BuildActionEntry
            buildForTesting = "YES"
            buildForRunning = "YES">
            <BuildableReference
               BuildableIdentifier = "primary"
               BlueprintIdentifier = "1D6058900D05DD3D006BFB54"
               BuildableName = "game.app"
               BlueprintName = "Unity-iPhone"
               ReferencedContainer = "container:Unity-iPhone.xcodeproj">
            </BuildableReference>
         </BuildActionEntry>
      </BuildActionEntries>
   </BuildAction>
   <TestAction
      buildConfiguration = "Debug"
      shouldUseLaunchSchemeArgsEnv = "YES">
      <Testables>
      </Testables>
   </TestAction>
   <LaunchAction
      buildConfiguration = "Release"
      launchStyle = "0"
      useCustomWorkingDirectory = "NO"
      debugDocumentVersioning = "YES">
      <BuildableProductRunnable
         runnableDebuggingMode = "0">
         <BuildableReference
            BuildableIdentifier = "primary"
            BlueprintIdentifier = "1D6058900D05DD3D006BFB54"
            BuildableName = "game.app"
            BlueprintName = "Unity-iPhone"
            ReferencedContainer = "container:Unity-iPhone.xcodeproj">
         </BuildableReference>
      </BuildableProductRunnable>
   </LaunchAction>
</Scheme>
"#;

/// An Xcode-written scheme with a pre-action script and environment variables.
pub const SCRIPTED_SCHEME_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Scheme
   LastUpgradeVersion = "1010"
   version = "1.3">
   <BuildAction
      parallelizeBuildables = "YES"
      buildImplicitDependencies = "YES">
      <PreActions>
         <ExecutionAction
            ActionType = "Xcode.IDEStandardExecutionActionsCore.ExecutionActionType.ShellScriptAction">
            <ActionContent
               title = "Run Script"
               scriptText = "cd &quot;${SRCROOT}&quot;&#10;./prepare.sh --mode &lt;ci&gt;&#10;">
               <EnvironmentBuildable>
                  <BuildableReference
                     BuildableIdentifier = "primary"
                     BlueprintIdentifier = "1D6058900D05DD3D006BFB54"
                     BuildableName = "game.app"
                     BlueprintName = "Unity-iPhone"
                     ReferencedContainer = "container:Unity-iPhone.xcodeproj">
                  </BuildableReference>
               </EnvironmentBuildable>
            </ActionContent>
         </ExecutionAction>
      </PreActions>
   </BuildAction>
   <LaunchAction
      buildConfiguration = "Release"
      launchStyle = "0">
      <EnvironmentVariables>
         <EnvironmentVariable
            key = "UNITY_ARGS"
            value = "-batchmode&#9;-logFile &quot;-&quot;"
            isEnabled = "YES">
         </EnvironmentVariable>
      </EnvironmentVariables>
   </LaunchAction>
</Scheme>
"#;

/// A scheme edited by hand: compact layout, single quotes, self-closing tags.
pub const HAND_EDITED_SCHEME_XML: &str = "<?xml version='1.0' encoding='UTF-8'?>\r\n\
<Scheme version='1.3'>\r\n\
  <BuildAction><PreActions><ExecutionAction><ActionContent title='Run' scriptText='echo one&#10;echo two'/></ExecutionAction></PreActions></BuildAction>\r\n\
  <LaunchAction launchStyle='0'><EnvironmentVariables/></LaunchAction>\r\n\
</Scheme>";

pub const PBXPROJ: &str = "\
// !$*UTF8*$!
{
\tobjects = {
\t\t1D6058940D05DD3E006BFB54 /* Debug */ = {
\t\t\tbuildSettings = {
\t\t\t\tCODE_SIGN_STYLE = Automatic;
\t\t\t\tDEVELOPMENT_TEAM = \"\";
\t\t\t\tPRODUCT_NAME = game;
\t\t\t};
\t\t};
\t\t1D6058950D05DD3E006BFB54 /* Release */ = {
\t\t\tbuildSettings = {
\t\t\t\tCODE_SIGN_STYLE = Automatic;
\t\t\t\tDEVELOPMENT_TEAM = \"\";
\t\t\t\tPRODUCT_NAME = game;
\t\t\t};
\t\t};
\t};
}
";

/// A temporary project folder containing `Unity-iPhone.xcodeproj`.
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_scheme(SCHEME_XML)
    }

    pub fn with_scheme(scheme_xml: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let fixture = Self { dir };
        std::fs::create_dir_all(fixture.scheme_path().parent().unwrap()).unwrap();
        std::fs::write(fixture.scheme_path(), scheme_xml).unwrap();
        std::fs::write(fixture.pbxproj_path(), PBXPROJ).unwrap();
        fixture
    }

    pub fn folder(&self) -> &Path {
        self.dir.path()
    }

    pub fn scheme_path(&self) -> PathBuf {
        self.folder()
            .join("Unity-iPhone.xcodeproj/xcshareddata/xcschemes/Unity-iPhone.xcscheme")
    }

    pub fn pbxproj_path(&self) -> PathBuf {
        self.folder().join("Unity-iPhone.xcodeproj/project.pbxproj")
    }

    pub fn scheme(&self) -> String {
        std::fs::read_to_string(self.scheme_path()).unwrap()
    }

    pub fn pbxproj(&self) -> String {
        std::fs::read_to_string(self.pbxproj_path()).unwrap()
    }

    /// Path where the stand-in tool records what it saw.
    pub fn capture(&self, name: &str) -> PathBuf {
        self.folder().join(name)
    }

    pub fn read_capture(&self, name: &str) -> String {
        std::fs::read_to_string(self.capture(name)).unwrap()
    }

    /// Config whose build tool is `sh -c <script>`.
    ///
    /// The script records its arguments and the scheme and pbxproj contents
    /// at the moment it runs, then exits with `exit_code`.
    pub fn config_with_tool(&self, exit_code: i32) -> XcarmConfig {
        let script = format!(
            r#"printf '%s\n' "$@" > '{args}'
cat Unity-iPhone.xcodeproj/xcshareddata/xcschemes/Unity-iPhone.xcscheme > '{scheme}'
cat Unity-iPhone.xcodeproj/project.pbxproj > '{pbxproj}'
exit {code}"#,
            args = self.capture("args.txt").display(),
            scheme = self.capture("scheme_during.xml").display(),
            pbxproj = self.capture("pbxproj_during.txt").display(),
            code = exit_code,
        );
        XcarmConfig {
            xcodebuild: vec!["sh".into(), "-c".into(), script, "xcodebuild".into()],
            ..Default::default()
        }
    }
}
