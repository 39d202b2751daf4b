//! Relay configuration – reads/writes `~/.padrelay/config.toml`.
//!
//! Precedence, lowest first: built-in defaults, the config file,
//! `PADRELAY_*` environment variables, command-line options.

use padrelay_types::RelayError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Which pipelines the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Controller input to the input topic.
    Producer,
    /// Output topic to the grid display.
    Consumer,
    /// Both pipelines plus the level-meter bridge between the topics.
    #[default]
    Both,
}

impl Mode {
    pub fn runs_producer(self) -> bool {
        matches!(self, Mode::Producer | Mode::Both)
    }

    pub fn runs_consumer(self) -> bool {
        matches!(self, Mode::Consumer | Mode::Both)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Producer => write!(f, "producer"),
            Mode::Consumer => write!(f, "consumer"),
            Mode::Both => write!(f, "both"),
        }
    }
}

impl FromStr for Mode {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "producer" => Ok(Mode::Producer),
            "consumer" => Ok(Mode::Consumer),
            "both" => Ok(Mode::Both),
            other => Err(RelayError::Config(format!(
                "unknown mode {other:?} (expected producer, consumer or both)"
            ))),
        }
    }
}

/// Persisted relay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Project that owns the topics.
    #[serde(default = "default_project")]
    pub project: String,

    /// Topic the controller side publishes to.
    #[serde(default = "default_input_topic")]
    pub input_topic: String,

    /// Topic the display side consumes grids from.
    #[serde(default = "default_output_topic")]
    pub output_topic: String,

    /// Existing subscription to attach to.  A fresh one is created when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,

    #[serde(default = "default_quiet_period_ms")]
    pub quiet_period_ms: u64,

    #[serde(default = "default_pull_backoff_ms")]
    pub pull_backoff_ms: u64,

    /// Ack deadline for subscriptions this process creates.
    #[serde(default = "default_ack_deadline_secs")]
    pub ack_deadline_secs: u64,

    #[serde(default)]
    pub mode: Mode,
}

fn default_project() -> String {
    "local".to_string()
}
fn default_input_topic() -> String {
    "padrelay-input".to_string()
}
fn default_output_topic() -> String {
    "padrelay-output".to_string()
}
fn default_quiet_period_ms() -> u64 {
    500
}
fn default_pull_backoff_ms() -> u64 {
    10
}
fn default_ack_deadline_secs() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project: default_project(),
            input_topic: default_input_topic(),
            output_topic: default_output_topic(),
            subscription: None,
            quiet_period_ms: default_quiet_period_ms(),
            pull_backoff_ms: default_pull_backoff_ms(),
            ack_deadline_secs: default_ack_deadline_secs(),
            mode: Mode::default(),
        }
    }
}

impl Config {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    pub fn pull_backoff(&self) -> Duration {
        Duration::from_millis(self.pull_backoff_ms)
    }

    pub fn ack_deadline(&self) -> Duration {
        Duration::from_secs(self.ack_deadline_secs)
    }

    /// Reject settings the pipelines cannot start with.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.project.trim().is_empty() {
            return Err(RelayError::Config("project must not be empty".to_string()));
        }
        // Pad hits go to the input topic in every mode.
        if self.input_topic.trim().is_empty() {
            return Err(RelayError::Config("input_topic must not be empty".to_string()));
        }
        if self.mode.runs_consumer() && self.output_topic.trim().is_empty() {
            return Err(RelayError::Config("output_topic must not be empty".to_string()));
        }
        if self.quiet_period_ms == 0 {
            return Err(RelayError::Config("quiet_period_ms must be positive".to_string()));
        }
        if self.ack_deadline_secs == 0 {
            return Err(RelayError::Config("ack_deadline_secs must be positive".to_string()));
        }
        Ok(())
    }
}

/// Return the path to `~/.padrelay/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".padrelay").join("config.toml")
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, RelayError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| RelayError::Config(format!("failed to read {}: {e}", path.display())))?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| RelayError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Resolve the effective configuration: file (or defaults), then
/// environment, then command-line options.
pub fn resolve(args: &CliArgs) -> Result<Config, RelayError> {
    let path = args.config.clone().unwrap_or_else(config_path);
    let mut cfg = load_from(&path)?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    args.apply(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Apply `PADRELAY_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `PADRELAY_PROJECT` | `project` |
/// | `PADRELAY_INPUT_TOPIC` | `input_topic` |
/// | `PADRELAY_OUTPUT_TOPIC` | `output_topic` |
/// | `PADRELAY_SUBSCRIPTION` | `subscription` |
/// | `PADRELAY_QUIET_PERIOD_MS` | `quiet_period_ms` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("PADRELAY_PROJECT") {
        cfg.project = v;
    }
    if let Ok(v) = std::env::var("PADRELAY_INPUT_TOPIC") {
        cfg.input_topic = v;
    }
    if let Ok(v) = std::env::var("PADRELAY_OUTPUT_TOPIC") {
        cfg.output_topic = v;
    }
    if let Ok(v) = std::env::var("PADRELAY_SUBSCRIPTION") {
        cfg.subscription = Some(v).filter(|s| !s.is_empty());
    }
    if let Ok(v) = std::env::var("PADRELAY_QUIET_PERIOD_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.quiet_period_ms = ms;
    }
}

/// Save the config to `path`, creating its directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), RelayError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| RelayError::Config(format!("failed to create config directory: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                RelayError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| RelayError::Config(format!("failed to serialize config: {e}")))?;
    let write_err = |e: std::io::Error| RelayError::Config(format!("failed to write {}: {e}", path.display()));
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Command line
// ─────────────────────────────────────────────────────────────────────────────

pub const USAGE: &str = "\
usage: padrelay [options]

  --project <name>         project that owns the topics
  --input-topic <topic>    topic controller input and pad hits go to
  --output-topic <topic>   topic display grids are read from
  --subscription <name>    attach to an existing subscription
  --mode <mode>            producer, consumer or both (default both)
  --config <path>          config file (default ~/.padrelay/config.toml)
  --save                   write the effective config back to the config file
  -h, --help               show this help";

/// Options given on the command line.  Unset options leave the file and
/// environment values alone.
#[derive(Debug, Default, PartialEq)]
pub struct CliArgs {
    pub project: Option<String>,
    pub input_topic: Option<String>,
    pub output_topic: Option<String>,
    pub subscription: Option<String>,
    pub mode: Option<Mode>,
    pub config: Option<PathBuf>,
    pub save: bool,
    pub help: bool,
}

impl CliArgs {
    /// Parse `--name value` and `--name=value` options (program name
    /// excluded).
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] for unknown options, missing values and
    /// invalid modes.
    pub fn parse<I>(args: I) -> Result<Self, RelayError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = CliArgs::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let (name, inline) = match arg.split_once('=') {
                Some((name, value)) => (name.to_string(), Some(value.to_string())),
                None => (arg, None),
            };
            match name.as_str() {
                "-h" | "--help" => parsed.help = true,
                "--save" => parsed.save = true,
                "--project" | "--input-topic" | "--output-topic" | "--subscription" | "--mode"
                | "--config" => {
                    let value = match inline.or_else(|| args.next()) {
                        Some(v) => v,
                        None => return Err(RelayError::Config(format!("{name} needs a value"))),
                    };
                    match name.as_str() {
                        "--project" => parsed.project = Some(value),
                        "--input-topic" => parsed.input_topic = Some(value),
                        "--output-topic" => parsed.output_topic = Some(value),
                        "--subscription" => parsed.subscription = Some(value),
                        "--mode" => parsed.mode = Some(value.parse()?),
                        _ => parsed.config = Some(PathBuf::from(value)),
                    }
                }
                other => return Err(RelayError::Config(format!("unknown option {other}"))),
            }
        }
        Ok(parsed)
    }

    pub fn apply(&self, cfg: &mut Config) {
        if let Some(v) = &self.project {
            cfg.project = v.clone();
        }
        if let Some(v) = &self.input_topic {
            cfg.input_topic = v.clone();
        }
        if let Some(v) = &self.output_topic {
            cfg.output_topic = v.clone();
        }
        if let Some(v) = &self.subscription {
            cfg.subscription = Some(v.clone()).filter(|s| !s.is_empty());
        }
        if let Some(mode) = self.mode {
            cfg.mode = mode;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_meta = std::fs::metadata(path.parent().unwrap()).expect("dir metadata");
        assert_eq!(dir_meta.permissions().mode() & 0o777, 0o700);
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, Config::default());
        assert_eq!(loaded.quiet_period(), Duration::from_millis(500));
        assert_eq!(loaded.pull_backoff(), Duration::from_millis(10));
        assert_eq!(loaded.ack_deadline(), Duration::from_secs(300));
        assert_eq!(loaded.mode, Mode::Both);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "project = \"studio\"\nmode = \"consumer\"\n").unwrap();

        let cfg = load_from(&path).unwrap().unwrap();
        assert_eq!(cfg.project, "studio");
        assert_eq!(cfg.mode, Mode::Consumer);
        assert_eq!(cfg.input_topic, "padrelay-input");
        assert_eq!(cfg.subscription, None);
    }

    #[test]
    fn unparseable_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "quiet_period_ms = \"soon\"").unwrap();
        assert!(matches!(load_from(&path), Err(RelayError::Config(_))));
    }

    #[test]
    fn config_path_points_to_padrelay_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".padrelay"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn apply_env_overrides_changes_topics() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe {
            std::env::set_var("PADRELAY_INPUT_TOPIC", "launchcontrol");
            std::env::set_var("PADRELAY_OUTPUT_TOPIC", "launchpad");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.input_topic, "launchcontrol");
        assert_eq!(cfg.output_topic, "launchpad");
        unsafe {
            std::env::remove_var("PADRELAY_INPUT_TOPIC");
            std::env::remove_var("PADRELAY_OUTPUT_TOPIC");
        }
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_quiet_period() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("PADRELAY_QUIET_PERIOD_MS", "half a second") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.quiet_period_ms, 500);
        unsafe { std::env::remove_var("PADRELAY_QUIET_PERIOD_MS") };
    }

    #[test]
    fn cli_args_accept_both_value_forms() {
        let parsed = CliArgs::parse(args(&[
            "--project",
            "studio",
            "--mode=consumer",
            "--subscription",
            "launchpad-agent",
        ]))
        .unwrap();
        assert_eq!(parsed.project.as_deref(), Some("studio"));
        assert_eq!(parsed.mode, Some(Mode::Consumer));
        assert_eq!(parsed.subscription.as_deref(), Some("launchpad-agent"));
        assert!(!parsed.help);
    }

    #[test]
    fn cli_args_reject_unknown_options_and_missing_values() {
        assert!(CliArgs::parse(args(&["--verbose"])).is_err());
        assert!(CliArgs::parse(args(&["--project"])).is_err());
        assert!(CliArgs::parse(args(&["--mode", "sideways"])).is_err());
    }

    #[test]
    fn cli_args_override_file_values() {
        let mut cfg = Config {
            subscription: Some("from-file".to_string()),
            ..Config::default()
        };
        let parsed = CliArgs::parse(args(&["--output-topic", "grid", "--mode", "producer"])).unwrap();
        parsed.apply(&mut cfg);
        assert_eq!(cfg.output_topic, "grid");
        assert_eq!(cfg.mode, Mode::Producer);
        assert_eq!(cfg.subscription.as_deref(), Some("from-file"));
    }

    #[test]
    fn resolve_reads_explicit_config_path() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "project = \"studio\"\npull_backoff_ms = 25\n").unwrap();

        let parsed = CliArgs::parse(args(&["--config", &path.to_string_lossy(), "--project", "stage"])).unwrap();
        let cfg = resolve(&parsed).unwrap();
        assert_eq!(cfg.project, "stage");
        assert_eq!(cfg.pull_backoff_ms, 25);
    }

    #[test]
    fn validate_rejects_empty_topic_for_active_pipeline() {
        let cfg = Config {
            output_topic: String::new(),
            mode: Mode::Consumer,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(RelayError::Config(_))));

        let producer_only = Config {
            mode: Mode::Producer,
            ..cfg
        };
        assert!(producer_only.validate().is_ok());
    }

    #[test]
    fn consumer_still_needs_an_input_topic_for_pad_hits() {
        let cfg = Config {
            input_topic: " ".to_string(),
            mode: Mode::Consumer,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(RelayError::Config(_))));
    }
}
