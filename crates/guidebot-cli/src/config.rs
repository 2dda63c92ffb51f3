//! Configuration vault – reads/writes `~/.guidebot/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use guidebot_runtime::RobotConfig;

/// Persisted operator configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the OpenAI-compatible model server.
    pub model_url: String,
    /// Model name sent with every request.
    pub model: String,
    /// Bearer token for hosted endpoints; empty for local servers.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    /// BCP-47 tag used for speech.
    pub language: String,
    /// Saved locations the simulated drive base knows about.
    pub locations: Vec<String>,
    /// Directory holding the memory and interaction-log databases.
    /// Empty means `~/.guidebot/data`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub data_dir: String,

    pub autonomy_enabled: bool,
    pub idle_talk_enabled: bool,
    pub max_iterations: u32,
    pub model_timeout_secs: u64,
    pub total_timeout_secs: u64,
    pub arrival_timeout_secs: u64,
    pub max_nav_retries: u32,
    /// Seconds to wait for a follow-up before heading home.
    pub linger_secs: u64,
    pub patrol_interval_secs: u64,
    pub stuck_threshold_secs: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("model_url", &self.model_url)
            .field("model", &self.model)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("language", &self.language)
            .field("locations", &self.locations)
            .field("data_dir", &self.data_dir)
            .field("autonomy_enabled", &self.autonomy_enabled)
            .field("idle_talk_enabled", &self.idle_talk_enabled)
            .field("max_iterations", &self.max_iterations)
            .finish_non_exhaustive()
    }
}

impl Default for Config {
    fn default() -> Self {
        let robot = RobotConfig::default();
        Self {
            model_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            api_key: String::new(),
            language: robot.session.language.clone(),
            locations: ["メンズトップス", "レディース", "靴下", "試着室", "レジ", "home base"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            data_dir: String::new(),
            autonomy_enabled: robot.autonomy.enabled,
            idle_talk_enabled: robot.autonomy.idle_talk_enabled,
            max_iterations: robot.react.max_iterations,
            model_timeout_secs: robot.react.call_timeout.as_secs(),
            total_timeout_secs: robot.session.total_timeout.as_secs(),
            arrival_timeout_secs: robot.navigation.arrival_timeout.as_secs(),
            max_nav_retries: robot.navigation.max_retries,
            linger_secs: robot.navigation.linger.as_secs(),
            patrol_interval_secs: robot.patrol.interval.as_secs(),
            stuck_threshold_secs: robot.watchdog.stuck_threshold.as_secs(),
        }
    }
}

impl Config {
    /// Runtime configuration derived from these settings.
    pub fn robot_config(&self) -> RobotConfig {
        let mut robot = RobotConfig::default();
        robot.react.max_iterations = self.max_iterations.max(1);
        robot.react.call_timeout = Duration::from_secs(self.model_timeout_secs);
        robot.session.total_timeout = Duration::from_secs(self.total_timeout_secs);
        robot.session.language = self.language.clone();
        robot.navigation.arrival_timeout = Duration::from_secs(self.arrival_timeout_secs);
        robot.navigation.max_retries = self.max_nav_retries;
        robot.navigation.linger = Duration::from_secs(self.linger_secs);
        robot.navigation.language = self.language.clone();
        robot.autonomy.enabled = self.autonomy_enabled;
        robot.autonomy.idle_talk_enabled = self.idle_talk_enabled;
        robot.autonomy.language = self.language.clone();
        robot.patrol.interval = Duration::from_secs(self.patrol_interval_secs);
        robot.patrol.language = self.language.clone();
        robot.watchdog.stuck_threshold = Duration::from_secs(self.stuck_threshold_secs);
        robot
    }

    /// Where the stores live.
    pub fn data_path(&self) -> PathBuf {
        if self.data_dir.trim().is_empty() {
            guidebot_dir(&home_dir()).join("data")
        } else {
            PathBuf::from(&self.data_dir)
        }
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn guidebot_dir(home: &str) -> PathBuf {
    PathBuf::from(home).join(".guidebot")
}

/// Return the path to `~/.guidebot/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    guidebot_dir(home).join("config.toml")
}

/// Load the config from disk with environment overrides applied.
/// Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    let mut cfg = load_from(&config_path())?;
    if let Some(cfg) = cfg.as_mut() {
        apply_env_overrides(cfg);
    }
    Ok(cfg)
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `GUIDEBOT_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `GUIDEBOT_MODEL_URL` | `model_url` |
/// | `GUIDEBOT_MODEL` | `model` |
/// | `GUIDEBOT_API_KEY` | `api_key` |
/// | `GUIDEBOT_AUTONOMY` | `autonomy_enabled` (`1`/`true`/`on`, `0`/`false`/`off`) |
/// | `GUIDEBOT_MAX_ITERATIONS` | `max_iterations` (positive integer) |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("GUIDEBOT_MODEL_URL") {
        cfg.model_url = v;
    }
    if let Ok(v) = std::env::var("GUIDEBOT_MODEL") {
        cfg.model = v;
    }
    if let Ok(v) = std::env::var("GUIDEBOT_API_KEY") {
        cfg.api_key = v;
    }
    if let Ok(v) = std::env::var("GUIDEBOT_AUTONOMY")
        && let Some(enabled) = parse_switch(&v)
    {
        cfg.autonomy_enabled = enabled;
    }
    if let Ok(v) = std::env::var("GUIDEBOT_MAX_ITERATIONS")
        && let Ok(n) = v.trim().parse::<u32>()
        && n > 0
    {
        cfg.max_iterations = n;
    }
}

fn parse_switch(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

/// Save the config to disk, creating `~/.guidebot/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // The file may hold an API key: owner read/write only.
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
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_api_key() {
        let cfg = Config {
            api_key: "sk-very-secret".to_string(),
            ..Config::default()
        };
        let debug_str = format!("{:?}", cfg);
        assert!(!debug_str.contains("sk-very-secret"));
        assert!(debug_str.contains("<redacted>"));
        assert!(format!("{:?}", Config::default()).contains("<not set>"));
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("meta").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("meta")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        let cfg = Config {
            model: "qwen2.5".to_string(),
            locations: vec!["レジ".to_string(), "home base".to_string()],
            ..Config::default()
        };
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.model, "qwen2.5");
        assert_eq!(loaded.locations, cfg.locations);
        assert_eq!(loaded.max_iterations, 5);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "model = \"gemma\"\nlinger_secs = 30\n").expect("write");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.model, "gemma");
        assert_eq!(loaded.linger_secs, 30);
        assert_eq!(loaded.model_url, "http://localhost:11434");
        assert!(loaded.autonomy_enabled);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_iterations = \"many\"").expect("write");
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn robot_config_carries_settings() {
        let cfg = Config {
            max_iterations: 3,
            linger_secs: 4,
            autonomy_enabled: false,
            language: "en-US".to_string(),
            ..Config::default()
        };
        let robot = cfg.robot_config();
        assert_eq!(robot.react.max_iterations, 3);
        assert_eq!(robot.navigation.linger, Duration::from_secs(4));
        assert!(!robot.autonomy.enabled);
        assert_eq!(robot.session.language, "en-US");
        assert_eq!(robot.patrol.language, "en-US");
    }

    #[test]
    fn data_path_defaults_under_guidebot_dir() {
        let cfg = Config::default();
        assert!(cfg.data_path().to_string_lossy().contains(".guidebot"));
        let custom = Config {
            data_dir: "/var/lib/guidebot".to_string(),
            ..Config::default()
        };
        assert_eq!(custom.data_path(), PathBuf::from("/var/lib/guidebot"));
    }

    #[test]
    fn switch_values() {
        assert_eq!(parse_switch("ON"), Some(true));
        assert_eq!(parse_switch("0"), Some(false));
        assert_eq!(parse_switch("maybe"), None);
    }

    // All env mutations live in one test so parallel tests never race.
    #[test]
    fn env_overrides_apply() {
        // SAFETY: the only test in this crate that touches these variables.
        unsafe {
            std::env::set_var("GUIDEBOT_MODEL_URL", "http://robot-host:8000");
            std::env::set_var("GUIDEBOT_MODEL", "gpt-4o-mini");
            std::env::set_var("GUIDEBOT_API_KEY", "sk-env");
            std::env::set_var("GUIDEBOT_AUTONOMY", "off");
            std::env::set_var("GUIDEBOT_MAX_ITERATIONS", "0");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.model_url, "http://robot-host:8000");
        assert_eq!(cfg.model, "gpt-4o-mini");
        assert_eq!(cfg.api_key, "sk-env");
        assert!(!cfg.autonomy_enabled);
        assert_eq!(cfg.max_iterations, 5, "zero is rejected");

        unsafe { std::env::set_var("GUIDEBOT_MAX_ITERATIONS", "8") };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.max_iterations, 8);

        unsafe {
            for key in [
                "GUIDEBOT_MODEL_URL",
                "GUIDEBOT_MODEL",
                "GUIDEBOT_API_KEY",
                "GUIDEBOT_AUTONOMY",
                "GUIDEBOT_MAX_ITERATIONS",
            ] {
                std::env::remove_var(key);
            }
        }
    }
}
