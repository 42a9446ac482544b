use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    #[serde(default = "default_transport_method")]
    pub method: String,
    #[serde(default = "default_adb_path")]
    pub adb_path: String,
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,
    #[serde(default)]
    pub local_root: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    #[serde(default = "default_folders")]
    pub folders: Vec<String>,
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: f64,
    #[serde(default = "default_listing_retry_seconds")]
    pub listing_retry_seconds: f64,
    #[serde(default = "default_data_extension")]
    pub data_extension: String,
    #[serde(default = "default_temp_marker")]
    pub temp_marker: String,
    #[serde(default = "default_true")]
    pub require_current_date: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_tail_interval_seconds")]
    pub tail_interval_seconds: f64,
    #[serde(default = "default_no_growth_threshold")]
    pub no_growth_threshold: u32,
    #[serde(default = "default_false")]
    pub flush_partial_batches: bool,
    #[serde(default = "default_status_interval_seconds")]
    pub status_interval_seconds: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectConfig {
    #[serde(default = "default_dropout_min_rows")]
    pub dropout_min_rows: usize,
    #[serde(default = "default_noise_quantile")]
    pub noise_quantile: f64,
    #[serde(default = "default_noise_threshold")]
    pub noise_threshold: f64,
    #[serde(default = "default_noise_min_rows")]
    pub noise_min_rows: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphConfig {
    #[serde(default = "default_graph_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default = "default_graph_token_env")]
    pub token_env: String,
    #[serde(default = "default_graph_timeout_seconds")]
    pub timeout_seconds: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlertConfig {
    #[serde(default = "default_alert_method")]
    pub method: String,
    #[serde(default)]
    pub recipient: String,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: f64,
    #[serde(default = "default_true")]
    pub per_kind: bool,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub graph: GraphConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default = "default_output_root")]
    pub root_dir: String,
    #[serde(default = "default_event_log")]
    pub event_log: String,
    #[serde(default = "default_true")]
    pub mirror_raw: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub detect: DetectConfig,
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            method: default_transport_method(),
            adb_path: default_adb_path(),
            scratch_dir: default_scratch_dir(),
            local_root: String::new(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            folders: default_folders(),
            poll_interval_seconds: default_poll_interval_seconds(),
            listing_retry_seconds: default_listing_retry_seconds(),
            data_extension: default_data_extension(),
            temp_marker: default_temp_marker(),
            require_current_date: true,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            tail_interval_seconds: default_tail_interval_seconds(),
            no_growth_threshold: default_no_growth_threshold(),
            flush_partial_batches: false,
            status_interval_seconds: default_status_interval_seconds(),
        }
    }
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            dropout_min_rows: default_dropout_min_rows(),
            noise_quantile: default_noise_quantile(),
            noise_threshold: default_noise_threshold(),
            noise_min_rows: default_noise_min_rows(),
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            endpoint: default_graph_endpoint(),
            user_id: String::new(),
            sender: String::new(),
            token_env: default_graph_token_env(),
            timeout_seconds: default_graph_timeout_seconds(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            method: default_alert_method(),
            recipient: String::new(),
            cooldown_seconds: default_cooldown_seconds(),
            per_kind: true,
            queue_capacity: default_queue_capacity(),
            graph: GraphConfig::default(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root_dir: default_output_root(),
            event_log: default_event_log(),
            mirror_raw: true,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            watch: WatchConfig::default(),
            ingest: IngestConfig::default(),
            detect: DetectConfig::default(),
            alert: AlertConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

fn default_transport_method() -> String {
    "adb".to_string()
}

fn default_adb_path() -> String {
    "adb".to_string()
}

fn default_scratch_dir() -> String {
    "~/.pulsewatch/scratch".to_string()
}

fn default_folders() -> Vec<String> {
    vec![
        "/sdcard/Download/OximeterData".to_string(),
        "/sdcard/Download/OximeterData/StreamModel".to_string(),
    ]
}

fn default_poll_interval_seconds() -> f64 {
    5.0
}

fn default_listing_retry_seconds() -> f64 {
    10.0
}

fn default_data_extension() -> String {
    "csv".to_string()
}

fn default_temp_marker() -> String {
    "temp".to_string()
}

fn default_batch_size() -> usize {
    180
}

fn default_tail_interval_seconds() -> f64 {
    1.0
}

fn default_no_growth_threshold() -> u32 {
    5
}

fn default_status_interval_seconds() -> f64 {
    60.0
}

fn default_dropout_min_rows() -> usize {
    3
}

fn default_noise_quantile() -> f64 {
    0.75
}

fn default_noise_threshold() -> f64 {
    6.0
}

fn default_noise_min_rows() -> usize {
    60
}

fn default_alert_method() -> String {
    "log".to_string()
}

fn default_cooldown_seconds() -> f64 {
    300.0
}

fn default_queue_capacity() -> usize {
    16
}

fn default_graph_endpoint() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}

fn default_graph_token_env() -> String {
    "PULSEWATCH_GRAPH_TOKEN".to_string()
}

fn default_graph_timeout_seconds() -> f64 {
    10.0
}

fn default_output_root() -> String {
    "~/.pulsewatch/data".to_string()
}

fn default_event_log() -> String {
    "~/.pulsewatch/events.jsonl".to_string()
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

pub fn expand_path(path: &str) -> String {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{}", home.to_string_lossy(), stripped);
        }
    }
    path.to_string()
}

fn home_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".pulsewatch").join("config.toml"))
}

fn repo_default_config_path() -> PathBuf {
    PathBuf::from("config/pulsewatch.toml")
}

fn resolve_config_path_with_overrides(
    raw_path: Option<PathBuf>,
    env_keys: &[&str],
    home_path: Option<PathBuf>,
    repo_default: PathBuf,
) -> PathBuf {
    if let Some(path) = raw_path {
        return path;
    }

    for key in env_keys {
        if let Ok(value) = std::env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return PathBuf::from(trimmed);
            }
        }
    }

    if let Some(path) = home_path {
        if path.exists() {
            return path;
        }
    }

    if repo_default.exists() {
        return repo_default;
    }

    home_config_path().unwrap_or(repo_default)
}

pub fn resolve_config_path(raw_path: Option<PathBuf>) -> PathBuf {
    resolve_config_path_with_overrides(
        raw_path,
        &["PULSEWATCH_CONFIG"],
        home_config_path(),
        repo_default_config_path(),
    )
}

fn normalize_config(mut cfg: AppConfig) -> AppConfig {
    cfg.transport.scratch_dir = expand_path(&cfg.transport.scratch_dir);
    cfg.transport.local_root = expand_path(&cfg.transport.local_root);
    cfg.output.root_dir = expand_path(&cfg.output.root_dir);
    cfg.output.event_log = expand_path(&cfg.output.event_log);
    cfg
}

pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read config {}", path.as_ref().display()))?;
    let cfg: AppConfig = toml::from_str(&content).context("failed to parse TOML config")?;
    Ok(normalize_config(cfg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp_config(contents: &str, label: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "pulsewatch-config-{label}-{}-{}.toml",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("system time after unix epoch")
                .as_nanos()
        ));
        std::fs::write(&path, contents).expect("write temp config");
        path
    }

    #[test]
    fn defaults_match_shipped_thresholds() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.ingest.batch_size, 180);
        assert_eq!(cfg.ingest.no_growth_threshold, 5);
        assert_eq!(cfg.detect.dropout_min_rows, 3);
        assert_eq!(cfg.detect.noise_min_rows, 60);
        assert_eq!(cfg.detect.noise_threshold, 6.0);
        assert_eq!(cfg.alert.cooldown_seconds, 300.0);
        assert!(cfg.alert.per_kind);
        assert!(!cfg.ingest.flush_partial_batches);
    }

    #[test]
    fn resolve_order_prefers_cli_then_env_then_home_then_repo() {
        let raw = Some(PathBuf::from("/tmp/cli.toml"));
        let chosen = resolve_config_path_with_overrides(
            raw,
            &["PULSEWATCH_CONFIG"],
            Some(PathBuf::from("/tmp/home.toml")),
            PathBuf::from("/tmp/repo.toml"),
        );
        assert_eq!(chosen, PathBuf::from("/tmp/cli.toml"));
    }

    #[test]
    fn resolve_order_prefers_env_over_home_and_repo() {
        let env_key = "PULSEWATCH_CONFIG_TEST_KEY";
        std::env::set_var(env_key, "/tmp/from-env.toml");

        let chosen = resolve_config_path_with_overrides(
            None,
            &[env_key],
            Some(PathBuf::from("/tmp/from-home.toml")),
            PathBuf::from("/tmp/from-repo.toml"),
        );

        std::env::remove_var(env_key);
        assert_eq!(chosen, PathBuf::from("/tmp/from-env.toml"));
    }

    #[test]
    fn resolve_order_uses_repo_when_home_missing() {
        let repo_default = std::env::temp_dir().join("pulsewatch-config-repo-default.toml");
        std::fs::write(&repo_default, "x=1").expect("write temp repo default");

        let chosen = resolve_config_path_with_overrides(
            None,
            &["PULSEWATCH_CONFIG_TEST_DOES_NOT_EXIST"],
            Some(PathBuf::from("/tmp/definitely-missing-home.toml")),
            repo_default.clone(),
        );

        std::fs::remove_file(&repo_default).ok();
        assert_eq!(chosen, repo_default);
    }

    #[test]
    fn load_config_errors_when_path_missing() {
        let path = std::env::temp_dir().join("pulsewatch-missing-config-does-not-exist.toml");
        let err = load_config(&path).expect_err("missing config path should fail");
        assert!(
            err.to_string().contains("failed to read config"),
            "unexpected error: {err:#}"
        );
    }

    #[test]
    fn load_config_errors_on_unknown_top_level_section() {
        let path = write_temp_config(
            r#"
[ingest]
batch_size = 90

[unexpected]
enabled = true
"#,
            "unknown-top-level",
        );
        let err = load_config(&path).expect_err("unknown top-level section should fail");
        std::fs::remove_file(&path).ok();
        assert!(
            format!("{err:#}").contains("unknown field `unexpected`"),
            "unexpected error: {err:#}"
        );
    }

    #[test]
    fn load_config_errors_on_unknown_detect_key() {
        let path = write_temp_config(
            r#"
[detect]
noise_threshold = 7.5
extra = "not-allowed"
"#,
            "unknown-detect-key",
        );
        let err = load_config(&path).expect_err("unknown detect key should fail");
        std::fs::remove_file(&path).ok();
        assert!(
            format!("{err:#}").contains("unknown field `extra`"),
            "unexpected error: {err:#}"
        );
    }

    #[test]
    fn load_config_overrides_and_expands_paths() {
        let path = write_temp_config(
            r#"
[watch]
folders = ["/data/incoming"]
poll_interval_seconds = 2.5

[output]
root_dir = "~/telemetry-out"
"#,
            "overrides",
        );
        let cfg = load_config(&path).expect("config should load");
        std::fs::remove_file(&path).ok();

        assert_eq!(cfg.watch.folders, vec!["/data/incoming".to_string()]);
        assert_eq!(cfg.watch.poll_interval_seconds, 2.5);
        assert!(!cfg.output.root_dir.starts_with('~'));
    }
}
