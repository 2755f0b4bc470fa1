use anyhow::{Context, Result};
use clap::Parser;
use lib_realtime::{OverflowPolicy, RealtimeOptions};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "rt-tail.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Tail a real-time feed: print inbound frames as JSON lines, publish frames read from stdin", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "RT_URL", help = "WebSocket endpoint to connect to (ws:// or wss://).")]
    pub url: Option<String>,

    #[clap(long = "config", env = "RT_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long = "topic", env = "RT_TOPICS", value_delimiter = ',', help = "Topic to print; repeat or comma-separate for several.")]
    #[serde(default)]
    pub topics: Vec<String>,

    #[clap(long, env = "RT_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "RT_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "RT_RECONNECT_BASE_DELAY_MS", help = "Delay in milliseconds before the first reconnect attempt.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "RT_RECONNECT_MAX_DELAY_MS", help = "Upper bound in milliseconds for any reconnect delay.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[clap(long, env = "RT_MAX_RECONNECT_ATTEMPTS", help = "Give up after this many consecutive failures (0 retries forever).")]
    #[serde(default, deserialize_with = "null_means_unlimited")]
    pub max_reconnect_attempts: Option<u32>,

    #[clap(long, env = "RT_AUTO_RECONNECT", help = "Reconnect after abnormal closes (true or false).")]
    pub auto_reconnect: Option<bool>,

    #[clap(long, env = "RT_JITTER_RATIO", help = "Fraction of each reconnect delay used as the +/- jitter band (0 to 1).")]
    pub jitter_ratio: Option<f64>,

    #[clap(long, env = "RT_CONNECT_TIMEOUT_MS", help = "Give up on a connect attempt after this many milliseconds (0 waits forever).")]
    pub connect_timeout_ms: Option<u64>,

    #[clap(long, env = "RT_HEARTBEAT_INTERVAL_MS", help = "Ping period in milliseconds while connected (0 disables heartbeats).")]
    pub heartbeat_interval_ms: Option<u64>,

    #[clap(long, env = "RT_HEARTBEAT_TIMEOUT_MS", help = "How long in milliseconds a ping may stay unanswered.")]
    pub heartbeat_timeout_ms: Option<u64>,

    #[clap(long, env = "RT_OUTBOUND_QUEUE_CAPACITY", help = "Frames buffered while disconnected.")]
    pub outbound_queue_capacity: Option<usize>,

    #[clap(long, env = "RT_OVERFLOW_POLICY", help = "What to do when the outbound queue is full (drop-oldest or reject-newest).")]
    pub overflow_policy: Option<OverflowPolicy>,
}

// An explicit `null` in the file means "retry forever", which is `0` here.
fn null_means_unlimited<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Some(Option::<u32>::deserialize(deserializer)?.unwrap_or(0)))
}

impl Config {
    // 'other' wins wherever it has a value
    fn merge(self, other: Config) -> Config {
        Config {
            url: other.url.or(self.url),
            config_path: other.config_path.or(self.config_path),
            topics: if other.topics.is_empty() { self.topics } else { other.topics },
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
            max_reconnect_attempts: other.max_reconnect_attempts.or(self.max_reconnect_attempts),
            auto_reconnect: other.auto_reconnect.or(self.auto_reconnect),
            jitter_ratio: other.jitter_ratio.or(self.jitter_ratio),
            connect_timeout_ms: other.connect_timeout_ms.or(self.connect_timeout_ms),
            heartbeat_interval_ms: other.heartbeat_interval_ms.or(self.heartbeat_interval_ms),
            heartbeat_timeout_ms: other.heartbeat_timeout_ms.or(self.heartbeat_timeout_ms),
            outbound_queue_capacity: other.outbound_queue_capacity.or(self.outbound_queue_capacity),
            overflow_policy: other.overflow_policy.or(self.overflow_policy),
        }
    }

    fn defaults() -> Config {
        let options = RealtimeOptions::default();
        Config {
            url: Some("ws://127.0.0.1:9002/ws".to_string()),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            reconnect_base_delay_ms: Some(options.reconnect_base_delay_ms),
            reconnect_max_delay_ms: Some(options.reconnect_max_delay_ms),
            max_reconnect_attempts: options.max_reconnect_attempts,
            auto_reconnect: Some(options.auto_reconnect),
            jitter_ratio: Some(options.jitter_ratio),
            connect_timeout_ms: Some(options.connect_timeout_ms),
            heartbeat_interval_ms: Some(options.heartbeat_interval_ms),
            heartbeat_timeout_ms: Some(options.heartbeat_timeout_ms),
            outbound_queue_capacity: Some(options.outbound_queue_capacity),
            overflow_policy: Some(options.overflow_policy),
            ..Default::default()
        }
    }

    /// The client options this configuration describes.
    pub fn realtime_options(&self) -> RealtimeOptions {
        let defaults = RealtimeOptions::default();
        RealtimeOptions {
            reconnect_base_delay_ms: self.reconnect_base_delay_ms.unwrap_or(defaults.reconnect_base_delay_ms),
            reconnect_max_delay_ms: self.reconnect_max_delay_ms.unwrap_or(defaults.reconnect_max_delay_ms),
            max_reconnect_attempts: match self.max_reconnect_attempts {
                Some(0) => None,
                other => other,
            },
            heartbeat_interval_ms: self.heartbeat_interval_ms.unwrap_or(defaults.heartbeat_interval_ms),
            heartbeat_timeout_ms: self.heartbeat_timeout_ms.unwrap_or(defaults.heartbeat_timeout_ms),
            outbound_queue_capacity: self.outbound_queue_capacity.unwrap_or(defaults.outbound_queue_capacity),
            overflow_policy: self.overflow_policy.unwrap_or(defaults.overflow_policy),
            auto_reconnect: self.auto_reconnect.unwrap_or(defaults.auto_reconnect),
            jitter_ratio: self.jitter_ratio.unwrap_or(defaults.jitter_ratio),
            connect_timeout_ms: self.connect_timeout_ms.unwrap_or(defaults.connect_timeout_ms),
        }
    }
}

fn read_config_file(path: &Path) -> Result<Config> {
    let config_str = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&config_str).with_context(|| format!("parsing {}", path.display()))
}

/// Defaults, then the JSON config file, then environment and command line.
pub fn layer(cli: Config) -> Config {
    let mut current_config = Config::defaults();

    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    if config_file_path.exists() {
        match read_config_file(&config_file_path) {
            Ok(file_config) => current_config = current_config.merge(file_config),
            Err(e) => eprintln!("Ignoring config file: {e:#}"),
        }
    }

    current_config.merge(cli)
}

pub fn load_config() -> Config {
    layer(Config::parse())
}
