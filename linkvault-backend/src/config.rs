use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub telegram_bot_token: Option<String>,
    pub default_channels: Vec<String>,
    pub channels_file: PathBuf,
    pub config_dir: PathBuf,
    pub channels_refresh_flag: PathBuf,
    pub rules_refresh_flag: PathBuf,
    pub control_file: PathBuf,
    pub refresh_poll: Duration,
    pub redirect_timeout: Duration,
    pub resolve_redirects: bool,
    pub db_busy_timeout: Duration,
    pub commit_every: usize,
    /// `None` disables the periodic link dedup task
    pub dedup_interval: Option<Duration>,
    pub admin_token: Option<String>,
    pub disable_api: bool,
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parsed<T: FromStr>(name: &str, default: T) -> T {
    match var(name) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            log::warn!("[config] {}='{}' is not valid, using default", name, raw);
            default
        }),
        None => default,
    }
}

fn flag(name: &str) -> bool {
    matches!(
        var(name).map(|v| v.to_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

/// Comma or whitespace separated channel list
pub fn split_channel_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Logger for every binary: `RUST_LOG` wins, else `LOG_LEVEL`, else info.
/// Call after `dotenv()`.
pub fn init_logger() {
    let level = var("LOG_LEVEL").unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

/// `CONFIG_DIR`, else `./config`, else `../config` (when run from the crate dir)
fn resolve_config_dir() -> PathBuf {
    if let Some(dir) = var("CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    let local = PathBuf::from("./config");
    if local.exists() {
        return local;
    }
    let parent = PathBuf::from("../config");
    if parent.exists() {
        return parent;
    }
    local
}

/// Longest accepted dedup interval: one year
const MAX_DEDUP_MINUTES: u64 = 366 * 24 * 60;

/// Zero minutes turns the periodic dedup off
fn dedup_interval(minutes: u64) -> Option<Duration> {
    (minutes > 0).then(|| Duration::from_secs(minutes.min(MAX_DEDUP_MINUTES).saturating_mul(60)))
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: parsed("PORT", 8080),
            database_url: var("DATABASE_URL").unwrap_or_else(|| "./.db/linkvault.db".to_string()),
            telegram_bot_token: var("TELEGRAM_BOT_TOKEN"),
            default_channels: var("DEFAULT_CHANNELS")
                .map(|v| split_channel_list(&v))
                .unwrap_or_default(),
            channels_file: var("CHANNELS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("channels.txt")),
            config_dir: resolve_config_dir(),
            channels_refresh_flag: var("CHANNELS_REFRESH_FLAG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("channels_refresh.flag")),
            rules_refresh_flag: var("RULES_REFRESH_FLAG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("rules_refresh.flag")),
            control_file: var("CONTROL_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("monitor_control.json")),
            refresh_poll: Duration::from_secs(parsed("REFRESH_POLL_SECS", 1u64).max(1)),
            redirect_timeout: Duration::from_secs(parsed("REDIRECT_TIMEOUT_SECS", 8)),
            resolve_redirects: !flag("DISABLE_REDIRECTS"),
            db_busy_timeout: Duration::from_secs(parsed("DB_BUSY_TIMEOUT_SECS", 30)),
            commit_every: parsed("COMMIT_EVERY", 500usize).max(1),
            dedup_interval: dedup_interval(parsed("DEDUP_INTERVAL_MINUTES", 0)),
            admin_token: var("ADMIN_TOKEN"),
            disable_api: flag("DISABLE_API"),
        }
    }
}
