use crate::fallback;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for every configured duration
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

const DEFAULT_PAGE_BASE_URL: &str = "https://live.douyin.com";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/108.0.0.0 Safari/537.36";

/// Push endpoint; every `{room_id}` is replaced with the resolved room id
const DEFAULT_WS_ENDPOINT: &str = concat!(
    "wss://webcast3-ws-web-hl.douyin.com/webcast/im/push/v2/",
    "?app_name=douyin_web&version_code=180800&webcast_sdk_version=1.3.0",
    "&update_version_code=1.3.0&compress=gzip",
    "&internal_ext=internal_src:dim|wss_push_room_id:{room_id}|wss_push_did:{room_id}",
    "|dim_log_id:20230214220033B506EE3903790E3059C1|fetch_time:1676383233624|seq:1",
    "|wss_info:0-1676383233624-0-0",
    "|wrds_kvs:WebcastRoomRankMessage-1676382424986905036_WebcastRoomStatsMessage-1676383228980195548",
    "&cursor=d-1_u-1_h-1_t-1676383233624_r-1&host=https://live.douyin.com&aid=6383",
    "&live_id=1&did_rule=3&debug=false&endpoint=live_pc&support_wrds=1",
    "&im_path=/webcast/im/fetch/&user_unique_id=7179057636167058979",
    "&device_platform=web&cookie_enabled=true&screen_width=1440&screen_height=900",
    "&browser_language=en&browser_platform=MacIntel&browser_name=Mozilla",
    "&browser_version=5.0%20(Macintosh;%20Intel%20Mac%20OS%20X%2010_15_7)",
    "%20AppleWebKit/537.36%20(KHTML,%20like%20Gecko)%20Chrome/110.0.0.0%20Safari/537.36",
    "&browser_online=true&tz_name=Asia/Shanghai&identity=audience",
    "&room_id={room_id}&heartbeatDuration=0&signature=WgK6lxlg8whoRwCL",
);

/// Pipeline configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct PickerConfig {
    /// Marker a chat message must start with to count as a question
    pub command_prefix: String,
    /// Window lengths used as a backoff schedule when no question arrives
    pub window_ladder: Vec<Duration>,
    /// Extra collection time compensating for broadcast latency
    pub broadcast_delay: Duration,
    /// Maximum payloads buffered between stream client and selector
    pub queue_capacity: usize,
    /// Chance of answering a fallback question after an empty window
    pub fallback_probability: f64,
    pub fallback_questions: Vec<String>,
    pub heartbeat_interval: Duration,
    /// Upper bound on waiting for the downstream answer
    pub answer_timeout: Duration,
    /// Pause between rounds when nothing was selected
    pub round_pause: Duration,
    pub page_base_url: String,
    pub ws_endpoint: String,
    pub user_agent: String,
}

impl Default for PickerConfig {
    fn default() -> Self {
        Self {
            command_prefix: "提问".to_string(),
            window_ladder: vec![Duration::from_secs(15)],
            broadcast_delay: Duration::from_secs(4),
            queue_capacity: 500,
            fallback_probability: 0.2,
            fallback_questions: fallback::default_questions(),
            heartbeat_interval: Duration::from_secs(10),
            answer_timeout: Duration::from_secs(60),
            round_pause: Duration::from_secs(10),
            page_base_url: DEFAULT_PAGE_BASE_URL.to_string(),
            ws_endpoint: DEFAULT_WS_ENDPOINT.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl PickerConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let fallback_questions = match env::var("PICKER_FALLBACK_FILE") {
            Ok(path) => fallback::load_questions(&PathBuf::from(&path))
                .map_err(|e| ConfigError::InvalidValue(format!("PICKER_FALLBACK_FILE: {}", e)))?,
            Err(_) => defaults.fallback_questions,
        };

        let window_ladder = match env::var("PICKER_WINDOW_LADDER") {
            Ok(raw) => parse_ladder(&raw)?,
            Err(_) => defaults.window_ladder,
        };

        let config = Self {
            command_prefix: env::var("PICKER_COMMAND_PREFIX").unwrap_or(defaults.command_prefix),
            window_ladder,
            broadcast_delay: secs_var("PICKER_BROADCAST_DELAY_SECS", defaults.broadcast_delay)?,
            queue_capacity: parse_var("PICKER_QUEUE_CAPACITY", defaults.queue_capacity)?,
            fallback_probability: parse_var(
                "PICKER_FALLBACK_PROBABILITY",
                defaults.fallback_probability,
            )?,
            fallback_questions,
            heartbeat_interval: secs_var("PICKER_HEARTBEAT_SECS", defaults.heartbeat_interval)?,
            answer_timeout: secs_var("PICKER_ANSWER_TIMEOUT_SECS", defaults.answer_timeout)?,
            round_pause: secs_var("PICKER_ROUND_PAUSE_SECS", defaults.round_pause)?,
            page_base_url: env::var("PICKER_PAGE_BASE_URL").unwrap_or(defaults.page_base_url),
            ws_endpoint: env::var("PICKER_WS_ENDPOINT").unwrap_or(defaults.ws_endpoint),
            user_agent: env::var("PICKER_USER_AGENT").unwrap_or(defaults.user_agent),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_ladder(&self.window_ladder)?;
        check_duration("broadcast delay", self.broadcast_delay)?;
        check_duration("heartbeat interval", self.heartbeat_interval)?;
        check_duration("answer timeout", self.answer_timeout)?;
        check_duration("round pause", self.round_pause)?;
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "queue capacity must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.fallback_probability) {
            return Err(ConfigError::InvalidValue(format!(
                "fallback probability {} is outside [0, 1]",
                self.fallback_probability
            )));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "heartbeat interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Broadcast page for a human-readable live id
    pub fn page_url(&self, live_id: &str) -> String {
        format!("{}/{}", self.page_base_url.trim_end_matches('/'), live_id)
    }

    /// Push endpoint for a resolved room
    pub fn stream_url(&self, room_id: &str) -> String {
        self.ws_endpoint.replace("{room_id}", room_id)
    }
}

/// Ladder invariants: at least one level, every level positive and at most
/// [`MAX_DURATION`], lengths never decreasing
pub fn validate_ladder(levels: &[Duration]) -> Result<(), ConfigError> {
    if levels.is_empty() {
        return Err(ConfigError::InvalidValue(
            "window ladder must not be empty".to_string(),
        ));
    }
    if levels.iter().any(|d| d.is_zero()) {
        return Err(ConfigError::InvalidValue(
            "window ladder entries must be positive".to_string(),
        ));
    }
    for level in levels {
        check_duration("window length", *level)?;
    }
    if levels.windows(2).any(|pair| pair[1] < pair[0]) {
        return Err(ConfigError::InvalidValue(
            "window ladder must be non-decreasing".to_string(),
        ));
    }
    Ok(())
}

fn check_duration(name: &str, value: Duration) -> Result<(), ConfigError> {
    if value > MAX_DURATION {
        return Err(ConfigError::InvalidValue(format!(
            "{} {:?} exceeds {:?}",
            name, value, MAX_DURATION
        )));
    }
    Ok(())
}

/// Parse a comma-separated list of seconds, e.g. `"10, 20, 40"`
pub fn parse_ladder(raw: &str) -> Result<Vec<Duration>, ConfigError> {
    let ladder = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .ok()
                .filter(|secs| *secs > 0.0)
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .ok_or_else(|| ConfigError::InvalidValue(format!("invalid window length: {}", s)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if ladder.is_empty() {
        return Err(ConfigError::InvalidValue(
            "window ladder must not be empty".to_string(),
        ));
    }
    Ok(ladder)
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{}={}", name, raw))),
        Err(_) => Ok(default),
    }
}

fn secs_var(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    let secs: f64 = parse_var(name, default.as_secs_f64())?;
    Duration::try_from_secs_f64(secs)
        .map_err(|e| ConfigError::InvalidValue(format!("{}={}: {}", name, secs, e)))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
