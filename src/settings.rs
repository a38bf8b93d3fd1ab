use once_cell::sync::Lazy;
use std::{env, time::Duration};

/// Holds all tunables, read-once from ENV with fallbacks.
pub struct Settings {
    pub base_backoff: Duration,
    pub cap_backoff: Duration,
    pub max_attempts: u32,
    pub prefetch_window: usize,
    pub auto_advance_delay: Duration,
    pub event_buffer_capacity: usize,
    pub streaming_buffer_capacity: usize,
    pub max_frame_size: usize,
    pub request_timeout: Duration,
    pub idle_timeout: Duration,
    pub page_size: u32,
}

impl Settings {
    fn from_env() -> Self {
        // optionally load .env
        let _ = dotenvy::dotenv();

        fn parse_usize(var: &str, default: usize) -> usize {
            env::var(var)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }

        fn parse_u32(var: &str, default: u32) -> u32 {
            env::var(var)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }

        fn parse_secs(var: &str, default_secs: u64) -> Duration {
            env::var(var)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or_else(|| Duration::from_secs(default_secs))
        }

        fn parse_millis(var: &str, default_ms: u64) -> Duration {
            env::var(var)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or_else(|| Duration::from_millis(default_ms))
        }

        Settings {
            base_backoff: parse_millis("REELFEED_BASE_BACKOFF_MS", 1_000),
            cap_backoff: parse_millis("REELFEED_CAP_BACKOFF_MS", 30_000),
            max_attempts: parse_u32("REELFEED_MAX_ATTEMPTS", 10),
            prefetch_window: parse_usize("REELFEED_PREFETCH_WINDOW", 3),
            auto_advance_delay: parse_millis("REELFEED_AUTO_ADVANCE_MS", 8_000),
            event_buffer_capacity: parse_usize("REELFEED_EVENT_BUFFER_CAPACITY", 100),
            streaming_buffer_capacity: parse_usize("REELFEED_STREAMING_BUFFER_CAPACITY", 16 * 1024),
            max_frame_size: parse_usize("REELFEED_MAX_FRAME_SIZE", 1024 * 1024),
            request_timeout: parse_secs("REELFEED_REQUEST_TIMEOUT_SECS", 10),
            idle_timeout: parse_secs("REELFEED_IDLE_TIMEOUT_SECS", 90),
            page_size: parse_u32("REELFEED_PAGE_SIZE", 20),
        }
    }
}

/// Global settings instance
pub static SETTINGS: Lazy<Settings> = Lazy::new(Settings::from_env);
