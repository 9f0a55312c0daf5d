use std::env;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}, expected compact/json")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub default_search_radius_m: f64,
    pub grid_cell_degrees: f64,
    pub dispatch_queue_size: usize,
    pub dispatch_max_attempts: u32,
    pub dispatch_retry_delay_ms: u64,
    pub event_buffer_size: usize,
    pub reconcile_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            default_search_radius_m: 5_000.0,
            grid_cell_degrees: 0.01,
            dispatch_queue_size: 1024,
            dispatch_max_attempts: 5,
            dispatch_retry_delay_ms: 2_000,
            event_buffer_size: 1024,
            reconcile_interval_secs: 30,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: parse_or_default("LOG_FORMAT", defaults.log_format)?,
            default_search_radius_m: parse_or_default(
                "DEFAULT_SEARCH_RADIUS_M",
                defaults.default_search_radius_m,
            )?,
            grid_cell_degrees: parse_or_default("GRID_CELL_DEGREES", defaults.grid_cell_degrees)?,
            dispatch_queue_size: parse_or_default(
                "DISPATCH_QUEUE_SIZE",
                defaults.dispatch_queue_size,
            )?,
            dispatch_max_attempts: parse_or_default(
                "DISPATCH_MAX_ATTEMPTS",
                defaults.dispatch_max_attempts,
            )?,
            dispatch_retry_delay_ms: parse_or_default(
                "DISPATCH_RETRY_DELAY_MS",
                defaults.dispatch_retry_delay_ms,
            )?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
            reconcile_interval_secs: parse_or_default(
                "RECONCILE_INTERVAL_SECS",
                defaults.reconcile_interval_secs,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if !(self.default_search_radius_m.is_finite() && self.default_search_radius_m > 0.0) {
            return Err(AppError::Internal(
                "DEFAULT_SEARCH_RADIUS_M must be > 0".to_string(),
            ));
        }
        if !(self.grid_cell_degrees.is_finite()
            && self.grid_cell_degrees > 0.0
            && self.grid_cell_degrees <= 90.0)
        {
            return Err(AppError::Internal(
                "GRID_CELL_DEGREES must be within (0, 90]".to_string(),
            ));
        }
        if self.dispatch_queue_size == 0 || self.event_buffer_size == 0 {
            return Err(AppError::Internal(
                "queue and buffer sizes must be > 0".to_string(),
            ));
        }
        if self.reconcile_interval_secs == 0 {
            return Err(AppError::Internal(
                "RECONCILE_INTERVAL_SECS must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
