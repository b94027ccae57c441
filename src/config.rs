// src/config.rs - Configuration for the device controller and the supervisor
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fs;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Device controller configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub board: BoardConfig,

    #[serde(default)]
    pub motors: MotorsConfig,

    #[serde(default)]
    pub pen: PenConfig,

    #[serde(default)]
    pub speeds: SpeedConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub web: WebConfig,
}

/// Board geometry. Origin is the top-left corner of the drawable board,
/// +x right, +y down, millimetres. The motors sit `motor_offset_mm` above
/// the top edge; the gondola's two string attachments sit `pen_offset_mm`
/// either side of the pen tip.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BoardConfig {
    #[serde(default = "default_board_width")]
    pub width_mm: f64,

    #[serde(default = "default_board_height")]
    pub height_mm: f64,

    #[serde(default = "default_pen_offset")]
    pub pen_offset_mm: f64,

    #[serde(default = "default_motor_offset")]
    pub motor_offset_mm: f64,

    #[serde(default = "default_park_x")]
    pub park_x_mm: f64,

    #[serde(default = "default_park_y")]
    pub park_y_mm: f64,
}

/// Stepper and spool geometry shared by both motors.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MotorsConfig {
    #[serde(default = "default_spool_diameter")]
    pub spool_diameter_mm: f64,

    #[serde(default = "default_steps_per_rev")]
    pub steps_per_rev: u32,

    #[serde(default = "default_microsteps")]
    pub microsteps: u32,

    /// Direction-pin polarity is hardware dependent; flip these if a motor
    /// pays out string when it should reel in.
    #[serde(default)]
    pub invert_dir_left: bool,

    #[serde(default)]
    pub invert_dir_right: bool,

    #[serde(default = "default_min_pulse_us")]
    pub min_pulse_us: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PenConfig {
    #[serde(default = "default_pen_up_angle")]
    pub up_angle: f64,

    #[serde(default = "default_pen_down_angle")]
    pub down_angle: f64,

    #[serde(default = "default_pen_settle_ms")]
    pub settle_ms: u64,
}

/// Speeds are step rates in steps per second.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpeedConfig {
    #[serde(default = "default_speed")]
    pub default_sps: u32,

    #[serde(default = "default_travel_speed")]
    pub travel_sps: u32,

    #[serde(default = "default_max_speed")]
    pub max_sps: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_web_port")]
    pub port: u16,
}

fn default_board_width() -> f64 {
    1150.0
}
fn default_board_height() -> f64 {
    730.0
}
fn default_pen_offset() -> f64 {
    29.0
}
fn default_motor_offset() -> f64 {
    60.0
}
fn default_park_x() -> f64 {
    50.0
}
fn default_park_y() -> f64 {
    50.0
}
fn default_spool_diameter() -> f64 {
    35.0
}
fn default_steps_per_rev() -> u32 {
    200
}
fn default_microsteps() -> u32 {
    16
}
fn default_min_pulse_us() -> u64 {
    2
}
fn default_pen_up_angle() -> f64 {
    40.0
}
fn default_pen_down_angle() -> f64 {
    90.0
}
fn default_pen_settle_ms() -> u64 {
    400
}
fn default_speed() -> u32 {
    1800
}
fn default_travel_speed() -> u32 {
    3000
}
fn default_max_speed() -> u32 {
    6000
}
fn default_queue_capacity() -> usize {
    3000
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_web_port() -> u16 {
    8080
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            width_mm: default_board_width(),
            height_mm: default_board_height(),
            pen_offset_mm: default_pen_offset(),
            motor_offset_mm: default_motor_offset(),
            park_x_mm: default_park_x(),
            park_y_mm: default_park_y(),
        }
    }
}

impl Default for MotorsConfig {
    fn default() -> Self {
        Self {
            spool_diameter_mm: default_spool_diameter(),
            steps_per_rev: default_steps_per_rev(),
            microsteps: default_microsteps(),
            invert_dir_left: false,
            invert_dir_right: false,
            min_pulse_us: default_min_pulse_us(),
        }
    }
}

impl Default for PenConfig {
    fn default() -> Self {
        Self {
            up_angle: default_pen_up_angle(),
            down_angle: default_pen_down_angle(),
            settle_ms: default_pen_settle_ms(),
        }
    }
}

impl Default for SpeedConfig {
    fn default() -> Self {
        Self {
            default_sps: default_speed(),
            travel_sps: default_travel_speed(),
            max_sps: default_max_speed(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_web_port(),
        }
    }
}

impl MotorsConfig {
    /// Steps of spool rotation per millimetre of string.
    pub fn steps_per_mm(&self) -> f64 {
        (self.steps_per_rev as f64 * self.microsteps as f64) / (PI * self.spool_diameter_mm)
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.board.width_mm <= 0.0 || self.board.height_mm <= 0.0 {
            return Err(ConfigError::Invalid(
                "board dimensions must be positive".to_string(),
            ));
        }
        if self.board.pen_offset_mm < 0.0 {
            return Err(ConfigError::Invalid(
                "pen_offset_mm must be non-negative".to_string(),
            ));
        }
        if self.board.pen_offset_mm * 2.0 >= self.board.width_mm {
            return Err(ConfigError::Invalid(
                "pen_offset_mm must be less than half the board width".to_string(),
            ));
        }
        if self.motors.spool_diameter_mm <= 0.0 {
            return Err(ConfigError::Invalid(
                "spool_diameter_mm must be positive".to_string(),
            ));
        }
        if self.motors.steps_per_rev == 0 || self.motors.microsteps == 0 {
            return Err(ConfigError::Invalid(
                "steps_per_rev and microsteps must be positive".to_string(),
            ));
        }
        if self.speeds.max_sps == 0 {
            return Err(ConfigError::Invalid("max_sps must be positive".to_string()));
        }
        if self.speeds.default_sps == 0 || self.speeds.default_sps > self.speeds.max_sps {
            return Err(ConfigError::Invalid(
                "default_sps must be in [1, max_sps]".to_string(),
            ));
        }
        if self.queue.capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Supervisor (path-streaming service) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SupervisorConfig {
    /// Base URL of the device controller, e.g. "http://192.168.4.1:8080".
    #[serde(default = "default_controller_url")]
    pub controller_url: String,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_supervisor_port")]
    pub port: u16,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: f64,

    #[serde(default = "default_status_poll_interval_secs")]
    pub status_poll_interval_secs: f64,

    #[serde(default = "default_status_timeout_secs")]
    pub status_timeout_secs: f64,

    #[serde(default = "default_send_retry_interval_secs")]
    pub send_retry_interval_secs: f64,

    #[serde(default = "default_send_retry_timeout_secs")]
    pub send_retry_timeout_secs: f64,

    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Capacity of the device-side queue; used for backpressure.
    #[serde(default = "default_queue_capacity")]
    pub device_queue_capacity: usize,

    /// Stop feeding once the device queue reaches this size. Defaults to
    /// capacity minus 500.
    #[serde(default)]
    pub queue_fill_target: Option<usize>,

    #[serde(default = "default_queue_low_watermark")]
    pub queue_low_watermark: usize,

    #[serde(default = "default_speed")]
    pub default_speed: u32,

    /// Board geometry used to convert x/y points into string lengths before
    /// transmission. Must match the device's configuration.
    #[serde(default)]
    pub board: BoardConfig,

    #[serde(default)]
    pub motors: MotorsConfig,
}

fn default_controller_url() -> String {
    "http://127.0.0.1:8080".to_string()
}
fn default_supervisor_port() -> u16 {
    3001
}
fn default_batch_size() -> usize {
    100
}
fn default_min_chunk_size() -> usize {
    50
}
fn default_request_timeout_secs() -> f64 {
    30.0
}
fn default_status_poll_interval_secs() -> f64 {
    2.0
}
fn default_status_timeout_secs() -> f64 {
    300.0
}
fn default_send_retry_interval_secs() -> f64 {
    2.0
}
fn default_send_retry_timeout_secs() -> f64 {
    120.0
}
fn default_stale_after_secs() -> u64 {
    10
}
fn default_queue_low_watermark() -> usize {
    200
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            controller_url: default_controller_url(),
            bind_address: default_bind_address(),
            port: default_supervisor_port(),
            batch_size: default_batch_size(),
            min_chunk_size: default_min_chunk_size(),
            request_timeout_secs: default_request_timeout_secs(),
            status_poll_interval_secs: default_status_poll_interval_secs(),
            status_timeout_secs: default_status_timeout_secs(),
            send_retry_interval_secs: default_send_retry_interval_secs(),
            send_retry_timeout_secs: default_send_retry_timeout_secs(),
            stale_after_secs: default_stale_after_secs(),
            device_queue_capacity: default_queue_capacity(),
            queue_fill_target: None,
            queue_low_watermark: default_queue_low_watermark(),
            default_speed: default_speed(),
            board: BoardConfig::default(),
            motors: MotorsConfig::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: SupervisorConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controller_url.is_empty() {
            return Err(ConfigError::Invalid(
                "controller_url must be specified".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "batch_size must be positive".to_string(),
            ));
        }
        if self.device_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "device_queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective queue fill target, clamped to the device capacity.
    pub fn fill_target(&self) -> usize {
        let default_target = self.device_queue_capacity.saturating_sub(500).max(1);
        match self.queue_fill_target {
            Some(t) => t.clamp(1, self.device_queue_capacity),
            None => default_target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.board.width_mm, 1150.0);
        assert_eq!(config.board.height_mm, 730.0);
        assert_eq!(config.queue.capacity, 3000);
        assert_eq!(config.speeds.default_sps, 1800);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_steps_per_mm() {
        let motors = MotorsConfig::default();
        // (200 * 16) / (pi * 35)
        let expected = 3200.0 / (PI * 35.0);
        assert!((motors.steps_per_mm() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_parse_toml() {
        let toml_config = r#"
[board]
width_mm = 900.0
height_mm = 600.0
pen_offset_mm = 25.0

[motors]
spool_diameter_mm = 40.0
invert_dir_left = true

[speeds]
default_sps = 1200

[web]
port = 9090
        "#;

        let config: Config = toml::from_str(toml_config).unwrap();
        assert_eq!(config.board.width_mm, 900.0);
        assert_eq!(config.board.motor_offset_mm, 60.0);
        assert!(config.motors.invert_dir_left);
        assert!(!config.motors.invert_dir_right);
        assert_eq!(config.speeds.default_sps, 1200);
        assert_eq!(config.speeds.travel_sps, 3000);
        assert_eq!(config.web.port, 9090);
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.board.width_mm = -1.0;
        assert!(config.validate().is_err());
        config.board.width_mm = 1150.0;

        config.speeds.default_sps = config.speeds.max_sps + 1;
        assert!(config.validate().is_err());
        config.speeds.default_sps = 1800;

        config.queue.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_supervisor_fill_target() {
        let mut config = SupervisorConfig::default();
        assert_eq!(config.fill_target(), 2500);

        config.queue_fill_target = Some(10_000);
        assert_eq!(config.fill_target(), config.device_queue_capacity);

        config.device_queue_capacity = 400;
        config.queue_fill_target = None;
        assert_eq!(config.fill_target(), 1);
    }
}
