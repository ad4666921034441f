use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("tick rate must be positive, got {0}")]
    InvalidTickRate(u32),
    #[error("connection capacity must be positive")]
    InvalidCapacity,
    #[error("ready threshold {threshold} must be between 1 and the capacity {capacity}")]
    InvalidThreshold { threshold: usize, capacity: usize },
}

/// Runtime settings for one session server process.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Ticks per second
    pub tick_rate: u32,
    pub max_connections: usize,
    /// Ready connections needed before the session starts
    pub ready_threshold: usize,
    /// How long a session may wait for enough ready players
    pub grace_period: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 1935,
            tick_rate: 30,
            max_connections: 5,
            ready_threshold: 2,
            grace_period: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::InvalidTickRate(self.tick_rate));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidCapacity);
        }
        if self.ready_threshold == 0 || self.ready_threshold > self.max_connections {
            return Err(ConfigError::InvalidThreshold {
                threshold: self.ready_threshold,
                capacity: self.max_connections,
            });
        }
        Ok(())
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
