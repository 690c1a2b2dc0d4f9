//! Environment-sourced endpoint configuration.
//!
//! Deliberately thin: no CLI flag layer, just the four environment
//! variables and their defaults.

use crate::params::Params;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub telemetry_host: String,
    pub telemetry_port: u16,
    pub motor_host: String,
    pub motor_port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            telemetry_host: std::env::var("TEL_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            telemetry_port: std::env::var("TEL_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5600),
            motor_host: std::env::var("CMD_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            motor_port: std::env::var("CMD_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5555),
        }
    }

    pub fn telemetry_addr(&self) -> String {
        format!("{}:{}", self.telemetry_host, self.telemetry_port)
    }

    pub fn motor_addr(&self) -> String {
        format!("{}:{}", self.motor_host, self.motor_port)
    }
}

/// Everything the binary needs besides live sockets: the wire endpoints plus
/// the navigation constants, bundled so tests can construct a fully custom
/// instance without environment variables.
#[derive(Debug, Clone)]
pub struct NavSettings {
    pub config: Config,
    pub params: Params,
}

impl NavSettings {
    pub fn from_env() -> Self {
        Self {
            config: Config::from_env(),
            params: Params::default(),
        }
    }
}
