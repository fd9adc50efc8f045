//! Configuration module for Watchpost.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "watchpost.db")
    pub db_path: String,
    /// Seconds between monitoring sweeps (default: 60)
    pub sweep_interval_secs: u64,
    /// SMTP relay host; alerts are disabled when unset
    pub smtp_host: Option<String>,
    /// SMTP relay port (default: 587)
    pub smtp_port: u16,
    /// SMTP username
    pub smtp_user: Option<String>,
    /// SMTP password
    pub smtp_pass: Option<String>,
    /// From address for alert mail (falls back to the SMTP username)
    pub smtp_from: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "watchpost.db".to_string(),
            sweep_interval_secs: 60,
            smtp_host: None,
            smtp_port: 587,
            smtp_user: None,
            smtp_pass: None,
            smtp_from: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `WATCHPOST_HTTP_PORT`: HTTP port (default: 8080)
    /// - `WATCHPOST_DB_PATH`: Database file path (default: "watchpost.db")
    /// - `WATCHPOST_SWEEP_INTERVAL_SECS`: Seconds between sweeps (default: 60)
    /// - `SMTP_HOST`, `SMTP_PORT`, `SMTP_USER`, `SMTP_PASS`, `SMTP_FROM`: alert mail relay
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(port_str) = env::var("WATCHPOST_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.http_port = port;
            }
        }

        if let Ok(db_path) = env::var("WATCHPOST_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Ok(interval_str) = env::var("WATCHPOST_SWEEP_INTERVAL_SECS") {
            if let Ok(secs) = interval_str.parse::<u64>() {
                if secs > 0 {
                    cfg.sweep_interval_secs = secs;
                }
            }
        }

        cfg.smtp_host = env::var("SMTP_HOST").ok().filter(|s| !s.is_empty());
        if let Ok(port_str) = env::var("SMTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.smtp_port = port;
            }
        }
        cfg.smtp_user = env::var("SMTP_USER").ok().filter(|s| !s.is_empty());
        cfg.smtp_pass = env::var("SMTP_PASS").ok();
        cfg.smtp_from = env::var("SMTP_FROM").ok().filter(|s| !s.is_empty());

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "watchpost.db");
        assert_eq!(cfg.sweep_interval_secs, 60);
        assert!(cfg.smtp_host.is_none());
    }
}
