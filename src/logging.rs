//! Tracing subscriber setup

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Settings;
use crate::error::{Result, RuntimeError};

/// Maps a configured level name onto a tracing level. Unknown names fall
/// back to `info`.
pub fn parse_level(level: &str) -> Level {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Level to log at: an explicit choice (the `--log-level` flag) beats
/// every settings layer, environment included.
pub fn resolve_level(explicit: Option<&str>, settings: &Settings) -> String {
    match explicit {
        Some(level) => level.to_string(),
        None => settings.log_level(),
    }
}

/// Installs the global subscriber, writing to stderr so command output on
/// stdout stays machine readable. `RUST_LOG` wins over `level`.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(level: &str) -> Result<()> {
    let level = parse_level(level);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("agenticide={}", level).into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|e| RuntimeError::Other(format!("logging already initialized: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level(" WARN "), Level::WARN);
        assert_eq!(parse_level("error"), Level::ERROR);
        assert_eq!(parse_level("info"), Level::INFO);
        assert_eq!(parse_level("chatty"), Level::INFO);
        assert_eq!(parse_level(""), Level::INFO);
    }

    #[test]
    fn test_explicit_level_beats_settings() {
        let settings = Settings::default();
        settings.set("log_level", "error");

        assert_eq!(resolve_level(Some("debug"), &settings), "debug");
        assert_eq!(resolve_level(None, &settings), "error");
    }

    #[test]
    fn test_second_init_fails() {
        // Only this test installs a global subscriber; keep it quiet for the
        // rest of the test binary.
        assert!(init_logging("error").is_ok());
        assert!(init_logging("error").is_err());
    }
}
