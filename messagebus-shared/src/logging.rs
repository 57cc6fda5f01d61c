//! # Structured Logging
//!
//! Builds a `tracing-subscriber` stack from [`AuditingConfig`]: an
//! `EnvFilter` seeded from `log_min_level`, plain or JSON formatting per
//! `log_uses_json`, and the console layer entirely skipped when
//! `log_console_enabled` is false.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AuditingConfig;

pub fn init_tracing(config: &AuditingConfig) {
    if !config.log_console_enabled {
        return;
    }

    let filter = EnvFilter::try_new(&config.log_min_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt().with_env_filter(filter).with_target(config.log_details);

    if config.log_uses_json {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}
