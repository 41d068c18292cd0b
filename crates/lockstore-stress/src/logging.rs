use std::env;

use anyhow::{Context, Result};
use lockstore::config::Config;
use lockstore::logging::{env_filter, fmt_layer};
use lockstore::metrics;
use tracing_subscriber::Registry;
use tracing_subscriber::prelude::*;

/// Keeps the sentry client alive until the stresstest finishes.
pub struct Guard {
    _sentry: Option<sentry::ClientInitGuard>,
}

/// Sets up logging, error reporting and metrics the way a production deployment would.
///
/// # Safety
/// This may modify the environment, so it must be called before any threads are spawned.
pub unsafe fn init(config: &Config) -> Result<Guard> {
    if config.logging.enable_backtraces {
        // SAFETY: As documented, this function may only be called in a single-threaded context.
        unsafe { env::set_var("RUST_BACKTRACE", "1") };
    }

    let sentry = match &config.sentry_dsn {
        Some(dsn) => {
            let dsn = dsn.parse::<sentry::types::Dsn>().context("invalid sentry DSN")?;
            Some(sentry::init(sentry::ClientOptions {
                dsn: Some(dsn),
                release: sentry::release_name!(),
                traces_sample_rate: 1.0,
                ..Default::default()
            }))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(fmt_layer::<Registry>(&config.logging).with_filter(env_filter(&config.logging)))
        .with(sentry::integrations::tracing::layer())
        .init();

    if let Some(statsd) = &config.metrics.statsd {
        // have some default tags, just to be closer to the real world config
        let mut tags = config.metrics.custom_tags.clone();
        tags.entry("env".into()).or_insert_with(|| "stresstest".into());

        metrics::configure_statsd(&config.metrics.prefix, statsd.as_str(), tags)
            .context("failed to configure statsd")?;
    }

    Ok(Guard { _sentry: sentry })
}
