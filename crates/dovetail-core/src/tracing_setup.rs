//! Tracing subscriber setup
//!
//! `RUST_LOG` wins over the configured level when it is set. Installing the global
//! subscriber twice is harmless: the second call keeps the first subscriber.

use crate::config::LoggingConfig;
use anyhow::Context;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a global `fmt` subscriber (JSON lines when `config.json` is set)
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("invalid log filter {:?}", config.level))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };

    match installed {
        Ok(()) => info!(level = %config.level, json = config.json, "Tracing initialized"),
        Err(_) => debug!("Global tracing subscriber already installed"),
    }
    Ok(())
}
