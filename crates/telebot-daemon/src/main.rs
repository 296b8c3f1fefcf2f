//! `telebot` – telepresence bot control daemon.
//!
//! Reads the environment configuration, boots the kernel, and serves until
//! a termination signal. Boot-time infrastructure failures (bad
//! configuration, socket bind) terminate the process; everything downstream
//! degrades instead.

use tracing::{error, info};

use telebot_kernel::{Config, Kernel};

#[tokio::main]
async fn main() {
    // Structured logging via RUST_LOG (defaults to "info"). Set
    // TELEBOT_LOG_FORMAT=json for newline-delimited JSON suitable for log
    // aggregators.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if std::env::var("TELEBOT_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let kernel = match Kernel::boot(config).await {
        Ok(kernel) => kernel,
        Err(e) => {
            error!("boot failed: {e}");
            std::process::exit(1);
        }
    };

    info!("telebot ready");
    kernel.run().await;
}
