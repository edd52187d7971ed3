#![warn(missing_docs)]
//! Rootmac main components and helper functions used by `main`
use anyhow::{Context, Result};
use std::thread::{self, JoinHandle};
use tracing::debug;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

pub mod command;
pub mod config;
pub mod mac;
pub mod orchestrator;
pub mod pause;
pub use command::{CommandError, CommandResult, PrivilegedRunner, SuRunner};
pub use config::{AppConfig, Args, QuietVerbose};
pub use mac::MacAddress;
pub use orchestrator::{ChangeError, Delays, MacChanger, Outcome, Report};
pub use pause::{Pause, ThreadPause};

/// Setup logging to stderr, keeping stdout for the report
/// (Tracing is a bit more involving to set up but will provide much more feature if needed)
pub fn setup_tracing(verbose: &QuietVerbose) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    let filter_layer =
        EnvFilter::try_new(verbose.get_level_filter()).context("Initializing log filter")?;

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
    Ok(())
}

/// Build the [`MacChanger`] described by `config`, using a real root shell.
pub fn create_changer(config: &AppConfig) -> Result<MacChanger<SuRunner, ThreadPause>> {
    let runner = SuRunner::new(&config.su_command)
        .with_context(|| format!("Preparing elevation command {:?}", config.su_command))?;
    debug!("Using elevation command {:?}", config.su_command);
    Ok(MacChanger::new(runner, ThreadPause, config.delays))
}

/// Run the MAC change workflow on a dedicated worker thread.
///
/// The caller keeps control and collects the [`Report`] by joining the
/// returned handle. The workflow itself has no timeout: a root shell that
/// never exits keeps the worker busy forever.
pub fn spawn_change(config: AppConfig) -> Result<JoinHandle<Report>> {
    let changer = create_changer(&config)?;
    thread::Builder::new()
        .name("rootmac-worker".into())
        .spawn(move || changer.change_mac_address(&config.interface_name, &config.new_mac))
        .context("Spawning worker thread")
}
