use std::process::ExitCode;

use anyhow::Context;
use log::LevelFilter;

fn main() -> ExitCode {
    // accept everything here; the effective level is set through
    // `log::set_max_level`, from the config once it is loaded
    simple_logger::SimpleLogger::new()
        .with_level(LevelFilter::Trace)
        .with_module_level("reqwest", LevelFilter::Warn)
        .with_module_level("hyper_util", LevelFilter::Warn)
        .with_module_level("tungstenite", LevelFilter::Warn)
        .with_colors(true)
        .with_threads(true)
        .with_local_timestamps()
        .init()
        .expect("failed to build logger instance");
    log::set_max_level(LevelFilter::Info);

    match run() {
        Ok(exit_code) => exit_code,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<ExitCode> {
    let channels = jellyplayer_bridge::BridgeChannels::default();
    let backend = jellyplayer_backend::run(channels.backend_rx, channels.backend_tx);
    let exit_code = jellyplayer_frontend::run(channels.frontend_rx, channels.frontend_tx)?;

    // the UI event loop is gone, a requested restart can start the new instance
    backend
        .join()
        .spawn_if_requested()
        .context("failed to relaunch the application")?;
    Ok(exit_code)
}
