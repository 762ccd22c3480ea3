//! `pants` entry point for running from live sources.

use std::sync::Arc;

use anyhow::Result;
use log::debug;
use pants_bootstrap::CargoBootstrapper;
use pants_env::{HostPlatform, HostResolver, LogHandler, VenvActivator};
use pants_launcher::config::NATIVE_CLIENT_BINARY;
use pants_launcher::{
    Dispatch, DispatchOptions, Dispatcher, Invocation, LauncherConfig, SystemRunner,
};

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let config = LauncherConfig::from_env()?;

    env_logger::Builder::new()
        .parse_filters(&config.log_filter)
        .format_timestamp(None)
        .init();
    debug!("Build root {}", config.build_root.display());

    let invocation = Invocation::new(std::env::args_os().skip(1).collect(), config.env.clone());

    let dispatcher = Dispatcher::new(
        HostResolver::new(config.interpreter.clone(), HostPlatform::current()),
        VenvActivator::new(config.requirements(), &config.cache_dir, Arc::new(LogHandler)),
        CargoBootstrapper::new(
            config.native_source_root(),
            NATIVE_CLIENT_BINARY,
            &config.cache_dir,
        )
        .with_prebuilt(config.native_client.clone())
        .with_cargo(config.cargo.clone()),
        SystemRunner,
        DispatchOptions::from_config(&config),
    );

    // The runtime must be gone before exec replaces the process
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let dispatch = rt.block_on(dispatcher.dispatch(invocation));
    drop(rt);

    match dispatch? {
        Dispatch::Exit(code) => Ok(code),
        Dispatch::Replace(command) => {
            let never = command.exec()?;
            match never {}
        }
    }
}
