use log::{error, info};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use nix::unistd::geteuid;

use wspr_watch::{
    Cli, DetachedShell, FileTriggerMonitor, SplitLogger, TerminalGuard, Watcher, WatcherConfig,
    ensure_privileged, termination_signal,
};

#[cfg(feature = "hardware-gpio")]
use wspr_watch::LibgpiodBackend;
#[cfg(not(feature = "hardware-gpio"))]
use wspr_watch::MockGpioBackend;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if !cli.watch {
        println!("At least '-w' is required to enter loop.");
        println!("Use -h or --help to see available options.");
        return ExitCode::from(1);
    }

    if let Err(e) = SplitLogger::new(cli.debug, cli.date_time).init() {
        eprintln!("Failed to init logger: {e}");
    }

    let config = match WatcherConfig::from_cli(&cli) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("{e}");
            return ExitCode::from(e.exit_code());
        }
    };

    if let Err(e) = ensure_privileged(geteuid()) {
        error!("This script must be run as root. Exiting.");
        return ExitCode::from(e.exit_code());
    }

    FileTriggerMonitor::from_config(&config).clear_stale();

    let mut terminal = TerminalGuard::suppress_ctrl_echo();

    let shutdown = match termination_signal() {
        Ok(fut) => fut,
        Err(e) => {
            error!("Failed to install signal handlers: {e}");
            return ExitCode::from(1);
        }
    };

    if config.debug {
        info!("Debug mode enabled. No actions will be taken.");
    }
    info!("Starting shutdown watcher.");

    let backend = {
        #[cfg(feature = "hardware-gpio")]
        {
            match LibgpiodBackend::new() {
                Ok(backend) => Arc::new(backend),
                Err(e) => {
                    error!("Failed to init libgpiod backend: {e}");
                    return ExitCode::from(e.exit_code());
                }
            }
        }
        #[cfg(not(feature = "hardware-gpio"))]
        {
            Arc::new(MockGpioBackend::default())
        }
    };

    let mut watcher = Watcher::new(config, backend, DetachedShell);
    let code = match watcher.run(shutdown).await {
        Ok(exit) => exit.code(),
        Err(e) if e.is_anticipated() => {
            error!("{e}");
            e.exit_code()
        }
        Err(e) => {
            error!("Unhandled application error: {e}");
            e.exit_code()
        }
    };

    // release the line before the terminal comes back
    drop(watcher);
    terminal.restore();

    ExitCode::from(code)
}
