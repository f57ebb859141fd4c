use std::process::ExitCode;

use clap::Parser;
use relayd::{Args, Config, Controller, ExitStatus, StartupError};
use relayd_common::{internal, logging};

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init();

    internal!(level = INFO, "Loading {}", args.config.display());

    let controller = match Config::load(args).map_err(StartupError::from) {
        Ok(config) => Controller::init(config).await,
        Err(err) => Err(err),
    };

    let status = match controller {
        Ok(controller) => match controller.run().await {
            Ok(()) => ExitStatus::Success,
            Err(err) => {
                internal!(level = ERROR, "{err:#}");
                eprintln!("relayd: {err:#}");
                ExitStatus::Failure
            }
        },
        Err(err) => {
            internal!(level = ERROR, "{err}");
            eprintln!("relayd: {err}");
            err.exit_status()
        }
    };

    status.into()
}
