use admission_gate::{
    cli::{LogFormat, Opts},
    config::Config,
    http::{self, AppState},
    trace,
};
use structopt::StructOpt;
use tracing::{error, info};

fn main() {
    let opts = Opts::from_args();

    let levels = std::env::var("LOG").unwrap_or_else(|_| match opts.log_level() {
        "off" => "off".to_owned(),
        level => format!("admission_gate={}", level),
    });
    trace::init(
        opts.color.use_color(),
        opts.log_format == LogFormat::Json,
        &levels,
    );

    let config = match opts.load_config() {
        Ok(config) => config,
        Err(error) => {
            error!(message = "Configuration error.", %error);
            std::process::exit(exitcode::CONFIG);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            error!(message = "Failed to start the runtime.", %error);
            std::process::exit(exitcode::OSERR);
        }
    };

    let code = runtime.block_on(run(config));
    std::process::exit(code);
}

async fn run(config: Config) -> exitcode::ExitCode {
    let controller = match config.admission.build() {
        Ok(controller) => controller,
        Err(error) => {
            error!(message = "Configuration error.", %error);
            return exitcode::CONFIG;
        }
    };
    let state = AppState::new(controller.clone(), config.server.work());
    let timeout = config.admission.shutdown_timeout();

    let shutdown = async move {
        if let Err(error) = wait_for_signal().await {
            error!(message = "Unable to listen for shutdown signals, shutting down.", %error);
        }
        info!(message = "Shutdown signal received.", ?timeout);
        controller.begin_shutdown(timeout).await;
    };

    match http::serve(config.server.address, state, shutdown).await {
        Ok(()) => {
            info!(message = "Stopped.");
            exitcode::OK
        }
        Err(error) => {
            error!(message = "HTTP server failed.", %error);
            exitcode::SOFTWARE
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = sigterm.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
