use std::process;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use wodz_ics::Config;

fn init_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set up logging: {e}");
    }
}

fn main() {
    init_logging();
    info!("WODZ to ICS started");

    let config = Config::load();
    info!("Parsed config to: {:?}", config);

    if let Err(e) = wodz_ics::run(&config) {
        error!("Application error: {e}");
        process::exit(1);
    }
}
