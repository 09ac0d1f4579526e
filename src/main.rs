use std::env;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn setup_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry().with(filter);
    if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() {
    let mut args = env::args().skip(1);
    let cmd = args.next().unwrap_or_default();
    if cmd != "serve" {
        eprintln!("Usage: clabot serve [--config <path>] [--json-logs]");
        std::process::exit(2);
    }

    let mut config_path = String::from("./config/example-config.yaml");
    let mut json_logs = false;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                if let Some(v) = args.next() {
                    config_path = v;
                }
            }
            "--json-logs" => json_logs = true,
            _ => {}
        }
    }

    setup_logging(json_logs);

    let cfg = match clabot_config::load_and_validate(&config_path) {
        Ok(v) => v,
        Err(e) => {
            error!(path = %config_path, "failed to load config: {e}");
            std::process::exit(1);
        }
    };
    info!(path = %config_path, "config loaded");

    if let Err(e) = clabot_server::serve(cfg).await {
        error!("bot exited with error: {e}");
        std::process::exit(1);
    }
}
