use std::process::ExitCode;

use gatehouse_server::ServerBuilder;
use gatehouse_server::config::loader::load_config;
use gatehouse_server::observability;

const CONFIG_ENV: &str = "GATEHOUSE_CONFIG";
const DEFAULT_CONFIG: &str = "gatehouse.toml";

/// Where the configuration path came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigOrigin {
    Flag,
    Env,
    Default,
}

impl ConfigOrigin {
    fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "--config",
            Self::Env => CONFIG_ENV,
            Self::Default => "default",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // .env is optional; only report files that exist but cannot be read.
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: ignoring .env file: {e}");
        }
    }

    observability::init_tracing();

    let (path, origin) = config_path(std::env::args().skip(1), std::env::var(CONFIG_ENV).ok());
    let cfg = match load_config(Some(&path)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Invalid configuration ({path}): {e}");
            return ExitCode::from(2);
        }
    };
    tracing::info!(path = %path, origin = origin.as_str(), "configuration loaded");
    observability::apply_logging_level(&cfg.logging.level);

    let server = match ServerBuilder::new().with_config(cfg).build().await {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Failed to start gatehouse: {e:#}");
            return ExitCode::from(2);
        }
    };

    match server.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server stopped with an error");
            ExitCode::FAILURE
        }
    }
}

/// `--config <path>` wins over `GATEHOUSE_CONFIG`, which wins over
/// `gatehouse.toml` in the working directory.
fn config_path(
    mut args: impl Iterator<Item = String>,
    env_value: Option<String>,
) -> (String, ConfigOrigin) {
    while let Some(arg) = args.next() {
        if let Some(path) = arg.strip_prefix("--config=") {
            return (path.to_string(), ConfigOrigin::Flag);
        }
        if arg == "--config" {
            if let Some(path) = args.next() {
                return (path, ConfigOrigin::Flag);
            }
        }
    }

    match env_value {
        Some(path) if !path.is_empty() => (path, ConfigOrigin::Env),
        _ => (DEFAULT_CONFIG.to_string(), ConfigOrigin::Default),
    }
}
