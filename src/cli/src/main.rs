use std::env;
use std::path::{Path, PathBuf};

use vent_core::{Broker, SyncFailure, VentConfig};

mod scenario;

use scenario::{Runner, Scenario};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_filter())
        .with_writer(std::io::stderr)
        .init();

    let Some(path) = env::args_os().nth(1).map(PathBuf::from) else {
        eprintln!("usage: vent <scenario.toml>");
        std::process::exit(2);
    };

    let mut config = match env::var_os("VENT_CONFIG") {
        Some(explicit) => VentConfig::load_from(Path::new(&explicit))?,
        None => VentConfig::load()?,
    };
    if let Ok(prefix) = env::var("VENT_TOKEN_PREFIX") {
        config.token_prefix = prefix;
    }
    config.request.sync_failure =
        parse_sync_failure("VENT_SYNC_FAILURE", config.request.sync_failure);

    let scenario = Scenario::load(&path)?;
    tracing::info!(path = %path.display(), steps = scenario.steps.len(), "running scenario");

    let mut runner = Runner::new(Broker::with_config(config));
    for line in runner.run(&scenario).await {
        println!("{line}");
    }

    Ok(())
}

fn parse_sync_failure(key: &str, default: SyncFailure) -> SyncFailure {
    match env::var(key) {
        Ok(v) => match v.as_str() {
            "propagate" | "PROPAGATE" => SyncFailure::Propagate,
            "reject" | "REJECT" => SyncFailure::Reject,
            _ => default,
        },
        Err(_) => default,
    }
}

fn tracing_filter() -> tracing_subscriber::EnvFilter {
    let explicit = env::var("VENT_LOG").or_else(|_| env::var("RUST_LOG")).ok();
    if let Some(filter) = explicit {
        return tracing_subscriber::EnvFilter::new(filter);
    }
    if matches!(
        env::var("VENT_DEBUG").as_deref(),
        Ok("1" | "true" | "TRUE" | "yes" | "YES")
    ) {
        return tracing_subscriber::EnvFilter::new("debug");
    }
    tracing_subscriber::EnvFilter::new("warn")
}
