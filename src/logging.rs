use log::debug;
use std::env;

const ENV_PREFIX: &str = "gif_fit_";

/// stderr logger, `info` unless `RUST_LOG` says otherwise.
pub fn init() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", "info");
    }
    let _ = env_logger::Builder::from_default_env()
        .format_timestamp(None)
        .target(env_logger::Target::Stderr)
        .try_init();
}

fn relevant_env() -> Vec<(String, String)> {
    let mut entries: Vec<(String, String)> = env::vars()
        .filter(|(key, _)| key.to_ascii_lowercase().starts_with(ENV_PREFIX))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}

pub fn log_relevant_env() {
    let entries = relevant_env();
    if entries.is_empty() {
        return;
    }
    debug!("Environment snapshot ({} entries):", entries.len());
    for (key, value) in entries {
        debug!("  {} = {}", key, value);
    }
}
