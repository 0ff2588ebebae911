//! env_logger setup for applications embedding the host.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use log::{LevelFilter, info};

/// 0 = warn, 1 = info, 2 = debug, 3+ = trace
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Install the global logger.
///
/// With `log_file` every record at the verbosity level goes to that file;
/// otherwise records go to stderr and `RUST_LOG` takes precedence over the
/// verbosity. Fails if a logger is already installed.
pub fn init(verbosity: u8, log_file: Option<&Path>) -> Result<()> {
    let level = level_for(verbosity);
    match log_file {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("Failed to create log file: {}", path.display()))?;
            env_logger::Builder::new()
                .filter_level(level)
                .format_timestamp_millis()
                .target(env_logger::Target::Pipe(Box::new(file)))
                .try_init()
                .context("Logger already initialized")?;
            info!("Logging to file: {} (level: {:?})", path.display(), level);
        }
        None => {
            let default_level = level.as_str().to_ascii_lowercase();
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
                .format_timestamp_millis()
                .try_init()
                .context("Logger already initialized")?;
        }
    }
    Ok(())
}
