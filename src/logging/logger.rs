use anyhow::Result;
use log::LevelFilter;

use crate::config::LoggingConfig;

/// Installs the global logger: stderr always, plus a log file when configured.
/// Chatty dependencies are capped at `warn`.
pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let mut dispatch = base_dispatch(config.level).chain(std::io::stderr());
    if let Some(path) = config.file.as_deref() {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }
    dispatch.apply()?;
    Ok(())
}

fn base_dispatch(level: LevelFilter) -> fern::Dispatch {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .level_for("hyper", LevelFilter::Warn)
        .level_for("hyper_util", LevelFilter::Warn)
        .level_for("reqwest", LevelFilter::Warn)
        .level_for("rustls", LevelFilter::Warn)
}
