use spdlog::{Level, LevelFilter, warn};

/// Applies `SPDLOG_RUST_LEVEL` if set, otherwise info, or debug when `verbose`.
pub fn init(verbose: bool) {
    let from_env = match spdlog::init_env_level() {
        Ok(applied) => applied,
        Err(e) => {
            warn!("Ignoring SPDLOG_RUST_LEVEL: {}", e);
            false
        }
    };
    if verbose || !from_env {
        let level = if verbose { Level::Debug } else { Level::Info };
        spdlog::default_logger().set_level_filter(LevelFilter::MoreSevereEqual(level));
    }
}
