use log::info;

use crate::logger;

/// Install logging and panic reporting for a binary.
pub fn startup(name: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    logger::setup_logger()?;
    log_panics::init();

    info!("--- {} ---", name);
    if let Ok(path) = std::env::current_dir() {
        info!("The current directory is {}", path.display());
    }

    Ok(())
}
