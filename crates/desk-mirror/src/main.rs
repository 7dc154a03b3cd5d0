//! # Desk Mirror
//! Continuously mirrors the desktop into a GPU texture.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

mod logger;
#[cfg(windows)]
mod mirror;
mod report;
mod settings;

/// The Cargo package version.
#[cfg(not(debug_assertions))]
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The Cargo package version or '0.0.0' if a non-release build.
#[cfg(debug_assertions)]
pub const VERSION: &str = "0.0.0";

/// If this instance should have debug enabled.
pub fn should_debug() -> bool {
    std::env::args().any(|arg| arg.eq("--debug"))
}

#[cfg(windows)]
fn main() {
    use std::io::BufRead;

    use duplication_pipeline::{PipelineConfig, PipelineContext, PipelineSupervisor};
    use tracing::{info, info_span, warn};

    use crate::{
        logger::setup_logger,
        mirror::{MirrorConsumers, MirrorTarget},
        report::Failure,
        settings::Settings,
    };

    // Set up logger
    let _logger_guards =
        setup_logger(should_debug()).report_and_panic("Could not install the logger");

    // Log application start
    let _span = info_span!("[Main Thread]").entered();
    info!("Desk Mirror v{}", VERSION);

    // Load settings
    let settings = match Settings::load_or_create() {
        Ok(settings) => settings,
        Err(error) => {
            warn!("Could not load the settings file, using defaults:\n{error}");
            Settings::default()
        }
    };

    // Build the pipeline context
    let presentation =
        MirrorTarget::new().report_and_panic("Could not create the mirror texture device");
    let consumers = MirrorConsumers::new(None);

    let context = PipelineContext {
        presentation: Box::new(presentation),
        consumers: Box::new(consumers),
        config: PipelineConfig {
            region_mode: settings.region_mode(),
            update_limit: settings.update_limit_mode(),
            max_refresh_delay: settings.max_refresh_delay(),
        },
    };

    let (supervisor, handle) =
        PipelineSupervisor::new(context).report_and_panic("Could not create the capture pipeline");

    // Terminate cleanly on "quit" so the pipeline unwinds instead of dying
    // mid-copy.
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().eq_ignore_ascii_case("quit") {
                handle.terminate();
                break;
            }
        }
    });
    info!("Mirroring; type \"quit\" to stop.");

    if let Err(error) = supervisor.run() {
        crate::report::report_and_panic(error, "The capture pipeline failed");
    }
    info!("Pipeline terminated.");
}

#[cfg(not(windows))]
fn main() {
    eprintln!("Desk Mirror requires a Windows host.");
}
