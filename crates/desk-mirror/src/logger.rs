use tracing::{
    subscriber::{set_global_default, SetGlobalDefaultError},
    Level,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt};

/// Install the global logger: stdout plus a log file in the working
/// directory. The returned guards flush the non-blocking writers on drop and
/// must live for the whole run.
pub fn setup_logger(debug: bool) -> Result<Vec<WorkerGuard>, SetGlobalDefaultError> {
    let level = if debug { Level::TRACE } else { Level::INFO };
    let filter = tracing_subscriber::filter::Targets::new().with_default(level);

    // stdout logger
    let (std_writer, std_guard) = tracing_appender::non_blocking(std::io::stdout());
    let std_logger = tracing_subscriber::fmt::layer()
        .with_writer(std_writer)
        .with_ansi(false)
        .with_target(false)
        .with_span_events(FmtSpan::CLOSE | FmtSpan::ENTER);

    // file logger
    let file_appender = tracing_appender::rolling::never(".", "desk-mirror.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let file_logger = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(false);

    // Register loggers
    let collector = tracing_subscriber::registry()
        .with(std_logger)
        .with(file_logger)
        .with(filter);

    set_global_default(collector)?;

    Ok(vec![std_guard, file_guard])
}
