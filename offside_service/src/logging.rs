use crate::config::LogLevel;
use tracing_subscriber::{fmt::MakeWriter, layer::SubscriberExt, util::SubscriberInitExt};

/// JSON logs on stdout, filtered by `RUST_LOG` when set and by the configured
/// level otherwise.
pub fn setup_logging(log_level: &LogLevel) {
    init(log_level, std::io::stdout);
}

/// Worker processes answer on stdout, so their logs go to stderr.
pub fn setup_worker_logging(log_level: &LogLevel) {
    init(log_level, std::io::stderr);
}

fn init<W>(log_level: &LogLevel, writer: W)
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let log_level = format!("{},ort=info", log_level.as_str());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_level(true)
                .with_writer(writer),
        )
        .init();
}
