use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Installs the fmt subscriber. An explicit `log_level` wins over `RUST_LOG`.
pub(crate) fn init_tracing(log_level: Option<&str>) {
    let builder = EnvFilter::builder().with_default_directive(LevelFilter::WARN.into());
    let env_filter = match log_level.map(str::trim).filter(|level| !level.is_empty()) {
        Some(level) => builder.parse_lossy(level),
        None => builder.from_env_lossy(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
