use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global text logger with the given filter directive.
pub fn init(level: &str) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_new(level).map_err(|err| anyhow::anyhow!("invalid log level: {err}"))?;
    let fmt_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|err| anyhow::anyhow!("cannot initialize logger: {err}"))?;
    Ok(())
}
