use {
    anyhow::{Context as _, Result},
    sqlx::PgPool,
    std::io,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

/// Logs to stderr. `RUST_LOG` takes precedence over `log_filter`.
#[inline]
pub fn init_tracing(log_filter: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_unset) => EnvFilter::try_new(log_filter)
            .with_context(|| format!("invalid log filter {log_filter:?}"))?,
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .try_init()?;
    Ok(())
}

/// Creates the `access_tokens` and `package_access` tables.
#[inline]
pub async fn migrate(db: &PgPool) -> Result<()> {
    sqlx::migrate!().run(db).await?;
    Ok(())
}
