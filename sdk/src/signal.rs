use {
    anyhow::{Context, Result},
    derive_more::Display,
    std::future::Future,
    tokio::signal::ctrl_c,
    tracing::info,
};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    #[display("SIGINT")]
    Sigint,
    #[display("SIGTERM")]
    Sigterm,
}

/// Resolves on the first SIGINT or SIGTERM.
pub async fn shutdown_signal() -> Result<ShutdownSignal> {
    let sigterm = sigterm().context("failed to install sigterm signal handler")?;
    let signal = tokio::select! {
        result = ctrl_c() => {
            result.context("failed to install sigint signal handler")?;
            ShutdownSignal::Sigint
        }
        () = sigterm => ShutdownSignal::Sigterm,
    };
    info!(%signal, "shutdown requested");
    Ok(signal)
}

fn sigterm() -> Result<impl Future<Output = ()>> {
    #[cfg(target_family = "unix")]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        Ok(async move {
            sigterm.recv().await;
        })
    }

    #[cfg(not(target_family = "unix"))]
    Ok(std::future::pending())
}
