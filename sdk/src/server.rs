use {
    hyper::{
        Request, Response,
        body::{Body, Incoming},
        server::conn::http1,
        service::service_fn,
    },
    hyper_util::{rt::TokioIo, server::graceful::GracefulShutdown},
    std::{convert::Infallible, error::Error, future::Future, io, pin::pin, time::Duration},
    tokio::{net::TcpListener, time::timeout},
    tracing::{debug, info, warn},
};

/// How long in-flight requests may take to finish after a shutdown was requested.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Accepts HTTP/1.1 connections on `listener` until `shutdown` resolves, then waits
/// for in-flight connections to complete.
///
/// Each connection is served by its own task.
pub async fn serve<H, Fut, B, S>(listener: TcpListener, handler: H, shutdown: S)
where
    H: Fn(Request<Incoming>) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Result<Response<B>, Infallible>> + Send + 'static,
    B: Body + Send + 'static,
    <B as Body>::Data: Send,
    <B as Body>::Error: Into<Box<dyn Error + Send + Sync>>,
    S: Future<Output = ()>,
{
    let graceful = GracefulShutdown::new();
    let mut shutdown = pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted connection");
                    let connection = http1::Builder::new()
                        .keep_alive(true)
                        .serve_connection(TokioIo::new(stream), service_fn(handler.clone()));
                    let connection = graceful.watch(connection);
                    tokio::spawn(async move {
                        if let Err(err) = connection.await {
                            log_connection_error(&err);
                        }
                    });
                }
                Err(err) => warn!(?err, "failed to accept"),
            },
            () = &mut shutdown => break,
        }
    }

    drop(listener);
    info!("waiting for open connections to finish");
    if timeout(SHUTDOWN_TIMEOUT, graceful.shutdown()).await.is_err() {
        warn!(timeout = ?SHUTDOWN_TIMEOUT, "connections did not finish in time");
    }
}

fn log_connection_error(err: &hyper::Error) {
    if let Some(io_err) = err.source().and_then(|err| err.downcast_ref::<io::Error>()) {
        if matches!(
            io_err.kind(),
            io::ErrorKind::NotConnected | io::ErrorKind::ConnectionReset
        ) {
            debug!(error = ?err, "canceled request");
        } else {
            warn!(error = ?err, "error while serving");
        }
    } else if err.is_incomplete_message() {
        debug!(error = ?err, "interrupted request");
    } else {
        warn!(error = ?err, "failed to serve HTTP");
    }
}
