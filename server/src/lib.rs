pub mod access;
pub mod config;
pub mod handler;
pub mod storage;
pub mod util;

pub use crate::config::Config;

use {
    crate::{
        access::{AccessDirectory, PgDirectory, StaticDirectory, Viewer},
        handler::{ApiError, ResponseBody},
        storage::Storage,
    },
    anyhow::{Result, anyhow},
    hyper::{Method, Request, Response, body::Incoming, header::AUTHORIZATION},
    kontecst_protocol::{
        AccessToken, FileKey, VersionKey,
        endpoints::{FILES_PREFIX, HEALTH_PATH},
    },
    kontecst_sdk::{server, signal::shutdown_signal},
    percent_encoding::percent_decode_str,
    std::{borrow::Cow, convert::Infallible, future::Future, sync::Arc},
    tokio::net::TcpListener,
    tracing::{debug, error, info, warn},
};

/// Files are also served without the `/api` prefix.
const SHORT_FILES_PREFIX: &str = "/files/";

#[derive(Clone)]
pub struct Context {
    pub storage: Arc<Storage>,
    pub directory: Arc<dyn AccessDirectory>,
    /// Largest accepted upload in bytes.
    pub max_upload_size: u64,
}

impl Context {
    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self> {
        let cipher = config.cipher()?;
        let algorithm = cipher.algorithm();
        let storage = Storage::new(config.storage_path.clone(), cipher)?;
        info!(
            path = %config.storage_path.display(),
            %algorithm,
            "opened storage"
        );
        Ok(Self {
            storage: Arc::new(storage),
            directory: build_directory(config).await?,
            max_upload_size: config.max_upload_size.as_u64(),
        })
    }
}

/// `database_url` takes precedence over `access_file`. Without either, only public
/// files can be read.
#[inline]
pub async fn build_directory(config: &Config) -> Result<Arc<dyn AccessDirectory>> {
    if let Some(database_url) = &config.database_url {
        info!("using database access directory");
        Ok(Arc::new(PgDirectory::connect(database_url).await?))
    } else if let Some(path) = &config.access_file {
        Ok(Arc::new(StaticDirectory::load(path)?))
    } else {
        warn!("no access directory configured, only public files are readable");
        Ok(Arc::new(StaticDirectory::default()))
    }
}

/// Runs the server until SIGINT or SIGTERM.
#[inline]
pub async fn run(config: &Config) -> Result<()> {
    let ctx = Context::from_config(config).await?;
    let listener = TcpListener::bind(config.bind_addr).await?;
    serve(ctx, listener, async {
        if let Err(err) = shutdown_signal().await {
            error!(?err, "failed to wait for shutdown signal");
        }
    })
    .await;
    info!("server stopped");
    Ok(())
}

#[inline]
pub async fn serve(ctx: Context, listener: TcpListener, shutdown: impl Future<Output = ()>) {
    match listener.local_addr() {
        Ok(addr) => info!(%addr, "listening"),
        Err(err) => warn!(?err, "failed to get local address"),
    }
    server::serve(
        listener,
        move |request| handle_request(ctx.clone(), request),
        shutdown,
    )
    .await;
}

async fn handle_request(
    ctx: Context,
    request: Request<Incoming>,
) -> Result<Response<ResponseBody>, Infallible> {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let response = try_handle_request(&ctx, request)
        .await
        .unwrap_or_else(ApiError::into_response);
    debug!(%method, %path, status = %response.status(), "handled request");
    Ok(response)
}

enum Route {
    Health,
    Version(VersionKey),
    File(FileKey),
}

fn route(path: &str) -> Result<Route, ApiError> {
    if path == HEALTH_PATH {
        return Ok(Route::Health);
    }
    let rest = path
        .strip_prefix(FILES_PREFIX)
        .or_else(|| path.strip_prefix(SHORT_FILES_PREFIX))
        .ok_or_else(|| ApiError::not_found("not found"))?;
    let segments = rest
        .trim_end_matches('/')
        .split('/')
        .map(|segment| {
            percent_decode_str(segment)
                .decode_utf8()
                .map(Cow::into_owned)
                .map_err(|err| ApiError::bad_request(format!("invalid path encoding: {err}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    match segments.as_slice() {
        [package_id, version] => Ok(Route::Version(VersionKey::new(package_id, version)?)),
        [package_id, version, filename] => {
            Ok(Route::File(FileKey::new(package_id, version, filename)?))
        }
        _ => Err(ApiError::not_found("not found")),
    }
}

/// Returns `None` if the request has no `Authorization` header.
fn auth(request: &Request<Incoming>) -> Result<Option<AccessToken>> {
    let Some(auth) = request.headers().get(AUTHORIZATION) else {
        return Ok(None);
    };
    let token = auth
        .to_str()?
        .strip_prefix("Bearer ")
        .ok_or_else(|| anyhow!("authorization header is not Bearer"))?;
    Ok(Some(token.trim().parse()?))
}

async fn try_handle_request(
    ctx: &Context,
    request: Request<Incoming>,
) -> Result<Response<ResponseBody>, ApiError> {
    let route = route(request.uri().path())?;
    if let Route::Health = route {
        return match *request.method() {
            Method::GET => Ok(handler::health()),
            _ => Err(ApiError::method_not_allowed()),
        };
    }

    // A bad token never fails a request on its own: the caller is treated as anonymous.
    let token = auth(&request).unwrap_or_else(|err| {
        warn!(%err, "ignoring invalid authorization header");
        None
    });
    let mut viewer = Viewer::authenticate(ctx.directory.as_ref(), token.as_ref()).await?;

    match (route, request.method().clone()) {
        (Route::Version(key), Method::GET) => handler::list_files(ctx, &mut viewer, &key).await,
        (Route::File(key), Method::GET) => handler::get_file(ctx, &mut viewer, &key).await,
        (Route::File(key), Method::HEAD) => handler::head_file(ctx, &mut viewer, &key).await,
        (Route::File(key), Method::PUT) => {
            handler::put_file(ctx, &mut viewer, &key, request).await
        }
        (Route::File(key), Method::DELETE) => {
            handler::delete_file(ctx, &mut viewer, &key).await
        }
        _ => Err(ApiError::method_not_allowed()),
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, clippy::panic, reason = "test")]
mod tests {
    use {super::*, hyper::StatusCode};

    fn file_key(path: &str) -> FileKey {
        match route(path).unwrap() {
            Route::File(key) => key,
            Route::Health | Route::Version(_) => panic!("not a file route: {path}"),
        }
    }

    #[test]
    fn routes() {
        assert!(matches!(route("/health").unwrap(), Route::Health));
        let Route::Version(key) = route("/api/files/docs/1.0.0").unwrap() else {
            panic!("expected version route");
        };
        assert_eq!(key.to_string(), "docs@1.0.0");
        assert_eq!(
            file_key("/api/files/docs/1.0.0/intro.md"),
            FileKey::new("docs", "1.0.0", "intro.md").unwrap()
        );
        assert_eq!(
            file_key("/files/docs/1.0.0/intro.md"),
            file_key("/api/files/docs/1.0.0/intro.md")
        );
        assert!(matches!(
            route("/api/files/docs/1.0.0/").unwrap(),
            Route::Version(_)
        ));
    }

    #[test]
    fn segments_are_percent_decoded() {
        assert_eq!(
            file_key("/api/files/docs/1.0.0/getting%20started.md").filename(),
            "getting started.md"
        );
        // The decoded separator is stripped by filename sanitization.
        assert_eq!(
            file_key("/api/files/docs/1.0.0/..%2F..%2Fetc%2Fpasswd").filename(),
            "passwd"
        );
    }

    #[test]
    fn invalid_routes() {
        for path in ["/", "/api", "/api/files/", "/api/files/docs", "/api/files/a/b/c/d"] {
            assert_eq!(route(path).err().unwrap().status(), StatusCode::NOT_FOUND);
        }
        for path in [
            "/api/files/..%2F../1.0/a.md",
            "/api/files/docs/../a.md",
            "/api/files/docs/1.0/..",
            "/api/files/docs/1.0/%FF",
        ] {
            assert_eq!(
                route(path).err().unwrap().status(),
                StatusCode::BAD_REQUEST,
                "{path}"
            );
        }
    }
}
