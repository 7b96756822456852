use {
    crate::{
        Context,
        access::Viewer,
        storage::{FileStat, StorageError},
    },
    bytes::{Bytes, BytesMut},
    chrono::{SecondsFormat, Utc},
    http_body_util::{BodyExt, Full},
    hyper::{
        HeaderMap, Request, Response, StatusCode,
        body::Incoming,
        header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderName, HeaderValue},
    },
    kontecst_protocol::{
        ErrorResponse, FileKey, FileMetadata, HealthResponse, KeyError, ListFilesResponse,
        VersionKey,
        endpoints::{
            CREATED_AT_HEADER, MARKDOWN_CONTENT_TYPE, PACKAGE_ID_HEADER, PACKAGE_PUBLIC_HEADER,
            PACKAGE_VERSION_HEADER,
        },
    },
    serde::Serialize,
    tokio::task::block_in_place,
    tracing::{debug, error, info, warn},
};

pub type ResponseBody = Full<Bytes>;

/// Error returned to the caller as `{"error": message}`.
///
/// Internal failures are logged where they are converted and reach the caller
/// only as a generic message.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    #[must_use]
    #[inline]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    #[must_use]
    #[inline]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    #[must_use]
    #[inline]
    pub fn not_found(message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    #[must_use]
    #[inline]
    pub fn method_not_allowed() -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    }

    #[must_use]
    #[inline]
    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    }

    #[must_use]
    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    #[inline]
    pub fn into_response(self) -> Response<ResponseBody> {
        json_response(
            self.status,
            &ErrorResponse {
                error: self.message,
            },
        )
    }
}

impl From<KeyError> for ApiError {
    #[inline]
    fn from(err: KeyError) -> Self {
        debug!(%err, "invalid file key");
        Self::bad_request(err.to_string())
    }
}

impl From<StorageError> for ApiError {
    #[inline]
    fn from(err: StorageError) -> Self {
        if err.is_integrity_failure() {
            error!(%err, "integrity check failed, file was tampered with or the key is wrong");
        } else {
            error!(%err, "storage failure");
        }
        Self::internal()
    }
}

impl From<anyhow::Error> for ApiError {
    #[inline]
    fn from(err: anyhow::Error) -> Self {
        error!(?err, "access directory failure");
        Self::internal()
    }
}

fn file_not_found(key: &FileKey) -> ApiError {
    debug!(%key, "file not found");
    ApiError::not_found("file not found")
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<ResponseBody> {
    let body = match serde_json::to_vec(value) {
        Ok(body) => body,
        Err(err) => {
            error!(?err, "failed to serialize response");
            let mut response = Response::new(Full::new(Bytes::from_static(b"{}")));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            return response;
        }
    };
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn empty_response(status: StatusCode) -> Response<ResponseBody> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(HeaderName::from_static(name), value);
        }
        Err(err) => warn!(header = name, value, %err, "invalid header value"),
    }
}

fn file_response(metadata: &FileMetadata, size: u64, body: Bytes) -> Response<ResponseBody> {
    let mut response = Response::new(Full::new(body));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(MARKDOWN_CONTENT_TYPE));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
    insert_header(headers, PACKAGE_ID_HEADER, &metadata.package_id);
    insert_header(headers, PACKAGE_VERSION_HEADER, &metadata.version);
    insert_header(
        headers,
        CREATED_AT_HEADER,
        &metadata
            .created_at
            .to_rfc3339_opts(SecondsFormat::Millis, true),
    );
    response
}

async fn check_read(
    viewer: &mut Viewer<'_>,
    key: &FileKey,
    metadata: &FileMetadata,
) -> Result<(), ApiError> {
    if viewer.can_read(metadata).await? {
        return Ok(());
    }
    info!(%key, user = ?viewer.user(), "read access denied");
    Err(ApiError::new(StatusCode::FORBIDDEN, "access denied"))
}

/// Writes need an identity with a grant for the package.
async fn check_write(viewer: &mut Viewer<'_>, key: &FileKey) -> Result<(), ApiError> {
    if viewer.user().is_none() {
        info!(%key, "anonymous write rejected");
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "authentication required",
        ));
    }
    if viewer.has_grant(key.package_id()).await? {
        return Ok(());
    }
    info!(%key, user = ?viewer.user(), "write access denied");
    Err(ApiError::new(StatusCode::FORBIDDEN, "access denied"))
}

#[must_use]
#[inline]
pub fn health() -> Response<ResponseBody> {
    json_response(
        StatusCode::OK,
        &HealthResponse {
            status: "ok".into(),
            timestamp: Utc::now(),
        },
    )
}

async fn readable_stat(
    ctx: &Context,
    viewer: &mut Viewer<'_>,
    key: &FileKey,
) -> Result<FileStat, ApiError> {
    let stat = block_in_place(|| ctx.storage.stat(key))?.ok_or_else(|| file_not_found(key))?;
    check_read(viewer, key, &stat.metadata).await?;
    Ok(stat)
}

/// Access is checked on the envelope metadata before anything is decrypted.
#[inline]
pub async fn get_file(
    ctx: &Context,
    viewer: &mut Viewer<'_>,
    key: &FileKey,
) -> Result<Response<ResponseBody>, ApiError> {
    readable_stat(ctx, viewer, key).await?;
    let file = block_in_place(|| ctx.storage.retrieve(key))?.ok_or_else(|| file_not_found(key))?;
    // The file may have been replaced since it was checked.
    check_read(viewer, key, &file.metadata).await?;
    let size = u64::try_from(file.content.len()).map_err(|_overflow| ApiError::internal())?;
    Ok(file_response(&file.metadata, size, file.content.into()))
}

#[inline]
pub async fn head_file(
    ctx: &Context,
    viewer: &mut Viewer<'_>,
    key: &FileKey,
) -> Result<Response<ResponseBody>, ApiError> {
    let stat = readable_stat(ctx, viewer, key).await?;
    Ok(file_response(&stat.metadata, stat.size, Bytes::new()))
}

/// Metadata of the files of a version that the caller may read, sorted by filename.
#[inline]
pub async fn list_files(
    ctx: &Context,
    viewer: &mut Viewer<'_>,
    key: &VersionKey,
) -> Result<Response<ResponseBody>, ApiError> {
    let mut files = Vec::new();
    for metadata in block_in_place(|| ctx.storage.list(key))? {
        if viewer.can_read(&metadata).await? {
            files.push(metadata);
        }
    }
    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    debug!(%key, count = files.len(), "listed files");
    Ok(json_response(StatusCode::OK, &ListFilesResponse { files }))
}

fn parse_public_header(headers: &HeaderMap) -> Result<bool, ApiError> {
    let Some(value) = headers.get(PACKAGE_PUBLIC_HEADER) else {
        return Ok(false);
    };
    let value = value
        .to_str()
        .map_err(|err| ApiError::bad_request(format!("invalid {PACKAGE_PUBLIC_HEADER}: {err}")))?;
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ApiError::bad_request(format!(
            "invalid {PACKAGE_PUBLIC_HEADER}: expected true or false"
        ))),
    }
}

fn payload_too_large(limit: u64) -> ApiError {
    ApiError::new(
        StatusCode::PAYLOAD_TOO_LARGE,
        format!("file is larger than {limit} bytes"),
    )
}

async fn read_body(mut request: Request<Incoming>, limit: u64) -> Result<Bytes, ApiError> {
    let content_length = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    if content_length.is_some_and(|length| length > limit) {
        warn!(?content_length, limit, "declared upload size exceeds limit");
        return Err(payload_too_large(limit));
    }

    let mut content = BytesMut::new();
    while let Some(frame) = request.body_mut().frame().await {
        let frame = frame.map_err(|err| {
            warn!(%err, "failed to read request frame");
            ApiError::bad_request("failed to read request body")
        })?;
        let Some(data) = frame.data_ref() else {
            continue;
        };
        let received = u64::try_from(content.len().saturating_add(data.len())).unwrap_or(u64::MAX);
        if received > limit {
            warn!(received, limit, "upload exceeds limit");
            return Err(payload_too_large(limit));
        }
        content.extend_from_slice(data);
    }
    Ok(content.freeze())
}

#[inline]
pub async fn put_file(
    ctx: &Context,
    viewer: &mut Viewer<'_>,
    key: &FileKey,
    request: Request<Incoming>,
) -> Result<Response<ResponseBody>, ApiError> {
    check_write(viewer, key).await?;
    let is_public = parse_public_header(request.headers())?;
    let content = read_body(request, ctx.max_upload_size).await?;
    let metadata = block_in_place(|| ctx.storage.store(key, &content, is_public))?;
    info!(%key, size = content.len(), is_public, user = ?viewer.user(), "file uploaded");
    Ok(json_response(StatusCode::CREATED, &metadata))
}

#[inline]
pub async fn delete_file(
    ctx: &Context,
    viewer: &mut Viewer<'_>,
    key: &FileKey,
) -> Result<Response<ResponseBody>, ApiError> {
    check_write(viewer, key).await?;
    if !block_in_place(|| ctx.storage.delete(key))? {
        return Err(file_not_found(key));
    }
    info!(%key, user = ?viewer.user(), "file deleted");
    Ok(empty_response(StatusCode::NO_CONTENT))
}
