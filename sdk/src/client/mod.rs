use {
    bytes::Bytes,
    kontecst_protocol::{
        AccessToken, DateTimeUtc, ErrorResponse, FileKey, FileMetadata, HealthResponse,
        ListFilesResponse, VersionKey,
        endpoints::{
            self, CREATED_AT_HEADER, HEALTH_PATH, PACKAGE_ID_HEADER, PACKAGE_PUBLIC_HEADER,
            PACKAGE_VERSION_HEADER,
        },
    },
    reqwest::{
        Method, RequestBuilder, StatusCode,
        header::{CONTENT_LENGTH, HeaderMap},
    },
    std::{result, time::Duration},
    thiserror::Error,
    tracing::instrument,
    url::Url,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("server responded with {status}: {message}")]
    Status { status: StatusCode, message: String },
}

impl ClientError {
    #[must_use]
    #[inline]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(err) => err.status(),
            Self::Url(_) => None,
        }
    }
}

pub type Result<T, E = ClientError> = result::Result<T, E>;

/// Headers returned for a stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHead {
    pub package_id: Option<String>,
    pub version: Option<String>,
    pub content_length: Option<u64>,
    pub created_at: Option<DateTimeUtc>,
}

impl FileHead {
    fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(ToOwned::to_owned)
        };
        Self {
            package_id: header(PACKAGE_ID_HEADER),
            version: header(PACKAGE_VERSION_HEADER),
            content_length: header(CONTENT_LENGTH.as_str()).and_then(|v| v.parse().ok()),
            created_at: header(CREATED_AT_HEADER).and_then(|v| v.parse().ok()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub head: FileHead,
    pub content: Bytes,
}

/// Client of the proxy API.
///
/// Reuse created client or clone it in order to reuse a connection pool.
#[derive(Clone)]
pub struct Client {
    reqwest: reqwest::Client,
    server_url: Url,
    token: Option<AccessToken>,
}

impl Client {
    #[inline]
    pub fn new(server_url: Url, token: Option<AccessToken>) -> Result<Self> {
        Ok(Self {
            server_url,
            token,
            reqwest: reqwest::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()?,
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.server_url.join(path)?;
        let builder = self.reqwest.request(method, url);
        Ok(match &self.token {
            Some(token) => builder.bearer_auth(token.as_unmasked_str()),
            None => builder,
        })
    }

    #[inline]
    pub async fn health(&self) -> Result<HealthResponse> {
        let response = check_status(self.request(Method::GET, HEALTH_PATH)?.send().await?).await?;
        Ok(response.json().await?)
    }

    /// Returns `None` if the file doesn't exist.
    #[instrument(skip(self), fields(key = %key))]
    #[inline]
    pub async fn get_file(&self, key: &FileKey) -> Result<Option<DownloadedFile>> {
        let response = self
            .request(Method::GET, &endpoints::file_path(key))?
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;
        let head = FileHead::from_headers(response.headers());
        let content = response.bytes().await?;
        Ok(Some(DownloadedFile { head, content }))
    }

    /// Returns `None` if the file doesn't exist.
    #[instrument(skip(self), fields(key = %key))]
    #[inline]
    pub async fn head_file(&self, key: &FileKey) -> Result<Option<FileHead>> {
        let response = self
            .request(Method::HEAD, &endpoints::file_path(key))?
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;
        Ok(Some(FileHead::from_headers(response.headers())))
    }

    /// Lists metadata of files in a version that the caller is allowed to read.
    #[instrument(skip(self), fields(key = %key))]
    #[inline]
    pub async fn list_files(&self, key: &VersionKey) -> Result<Vec<FileMetadata>> {
        let response = self
            .request(Method::GET, &endpoints::version_path(key))?
            .send()
            .await?;
        let response: ListFilesResponse = check_status(response).await?.json().await?;
        Ok(response.files)
    }

    #[instrument(skip(self, content), fields(key = %key))]
    #[inline]
    pub async fn put_file(
        &self,
        key: &FileKey,
        content: impl Into<Bytes>,
        is_public: bool,
    ) -> Result<FileMetadata> {
        let response = self
            .request(Method::PUT, &endpoints::file_path(key))?
            .header(PACKAGE_PUBLIC_HEADER, if is_public { "true" } else { "false" })
            .body(content.into())
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    /// Returns `false` if the file didn't exist.
    #[instrument(skip(self), fields(key = %key))]
    #[inline]
    pub async fn delete_file(&self, key: &FileKey) -> Result<bool> {
        let response = self
            .request(Method::DELETE, &endpoints::file_path(key))?
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_status(response).await?;
        Ok(true)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&text)
        .map(|response| response.error)
        .unwrap_or(text);
    Err(ClientError::Status { status, message })
}
