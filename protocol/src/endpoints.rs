//! HTTP paths and headers of the proxy API.
//!
//! | Method | Path | Response |
//! |---|---|---|
//! | `GET` | `/health` | [`HealthResponse`](crate::HealthResponse) |
//! | `GET`, `HEAD` | `/api/files/{package}/{version}/{filename}` | raw Markdown |
//! | `PUT`, `DELETE` | `/api/files/{package}/{version}/{filename}` | [`FileMetadata`](crate::FileMetadata), empty |
//! | `GET` | `/api/files/{package}/{version}` | [`ListFilesResponse`](crate::ListFilesResponse) |

use {
    crate::path::{FileKey, VersionKey},
    percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode},
};

pub const HEALTH_PATH: &str = "/health";
pub const FILES_PREFIX: &str = "/api/files/";

pub const PACKAGE_ID_HEADER: &str = "x-package-id";
pub const PACKAGE_VERSION_HEADER: &str = "x-package-version";
pub const CREATED_AT_HEADER: &str = "x-created-at";
/// Request header of uploads; `true` marks the stored file as public.
pub const PACKAGE_PUBLIC_HEADER: &str = "x-package-public";

pub const MARKDOWN_CONTENT_TYPE: &str = "text/markdown; charset=utf-8";

const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[must_use]
#[inline]
pub fn version_path(key: &VersionKey) -> String {
    format!(
        "{FILES_PREFIX}{}/{}",
        utf8_percent_encode(key.package_id(), SEGMENT),
        utf8_percent_encode(key.version(), SEGMENT),
    )
}

#[must_use]
#[inline]
pub fn file_path(key: &FileKey) -> String {
    format!(
        "{}/{}",
        version_path(key.version_key()),
        utf8_percent_encode(key.filename(), SEGMENT),
    )
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "test")]
mod tests {
    use super::*;

    #[test]
    fn paths_are_encoded() {
        let key = FileKey::new("pkg", "1.0", "my notes?.md").unwrap();
        assert_eq!(file_path(&key), "/api/files/pkg/1.0/my%20notes%3F.md");
        assert_eq!(version_path(key.version_key()), "/api/files/pkg/1.0");
    }
}
