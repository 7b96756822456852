pub mod credentials;
pub mod endpoints;
mod path;

pub use crate::{
    credentials::{AccessToken, Algorithm, EncryptionKey},
    path::{
        ENVELOPE_EXTENSION, FileKey, KeyError, MAX_COMPONENT_LEN, VersionKey, sanitize_filename,
        sanitize_package_id, sanitize_version,
    },
};
use {
    chrono::Utc,
    serde::{Deserialize, Serialize},
};

pub type DateTimeUtc = chrono::DateTime<Utc>;

/// Plaintext metadata stored next to the ciphertext of every file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub package_id: String,
    pub version: String,
    pub filename: String,
    pub is_public: bool,
    pub created_at: DateTimeUtc,
}

impl FileMetadata {
    #[inline]
    pub fn new(key: &FileKey, is_public: bool, created_at: DateTimeUtc) -> Self {
        Self {
            package_id: key.package_id().to_owned(),
            version: key.version().to_owned(),
            filename: key.filename().to_owned(),
            is_public,
            created_at,
        }
    }

    #[inline]
    pub fn key(&self) -> Result<FileKey, KeyError> {
        FileKey::new(&self.package_id, &self.version, &self.filename)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilesResponse {
    pub files: Vec<FileMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTimeUtc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "test")]
mod tests {
    use {super::*, chrono::TimeZone};

    #[test]
    fn metadata_json_is_camel_case() {
        let key = FileKey::new("pkg", "1.0.0", "intro.md").unwrap();
        let created_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let metadata = FileMetadata::new(&key, true, created_at);
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "packageId": "pkg",
                "version": "1.0.0",
                "filename": "intro.md",
                "isPublic": true,
                "createdAt": "2024-05-01T12:00:00Z",
            })
        );
        assert_eq!(metadata.key().unwrap(), key);
    }
}
