//! Logical addressing of stored files.
//!
//! A file is identified by `(package id, version, filename)`. All three parts arrive
//! from URL parameters, so they are sanitized before anything else sees them:
//!
//! - package id: only `[A-Za-z0-9_-]` is kept;
//! - version: only `[A-Za-z0-9.-]` is kept;
//! - filename: only the last path segment is kept (both `/` and `\` separate segments).
//!
//! After sanitization every part must form exactly one normal path component,
//! so `FileKey::relative_path` can never point outside of the storage root.

use {
    serde::{Deserialize, Serialize},
    std::{
        fmt,
        path::{Component, Path, PathBuf},
    },
    thiserror::Error,
};

/// Extension of envelope files on disk.
pub const ENVELOPE_EXTENSION: &str = "enc";

/// Longest accepted component after sanitization. Keeps `{filename}.enc` below
/// the usual 255-byte file name limit.
pub const MAX_COMPONENT_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("{0} is empty after sanitization")]
    Empty(&'static str),
    #[error("{0} is longer than {MAX_COMPONENT_LEN} bytes")]
    TooLong(&'static str),
    #[error("{part} `{value}` is not a valid path component")]
    Reserved { part: &'static str, value: String },
    #[error("filename contains a NUL byte")]
    NulByte,
}

#[must_use]
#[inline]
pub fn sanitize_package_id(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

#[must_use]
#[inline]
pub fn sanitize_version(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '-')
        .collect()
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Returns the last path segment, ignoring trailing separators.
#[must_use]
#[inline]
pub fn sanitize_filename(value: &str) -> &str {
    value
        .trim_end_matches(is_separator)
        .rsplit(is_separator)
        .next()
        .unwrap_or_default()
}

fn check_component(part: &'static str, value: &str) -> Result<(), KeyError> {
    if value.is_empty() {
        return Err(KeyError::Empty(part));
    }
    if value.len() > MAX_COMPONENT_LEN {
        return Err(KeyError::TooLong(part));
    }
    let mut components = Path::new(value).components();
    if !matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) {
        return Err(KeyError::Reserved {
            part,
            value: value.to_owned(),
        });
    }
    Ok(())
}

/// Sanitized `(package id, version)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawVersionKey")]
pub struct VersionKey {
    package_id: String,
    version: String,
}

impl VersionKey {
    #[inline]
    pub fn new(package_id: &str, version: &str) -> Result<Self, KeyError> {
        let package_id = sanitize_package_id(package_id);
        check_component("package id", &package_id)?;
        let version = sanitize_version(version);
        check_component("version", &version)?;
        Ok(Self {
            package_id,
            version,
        })
    }

    #[must_use]
    #[inline]
    pub fn package_id(&self) -> &str {
        &self.package_id
    }

    #[must_use]
    #[inline]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Directory of this version relative to the storage root.
    #[must_use]
    #[inline]
    pub fn relative_dir(&self) -> PathBuf {
        Path::new(&self.package_id).join(&self.version)
    }

    #[inline]
    pub fn file(&self, filename: &str) -> Result<FileKey, KeyError> {
        if filename.contains('\0') {
            return Err(KeyError::NulByte);
        }
        let filename = sanitize_filename(filename);
        check_component("filename", filename)?;
        Ok(FileKey {
            version: self.clone(),
            filename: filename.to_owned(),
        })
    }
}

impl fmt::Display for VersionKey {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.package_id, self.version)
    }
}

/// Sanitized `(package id, version, filename)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawFileKey")]
pub struct FileKey {
    version: VersionKey,
    filename: String,
}

impl FileKey {
    #[inline]
    pub fn new(package_id: &str, version: &str, filename: &str) -> Result<Self, KeyError> {
        VersionKey::new(package_id, version)?.file(filename)
    }

    #[must_use]
    #[inline]
    pub fn version_key(&self) -> &VersionKey {
        &self.version
    }

    #[must_use]
    #[inline]
    pub fn package_id(&self) -> &str {
        self.version.package_id()
    }

    #[must_use]
    #[inline]
    pub fn version(&self) -> &str {
        self.version.version()
    }

    #[must_use]
    #[inline]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Envelope path relative to the storage root:
    /// `{package_id}/{version}/{filename}.enc`.
    #[must_use]
    #[inline]
    pub fn relative_path(&self) -> PathBuf {
        self.version
            .relative_dir()
            .join(format!("{}.{ENVELOPE_EXTENSION}", self.filename))
    }
}

impl fmt::Display for FileKey {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.version, self.filename)
    }
}

// Deserialized keys go through the same sanitization as `new`.

#[derive(Deserialize)]
struct RawVersionKey {
    package_id: String,
    version: String,
}

impl TryFrom<RawVersionKey> for VersionKey {
    type Error = KeyError;

    #[inline]
    fn try_from(raw: RawVersionKey) -> Result<Self, Self::Error> {
        Self::new(&raw.package_id, &raw.version)
    }
}

#[derive(Deserialize)]
struct RawFileKey {
    version: VersionKey,
    filename: String,
}

impl TryFrom<RawFileKey> for FileKey {
    type Error = KeyError;

    #[inline]
    fn try_from(raw: RawFileKey) -> Result<Self, Self::Error> {
        raw.version.file(&raw.filename)
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "test")]
mod tests {
    use super::*;

    #[test]
    fn traversal_is_neutralized() {
        let key = FileKey::new("../../etc", "1.0.0", "../../passwd").unwrap();
        assert_eq!(key.package_id(), "etc");
        assert_eq!(key.version(), "1.0.0");
        assert_eq!(key.filename(), "passwd");
        assert_eq!(key.relative_path(), Path::new("etc/1.0.0/passwd.enc"));

        let root = Path::new("/data/files");
        let full = root.join(key.relative_path());
        assert!(full.starts_with(root));
        assert!(
            full.components()
                .all(|c| matches!(c, Component::RootDir | Component::Normal(_)))
        );
    }

    #[test]
    fn package_id_keeps_allowed_chars() {
        assert_eq!(sanitize_package_id("my_pkg-01"), "my_pkg-01");
        assert_eq!(sanitize_package_id("a.b/c d\0e"), "abcde");
    }

    #[test]
    fn version_keeps_dots() {
        assert_eq!(sanitize_version("1.2.3-beta"), "1.2.3-beta");
        assert_eq!(sanitize_version("v1/../2"), "v1..2");
    }

    #[test]
    fn filename_is_basename() {
        assert_eq!(sanitize_filename("docs/intro.md"), "intro.md");
        assert_eq!(sanitize_filename("..\\..\\win.ini"), "win.ini");
        assert_eq!(sanitize_filename("/abs/path/readme.md"), "readme.md");
        assert_eq!(sanitize_filename("dir/"), "dir");
        assert_eq!(sanitize_filename("///"), "");
    }

    #[test]
    fn rejects_reserved_components() {
        assert_eq!(
            FileKey::new("pkg", "..", "a.md").unwrap_err(),
            KeyError::Reserved {
                part: "version",
                value: "..".into()
            }
        );
        assert!(matches!(
            FileKey::new("pkg", "1.0.0", "a/.."),
            Err(KeyError::Reserved { .. })
        ));
        assert!(matches!(
            FileKey::new("pkg", "1.0.0", "."),
            Err(KeyError::Reserved { .. })
        ));
        assert_eq!(
            FileKey::new("../", "1.0.0", "a.md").unwrap_err(),
            KeyError::Empty("package id")
        );
        assert_eq!(
            FileKey::new("pkg", "1.0.0", "/").unwrap_err(),
            KeyError::Empty("filename")
        );
    }

    #[test]
    fn rejects_nul_and_long_names() {
        assert_eq!(
            FileKey::new("pkg", "1.0.0", "a.md\0.txt").unwrap_err(),
            KeyError::NulByte
        );
        let long = "x".repeat(MAX_COMPONENT_LEN + 1);
        assert_eq!(
            FileKey::new("pkg", "1.0.0", &long).unwrap_err(),
            KeyError::TooLong("filename")
        );
    }

    #[test]
    fn display() {
        let key = FileKey::new("pkg", "2.0", "notes.md").unwrap();
        assert_eq!(key.to_string(), "pkg@2.0/notes.md");
    }

    #[test]
    fn deserialization_sanitizes() {
        let key = FileKey::new("pkg", "1.0", "notes.md").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(serde_json::from_str::<FileKey>(&json).unwrap(), key);

        let escaping = r#"{"version":{"package_id":"..","version":".."},"filename":"escaped"}"#;
        serde_json::from_str::<FileKey>(escaping).unwrap_err();
        let dot_filename = r#"{"version":{"package_id":"pkg","version":"1.0"},"filename":".."}"#;
        serde_json::from_str::<FileKey>(dot_filename).unwrap_err();

        let stripped: FileKey = serde_json::from_str(
            r#"{"version":{"package_id":"../pkg","version":"1.0"},"filename":"a/../b.md"}"#,
        )
        .unwrap();
        assert_eq!(stripped.relative_path(), Path::new("pkg/1.0/b.md.enc"));
    }
}
