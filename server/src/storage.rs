//! Encrypted file storage on the local filesystem.
//!
//! Each file is one JSON envelope at `{root}/{package_id}/{version}/{filename}.enc`
//! holding the hex-encoded ciphertext, IV and auth tag next to plaintext metadata.
//! Envelopes are never modified in place: every write encrypts with a fresh IV into
//! a temporary file in the target directory and renames it over the old envelope,
//! so readers see either the old or the new version, never a partial one.

use {
    chrono::Utc,
    fs_err::{create_dir_all, read, read_dir, remove_file, rename},
    kontecst_protocol::{ENVELOPE_EXTENSION, FileKey, FileMetadata, VersionKey},
    kontecst_sdk::crypto::{Cipher, CryptoError, EncryptedFields},
    serde::{Deserialize, Serialize},
    std::{
        ffi::OsStr,
        io::{self, Write},
        path::{Path, PathBuf},
        result,
    },
    tempfile::Builder,
    thiserror::Error,
    tracing::debug,
};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("invalid envelope at {}: {source}", path.display())]
    InvalidEnvelope {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decrypt {}: {source}", path.display())]
    Decrypt {
        path: PathBuf,
        #[source]
        source: CryptoError,
    },
    #[error("failed to encrypt content: {0}")]
    Encrypt(#[source] CryptoError),
}

impl StorageError {
    /// The envelope exists but its auth tag does not match.
    #[must_use]
    #[inline]
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::Decrypt {
                source: CryptoError::Integrity,
                ..
            }
        )
    }
}

pub type Result<T, E = StorageError> = result::Result<T, E>;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(flatten)]
    fields: EncryptedFields,
    metadata: FileMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub content: Vec<u8>,
    pub metadata: FileMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub metadata: FileMetadata,
    /// Plaintext length in bytes.
    pub size: u64,
}

pub struct Storage {
    root: PathBuf,
    cipher: Cipher,
}

fn not_found_as_none<T>(result: io::Result<T>) -> io::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

impl Storage {
    #[inline]
    pub fn new(root: PathBuf, cipher: Cipher) -> Result<Self> {
        create_dir_all(&root)?;
        Ok(Self { root, cipher })
    }

    #[must_use]
    #[inline]
    pub fn file_path(&self, key: &FileKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    /// Encrypts `content` and writes it under `key`, replacing any previous file.
    #[inline]
    pub fn store(&self, key: &FileKey, content: &[u8], is_public: bool) -> Result<FileMetadata> {
        let metadata = FileMetadata::new(key, is_public, Utc::now());
        self.write_envelope(key, content, metadata.clone())?;
        debug!(%key, size = content.len(), is_public, "stored file");
        Ok(metadata)
    }

    /// Returns `None` if the file doesn't exist.
    #[inline]
    pub fn retrieve(&self, key: &FileKey) -> Result<Option<StoredFile>> {
        let path = self.file_path(key);
        let Some(envelope) = read_envelope(&path)? else {
            return Ok(None);
        };
        let content = self
            .cipher
            .decrypt(&envelope.fields)
            .map_err(|source| StorageError::Decrypt { path, source })?;
        Ok(Some(StoredFile {
            content,
            metadata: envelope.metadata,
        }))
    }

    /// Metadata and plaintext size of a file, without decrypting it.
    #[inline]
    pub fn stat(&self, key: &FileKey) -> Result<Option<FileStat>> {
        Ok(read_envelope(&self.file_path(key))?.map(|envelope| FileStat {
            size: envelope.fields.plaintext_len(),
            metadata: envelope.metadata,
        }))
    }

    /// Metadata of all files of a version, in no particular order.
    #[inline]
    pub fn list(&self, key: &VersionKey) -> Result<Vec<FileMetadata>> {
        let dir = self.root.join(key.relative_dir());
        let Some(entries) = not_found_as_none(read_dir(&dir))? else {
            return Ok(Vec::new());
        };
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension() != Some(OsStr::new(ENVELOPE_EXTENSION))
                || !entry.file_type()?.is_file()
            {
                continue;
            }
            // The file may have been deleted since the directory was read.
            if let Some(envelope) = read_envelope(&path)? {
                files.push(envelope.metadata);
            }
        }
        Ok(files)
    }

    /// Returns `false` if the file didn't exist.
    #[inline]
    pub fn delete(&self, key: &FileKey) -> Result<bool> {
        let removed = not_found_as_none(remove_file(self.file_path(key)))?.is_some();
        debug!(%key, removed, "deleted file");
        Ok(removed)
    }

    /// Rewrites the envelope with a new visibility flag, keeping the creation time.
    /// Returns `None` if the file doesn't exist.
    #[inline]
    pub fn set_visibility(&self, key: &FileKey, is_public: bool) -> Result<Option<FileMetadata>> {
        let Some(file) = self.retrieve(key)? else {
            return Ok(None);
        };
        let metadata = FileMetadata {
            is_public,
            ..file.metadata
        };
        self.write_envelope(key, &file.content, metadata.clone())?;
        Ok(Some(metadata))
    }

    fn write_envelope(&self, key: &FileKey, content: &[u8], metadata: FileMetadata) -> Result<()> {
        let envelope = Envelope {
            fields: self.cipher.encrypt(content).map_err(StorageError::Encrypt)?,
            metadata,
        };
        let data = serde_json::to_vec(&envelope).map_err(io::Error::other)?;

        let dir = self.root.join(key.version_key().relative_dir());
        create_dir_all(&dir)?;
        let mut file = Builder::new().prefix(".upload-").tempfile_in(&dir)?;
        file.write_all(&data)?;
        file.as_file().sync_all()?;
        let (_, tmp_path) = file.keep().map_err(|err| err.error)?;
        if let Err(err) = rename(&tmp_path, self.file_path(key)) {
            let _ = remove_file(&tmp_path);
            return Err(err.into());
        }
        Ok(())
    }
}

fn read_envelope(path: &Path) -> Result<Option<Envelope>> {
    let Some(data) = not_found_as_none(read(path))? else {
        return Ok(None);
    };
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|source| StorageError::InvalidEnvelope {
            path: path.to_owned(),
            source,
        })
}

#[cfg(test)]
#[expect(clippy::unwrap_used, clippy::indexing_slicing, reason = "test")]
mod tests {
    use {
        super::*,
        kontecst_protocol::{Algorithm, EncryptionKey},
        std::thread,
        tempfile::TempDir,
    };

    fn storage(dir: &TempDir) -> Storage {
        let cipher = Cipher::new(Algorithm::Aes256Gcm, &EncryptionKey::generate().unwrap());
        Storage::new(dir.path().join("files"), cipher).unwrap()
    }

    fn key(package_id: &str, version: &str, filename: &str) -> FileKey {
        FileKey::new(package_id, version, filename).unwrap()
    }

    fn raw_envelope(storage: &Storage, key: &FileKey) -> serde_json::Value {
        serde_json::from_slice(&read(storage.file_path(key)).unwrap()).unwrap()
    }

    fn dir_entries(path: &Path) -> Vec<String> {
        let mut names: Vec<String> = read_dir(path)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn store_and_retrieve() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let key = key("pkg", "1.0.0", "intro.md");
        let metadata = storage.store(&key, b"# Intro", true).unwrap();
        assert_eq!(metadata.package_id, "pkg");
        assert_eq!(metadata.filename, "intro.md");
        assert!(metadata.is_public);

        let file = storage.retrieve(&key).unwrap().unwrap();
        assert_eq!(file.content, b"# Intro");
        assert_eq!(file.metadata, metadata);

        let stat = storage.stat(&key).unwrap().unwrap();
        assert_eq!(stat.size, 7);
        assert_eq!(stat.metadata, metadata);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let key = key("nonexistent", "1.0.0", "a.md");
        assert!(storage.retrieve(&key).unwrap().is_none());
        assert!(storage.stat(&key).unwrap().is_none());
        assert!(storage.set_visibility(&key, true).unwrap().is_none());
    }

    #[test]
    fn envelope_format_on_disk() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let key = key("pkg", "1.0.0", "secret.md");
        storage.store(&key, b"top secret markdown", false).unwrap();

        let path = dir.path().join("files/pkg/1.0.0/secret.md.enc");
        let raw = read(&path).unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains("top secret"));

        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json["iv"].as_str().unwrap().len(), 32);
        assert_eq!(json["authTag"].as_str().unwrap().len(), 32);
        assert_eq!(
            json["encrypted"].as_str().unwrap().len(),
            "top secret markdown".len() * 2
        );
        assert_eq!(json["metadata"]["packageId"], "pkg");
        assert_eq!(json["metadata"]["version"], "1.0.0");
        assert_eq!(json["metadata"]["filename"], "secret.md");
        assert_eq!(json["metadata"]["isPublic"], false);
        assert!(json["metadata"]["createdAt"].is_string());
    }

    #[test]
    fn overwrite_replaces_whole_envelope() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let key = key("pkg", "1.0.0", "a.md");
        storage.store(&key, b"first", false).unwrap();
        let first = raw_envelope(&storage, &key);
        storage.store(&key, b"second", true).unwrap();
        let second = raw_envelope(&storage, &key);
        assert_ne!(first["iv"], second["iv"]);

        let file = storage.retrieve(&key).unwrap().unwrap();
        assert_eq!(file.content, b"second");
        assert!(file.metadata.is_public);
        assert_eq!(
            dir_entries(&dir.path().join("files/pkg/1.0.0")),
            vec!["a.md.enc".to_owned()]
        );
    }

    #[test]
    fn readers_never_see_partial_writes() {
        const SIZE: usize = 100_000;

        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let key = key("pkg", "1.0.0", "busy.md");
        let version = key.version_key().clone();
        let contents: Vec<Vec<u8>> = (b'a'..=b'd').map(|c| vec![c; SIZE]).collect();
        storage.store(&key, &contents[0], false).unwrap();

        let (storage, key, version) = (&storage, &key, &version);
        thread::scope(|scope| {
            for content in &contents {
                scope.spawn(move || {
                    for _ in 0..50_u32 {
                        storage.store(key, content, false).unwrap();
                    }
                });
            }
            for _ in 0..4_u32 {
                scope.spawn(move || {
                    for _ in 0..200_u32 {
                        let file = storage.retrieve(key).unwrap().unwrap();
                        assert_eq!(file.content.len(), SIZE);
                        assert!(file.content.iter().all(|&b| b == file.content[0]));

                        let listed = storage.list(version).unwrap();
                        assert_eq!(listed.len(), 1);
                        assert_eq!(listed[0].filename, "busy.md");
                    }
                });
            }
        });
        assert_eq!(
            dir_entries(&dir.path().join("files/pkg/1.0.0")),
            vec!["busy.md.enc".to_owned()]
        );
    }

    #[test]
    fn traversal_stays_inside_root() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let key = key("../../etc", "1.0.0", "../../passwd");
        storage.store(&key, b"x", false).unwrap();
        assert_eq!(
            storage.file_path(&key),
            dir.path().join("files/etc/1.0.0/passwd.enc")
        );
        assert!(storage.file_path(&key).exists());
        assert_eq!(dir_entries(dir.path()), vec!["files".to_owned()]);
    }

    #[test]
    fn list_returns_metadata_only() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        storage.store(&key("pkg", "1.0.0", "a.md"), b"a", true).unwrap();
        storage.store(&key("pkg", "1.0.0", "b.md"), b"b", false).unwrap();
        storage.store(&key("pkg", "2.0.0", "c.md"), b"c", true).unwrap();
        let version_dir = dir.path().join("files/pkg/1.0.0");
        fs_err::write(version_dir.join(".upload-leftover"), b"junk").unwrap();
        fs_err::write(version_dir.join("notes.txt"), b"junk").unwrap();

        let version = VersionKey::new("pkg", "1.0.0").unwrap();
        let mut files = storage.list(&version).unwrap();
        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].filename, "a.md");
        assert!(files[0].is_public);
        assert_eq!(files[1].filename, "b.md");
        assert!(!files[1].is_public);
    }

    #[test]
    fn list_of_missing_version_is_empty() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let version = VersionKey::new("nothing", "0.0.1").unwrap();
        assert!(storage.list(&version).unwrap().is_empty());
    }

    #[test]
    fn delete_twice() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let key = key("pkg", "1.0.0", "a.md");
        storage.store(&key, b"a", false).unwrap();
        assert!(storage.delete(&key).unwrap());
        assert!(!storage.delete(&key).unwrap());
        assert!(storage.retrieve(&key).unwrap().is_none());
    }

    #[test]
    fn tampered_envelope_is_integrity_failure() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let key = key("pkg", "1.0.0", "a.md");
        storage.store(&key, b"original content", false).unwrap();

        let mut json = raw_envelope(&storage, &key);
        let encrypted = json["encrypted"].as_str().unwrap();
        let flipped = if encrypted.starts_with('0') { "1" } else { "0" };
        let tampered = format!("{flipped}{}", encrypted.get(1..).unwrap());
        json["encrypted"] = tampered.into();
        fs_err::write(storage.file_path(&key), serde_json::to_vec(&json).unwrap()).unwrap();

        let err = storage.retrieve(&key).unwrap_err();
        assert!(err.is_integrity_failure(), "{err}");
    }

    #[test]
    fn other_key_cannot_decrypt() {
        let dir = TempDir::new().unwrap();
        let key = key("pkg", "1.0.0", "a.md");
        storage(&dir).store(&key, b"content", false).unwrap();
        let err = storage(&dir).retrieve(&key).unwrap_err();
        assert!(err.is_integrity_failure(), "{err}");
    }

    #[test]
    fn corrupt_envelope_is_an_error() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let key = key("pkg", "1.0.0", "a.md");
        storage.store(&key, b"a", false).unwrap();
        fs_err::write(storage.file_path(&key), b"{not json").unwrap();
        assert!(matches!(
            storage.retrieve(&key),
            Err(StorageError::InvalidEnvelope { .. })
        ));
        assert!(matches!(
            storage.list(key.version_key()),
            Err(StorageError::InvalidEnvelope { .. })
        ));
    }

    #[test]
    fn set_visibility_rewrites_envelope() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let key = key("pkg", "1.0.0", "a.md");
        let original = storage.store(&key, b"content", false).unwrap();
        let before = raw_envelope(&storage, &key);

        let updated = storage.set_visibility(&key, true).unwrap().unwrap();
        assert!(updated.is_public);
        assert_eq!(updated.created_at, original.created_at);

        let after = raw_envelope(&storage, &key);
        assert_ne!(before["iv"], after["iv"]);
        let file = storage.retrieve(&key).unwrap().unwrap();
        assert_eq!(file.content, b"content");
        assert!(file.metadata.is_public);
    }
}
