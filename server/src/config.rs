use {
    anyhow::{Context as _, Result},
    byte_unit::Byte,
    derivative::Derivative,
    kontecst_protocol::{Algorithm, EncryptionKey},
    kontecst_sdk::crypto::Cipher,
    serde::{Deserialize, Serialize},
    std::{
        env,
        net::SocketAddr,
        path::{Path, PathBuf},
    },
};

#[derive(Derivative, Clone, Serialize, Deserialize)]
#[derivative(Debug)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    /// Required. Kept optional here so that a missing key is reported with a clear message.
    #[serde(default)]
    pub encryption_key: Option<EncryptionKey>,
    #[serde(default)]
    pub encryption_algorithm: Algorithm,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[derivative(Debug = "ignore")]
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub access_file: Option<PathBuf>,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: Byte,
}

fn default_storage_path() -> PathBuf {
    "/data/files".into()
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3001))
}

fn default_log_filter() -> String {
    "info".into()
}

fn default_max_upload_size() -> Byte {
    Byte::from_u64(50_000_000)
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            encryption_key: None,
            encryption_algorithm: Algorithm::default(),
            bind_addr: default_bind_addr(),
            database_url: None,
            access_file: None,
            log_filter: default_log_filter(),
            max_upload_size: default_max_upload_size(),
        }
    }
}

impl Config {
    /// Reads the config file (if any), then applies environment overrides.
    #[inline]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::parse(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| env::var(name).ok())?;
        Ok(config)
    }

    #[inline]
    pub fn parse(path: &Path) -> Result<Self> {
        json5::from_str(&fs_err::read_to_string(path)?)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Overrides fields from variables returned by `var`. Empty values are ignored.
    #[inline]
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |name: &str| var(name).filter(|value| !value.trim().is_empty());

        if let Some(value) = var("STORAGE_PATH") {
            self.storage_path = value.into();
        }
        if let Some(value) = var("ENCRYPTION_KEY") {
            self.encryption_key = Some(
                value
                    .trim()
                    .parse()
                    .context("invalid ENCRYPTION_KEY, expected 64 hex characters")?,
            );
        }
        if let Some(value) = var("ENCRYPTION_ALGORITHM") {
            self.encryption_algorithm = value.parse().context("invalid ENCRYPTION_ALGORITHM")?;
        }
        if let Some(value) = var("BIND_ADDR") {
            self.bind_addr = value.trim().parse().context("invalid BIND_ADDR")?;
        }
        if let Some(value) = var("DATABASE_URL") {
            self.database_url = Some(value);
        }
        if let Some(value) = var("ACCESS_FILE") {
            self.access_file = Some(value.into());
        }
        if let Some(value) = var("LOG_FILTER") {
            self.log_filter = value;
        }
        if let Some(value) = var("MAX_UPLOAD_SIZE") {
            self.max_upload_size = value.trim().parse().context("invalid MAX_UPLOAD_SIZE")?;
        }
        Ok(())
    }

    /// Fails if no encryption key is configured.
    #[inline]
    pub fn cipher(&self) -> Result<Cipher> {
        let key = self
            .encryption_key
            .as_ref()
            .context("encryption key is not configured, set ENCRYPTION_KEY")?;
        Ok(Cipher::new(self.encryption_algorithm, key))
    }
}
