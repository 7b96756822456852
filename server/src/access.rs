//! Who may read which package.
//!
//! The proxy never stores users itself. An [`AccessDirectory`] maps bearer tokens to
//! users and answers whether a user has been granted access to a package.

use {
    anyhow::{Context as _, Result},
    derive_more::{Display, From, Into},
    futures::future::{BoxFuture, FutureExt},
    kontecst_protocol::{AccessToken, FileMetadata, sanitize_package_id},
    serde::{Deserialize, Serialize},
    sqlx::PgPool,
    std::{
        collections::{HashMap, HashSet},
        path::Path,
    },
    tracing::{info, warn},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, From, Into, Serialize, Deserialize)]
pub struct UserId(String);

impl From<&str> for UserId {
    #[inline]
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

pub trait AccessDirectory: Send + Sync {
    /// Returns `None` if the token is unknown or revoked.
    fn resolve_token<'a>(
        &'a self,
        token: &'a AccessToken,
    ) -> BoxFuture<'a, Result<Option<UserId>>>;

    fn has_grant<'a>(
        &'a self,
        user: &'a UserId,
        package_id: &'a str,
    ) -> BoxFuture<'a, Result<bool>>;
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StaticUser {
    id: UserId,
    #[serde(default)]
    token_hashes: Vec<String>,
    #[serde(default)]
    packages: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StaticDirectoryFile {
    #[serde(default)]
    users: Vec<StaticUser>,
}

/// Directory kept in memory, loaded from a json5 file:
///
/// ```json5
/// {
///     users: [
///         { id: "alice", token_hashes: ["<sha256 hex>"], packages: ["docs"] },
///     ],
/// }
/// ```
#[derive(Debug, Default)]
pub struct StaticDirectory {
    users_by_token_hash: HashMap<String, UserId>,
    grants: HashMap<UserId, HashSet<String>>,
}

impl StaticDirectory {
    #[inline]
    pub fn load(path: &Path) -> Result<Self> {
        let file: StaticDirectoryFile = json5::from_str(&fs_err::read_to_string(path)?)
            .with_context(|| format!("failed to parse access file {}", path.display()))?;
        let mut directory = Self::default();
        for user in file.users {
            for hash in user.token_hashes {
                directory.insert_token_hash(hash, user.id.clone());
            }
            directory.insert_grants(&user.id, user.packages.as_slice());
        }
        info!(
            path = %path.display(),
            users = directory.grants.len(),
            "loaded access file"
        );
        Ok(directory)
    }

    /// Adds a user with one token and grants for `packages`.
    #[must_use]
    #[inline]
    pub fn with_user(
        mut self,
        id: impl Into<UserId>,
        token: &AccessToken,
        packages: &[&str],
    ) -> Self {
        let id = id.into();
        self.insert_token_hash(token.hash_hex(), id.clone());
        self.insert_grants(&id, packages);
        self
    }

    fn insert_token_hash(&mut self, hash: String, user: UserId) {
        self.users_by_token_hash.insert(hash.to_ascii_lowercase(), user);
    }

    fn insert_grants(&mut self, user: &UserId, packages: &[impl AsRef<str>]) {
        self.grants.entry(user.clone()).or_default().extend(
            packages
                .iter()
                .map(|package| sanitize_package_id(package.as_ref())),
        );
    }
}

impl AccessDirectory for StaticDirectory {
    #[inline]
    fn resolve_token<'a>(
        &'a self,
        token: &'a AccessToken,
    ) -> BoxFuture<'a, Result<Option<UserId>>> {
        let user = self.users_by_token_hash.get(&token.hash_hex()).cloned();
        async move { Ok(user) }.boxed()
    }

    #[inline]
    fn has_grant<'a>(
        &'a self,
        user: &'a UserId,
        package_id: &'a str,
    ) -> BoxFuture<'a, Result<bool>> {
        let granted = self
            .grants
            .get(user)
            .is_some_and(|packages| packages.contains(package_id));
        async move { Ok(granted) }.boxed()
    }
}

/// Directory backed by the `access_tokens` and `package_access` tables.
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    #[inline]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("failed to connect to database")?;
        Ok(Self { pool })
    }

    #[must_use]
    #[inline]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl AccessDirectory for PgDirectory {
    #[inline]
    fn resolve_token<'a>(
        &'a self,
        token: &'a AccessToken,
    ) -> BoxFuture<'a, Result<Option<UserId>>> {
        async move {
            let user = sqlx::query_scalar::<_, String>(
                "SELECT user_id FROM access_tokens WHERE token_hash = $1 AND revoked_at IS NULL",
            )
            .bind(token.hash_hex())
            .fetch_optional(&self.pool)
            .await?;
            Ok(user.map(UserId))
        }
        .boxed()
    }

    #[inline]
    fn has_grant<'a>(
        &'a self,
        user: &'a UserId,
        package_id: &'a str,
    ) -> BoxFuture<'a, Result<bool>> {
        async move {
            let granted = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM package_access WHERE package_id = $1 AND user_id = $2)",
            )
            .bind(package_id)
            .bind(&user.0)
            .fetch_one(&self.pool)
            .await?;
            Ok(granted)
        }
        .boxed()
    }
}

/// The caller of one request, with grant lookups cached for the request's lifetime.
pub struct Viewer<'a> {
    directory: &'a dyn AccessDirectory,
    user: Option<UserId>,
    grants: HashMap<String, bool>,
}

impl<'a> Viewer<'a> {
    #[must_use]
    #[inline]
    pub fn anonymous(directory: &'a dyn AccessDirectory) -> Self {
        Self {
            directory,
            user: None,
            grants: HashMap::new(),
        }
    }

    /// An unknown token makes the caller anonymous.
    #[inline]
    pub async fn authenticate(
        directory: &'a dyn AccessDirectory,
        token: Option<&AccessToken>,
    ) -> Result<Self> {
        let mut viewer = Self::anonymous(directory);
        if let Some(token) = token {
            viewer.user = directory.resolve_token(token).await?;
            if viewer.user.is_none() {
                warn!(?token, "unknown access token");
            }
        }
        Ok(viewer)
    }

    #[must_use]
    #[inline]
    pub fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    /// Always `false` for anonymous callers.
    #[inline]
    pub async fn has_grant(&mut self, package_id: &str) -> Result<bool> {
        let Some(user) = &self.user else {
            return Ok(false);
        };
        if let Some(granted) = self.grants.get(package_id) {
            return Ok(*granted);
        }
        let granted = self.directory.has_grant(user, package_id).await?;
        self.grants.insert(package_id.to_owned(), granted);
        Ok(granted)
    }

    /// Public files are readable by anyone, private ones need a grant for the package.
    #[inline]
    pub async fn can_read(&mut self, metadata: &FileMetadata) -> Result<bool> {
        if metadata.is_public {
            return Ok(true);
        }
        self.has_grant(&metadata.package_id).await
    }
}
