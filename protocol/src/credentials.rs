use {
    anyhow::{Error, bail, ensure, format_err},
    derive_more::Display,
    rand::{
        TryRngCore,
        distr::{Alphanumeric, SampleString},
        rand_core,
        rngs::OsRng,
    },
    serde::{Deserialize, Deserializer, Serialize, Serializer, de},
    sha2::{Digest, Sha256},
    std::{
        borrow::Cow,
        fmt::{self, Debug, Display},
        str::FromStr,
    },
};

/// Bearer token presented by a caller of the proxy API.
///
/// Tokens are opaque to the proxy; the access directory maps them to users.
#[derive(Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct AccessToken(String);

const GENERATED_TOKEN_LENGTH: usize = 64;

impl AccessToken {
    #[inline]
    pub fn generate() -> anyhow::Result<Self> {
        let mut rng = rand_core::UnwrapErr(OsRng);
        Ok(Self(
            Alphanumeric.sample_string(&mut rng, GENERATED_TOKEN_LENGTH),
        ))
    }

    #[must_use]
    #[inline]
    pub fn as_unmasked_str(&self) -> &str {
        &self.0
    }

    /// Hex-encoded SHA-256 of the token. Databases store this instead of the token.
    #[must_use]
    #[inline]
    pub fn hash_hex(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }
}

impl FromStr for AccessToken {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ensure!(!s.is_empty(), "access token is empty");
        if let Some(c) = s.chars().find(|c| !c.is_ascii_graphic()) {
            bail!("access token contains invalid character {c:?}");
        }
        Ok(Self(s.to_owned()))
    }
}

impl Debug for AccessToken {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken").finish()
    }
}

pub const ENCRYPTION_KEY_LENGTH: usize = 32;

/// Key used to encrypt every envelope written by a deployment.
#[derive(Clone)]
pub struct EncryptionKey([u8; ENCRYPTION_KEY_LENGTH]);

impl EncryptionKey {
    #[inline]
    pub fn generate() -> anyhow::Result<Self> {
        let mut key = [0u8; ENCRYPTION_KEY_LENGTH];
        OsRng
            .try_fill_bytes(&mut key)
            .map_err(|err| format_err!("failed to generate key: {err}"))?;
        Ok(Self(key))
    }

    #[must_use]
    #[inline]
    pub fn get(&self) -> &[u8; ENCRYPTION_KEY_LENGTH] {
        &self.0
    }

    #[must_use]
    #[inline]
    pub fn display_unmasked(&self) -> impl Display + '_ {
        hex::encode(self.0)
    }
}

impl FromStr for EncryptionKey {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const HEX_LENGTH: usize = ENCRYPTION_KEY_LENGTH * 2;

        ensure!(
            s.len() == HEX_LENGTH,
            "invalid length; got {} hex characters, expected {HEX_LENGTH}",
            s.len(),
        );
        let mut bytes = [0u8; ENCRYPTION_KEY_LENGTH];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|err| format_err!("invalid hex in encryption key: {err}"))?;
        Ok(Self(bytes))
    }
}

impl<'de> Deserialize<'de> for EncryptionKey {
    #[inline]
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Cow::<'_, str>::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

impl Serialize for EncryptionKey {
    #[inline]
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        hex::encode(self.0).serialize(serializer)
    }
}

impl Debug for EncryptionKey {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey").finish()
    }
}

/// Authenticated cipher used for envelopes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum Algorithm {
    /// AES-256 in GCM mode with a 16-byte IV and a 16-byte tag.
    #[default]
    #[serde(rename = "aes-256-gcm")]
    #[display("aes-256-gcm")]
    Aes256Gcm,
}

impl FromStr for Algorithm {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aes-256-gcm" => Ok(Self::Aes256Gcm),
            other => bail!("unsupported encryption algorithm `{other}`"),
        }
    }
}
