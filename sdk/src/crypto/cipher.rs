use {
    aes_gcm::{
        AesGcm, Key, Nonce, Tag,
        aead::{self, AeadInPlace, KeyInit, consts::U16},
        aes::Aes256,
    },
    kontecst_protocol::{Algorithm, EncryptionKey},
    rand::{TryRngCore, rngs::OsRng},
    serde::{Deserialize, Serialize},
    std::fmt::{self, Debug},
    thiserror::Error,
};

pub const IV_LENGTH: usize = 16;
pub const AUTH_TAG_LENGTH: usize = 16;

/// AES-256-GCM with a 128-bit IV.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("failed to decode `{field}`: {reason}")]
    Decode { field: &'static str, reason: String },
    #[error("authentication tag mismatch: data is corrupted or was encrypted with another key")]
    Integrity,
    #[error("failed to generate IV: {0}")]
    Rng(String),
    #[error("encryption failed")]
    Encrypt,
}

/// Encrypted content as it appears in the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedFields {
    pub encrypted: String,
    pub iv: String,
    pub auth_tag: String,
}

impl EncryptedFields {
    /// Length of the plaintext, without decrypting.
    #[must_use]
    #[inline]
    pub fn plaintext_len(&self) -> u64 {
        u64::try_from(self.encrypted.len() / 2).unwrap_or(u64::MAX)
    }
}

pub struct Cipher {
    algorithm: Algorithm,
    inner: Aes256Gcm16,
}

impl Cipher {
    #[must_use]
    #[inline]
    pub fn new(algorithm: Algorithm, key: &EncryptionKey) -> Self {
        let inner = match algorithm {
            Algorithm::Aes256Gcm => Aes256Gcm16::new(&Key::<Aes256Gcm16>::from(*key.get())),
        };
        Self { algorithm, inner }
    }

    #[must_use]
    #[inline]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    #[inline]
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedFields, CryptoError> {
        let mut iv = [0u8; IV_LENGTH];
        OsRng
            .try_fill_bytes(&mut iv)
            .map_err(|err| CryptoError::Rng(err.to_string()))?;
        let mut buffer = plaintext.to_vec();
        let tag = self
            .inner
            .encrypt_in_place_detached(&Nonce::<U16>::from(iv), b"", &mut buffer)
            .map_err(|aead::Error| CryptoError::Encrypt)?;
        Ok(EncryptedFields {
            encrypted: hex::encode(buffer),
            iv: hex::encode(iv),
            auth_tag: hex::encode(tag),
        })
    }

    #[inline]
    pub fn decrypt(&self, fields: &EncryptedFields) -> Result<Vec<u8>, CryptoError> {
        let iv = decode_fixed::<IV_LENGTH>("iv", &fields.iv)?;
        let tag = decode_fixed::<AUTH_TAG_LENGTH>("authTag", &fields.auth_tag)?;
        let mut buffer = hex::decode(&fields.encrypted).map_err(|err| CryptoError::Decode {
            field: "encrypted",
            reason: err.to_string(),
        })?;
        self.inner
            .decrypt_in_place_detached(
                &Nonce::<U16>::from(iv),
                b"",
                &mut buffer,
                &Tag::<U16>::from(tag),
            )
            .map_err(|aead::Error| CryptoError::Integrity)?;
        Ok(buffer)
    }
}

impl Debug for Cipher {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

fn decode_fixed<const N: usize>(field: &'static str, value: &str) -> Result<[u8; N], CryptoError> {
    let bytes = hex::decode(value).map_err(|err| CryptoError::Decode {
        field,
        reason: err.to_string(),
    })?;
    <[u8; N]>::try_from(bytes).map_err(|bytes| CryptoError::Decode {
        field,
        reason: format!("invalid length; got {} bytes, expected {N}", bytes.len()),
    })
}

#[cfg(test)]
#[expect(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    reason = "test"
)]
mod tests {
    use super::*;

    fn cipher() -> Cipher {
        Cipher::new(Algorithm::Aes256Gcm, &EncryptionKey::generate().unwrap())
    }

    fn flip_bit(hex_value: &str, bit: usize) -> String {
        let mut bytes = hex::decode(hex_value).unwrap();
        bytes[bit / 8] ^= 1 << (bit % 8);
        hex::encode(bytes)
    }

    #[test]
    fn roundtrip() {
        let cipher = cipher();
        for plaintext in [
            &b""[..],
            b"# Title\n\nSome *markdown*.",
            &[0u8, 255, 1, 254][..],
        ] {
            let fields = cipher.encrypt(plaintext).unwrap();
            assert_eq!(fields.iv.len(), IV_LENGTH * 2);
            assert_eq!(fields.auth_tag.len(), AUTH_TAG_LENGTH * 2);
            assert_eq!(
                fields.plaintext_len(),
                u64::try_from(plaintext.len()).unwrap()
            );
            assert_eq!(cipher.decrypt(&fields).unwrap(), plaintext);
        }
    }

    #[test]
    fn large_roundtrip() {
        let cipher = cipher();
        let plaintext: Vec<u8> = (0..1_000_000_u32).map(|_| rand::random::<u8>()).collect();
        let fields = cipher.encrypt(&plaintext).unwrap();
        assert_eq!(cipher.decrypt(&fields).unwrap(), plaintext);
    }

    #[test]
    fn iv_is_fresh_for_every_call() {
        let cipher = cipher();
        let first = cipher.encrypt(b"same content").unwrap();
        let second = cipher.encrypt(b"same content").unwrap();
        assert_ne!(first.iv, second.iv);
        assert_ne!(first.encrypted, second.encrypted);
        assert_eq!(
            cipher.decrypt(&first).unwrap(),
            cipher.decrypt(&second).unwrap()
        );
    }

    #[test]
    fn decrypt_is_deterministic() {
        let cipher = cipher();
        let fields = cipher.encrypt(b"stable").unwrap();
        let first = cipher.decrypt(&fields).unwrap();
        assert_eq!(cipher.decrypt(&fields).unwrap(), first);
    }

    #[test]
    fn any_flipped_ciphertext_bit_is_detected() {
        let cipher = cipher();
        let fields = cipher.encrypt(b"tamper me").unwrap();
        for bit in 0..fields.encrypted.len() * 4 {
            let tampered = EncryptedFields {
                encrypted: flip_bit(&fields.encrypted, bit),
                ..fields.clone()
            };
            assert!(matches!(
                cipher.decrypt(&tampered),
                Err(CryptoError::Integrity)
            ));
        }
    }

    #[test]
    fn any_flipped_tag_bit_is_detected() {
        let cipher = cipher();
        let fields = cipher.encrypt(b"tamper me").unwrap();
        for bit in 0..AUTH_TAG_LENGTH * 8 {
            let tampered = EncryptedFields {
                auth_tag: flip_bit(&fields.auth_tag, bit),
                ..fields.clone()
            };
            assert!(matches!(
                cipher.decrypt(&tampered),
                Err(CryptoError::Integrity)
            ));
        }
    }

    #[test]
    fn wrong_key_or_iv_is_detected() {
        let fields = cipher().encrypt(b"secret").unwrap();
        assert!(matches!(
            cipher().decrypt(&fields),
            Err(CryptoError::Integrity)
        ));

        let cipher = cipher();
        let fields = cipher.encrypt(b"secret").unwrap();
        let other_iv = EncryptedFields {
            iv: flip_bit(&fields.iv, 0),
            ..fields
        };
        assert!(matches!(
            cipher.decrypt(&other_iv),
            Err(CryptoError::Integrity)
        ));
    }

    #[test]
    fn malformed_fields_are_decode_errors() {
        let cipher = cipher();
        let fields = cipher.encrypt(b"content").unwrap();

        let short_iv = EncryptedFields {
            iv: "00".repeat(12),
            ..fields.clone()
        };
        assert!(matches!(
            cipher.decrypt(&short_iv),
            Err(CryptoError::Decode { field: "iv", .. })
        ));

        let bad_tag = EncryptedFields {
            auth_tag: "zz".repeat(16),
            ..fields.clone()
        };
        assert!(matches!(
            cipher.decrypt(&bad_tag),
            Err(CryptoError::Decode {
                field: "authTag",
                ..
            })
        ));

        let odd_ciphertext = EncryptedFields {
            encrypted: format!("{}0", fields.encrypted),
            ..fields
        };
        assert!(matches!(
            cipher.decrypt(&odd_ciphertext),
            Err(CryptoError::Decode {
                field: "encrypted",
                ..
            })
        ));
    }

    #[test]
    fn debug_hides_key() {
        let key = EncryptionKey::generate().unwrap();
        let cipher = Cipher::new(Algorithm::Aes256Gcm, &key);
        assert_eq!(cipher.algorithm(), Algorithm::Aes256Gcm);
        let debug = format!("{cipher:?}");
        assert_eq!(debug, "Cipher { algorithm: Aes256Gcm, .. }");
        assert!(!debug.contains(&key.display_unmasked().to_string()));
    }

    #[test]
    fn fields_serialize_as_envelope_keys() {
        let fields = cipher().encrypt(b"x").unwrap();
        let json = serde_json::to_value(&fields).unwrap();
        assert!(json.get("encrypted").is_some());
        assert!(json.get("iv").is_some());
        assert!(json.get("authTag").is_some());
    }
}
