//! File content is encrypted with AES-256-GCM using the single deployment-wide key.
//!
//! Every call to [`Cipher::encrypt`] draws a fresh random 128-bit IV from the OS RNG.
//! GCM is a counter mode, so an IV must never be reused with the same key.
//! The 128-bit authentication tag is kept separately from the ciphertext, and no
//! associated data is used.
//!
//! All three parts are hex-encoded so they can be embedded into the JSON envelope:
//!
//! - `encrypted` - ciphertext, same length as the plaintext;
//! - `iv` - 16 bytes;
//! - `authTag` - 16 bytes.
//!
//! Decryption verifies the tag before returning anything, so tampered or corrupted
//! data (or a wrong key) results in [`CryptoError::Integrity`] and never in wrong plaintext.

mod cipher;

pub use cipher::{AUTH_TAG_LENGTH, Cipher, CryptoError, EncryptedFields, IV_LENGTH};
