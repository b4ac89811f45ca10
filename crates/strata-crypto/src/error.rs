use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Structural and protocol failures.
///
/// A ciphertext that decrypts to the wrong tag or bad padding is not an
/// error: those outcomes are reported as flags on the decryption result.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("ciphertext length {0} is not salt(32) + iv(16) + a positive multiple of 16")]
    CiphertextLength(usize),

    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("{what} must be {expected} bytes, got {actual}")]
    KeyLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Argon2id KDF failed: {0}")]
    Kdf(String),

    #[error("HMAC-SHA512 key rejected: {0}")]
    Mac(String),

    #[error("profile {profile}: {reason}")]
    Profile {
        profile: &'static str,
        reason: String,
    },

    #[error("malformed capability: {0}")]
    Capability(String),

    #[error("KEM error: {0}")]
    Kem(String),

    #[error("record encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}
