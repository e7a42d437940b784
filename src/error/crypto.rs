/// Errors that can occur while negotiating or using the MSE handshake for a
/// single peer link.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CryptoError {
  #[error("peer public key must be {expected} bytes, got {actual}")]
  /// The peer's DH public key was not exactly [`crate::crypto::PUBLIC_KEY_LEN`] bytes.
  InvalidPublicKeyLength { expected: usize, actual: usize },

  #[error("diffie-hellman key exchange failed to produce a shared secret")]
  /// Key agreement did not produce a usable secret (e.g. peer key was out of
  /// range for the group).
  KeyExchangeFailed,

  #[error("cannot derive key material before a shared secret is established")]
  /// `deriveSha1`/`initEncrypt`/`initDecrypt` was called before `computeSecret`.
  NoSharedSecret,

  #[error("cipher stream used before it was initialized")]
  /// `encrypt`/`decrypt` was called before the matching `init*` call.
  ///
  /// Unlike the original C implementation, this is a hard error rather than
  /// a silent passthrough of the plaintext.
  NotInitialized,
}

pub type Result<T, E = CryptoError> = std::result::Result<T, E>;
