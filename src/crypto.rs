//! Message Stream Encryption (MSE) for a single peer link.
//!
//! This implements the handshake and stream ciphers transmission uses to
//! obfuscate the BitTorrent peer wire protocol: a fixed-group
//! Diffie-Hellman key exchange followed by two independently-keyed RC4
//! streams (one per direction). The wire constants below (the DH prime,
//! generator, key lengths, discard length and key-derivation tags) are part
//! of the on-wire contract and must never change.
//!
//! Ported from the semantics of `libtransmission/crypto.c`; the permissive
//! "not yet keyed, so just copy the bytes" fallback from that C
//! implementation is intentionally not carried over here -- see
//! [`CryptoError::NotInitialized`].

use num_bigint::BigUint;
use once_cell::sync::Lazy;
use rand::RngCore;
use sha1::{Digest, Sha1};

use crate::error::crypto::{CryptoError, Result};
use crate::Sha1Hash;

/// Length, in bytes, of the MSE DH prime/public key.
pub const PUBLIC_KEY_LEN: usize = 96;
/// Length, in bytes, of a DH private key.
pub const PRIVATE_KEY_LEN: usize = 20;
/// Number of keystream bytes discarded after keying an RC4 stream, before
/// any real plaintext is processed.
pub const CRYPTO_RC4_DISCARD_LEN: usize = 1024;

/// The fixed 768-bit MSE Diffie-Hellman group prime.
#[rustfmt::skip]
const DH_P: [u8; PUBLIC_KEY_LEN] = [
  0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xC9, 0x0F, 0xDA, 0xA2,
  0x21, 0x68, 0xC2, 0x34, 0xC4, 0xC6, 0x62, 0x8B, 0x80, 0xDC, 0x1C, 0xD1,
  0x29, 0x02, 0x4E, 0x08, 0x8A, 0x67, 0xCC, 0x74, 0x02, 0x0B, 0xBE, 0xA6,
  0x3B, 0x13, 0x9B, 0x22, 0x51, 0x4A, 0x08, 0x79, 0x8E, 0x34, 0x04, 0xDD,
  0xEF, 0x95, 0x19, 0xB3, 0xCD, 0x3A, 0x43, 0x1B, 0x30, 0x2B, 0x0A, 0x6D,
  0xF2, 0x5F, 0x14, 0x37, 0x4F, 0xE1, 0x35, 0x6D, 0x6D, 0x51, 0xC2, 0x45,
  0xE4, 0x85, 0xB5, 0x76, 0x62, 0x5E, 0x7E, 0xC6, 0xF4, 0x4C, 0x42, 0xE9,
  0xA6, 0x3A, 0x36, 0x20, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
];
const DH_G: u8 = 2;

static DH_PRIME: Lazy<BigUint> = Lazy::new(|| BigUint::from_bytes_be(&DH_P));
static DH_GENERATOR: Lazy<BigUint> = Lazy::new(|| BigUint::from(DH_G));

/// Which 4-byte tag is mixed into the RC4 key derivation, per BEP-like MSE
/// convention: the encrypting side of an outgoing connection and the
/// decrypting side of an incoming connection both use `"keyA"`; the other
/// two roles use `"keyB"`.
const KEY_TAG_A: &[u8; 4] = b"keyA";
const KEY_TAG_B: &[u8; 4] = b"keyB";

/// Minimal RC4 stream cipher state, keyed once and then advanced byte by
/// byte. Hand-rolled rather than pulled from a crate: the algorithm is tiny,
/// fully pinned by this wire contract (exact key schedule, exact discard
/// length), and not worth taking on an unfamiliar dependency for.
struct Rc4 {
  s: [u8; 256],
  i: u8,
  j: u8,
}

impl Rc4 {
  fn new(key: &[u8]) -> Self {
    let mut s = [0u8; 256];
    for (idx, b) in s.iter_mut().enumerate() {
      *b = idx as u8;
    }
    let mut j: u8 = 0;
    for i in 0..256usize {
      j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
      s.swap(i, j as usize);
    }
    Self { s, i: 0, j: 0 }
  }

  fn process(&mut self, data: &mut [u8]) {
    for byte in data.iter_mut() {
      self.i = self.i.wrapping_add(1);
      self.j = self.j.wrapping_add(self.s[self.i as usize]);
      self.s.swap(self.i as usize, self.j as usize);
      let k = self.s[(self.s[self.i as usize].wrapping_add(self.s[self.j as usize])) as usize];
      *byte ^= k;
    }
  }

  fn discard(&mut self, len: usize) {
    let mut scratch = vec![0u8; len];
    self.process(&mut scratch);
  }
}

/// Per-peer-link MSE state.
///
/// Key generation is deliberately lazy: constructing a session is cheap
/// (just records the torrent hash and connection direction); the DH keypair
/// is only generated the first time [`CryptoSession::public_key`] is
/// called, since many connection attempts never get far enough to need it.
pub struct CryptoSession {
  info_hash: Sha1Hash,
  is_incoming: bool,
  keypair: Option<(BigUint, [u8; PUBLIC_KEY_LEN])>,
  secret: Option<BigUint>,
  encrypt: Option<Rc4>,
  decrypt: Option<Rc4>,
}

impl CryptoSession {
  pub fn new(info_hash: Sha1Hash, is_incoming: bool) -> Self {
    Self {
      info_hash,
      is_incoming,
      keypair: None,
      secret: None,
      encrypt: None,
      decrypt: None,
    }
  }

  fn ensure_keypair(&mut self) -> &(BigUint, [u8; PUBLIC_KEY_LEN]) {
    self.keypair.get_or_insert_with(|| {
      let mut priv_bytes = [0u8; PRIVATE_KEY_LEN];
      rand::thread_rng().fill_bytes(&mut priv_bytes);
      let private = BigUint::from_bytes_be(&priv_bytes);
      let public = DH_GENERATOR.modpow(&private, &DH_PRIME);
      let mut public_bytes = [0u8; PUBLIC_KEY_LEN];
      let be = public.to_bytes_be();
      public_bytes[PUBLIC_KEY_LEN - be.len()..].copy_from_slice(&be);
      (private, public_bytes)
    })
  }

  /// Returns our 96-byte DH public key, generating a keypair on first call.
  pub fn public_key(&mut self) -> [u8; PUBLIC_KEY_LEN] {
    self.ensure_keypair().1
  }

  /// Completes the DH exchange given the peer's public key.
  pub fn compute_secret(&mut self, peer_public_key: &[u8]) -> Result<()> {
    if peer_public_key.len() != PUBLIC_KEY_LEN {
      return Err(CryptoError::InvalidPublicKeyLength {
        expected: PUBLIC_KEY_LEN,
        actual: peer_public_key.len(),
      });
    }
    let peer_key = BigUint::from_bytes_be(peer_public_key);
    let (private, _) = self.ensure_keypair().clone();
    let secret = peer_key.modpow(&private, &DH_PRIME);
    if secret == BigUint::from(0u8) {
      return Err(CryptoError::KeyExchangeFailed);
    }
    self.secret = Some(secret);
    Ok(())
  }

  /// `SHA1(prepend || secret || append)`.
  pub fn derive_sha1(&self, prepend: &[u8], append: &[u8]) -> Result<Sha1Hash> {
    let secret = self.secret.as_ref().ok_or(CryptoError::NoSharedSecret)?;
    let mut hasher = Sha1::new();
    hasher.update(prepend);
    hasher.update(secret.to_bytes_be());
    hasher.update(append);
    let digest = hasher.finalize();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    Ok(out)
  }

  fn rc4_key(&self, tag: &[u8; 4]) -> Result<[u8; 20]> {
    self.derive_sha1(tag, &self.info_hash)
  }

  /// Tag used by the side that is *encrypting* outbound bytes.
  fn encrypt_tag(&self) -> &'static [u8; 4] {
    if self.is_incoming {
      KEY_TAG_B
    } else {
      KEY_TAG_A
    }
  }

  /// Tag used by the side that is *decrypting* inbound bytes.
  fn decrypt_tag(&self) -> &'static [u8; 4] {
    if self.is_incoming {
      KEY_TAG_A
    } else {
      KEY_TAG_B
    }
  }

  /// Initializes the outbound RC4 stream and discards the first
  /// [`CRYPTO_RC4_DISCARD_LEN`] bytes of keystream.
  pub fn init_encrypt(&mut self) -> Result<()> {
    let key = self.rc4_key(self.encrypt_tag())?;
    let mut rc4 = Rc4::new(&key);
    rc4.discard(CRYPTO_RC4_DISCARD_LEN);
    self.encrypt = Some(rc4);
    Ok(())
  }

  /// Initializes the inbound RC4 stream and discards the first
  /// [`CRYPTO_RC4_DISCARD_LEN`] bytes of keystream.
  pub fn init_decrypt(&mut self) -> Result<()> {
    let key = self.rc4_key(self.decrypt_tag())?;
    let mut rc4 = Rc4::new(&key);
    rc4.discard(CRYPTO_RC4_DISCARD_LEN);
    self.decrypt = Some(rc4);
    Ok(())
  }

  /// Encrypts `data` in place.
  pub fn encrypt(&mut self, data: &mut [u8]) -> Result<()> {
    let rc4 = self.encrypt.as_mut().ok_or(CryptoError::NotInitialized)?;
    rc4.process(data);
    Ok(())
  }

  /// Decrypts `data` in place.
  pub fn decrypt(&mut self, data: &mut [u8]) -> Result<()> {
    let rc4 = self.decrypt.as_mut().ok_or(CryptoError::NotInitialized)?;
    rc4.process(data);
    Ok(())
  }
}

/// `ssha1`/`ssha1_matches`: salted SHA-1 password digest used for the
/// (out of scope, UI-adjacent) access password check. Implemented here for
/// parity with the original crypto module, not wired up to any front-end.
const SALT_LEN: usize = 8;
const SALT_ALPHABET: &[u8; 64] =
  b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ./";

pub fn ssha1(plaintext: &[u8]) -> String {
  let mut salt = [0u8; SALT_LEN];
  let mut rng = rand::thread_rng();
  for b in salt.iter_mut() {
    let idx = (rng.next_u32() as usize) % SALT_ALPHABET.len();
    *b = SALT_ALPHABET[idx];
  }
  digest_with_salt(plaintext, &salt)
}

fn digest_with_salt(plaintext: &[u8], salt: &[u8]) -> String {
  let mut hasher = Sha1::new();
  hasher.update(plaintext);
  hasher.update(salt);
  let digest = hasher.finalize();
  format!("{{{}{}", hex::encode(digest), String::from_utf8_lossy(salt))
}

pub fn ssha1_matches(source: &str, candidate: &[u8]) -> bool {
  // "{" + 40 hex chars + salt
  if source.len() <= 1 + 40 {
    return false;
  }
  let salt = source.as_bytes()[1 + 40..].to_vec();
  let recomputed = digest_with_salt(candidate, &salt);
  recomputed == source
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dh_exchange_produces_matching_secret() {
    let info_hash = [7u8; 20];
    let mut a = CryptoSession::new(info_hash, false);
    let mut b = CryptoSession::new(info_hash, true);

    let a_pub = a.public_key();
    let b_pub = b.public_key();
    assert_eq!(a_pub.len(), PUBLIC_KEY_LEN);

    a.compute_secret(&b_pub).unwrap();
    b.compute_secret(&a_pub).unwrap();

    assert_eq!(a.secret.as_ref().unwrap(), b.secret.as_ref().unwrap());
  }

  #[test]
  fn rejects_wrong_length_public_key() {
    let mut a = CryptoSession::new([0u8; 20], false);
    let err = a.compute_secret(&[0u8; 10]).unwrap_err();
    assert_eq!(
      err,
      CryptoError::InvalidPublicKeyLength {
        expected: PUBLIC_KEY_LEN,
        actual: 10
      }
    );
  }

  #[test]
  fn encrypt_then_decrypt_round_trips_across_the_link() {
    let info_hash = [9u8; 20];
    let mut a = CryptoSession::new(info_hash, false);
    let mut b = CryptoSession::new(info_hash, true);

    let a_pub = a.public_key();
    let b_pub = b.public_key();
    a.compute_secret(&b_pub).unwrap();
    b.compute_secret(&a_pub).unwrap();

    a.init_encrypt().unwrap();
    b.init_decrypt().unwrap();

    let plaintext = b"hello bittorrent peer".to_vec();
    let mut buf = plaintext.clone();
    a.encrypt(&mut buf).unwrap();
    assert_ne!(buf, plaintext);
    b.decrypt(&mut buf).unwrap();
    assert_eq!(buf, plaintext);
  }

  #[test]
  fn encrypt_before_init_is_an_error() {
    let mut a = CryptoSession::new([1u8; 20], false);
    let mut buf = [0u8; 4];
    assert_eq!(a.encrypt(&mut buf).unwrap_err(), CryptoError::NotInitialized);
  }

  #[test]
  fn ssha1_round_trips() {
    let digest = ssha1(b"hunter2");
    assert!(ssha1_matches(&digest, b"hunter2"));
    assert!(!ssha1_matches(&digest, b"wrong"));
  }
}
