//! Crypto adapter (C1): key derivation, NIP-04 payload encryption, NIP-01
//! event hashing, and BIP-340 Schnorr signing.
//!
//! Consumers only ever see hex strings; the k256 types stay internal to this
//! crate so callers cannot accidentally depend on a particular curve library.

use aes::Aes256;
use base64::engine::{general_purpose, Engine};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use k256::schnorr::signature::{Signer, Verifier};
use k256::schnorr::{Signature, SigningKey, VerifyingKey};
use k256::{PublicKey as K256PublicKey, SecretKey as K256SecretKey};
use nostrmq_protocol::EventTemplate;
use sha2::{Digest, Sha256};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error("decryption failed: {0}")]
    Decrypt(String),
    #[error("signing failed: {0}")]
    Sign(String),
}

type Result<T> = std::result::Result<T, CryptoError>;

fn decode_hex32(hex_str: &str, what: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| CryptoError::InvalidKey(format!("{what} is not valid hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(format!("{what} must be 32 bytes")))
}

/// Derive the hex public key for a hex secret key.
pub fn derive_pub(secret_hex: &str) -> Result<String> {
    let secret_bytes = decode_hex32(secret_hex, "secret key")?;
    let signing_key = SigningKey::from_bytes(&secret_bytes)
        .map_err(|e| CryptoError::InvalidKey(format!("invalid secret key: {e}")))?;
    Ok(hex::encode(signing_key.verifying_key().to_bytes()))
}

/// ECDH shared secret per NIP-04: the raw X coordinate of `secret * public`,
/// with no hashing step. Nostr public keys are x-only (32 bytes); both sign
/// parities are tried since NIP-04 does not carry a parity bit.
fn shared_secret(secret_hex: &str, public_hex: &str) -> Result<[u8; 32]> {
    let secret_bytes = decode_hex32(secret_hex, "secret key")?;
    let sk = K256SecretKey::from_bytes((&secret_bytes).into())
        .map_err(|e| CryptoError::InvalidKey(format!("invalid secret key: {e}")))?;

    let pk_bytes = decode_hex32(public_hex, "public key")?;
    let mut compressed = vec![0x02];
    compressed.extend_from_slice(&pk_bytes);
    let pk = K256PublicKey::from_sec1_bytes(&compressed).or_else(|_| {
        compressed[0] = 0x03;
        K256PublicKey::from_sec1_bytes(&compressed)
    })
    .map_err(|e| CryptoError::InvalidKey(format!("invalid public key: {e}")))?;

    let shared = k256::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine());
    let mut key = [0u8; 32];
    key.copy_from_slice(shared.raw_secret_bytes());
    Ok(key)
}

/// NIP-04 encrypt: AES-256-CBC under the ECDH shared secret, random IV,
/// encoded as `<base64 ciphertext>?iv=<base64 iv>`.
pub fn encrypt(secret_hex: &str, recipient_pub_hex: &str, cleartext: &str) -> Result<String> {
    let key = shared_secret(secret_hex, recipient_pub_hex)?;
    let mut iv = [0u8; 16];
    getrandom::getrandom(&mut iv)
        .map_err(|e| CryptoError::Encrypt(format!("iv generation failed: {e}")))?;

    let cipher = Aes256CbcEnc::new(&key.into(), &iv.into());
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(cleartext.as_bytes());

    Ok(format!(
        "{}?iv={}",
        general_purpose::STANDARD.encode(ciphertext),
        general_purpose::STANDARD.encode(iv),
    ))
}

/// NIP-04 decrypt: inverse of [`encrypt`].
pub fn decrypt(secret_hex: &str, sender_pub_hex: &str, ciphertext: &str) -> Result<String> {
    let (ct_part, iv_part) = ciphertext
        .split_once("?iv=")
        .ok_or_else(|| CryptoError::Decrypt("missing ?iv= suffix".to_owned()))?;

    let mut ct = general_purpose::STANDARD
        .decode(ct_part)
        .map_err(|e| CryptoError::Decrypt(format!("bad base64 ciphertext: {e}")))?;
    let iv = general_purpose::STANDARD
        .decode(iv_part)
        .map_err(|e| CryptoError::Decrypt(format!("bad base64 iv: {e}")))?;

    let key = shared_secret(secret_hex, sender_pub_hex)?;
    let cipher = Aes256CbcDec::new(&key.into(), iv.as_slice().into());
    let plain = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&mut ct)
        .map_err(|e| CryptoError::Decrypt(format!("bad padding or key: {e}")))?;

    String::from_utf8(plain).map_err(|e| CryptoError::Decrypt(format!("not valid utf-8: {e}")))
}

/// NIP-01 canonical event hash: SHA-256 of the minimal JSON array
/// `[0, pubkey, created_at, kind, tags, content]`.
pub fn event_hash(template: &EventTemplate) -> String {
    let serialized = format!(
        "[0,\"{}\",{},{},{},\"{}\"]",
        template.pubkey,
        template.created_at,
        template.kind,
        tags_json(&template.tags),
        escape_json_string(&template.content),
    );
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    hex::encode(hasher.finalize())
}

/// BIP-340 Schnorr signature over a 32-byte hex event id.
pub fn sign(secret_hex: &str, id_hex: &str) -> Result<String> {
    let secret_bytes = decode_hex32(secret_hex, "secret key")?;
    let id_bytes = decode_hex32(id_hex, "event id")?;
    let signing_key = SigningKey::from_bytes(&secret_bytes)
        .map_err(|e| CryptoError::Sign(format!("invalid secret key: {e}")))?;
    let signature = signing_key.sign(&id_bytes);
    Ok(hex::encode(signature.to_bytes()))
}

/// Verify a Schnorr signature over a 32-byte hex id; not invoked on the
/// default receive path (see design notes), but exposed for callers who
/// opt into signature verification.
pub fn verify(pubkey_hex: &str, id_hex: &str, sig_hex: &str) -> Result<bool> {
    let pk_bytes = decode_hex32(pubkey_hex, "public key")?;
    let id_bytes = decode_hex32(id_hex, "event id")?;
    let sig_bytes = hex::decode(sig_hex)
        .map_err(|e| CryptoError::InvalidKey(format!("signature is not valid hex: {e}")))?;

    let verifying_key = VerifyingKey::from_bytes(&pk_bytes)
        .map_err(|e| CryptoError::InvalidKey(format!("invalid public key: {e}")))?;
    let signature = Signature::try_from(sig_bytes.as_slice())
        .map_err(|e| CryptoError::InvalidKey(format!("invalid signature: {e}")))?;

    Ok(verifying_key.verify(&id_bytes, &signature).is_ok())
}

fn tags_json(tags: &[Vec<String>]) -> String {
    let mut out = String::from("[");
    for (i, tag) in tags.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push('[');
        for (j, part) in tag.iter().enumerate() {
            if j > 0 {
                out.push(',');
            }
            out.push('"');
            out.push_str(&escape_json_string(part));
            out.push('"');
        }
        out.push(']');
    }
    out.push(']');
    out
}

fn escape_json_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}
