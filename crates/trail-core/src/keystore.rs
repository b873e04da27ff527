//! Password-based at-rest protection for agent signing keys
//!
//! File format v1: scrypt-derived AES-256-GCM over the hex-encoded seed, with
//! the GCM tag and the IV appended to the ciphertext, plus a separate keyed
//! MAC checked before any decryption is attempted. The AEAD tag and the MAC
//! together reject both corruption and wrong passwords.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use rand_core::{OsRng, RngCore};
use scrypt::Params as ScryptParams;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::hashing::sha256;

/// AES-256-GCM with the 16-byte IV this file format mandates.
type KeystoreCipher = AesGcm<Aes256, U16>;

pub const KEYSTORE_VERSION: &str = "1";

const SALT_LEN: usize = 32;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;
const DKLEN: usize = 32;
// N = 262144
const SCRYPT_LOG_N: u8 = 18;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// KDF parameters recorded alongside the ciphertext.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub n: u64,
    pub r: u32,
    pub p: u32,
    pub dklen: usize,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            n: 1u64 << SCRYPT_LOG_N,
            r: SCRYPT_R,
            p: SCRYPT_P,
            dklen: DKLEN,
        }
    }
}

/// Encrypted key document as persisted to disk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Keystore {
    pub version: String,
    pub cipher: String,
    pub kdf: String,
    pub kdfparams: KdfParams,
    /// 32-byte random salt, hex
    pub salt: String,
    /// ciphertext || auth tag || IV, hex
    pub ciphertext: String,
    /// sha256(derived_key[16..32] || ciphertext blob), hex
    pub mac: String,
    pub id: Uuid,
    pub agent_id: String,
}

/// Encrypt a hex-encoded private key under a password.
pub fn encrypt_key(password: &str, private_key_hex: &str, agent_id: &str) -> Result<Keystore> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let derived = derive_key(password, &salt, &KdfParams::default())?;
    let cipher = KeystoreCipher::new(GenericArray::from_slice(&derived));
    let mut blob = cipher
        .encrypt(GenericArray::from_slice(&iv), private_key_hex.as_bytes())
        .map_err(|_| Error::Keystore("encryption failed".to_string()))?;
    blob.extend_from_slice(&iv);

    let mac = keystore_mac(&derived, &blob);

    Ok(Keystore {
        version: KEYSTORE_VERSION.to_string(),
        cipher: "aes-256-gcm".to_string(),
        kdf: "scrypt".to_string(),
        kdfparams: KdfParams::default(),
        salt: hex::encode(salt),
        ciphertext: hex::encode(blob),
        mac,
        id: Uuid::new_v4(),
        agent_id: agent_id.to_string(),
    })
}

/// Recover the hex-encoded private key from a keystore document.
///
/// The MAC is checked before decryption; a mismatch means a wrong password or
/// a corrupted file and is indistinguishable by design.
pub fn decrypt_key(keystore: &Keystore, password: &str) -> Result<String> {
    if keystore.version != KEYSTORE_VERSION {
        return Err(Error::UnsupportedKeystoreVersion {
            found: keystore.version.clone(),
        });
    }

    let salt = hex::decode(&keystore.salt).map_err(|e| Error::InvalidHex(e.to_string()))?;
    let blob = hex::decode(&keystore.ciphertext).map_err(|e| Error::InvalidHex(e.to_string()))?;
    if blob.len() < IV_LEN + TAG_LEN {
        return Err(Error::Keystore("ciphertext too short".to_string()));
    }

    let derived = derive_key(password, &salt, &keystore.kdfparams)?;
    if keystore_mac(&derived, &blob) != keystore.mac {
        return Err(Error::MacMismatch);
    }

    let (sealed, iv) = blob.split_at(blob.len() - IV_LEN);
    let cipher = KeystoreCipher::new(GenericArray::from_slice(&derived));
    let plain = cipher
        .decrypt(GenericArray::from_slice(iv), sealed)
        .map_err(|_| Error::MacMismatch)?;

    String::from_utf8(plain).map_err(|_| Error::Keystore("decrypted key is not UTF-8".to_string()))
}

fn derive_key(password: &str, salt: &[u8], params: &KdfParams) -> Result<[u8; DKLEN]> {
    if params.dklen != DKLEN {
        return Err(Error::Keystore(format!(
            "unsupported dklen: {}",
            params.dklen
        )));
    }
    let log_n = params
        .n
        .checked_ilog2()
        .filter(|_| params.n.is_power_of_two())
        .ok_or_else(|| Error::Keystore("scrypt n must be a power of two".to_string()))?;

    let scrypt_params = ScryptParams::new(log_n as u8, params.r, params.p, DKLEN)
        .map_err(|e| Error::Keystore(e.to_string()))?;

    let mut derived = [0u8; DKLEN];
    scrypt::scrypt(password.as_bytes(), salt, &scrypt_params, &mut derived)
        .map_err(|e| Error::Keystore(e.to_string()))?;
    Ok(derived)
}

fn keystore_mac(derived: &[u8; DKLEN], blob: &[u8]) -> String {
    let mut buf = Vec::with_capacity(16 + blob.len());
    buf.extend_from_slice(&derived[16..32]);
    buf.extend_from_slice(blob);
    sha256(&buf).to_hex()
}
