//! Ed25519 signing and verification

use ed25519_dalek::{
    Signature as DalekSignature, Signer as DalekSigner, SigningKey, Verifier, VerifyingKey,
};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hashing::{sha256, Hash};

/// Ed25519 keypair for signing
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Create from raw seed bytes (32 bytes)
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    /// Create from a hex-encoded seed
    pub fn from_hex(hex_seed: &str) -> Result<Self> {
        let bytes = hex::decode(hex_seed).map_err(|e| Error::InvalidHex(e.to_string()))?;

        if bytes.len() != 32 {
            return Err(Error::InvalidPrivateKey);
        }

        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes);
        Ok(Self::from_seed(&seed))
    }

    /// Get the public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    /// Sign a message.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trail_core::Keypair;
    ///
    /// let keypair = Keypair::generate();
    /// let signature = keypair.sign(b"hello");
    /// assert_eq!(signature.to_bytes().len(), 64);
    /// ```
    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig = self.signing_key.sign(message);
        Signature { inner: sig }
    }

    /// Export the seed as hex
    pub fn to_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }
}

/// Ed25519 public key for verification
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKey {
    #[serde(with = "pubkey_serde")]
    verifying_key: VerifyingKey,
}

mod pubkey_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(key: &VerifyingKey, s: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&hex::encode(key.to_bytes()))
    }

    pub fn deserialize<'de, D>(d: D) -> std::result::Result<VerifyingKey, D::Error>
    where
        D: Deserializer<'de>,
    {
        let hex_str = String::deserialize(d)?;
        let bytes = hex::decode(&hex_str).map_err(serde::de::Error::custom)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("public key must be 32 bytes"))?;
        VerifyingKey::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

impl PublicKey {
    /// Create from raw bytes (32 bytes)
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let verifying_key =
            VerifyingKey::from_bytes(bytes).map_err(|e| Error::InvalidPublicKey(e.to_string()))?;
        Ok(Self { verifying_key })
    }

    /// Create from hex-encoded bytes
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str).map_err(|e| Error::InvalidHex(e.to_string()))?;

        if bytes.len() != 32 {
            return Err(Error::InvalidPublicKey(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }

        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Self::from_bytes(&arr)
    }

    /// Verify a signature over a message.
    ///
    /// Constant-time with respect to the signature bytes (delegated to
    /// `ed25519-dalek`).
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.verifying_key.verify(message, &signature.inner).is_ok()
    }

    /// SHA-256 over the raw public key bytes.
    ///
    /// The lowercase hex of this digest is the agent identifier.
    pub fn fingerprint(&self) -> Hash {
        sha256(self.verifying_key.as_bytes())
    }

    /// Export as lowercase hex
    pub fn to_hex(&self) -> String {
        hex::encode(self.verifying_key.to_bytes())
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.verifying_key.as_bytes()
    }
}

/// Ed25519 signature
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature {
    #[serde(with = "sig_serde")]
    inner: DalekSignature,
}

mod sig_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(sig: &DalekSignature, s: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&hex::encode(sig.to_bytes()))
    }

    pub fn deserialize<'de, D>(d: D) -> std::result::Result<DalekSignature, D::Error>
    where
        D: Deserializer<'de>,
    {
        let hex_str = String::deserialize(d)?;
        let bytes = hex::decode(&hex_str).map_err(serde::de::Error::custom)?;
        let bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("signature must be 64 bytes"))?;
        Ok(DalekSignature::from_bytes(&bytes))
    }
}

impl Signature {
    /// Create from raw bytes (64 bytes)
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Self {
            inner: DalekSignature::from_bytes(bytes),
        }
    }

    /// Create from hex-encoded bytes
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str).map_err(|e| Error::InvalidHex(e.to_string()))?;

        if bytes.len() != 64 {
            return Err(Error::InvalidSignature);
        }

        let mut arr = [0u8; 64];
        arr.copy_from_slice(&bytes);
        Ok(Self::from_bytes(&arr))
    }

    /// Export as lowercase hex
    pub fn to_hex(&self) -> String {
        hex::encode(self.inner.to_bytes())
    }

    /// Get raw bytes
    pub fn to_bytes(&self) -> [u8; 64] {
        self.inner.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let keypair = Keypair::generate();
        let message = b"append-only ledger";

        let signature = keypair.sign(message);
        assert!(keypair.public_key().verify(message, &signature));
        assert!(!keypair.public_key().verify(b"different message", &signature));
    }

    #[test]
    fn tampered_signature_fails() {
        let keypair = Keypair::generate();
        let signature = keypair.sign(b"msg");

        let mut bytes = signature.to_bytes();
        bytes[5] ^= 0x40;
        let tampered = Signature::from_bytes(&bytes);
        assert!(!keypair.public_key().verify(b"msg", &tampered));
    }

    #[test]
    fn deterministic_from_seed() {
        let seed = [7u8; 32];
        let a = Keypair::from_seed(&seed);
        let b = Keypair::from_seed(&seed);
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.sign(b"x").to_bytes(), b.sign(b"x").to_bytes());
    }

    #[test]
    fn fingerprint_is_sha256_of_raw_key() {
        let keypair = Keypair::generate();
        let pubkey = keypair.public_key();

        assert_eq!(pubkey.fingerprint(), sha256(pubkey.as_bytes()));
        assert_eq!(pubkey.fingerprint().to_hex().len(), 64);
    }

    #[test]
    fn hex_round_trips() {
        let keypair = Keypair::generate();
        let restored = Keypair::from_hex(&keypair.to_hex()).unwrap();
        assert_eq!(keypair.public_key(), restored.public_key());

        let pk = PublicKey::from_hex(&keypair.public_key().to_hex()).unwrap();
        assert_eq!(pk, keypair.public_key());

        let sig = keypair.sign(b"round trip");
        let sig2 = Signature::from_hex(&sig.to_hex()).unwrap();
        assert_eq!(sig.to_bytes(), sig2.to_bytes());
    }

    #[test]
    fn wrong_length_keys_are_rejected() {
        assert!(PublicKey::from_hex("abcd").is_err());
        assert!(Keypair::from_hex("abcd").is_err());
        assert!(Signature::from_hex("abcd").is_err());
    }
}
