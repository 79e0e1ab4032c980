// Node identity: the keypair that signs attestations and owns mined blocks

use crate::core::{MinerKey, Signature, sha256};
use rand::rngs::OsRng;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey, ecdsa};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// On-disk form of the identity (plain; key-file encryption is handled elsewhere)
#[derive(Serialize, Deserialize)]
struct SerializableIdentity {
    secret_key_hex: String,
    public_key_hex: String,
}

/// Signing identity of this node
#[derive(Clone)]
pub struct Identity {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl Identity {
    /// Generate a new identity
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let mut rng = OsRng;

        let secret_key = SecretKey::new(&mut rng);
        let public_key = secret_key.public_key(&secp);

        Self {
            secret_key,
            public_key,
        }
    }

    /// Create from secret key bytes
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, String> {
        let secp = Secp256k1::new();
        let secret_key =
            SecretKey::from_slice(bytes).map_err(|e| format!("Invalid secret key: {}", e))?;
        let public_key = secret_key.public_key(&secp);

        Ok(Self {
            secret_key,
            public_key,
        })
    }

    /// Public key as recorded in blocks
    pub fn miner_key(&self) -> MinerKey {
        MinerKey::new(self.public_key.serialize().to_vec())
    }

    /// Sign an arbitrary payload (ECDSA over its SHA256 digest)
    pub fn sign(&self, payload: &[u8]) -> Signature {
        let secp = Secp256k1::signing_only();
        let message = Message::from_digest(*sha256(payload).as_bytes());
        let signature = secp.sign_ecdsa(&message, &self.secret_key);
        Signature(signature.serialize_compact().to_vec())
    }

    /// Save identity to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let data = SerializableIdentity {
            secret_key_hex: hex::encode(self.secret_key.secret_bytes()),
            public_key_hex: hex::encode(self.public_key.serialize()),
        };

        let json = serde_json::to_string_pretty(&data)
            .map_err(|e| format!("Failed to serialize identity: {}", e))?;

        fs::write(path, json).map_err(|e| format!("Failed to write identity file: {}", e))?;

        Ok(())
    }

    /// Load identity from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let json =
            fs::read_to_string(path).map_err(|e| format!("Failed to read identity file: {}", e))?;

        let data: SerializableIdentity = serde_json::from_str(&json)
            .map_err(|e| format!("Failed to deserialize identity: {}", e))?;

        let secret = hex::decode(&data.secret_key_hex)
            .map_err(|e| format!("Invalid secret key encoding: {}", e))?;
        let identity = Self::from_secret_bytes(&secret)?;

        if hex::encode(identity.public_key.serialize()) != data.public_key_hex {
            return Err("Identity file public key does not match its secret key".to_string());
        }

        Ok(identity)
    }

    /// Load the identity at `path`, creating and saving a fresh one if absent
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        if path.as_ref().exists() {
            log::info!("Loading identity from {}", path.as_ref().display());
            Self::load(path)
        } else {
            log::info!("Creating new identity at {}", path.as_ref().display());
            let identity = Self::generate();
            identity.save(path)?;
            Ok(identity)
        }
    }
}

/// Verify `signature` over `payload` against `key`.
/// Malformed keys or signatures simply fail verification.
pub fn verify_signature(key: &MinerKey, payload: &[u8], signature: &Signature) -> bool {
    let Ok(public_key) = PublicKey::from_slice(key.as_bytes()) else {
        return false;
    };
    let Ok(signature) = ecdsa::Signature::from_compact(signature.as_bytes()) else {
        return false;
    };
    let secp = Secp256k1::verification_only();
    let message = Message::from_digest(*sha256(payload).as_bytes());
    secp.verify_ecdsa(&message, &signature, &public_key).is_ok()
}
