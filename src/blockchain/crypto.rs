use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;
use std::str::FromStr;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Signature does not match the signed message")]
    VerificationFailed,

    #[error("Decoding error: {0}")]
    DecodingError(String),

    #[error("Address must not be empty")]
    EmptyAddress,
}

/// A ledger address.
///
/// Any non-empty string is accepted as an address so that domain
/// identifiers (institution ids, student ids) can receive event
/// transactions. Only addresses that decode as a base58 ed25519 public key
/// can produce verifiable signatures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Address(pub String);

impl Address {
    /// Derives the address of an ed25519 public key
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        Address(bs58::encode(public_key.as_bytes()).into_string())
    }

    /// Decodes the address back into the public key it was derived from
    pub fn to_public_key(&self) -> Result<VerifyingKey, CryptoError> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        let key_bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidPublicKey("Address is not a 32 byte public key".to_string())
        })?;

        VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address = Address(s.to_string());
        if address.is_empty() {
            return Err(CryptoError::EmptyAddress);
        }
        Ok(address)
    }
}

/// A base58 encoded ed25519 signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DigitalSignature(pub String);

impl DigitalSignature {
    pub fn from_signature(signature: &Signature) -> Self {
        DigitalSignature(bs58::encode(signature.to_bytes()).into_string())
    }

    pub fn to_signature(&self) -> Result<Signature, CryptoError> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        let signature_bytes: [u8; 64] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidSignature("Invalid signature length".to_string())
        })?;

        Ok(Signature::from_bytes(&signature_bytes))
    }
}

/// A signing keypair and the address derived from it
#[derive(Debug, Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    address: Address,
}

impl Wallet {
    /// Creates a wallet with a fresh random keypair
    pub fn new() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(signing_key)
    }

    /// Restores a wallet from a 32 byte secret key
    pub fn from_secret_key(secret_key_bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; 32] = secret_key_bytes.try_into().map_err(|_| {
            CryptoError::InvalidPrivateKey("Secret key must be 32 bytes".to_string())
        })?;

        Ok(Self::from_signing_key(SigningKey::from_bytes(&bytes)))
    }

    /// Restores a wallet from a hex encoded secret key
    pub fn from_hex(secret_key_hex: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(secret_key_hex.trim())
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        Self::from_secret_key(&bytes)
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = Address::from_public_key(&signing_key.verifying_key());
        Wallet {
            signing_key,
            address,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn sign(&self, message: &[u8]) -> DigitalSignature {
        DigitalSignature::from_signature(&self.signing_key.sign(message))
    }

    pub fn export_secret_key(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

/// Verifies `signature` over `message` for the key behind `address`.
///
/// Every failure, including an address or signature that does not decode,
/// is an error. There is no outcome where a failed check reads as valid.
pub fn verify_signature(
    message: &[u8],
    signature: &DigitalSignature,
    address: &Address,
) -> Result<(), CryptoError> {
    let public_key = address.to_public_key()?;
    let signature = signature.to_signature()?;

    public_key
        .verify(message, &signature)
        .map_err(|_| CryptoError::VerificationFailed)
}
