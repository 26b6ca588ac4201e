use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use super::crypto::{verify_signature, Address, CryptoError, DigitalSignature, Wallet};
use super::event::Metadata;
use super::hashing::{canonical_json, sha256_hex};

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid signature: {0}")]
    SignatureInvalid(#[from] CryptoError),

    #[error("Transaction from {0} is not signed")]
    MissingSignature(Address),

    #[error("Invalid amount: {0}")]
    InvalidAmount(f64),

    #[error("Transaction {0} was already submitted")]
    DuplicateId(String),

    #[error("Transaction already signed")]
    AlreadySigned,

    #[error("Network issued transactions are not signed")]
    NetworkIssued,

    #[error("Wallet {wallet} cannot sign for sender {sender}")]
    SenderMismatch { wallet: Address, sender: Address },
}

/// Whether unsigned transactions from a named sender are admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignaturePolicy {
    #[default]
    Required,
    /// Development/test mode: a missing signature is tolerated, but a
    /// signature that is present is still verified.
    Optional,
}

/// A value transfer or a recorded domain event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Unique identifier for the transaction
    pub id: String,

    /// Sender address, `None` for network issued value such as mining rewards
    pub from_address: Option<Address>,

    /// Recipient address
    pub to_address: Option<Address>,

    /// Amount being transferred, zero for pure event records
    pub amount: f64,

    /// Creation time in milliseconds since the Unix epoch
    pub timestamp: i64,

    /// Event payload
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: Metadata,

    /// Signature over [`Transaction::calculate_hash`] by the sender's key
    #[serde(default)]
    pub signature: Option<DigitalSignature>,
}

impl Transaction {
    /// Creates a new unsigned transaction. Nothing is validated here; see
    /// [`Transaction::validate`].
    pub fn new(
        from_address: Option<Address>,
        to_address: Option<Address>,
        amount: f64,
        metadata: Metadata,
    ) -> Self {
        Transaction {
            id: Uuid::new_v4().to_string(),
            from_address,
            to_address,
            amount,
            timestamp: Utc::now().timestamp_millis(),
            metadata,
            signature: None,
        }
    }

    /// Creates a transaction issued by the network itself (no sender)
    pub fn network_issued(to_address: Address, amount: f64, metadata: Metadata) -> Self {
        Self::new(None, Some(to_address), amount, metadata)
    }

    pub fn is_network_issued(&self) -> bool {
        self.from_address.is_none()
    }

    /// Hash of the signed content: every field except the signature.
    ///
    /// Fields are hashed as one canonical JSON object so no two distinct
    /// transactions share a message.
    pub fn calculate_hash(&self) -> String {
        let content = json!({
            "id": self.id,
            "fromAddress": self.from_address,
            "toAddress": self.to_address,
            "amount": self.amount,
            "timestamp": self.timestamp,
            "metadata": self.metadata,
        });

        sha256_hex(canonical_json(&content).as_bytes())
    }

    /// Signs the transaction with the sender's wallet
    pub fn sign(&mut self, wallet: &Wallet) -> Result<(), TransactionError> {
        if self.signature.is_some() {
            return Err(TransactionError::AlreadySigned);
        }

        let sender = self
            .from_address
            .as_ref()
            .ok_or(TransactionError::NetworkIssued)?;

        if wallet.address() != sender {
            return Err(TransactionError::SenderMismatch {
                wallet: wallet.address().clone(),
                sender: sender.clone(),
            });
        }

        self.signature = Some(wallet.sign(self.calculate_hash().as_bytes()));
        Ok(())
    }

    /// Checks the transaction's signature.
    ///
    /// Network issued transactions are always valid. A present signature is
    /// always verified and any failure is an error; `policy` only decides
    /// whether an absent signature is acceptable.
    pub fn validate(&self, policy: SignaturePolicy) -> Result<(), TransactionError> {
        let sender = match &self.from_address {
            Some(sender) => sender,
            None => return Ok(()),
        };

        match (&self.signature, policy) {
            (Some(signature), _) => {
                verify_signature(self.calculate_hash().as_bytes(), signature, sender)?;
                Ok(())
            }
            (None, SignaturePolicy::Optional) => Ok(()),
            (None, SignaturePolicy::Required) => {
                Err(TransactionError::MissingSignature(sender.clone()))
            }
        }
    }

}
