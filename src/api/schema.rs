use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::{IntoParams, ToSchema};

use crate::blockchain::{Block, BlockchainError, ErrorKind, LedgerEvent, Metadata, Transaction};

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Request for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The sender's address, omitted for network issued value
    pub from: Option<String>,

    /// The recipient's address
    pub to: Option<String>,

    /// The amount to transfer, zero for event records
    #[serde(default)]
    pub amount: f64,

    /// Event payload
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: Metadata,

    /// The sender's hex secret key, used to sign the transaction
    pub private_key: Option<String>,
}

/// Response for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    pub message: String,

    /// The accepted transaction
    pub transaction: Transaction,
}

/// Request for the event endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct EventRequest {
    /// Address of the entity the event is about
    pub subject: String,

    /// The event, tagged by its `type` field
    #[schema(value_type = Object)]
    pub event: LedgerEvent,
}

/// Request for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineRequest {
    /// Address credited with the mining reward
    pub reward_address: String,

    /// Annotation stored on the block and its reward transaction
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: Map<String, Value>,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    pub message: String,

    /// The newly mined block
    pub block: Block,

    /// Whether the snapshot was written after mining
    pub persisted: bool,
}

/// Response for the cancel mining endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct CancelResponse {
    /// Number of running mining jobs that were asked to stop
    pub cancelled: usize,
}

/// Response for the balance endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub address: String,

    /// Balance replayed from sealed blocks only
    pub balance: f64,
}

/// Query for the history endpoint
#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// Metadata field to match, e.g. `studentId`
    pub field: String,

    /// Value the field must equal
    pub value: String,

    /// Include transactions not yet sealed (default true)
    pub pending: Option<bool>,
}

/// Response for the validate endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ValidationResponse {
    pub valid: bool,

    /// Index of the first offending block
    pub index: Option<u64>,

    /// Why that block failed
    pub reason: Option<String>,
}

/// Response for the create wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The wallet's address
    pub address: String,

    /// The wallet's private key (hex encoded)
    pub private_key: String,
}

/// Error body returned by every endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,

    /// rejected, not_found, conflict or internal
    pub kind: String,
}

/// A ledger error on its way out as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub BlockchainError);

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<BlockchainError> for ApiError {
    fn from(err: BlockchainError) -> Self {
        ApiError(err)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::Rejected => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let kind = match self.0.kind() {
            ErrorKind::Rejected => "rejected",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        };

        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.0.to_string(),
            kind: kind.to_string(),
        })
    }
}
