use actix_web::{web, HttpResponse};
use serde_json::Value;
use uuid::Uuid;

use super::schema::{
    ApiError, BalanceResponse, CancelResponse, ChainResponse, ErrorResponse, EventRequest, HistoryQuery,
    MineRequest, MineResponse, TransactionRequest, TransactionResponse, ValidationResponse,
    WalletResponse,
};
use crate::blockchain::{
    Address, Block, BlockchainError, Inclusion, LedgerEntry, LedgerService, Transaction, Wallet,
};

/// Shared ledger facade handed to every handler
pub type LedgerData = web::Data<LedgerService>;

type ApiResult = Result<HttpResponse, ApiError>;

fn parse_address(raw: &str, field: &'static str) -> Result<Address, ApiError> {
    raw.parse()
        .map_err(|_| ApiError(BlockchainError::MissingAddress(field)))
}

/// Get the full blockchain
///
/// Returns the entire blockchain and its validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(service: LedgerData) -> HttpResponse {
    let chain = service.chain();
    let is_valid = service.is_chain_valid();

    HttpResponse::Ok().json(ChainResponse {
        length: chain.len(),
        chain,
        is_valid,
    })
}

/// Get all pending transactions
///
/// Returns all transactions waiting to be included in a block, oldest first
#[utoipa::path(
    get,
    path = "/api/v1/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(service: LedgerData) -> HttpResponse {
    HttpResponse::Ok().json(service.pending_transactions())
}

/// Create a new transaction
///
/// Builds a transaction, signs it when a private key is supplied and adds it
/// to the pending pool
#[utoipa::path(
    post,
    path = "/api/v1/transactions",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction accepted", body = TransactionResponse),
        (status = 400, description = "Missing address or invalid transaction", body = ErrorResponse)
    )
)]
pub async fn new_transaction(
    service: LedgerData,
    request: web::Json<TransactionRequest>,
) -> ApiResult {
    let request = request.into_inner();

    // Empty strings are kept as addresses so the ledger reports them as missing.
    let from = request.from.map(Address);
    let to = request.to.map(Address);
    let mut transaction = service.create_transaction(from, to, request.amount, request.metadata);

    if let Some(private_key) = request.private_key {
        let wallet = Wallet::from_hex(&private_key)
            .map_err(|e| ApiError(BlockchainError::InvalidTransaction(e.into())))?;
        transaction.sign(&wallet).map_err(BlockchainError::from)?;
    }

    let transaction = service.submit_transaction(transaction)?;

    Ok(HttpResponse::Created().json(TransactionResponse {
        message: "Transaction will be added to the next block".to_string(),
        transaction,
    }))
}

/// Get a transaction
///
/// Looks a transaction up by id in sealed blocks and the pending pool
#[utoipa::path(
    get,
    path = "/api/v1/transactions/{id}",
    params(("id" = String, Path, description = "Transaction id")),
    responses(
        (status = 200, description = "Transaction found", body = LedgerEntry),
        (status = 404, description = "Transaction not found", body = ErrorResponse)
    )
)]
pub async fn get_transaction(service: LedgerData, id: web::Path<String>) -> ApiResult {
    Ok(HttpResponse::Ok().json(service.transaction(&id)?))
}

/// Record a domain event
///
/// Records the event as a zero-amount transaction signed by the node
#[utoipa::path(
    post,
    path = "/api/v1/events",
    request_body = EventRequest,
    responses(
        (status = 201, description = "Event recorded", body = TransactionResponse),
        (status = 400, description = "Invalid event", body = ErrorResponse)
    )
)]
pub async fn record_event(service: LedgerData, request: web::Json<EventRequest>) -> ApiResult {
    let request = request.into_inner();
    let subject = parse_address(&request.subject, "subject")?;
    let transaction = service.record_event(subject, request.event)?;

    Ok(HttpResponse::Created().json(TransactionResponse {
        message: "Event will be added to the next block".to_string(),
        transaction,
    }))
}

/// Mine a new block
///
/// Seals every pending transaction plus a reward into a new block
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    request_body = MineRequest,
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 400, description = "Invalid reward address", body = ErrorResponse),
        (status = 409, description = "Mining was cancelled", body = ErrorResponse)
    )
)]
pub async fn mine_block(service: LedgerData, request: web::Json<MineRequest>) -> ApiResult {
    let request = request.into_inner();
    let reward_address = parse_address(&request.reward_address, "rewardAddress")?;
    let outcome = service.mine(reward_address, request.metadata).await?;

    Ok(HttpResponse::Ok().json(MineResponse {
        message: "New Block Mined".to_string(),
        block: outcome.block,
        persisted: outcome.persisted,
    }))
}

/// Cancel mining
///
/// Asks every running mining job to stop; their transactions stay pending
#[utoipa::path(
    post,
    path = "/api/v1/mine/cancel",
    responses(
        (status = 200, description = "Running jobs cancelled", body = CancelResponse)
    )
)]
pub async fn cancel_mining(service: LedgerData) -> HttpResponse {
    HttpResponse::Ok().json(CancelResponse {
        cancelled: service.cancel_mining(),
    })
}

/// Cancel one mining job
#[utoipa::path(
    post,
    path = "/api/v1/mine/cancel/{job_id}",
    params(("job_id" = String, Path, description = "Mining job id")),
    responses(
        (status = 200, description = "Job cancelled", body = CancelResponse),
        (status = 404, description = "No such running job", body = ErrorResponse)
    )
)]
pub async fn cancel_mining_job(service: LedgerData, job_id: web::Path<Uuid>) -> ApiResult {
    let job_id = job_id.into_inner();
    if !service.cancel_mining_job(&job_id) {
        return Err(ApiError(BlockchainError::NotFound(format!("Mining job {}", job_id))));
    }

    Ok(HttpResponse::Ok().json(CancelResponse { cancelled: 1 }))
}

/// List running mining jobs
#[utoipa::path(
    get,
    path = "/api/v1/mine/jobs",
    responses(
        (status = 200, description = "Ids of running mining jobs", body = Vec<String>)
    )
)]
pub async fn get_mining_jobs(service: LedgerData) -> HttpResponse {
    HttpResponse::Ok().json(service.mining_jobs())
}

/// Get a block by index
#[utoipa::path(
    get,
    path = "/api/v1/blocks/{index}",
    params(("index" = u64, Path, description = "Block index")),
    responses(
        (status = 200, description = "Block found", body = Block),
        (status = 404, description = "Block not found", body = ErrorResponse)
    )
)]
pub async fn get_block_by_index(service: LedgerData, index: web::Path<u64>) -> ApiResult {
    Ok(HttpResponse::Ok().json(service.block_by_index(index.into_inner())?))
}

/// Get a block by hash
#[utoipa::path(
    get,
    path = "/api/v1/blocks/hash/{hash}",
    params(("hash" = String, Path, description = "Block hash")),
    responses(
        (status = 200, description = "Block found", body = Block),
        (status = 404, description = "Block not found", body = ErrorResponse)
    )
)]
pub async fn get_block_by_hash(service: LedgerData, hash: web::Path<String>) -> ApiResult {
    Ok(HttpResponse::Ok().json(service.block_by_hash(&hash)?))
}

/// Get an address balance
///
/// Replays every sealed transaction; pending ones do not count
#[utoipa::path(
    get,
    path = "/api/v1/balance/{address}",
    params(("address" = String, Path, description = "Ledger address")),
    responses(
        (status = 200, description = "Balance computed", body = BalanceResponse)
    )
)]
pub async fn get_balance(service: LedgerData, address: web::Path<String>) -> HttpResponse {
    let address = Address(address.into_inner());
    let balance = service.balance(&address);

    HttpResponse::Ok().json(BalanceResponse {
        address: address.0,
        balance,
    })
}

/// Get the history of an entity
///
/// Every transaction whose metadata field equals the given value
#[utoipa::path(
    get,
    path = "/api/v1/history",
    params(HistoryQuery),
    responses(
        (status = 200, description = "History retrieved", body = Vec<LedgerEntry>)
    )
)]
pub async fn get_history(service: LedgerData, query: web::Query<HistoryQuery>) -> HttpResponse {
    let query = query.into_inner();
    let inclusion = if query.pending.unwrap_or(true) {
        Inclusion::SealedAndPending
    } else {
        Inclusion::SealedOnly
    };

    let entries = service.history(&query.field, &Value::String(query.value), inclusion);
    HttpResponse::Ok().json(entries)
}

/// Check if the blockchain is valid
///
/// Reports the first block whose hash or link is wrong
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = ValidationResponse)
    )
)]
pub async fn validate_chain(service: LedgerData) -> HttpResponse {
    let response = match service.validate_chain() {
        Ok(()) => ValidationResponse {
            valid: true,
            index: None,
            reason: None,
        },
        Err(BlockchainError::ChainCorrupted { index, fault }) => ValidationResponse {
            valid: false,
            index: Some(index),
            reason: Some(fault.to_string()),
        },
        Err(err) => ValidationResponse {
            valid: false,
            index: None,
            reason: Some(err.to_string()),
        },
    };

    HttpResponse::Ok().json(response)
}

/// Save a snapshot
///
/// Writes the ledger to storage now instead of waiting for autosave
#[utoipa::path(
    post,
    path = "/api/v1/snapshot",
    responses(
        (status = 200, description = "Snapshot written"),
        (status = 500, description = "Snapshot could not be written", body = ErrorResponse)
    )
)]
pub async fn save_snapshot(service: LedgerData) -> ApiResult {
    let service = service.into_inner();
    web::block(move || service.save())
        .await
        .map_err(|e| ApiError(BlockchainError::SystemError(e.to_string())))??;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "saved": true })))
}

/// Create a new wallet
///
/// Creates a new wallet with a random keypair
///
/// The private key must be stored by your own
#[utoipa::path(
    post,
    path = "/api/v1/wallet/new",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse)
    )
)]
pub async fn create_wallet() -> HttpResponse {
    let wallet = Wallet::new();

    HttpResponse::Created().json(WalletResponse {
        address: wallet.address().0.clone(),
        private_key: hex::encode(wallet.export_secret_key()),
    })
}
