use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod api;
mod blockchain;
mod config;

use blockchain::{Blockchain, JsonFileStore, LedgerService, Persistence, SledStore, SnapshotStore, Wallet};
use config::{Config, StoreBackend, RECOMMENDED_MAX_DIFFICULTY};

fn open_persistence(config: &Config) -> anyhow::Result<Arc<Persistence>> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data directory {}", config.data_dir.display()))?;

    let path = config.snapshot_path();
    let store: Box<dyn SnapshotStore> = match config.store {
        StoreBackend::Json => Box::new(JsonFileStore::new(&path)),
        StoreBackend::Sled => Box::new(
            SledStore::new(&path).with_context(|| format!("Failed to open sled database {}", path.display()))?,
        ),
    };

    Ok(Arc::new(Persistence::new(store)))
}

// Restore the last snapshot, or start a fresh chain when there is none
fn initialize_blockchain(config: &Config, persistence: &Persistence) -> anyhow::Result<Blockchain> {
    let snapshot = persistence
        .load()
        .with_context(|| format!("Failed to read snapshot from {}", persistence.describe()))?;

    let blockchain = match snapshot {
        Some(snapshot) => {
            let blockchain = Blockchain::from_snapshot(snapshot, config.signature_policy())
                .context("Snapshot holds no blocks")?;
            info!(
                "Loaded {} blocks from {} (difficulty {}, reward {})",
                blockchain.len(),
                persistence.describe(),
                blockchain.difficulty(),
                blockchain.mining_reward()
            );

            if blockchain.difficulty() != config.difficulty {
                warn!(
                    "Snapshot difficulty {} overrides configured difficulty {}",
                    blockchain.difficulty(),
                    config.difficulty
                );
            }

            blockchain
        }
        None => {
            info!("No snapshot at {}, creating a new chain", persistence.describe());
            Blockchain::new(config.ledger_config())
        }
    };

    match blockchain.validate_chain() {
        Ok(()) => info!("Chain is valid"),
        Err(err) => error!("Chain is NOT valid: {}", err),
    }

    persistence.mark_saved(&blockchain);
    Ok(blockchain)
}

fn node_wallet(config: &Config) -> anyhow::Result<Wallet> {
    let wallet = match &config.node_key {
        Some(key) => Wallet::from_hex(key).context("Invalid node key")?,
        None => {
            let wallet = Wallet::new();
            warn!("No node key configured, using an ephemeral wallet");
            wallet
        }
    };

    info!("Node wallet address: {}", wallet.address());
    Ok(wallet)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_chain,
        api::handlers::get_pending_transactions,
        api::handlers::new_transaction,
        api::handlers::get_transaction,
        api::handlers::record_event,
        api::handlers::mine_block,
        api::handlers::cancel_mining,
        api::handlers::cancel_mining_job,
        api::handlers::get_mining_jobs,
        api::handlers::get_block_by_index,
        api::handlers::get_block_by_hash,
        api::handlers::get_balance,
        api::handlers::get_history,
        api::handlers::validate_chain,
        api::handlers::save_snapshot,
        api::handlers::create_wallet
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::LedgerEntry,
            blockchain::Inclusion,
            blockchain::crypto::Address,
            blockchain::crypto::DigitalSignature,
            api::schema::ChainResponse,
            api::schema::TransactionRequest,
            api::schema::TransactionResponse,
            api::schema::EventRequest,
            api::schema::MineRequest,
            api::schema::MineResponse,
            api::schema::CancelResponse,
            api::schema::BalanceResponse,
            api::schema::ValidationResponse,
            api::schema::WalletResponse,
            api::schema::ErrorResponse
        )
    ),
    tags(
        (name = "ledger", description = "Credential ledger API endpoints")
    ),
    info(
        title = "Credential Ledger API",
        version = "1.0.0",
        description = "Append-only ledger of student, institution and credential events",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::parse();
    config.validate()?;

    if config.difficulty > RECOMMENDED_MAX_DIFFICULTY {
        warn!(
            "Difficulty {} is above {}, mining may take a long time",
            config.difficulty, RECOMMENDED_MAX_DIFFICULTY
        );
    }

    let persistence = open_persistence(&config)?;
    let ledger = Arc::new(initialize_blockchain(&config, &persistence)?);
    let wallet = node_wallet(&config)?;

    let service = Arc::new(LedgerService::new(
        ledger,
        Some(persistence),
        config.mining_timeout(),
        Some(wallet),
    ));

    let autosave = config
        .autosave_interval()
        .and_then(|interval| service.autosave(interval));

    let sweep = match (config.sweep_interval(), config.sweep_reward_address()) {
        (Some(interval), Some(reward_address)) => Some(service.clone().spawn_sweep(interval, reward_address)),
        _ => None,
    };

    let data = web::Data::from(service.clone());

    info!("Starting HTTP server at http://{}", config.bind);

    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Configure OpenAPI documentation
        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(data.clone())
            // API routes
            .configure(api::configure_routes)
            // Swagger UI
            .service(SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", openapi.clone()))
    })
    .bind(&config.bind)
    .with_context(|| format!("Failed to bind {}", config.bind))?
    .run()
    .await?;

    info!("Shutting down");
    service.cancel_mining();
    for handle in [autosave, sweep].into_iter().flatten() {
        handle.abort();
    }

    if let Err(err) = service.save() {
        error!("Final snapshot failed: {}", err);
    }

    Ok(())
}
