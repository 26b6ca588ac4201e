use actix_web::web;

use super::handlers;

/// Configures the API routes
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/chain", web::get().to(handlers::get_chain))
            .route("/transactions", web::post().to(handlers::new_transaction))
            .route("/transactions/pending", web::get().to(handlers::get_pending_transactions))
            .route("/transactions/{id}", web::get().to(handlers::get_transaction))
            .route("/events", web::post().to(handlers::record_event))
            .route("/mine", web::post().to(handlers::mine_block))
            .route("/mine/cancel", web::post().to(handlers::cancel_mining))
            .route("/mine/cancel/{job_id}", web::post().to(handlers::cancel_mining_job))
            .route("/mine/jobs", web::get().to(handlers::get_mining_jobs))
            .route("/blocks/hash/{hash}", web::get().to(handlers::get_block_by_hash))
            .route("/blocks/{index}", web::get().to(handlers::get_block_by_index))
            .route("/balance/{address}", web::get().to(handlers::get_balance))
            .route("/history", web::get().to(handlers::get_history))
            .route("/validate", web::get().to(handlers::validate_chain))
            .route("/snapshot", web::post().to(handlers::save_snapshot))
            .route("/wallet/new", web::post().to(handlers::create_wallet)),
    );
}
