// HTTP API
//
// actix-web handlers over the ledger service, their request and response
// types, and the /api/v1 route table

pub mod handlers;
pub mod routes;
pub mod schema;

pub use routes::configure_routes;
