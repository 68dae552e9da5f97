use std::sync::Arc;

use axum::Router;
use hirewire_agent::Orchestrator;
use hirewire_db::DbPool;
use tower_http::trace::TraceLayer;

use crate::{chat, health};

pub fn router(orchestrator: Arc<Orchestrator>, db_pool: DbPool) -> Router {
    chat::router(orchestrator).merge(health::router(db_pool)).layer(TraceLayer::new_for_http())
}
