//! services/processor/src/web/state.rs
//!
//! The shared application state handed to every handler.

use crate::engine::{DocumentPipeline, ProviderGateway};
use session_insight_core::ports::DocumentStore;
use std::sync::Arc;

/// Created once at startup and shared by all requests.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub pipeline: Arc<DocumentPipeline>,
    pub gateway: Arc<ProviderGateway>,
}
