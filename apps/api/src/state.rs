use std::sync::Arc;

use crate::config::Config;
use crate::workflow::AnalysisWorkflow;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// The assembled analysis workflow with its injected collaborators.
    pub workflow: Arc<AnalysisWorkflow>,
    /// Runtime configuration, retained for handlers that need it.
    #[allow(dead_code)]
    pub config: Config,
}
