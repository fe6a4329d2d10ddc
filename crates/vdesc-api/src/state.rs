//! Application state.

use vdesc_queue::JobQueues;
use vdesc_store::StateStore;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: StateStore,
    pub queues: JobQueues,
}

impl AppState {
    pub fn new(config: ApiConfig, store: StateStore, queues: JobQueues) -> Self {
        Self {
            config,
            store,
            queues,
        }
    }
}
