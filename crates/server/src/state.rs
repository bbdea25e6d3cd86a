use std::sync::Arc;
use mp3disc_core::{Config, TranscodeCoordinator};

use crate::api::WsBroadcaster;

/// Shared application state
pub struct AppState {
    config: Config,
    coordinator: Arc<TranscodeCoordinator>,
    ws_broadcaster: WsBroadcaster,
}

impl AppState {
    pub fn new(
        config: Config,
        coordinator: Arc<TranscodeCoordinator>,
        ws_broadcaster: WsBroadcaster,
    ) -> Self {
        Self {
            config,
            coordinator,
            ws_broadcaster,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<TranscodeCoordinator> {
        &self.coordinator
    }

    pub fn ws_broadcaster(&self) -> &WsBroadcaster {
        &self.ws_broadcaster
    }
}
