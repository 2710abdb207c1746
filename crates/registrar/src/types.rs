use crate::config::RegistrarConfig;
use crate::engine::RegistrarEngine;

/// State shared by every request handler.
pub struct RegistrarState {
    pub engine: RegistrarEngine,
    pub config: RegistrarConfig,
}

impl RegistrarState {
    pub fn new(engine: RegistrarEngine, config: RegistrarConfig) -> Self {
        Self { engine, config }
    }
}
