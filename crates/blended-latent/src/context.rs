//! Execution context handed to every collaborator call

use burn::prelude::*;

use crate::config::{DebugConfig, PrecisionMode, RunConfig};

/// Device, precision and diagnostics for one run
#[derive(Debug, Clone)]
pub struct ExecutionContext<B: Backend> {
    pub device: B::Device,
    pub precision: PrecisionMode,
    pub debug: DebugConfig,
}

impl<B: Backend> ExecutionContext<B> {
    pub fn new(device: B::Device) -> Self {
        Self {
            device,
            precision: PrecisionMode::default(),
            debug: DebugConfig::default(),
        }
    }

    /// Context using the precision and debug flags of `config`
    pub fn from_config(device: B::Device, config: &RunConfig) -> Self {
        Self {
            device,
            precision: config.precision,
            debug: config.debug,
        }
    }

    pub fn with_debug(mut self, debug: DebugConfig) -> Self {
        self.debug = debug;
        self
    }
}
