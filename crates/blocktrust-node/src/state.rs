//! Shared node state for the HTTP handlers.

use std::sync::Arc;
use std::time::Instant;

use crate::engine::AttestationEngine;

pub struct NodeState {
    pub engine: Arc<AttestationEngine>,
    /// When the node started.
    pub start_time: Instant,
}

impl NodeState {
    pub fn new(engine: Arc<AttestationEngine>) -> Self {
        Self {
            engine,
            start_time: Instant::now(),
        }
    }
}
