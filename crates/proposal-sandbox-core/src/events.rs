//! Lifecycle events.
//!
//! The runner and coordinator report progress through an [`EventSink`]
//! rather than printing. The CLI renders them with [`TracingSink`]; tests
//! capture them with [`RecordingSink`] and assert on ordering.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use proposal_sandbox_types::{Address, MethodSignature};

use crate::lifecycle::Phase;
use crate::verify::AssertionRecord;

/// Something observable that happened while building or testing an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    EnvironmentStarted {
        reference_block: u64,
        history: usize,
        has_current: bool,
    },
    ReplayStarted {
        proposal: String,
        position: usize,
    },
    PhaseEntered {
        proposal: String,
        phase: Phase,
    },
    PhaseCompleted {
        proposal: String,
        phase: Phase,
        elapsed_ms: u64,
    },
    ContractsBound {
        proposal: String,
        symbols: Vec<String>,
    },
    CommandDispatched {
        proposal: String,
        index: usize,
        target: String,
        address: Address,
        method: MethodSignature,
    },
    CommandIncluded {
        proposal: String,
        index: usize,
        block: u64,
    },
    GovernanceStep {
        proposal: String,
        detail: String,
    },
    AssertionEvaluated {
        proposal: String,
        record: AssertionRecord,
    },
    EnvironmentReady {
        block: u64,
        timestamp: u64,
        symbols: usize,
    },
}

/// Receiver of lifecycle events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &LifecycleEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::EnvironmentStarted {
                reference_block,
                history,
                has_current,
            } => tracing::info!(
                reference_block,
                history,
                has_current,
                "Starting environment"
            ),
            LifecycleEvent::ReplayStarted { proposal, position } => {
                tracing::info!(%proposal, position, "Replaying historical proposal")
            }
            LifecycleEvent::PhaseEntered { proposal, phase } => {
                tracing::debug!(%proposal, %phase, "Entering phase")
            }
            LifecycleEvent::PhaseCompleted {
                proposal,
                phase,
                elapsed_ms,
            } => tracing::info!(%proposal, %phase, elapsed_ms, "Phase complete"),
            LifecycleEvent::ContractsBound { proposal, symbols } => {
                tracing::info!(%proposal, symbols = ?symbols, "Contracts bound")
            }
            LifecycleEvent::CommandDispatched {
                proposal,
                index,
                target,
                address,
                method,
            } => tracing::debug!(
                %proposal,
                index,
                %target,
                address = %address.to_short_string(),
                %method,
                "Dispatching command"
            ),
            LifecycleEvent::CommandIncluded {
                proposal,
                index,
                block,
            } => tracing::debug!(%proposal, index, block, "Command included"),
            LifecycleEvent::GovernanceStep { proposal, detail } => {
                tracing::debug!(%proposal, "Governance: {}", detail)
            }
            // Verifier already logs each record at the right level.
            LifecycleEvent::AssertionEvaluated { .. } => {}
            LifecycleEvent::EnvironmentReady {
                block,
                timestamp,
                symbols,
            } => tracing::info!(block, timestamp, symbols, "Environment ready"),
        }
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &LifecycleEvent) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// `(proposal, phase)` pairs in completion order.
    pub fn completed_phases(&self) -> Vec<(String, Phase)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                LifecycleEvent::PhaseCompleted {
                    proposal, phase, ..
                } => Some((proposal.clone(), *phase)),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &LifecycleEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Forwards to several sinks in order.
#[derive(Default, Clone)]
pub struct Fanout {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for Fanout {
    fn emit(&self, event: &LifecycleEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
