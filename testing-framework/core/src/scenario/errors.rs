use thiserror::Error;

use super::log::LogState;
use crate::{
    nodes::{CommunicationError, common::node::SpawnNodeError},
    topology::OrchestratorError,
};

/// A bounded poll ran out of attempts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "{operation} gave up after {attempts} polls waiting for {condition}{}",
    last_states(states)
)]
pub struct ScenarioTimeoutError {
    pub operation: &'static str,
    pub condition: String,
    pub attempts: u32,
    /// Last known state of every tracked log.
    pub states: Vec<LogState>,
}

fn last_states(states: &[LogState]) -> String {
    if states.is_empty() {
        return String::new();
    }
    let states: Vec<_> = states.iter().map(ToString::to_string).collect();
    format!("; last state: {}", states.join(", "))
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error(transparent)]
    Timeout(#[from] ScenarioTimeoutError),
    #[error(transparent)]
    Communication(#[from] CommunicationError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error(transparent)]
    Spawn(#[from] SpawnNodeError),
    #[error("log '{label}' has no samples yet")]
    EmptyLog { label: String },
    #[error("log index {index} out of range for {len} logs")]
    UnknownLog { index: usize, len: usize },
}
