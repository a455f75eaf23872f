//! In-memory `RaftStorage`, the test-harness counterpart to a real
//! disk-backed backend. Per-server state is mutable before `start()` via
//! the setters below, matching spec §4.10's fixture contract.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{RaftError, RaftResult};
use crate::io::{HardState, InitialState, RaftStorage};
use crate::log::Entry;
use crate::membership::Configuration;
use crate::LogId;

#[derive(Default)]
struct State {
    hard_state: HardState,
    entries: Vec<Entry>,
    last_applied: u64,
    configuration: Configuration,
}

pub struct InMemoryStorage {
    state: Mutex<State>,
}

impl InMemoryStorage {
    pub fn new(configuration: Configuration) -> Self {
        Self { state: Mutex::new(State { configuration, ..Default::default() }) }
    }

    /// Pre-seed persistent log entries before the instance starts, for
    /// scenarios like S4's conflicting-log setup.
    pub fn seed_entries(&self, entries: Vec<Entry>) {
        self.state.lock().expect("storage mutex poisoned").entries = entries;
    }

    pub fn seed_hard_state(&self, current_term: u64, voted_for: Option<crate::membership::ServerId>) {
        self.state.lock().expect("storage mutex poisoned").hard_state = HardState { current_term, voted_for };
    }
}

#[async_trait]
impl RaftStorage for InMemoryStorage {
    async fn bootstrap(&self, configuration: &Configuration) -> RaftResult<()> {
        let mut state = self.state.lock().expect("storage mutex poisoned");
        if !state.entries.is_empty() || state.hard_state.current_term != 0 || state.last_applied != 0 {
            return Err(RaftError::io_fault(anyhow::anyhow!("storage already has persisted state, cannot bootstrap")));
        }
        state.entries.push(Entry::configuration(LogId::new(1, 1), configuration.clone()));
        state.configuration = configuration.clone();
        Ok(())
    }

    async fn get_initial_state(&self) -> RaftResult<InitialState> {
        let state = self.state.lock().expect("storage mutex poisoned");
        let last_log_id = state.entries.last().map(|e| e.id).unwrap_or(LogId::ZERO);
        Ok(InitialState {
            hard_state: state.hard_state.clone(),
            last_log_id,
            last_applied: state.last_applied,
            configuration: state.configuration.clone(),
        })
    }

    async fn save_hard_state(&self, hard_state: &HardState) -> RaftResult<()> {
        self.state.lock().expect("storage mutex poisoned").hard_state = hard_state.clone();
        Ok(())
    }

    async fn append_to_log(&self, entries: &[Entry]) -> RaftResult<()> {
        let mut state = self.state.lock().expect("storage mutex poisoned");
        for entry in entries {
            if entry.id.index <= state.entries.last().map(|e| e.id.index).unwrap_or(0) {
                continue;
            }
            state.entries.push(entry.clone());
        }
        Ok(())
    }

    async fn delete_logs_from(&self, from: u64) -> RaftResult<()> {
        let mut state = self.state.lock().expect("storage mutex poisoned");
        state.entries.retain(|e| e.id.index < from);
        Ok(())
    }

    async fn get_log_entries(&self, start: u64, end: u64) -> RaftResult<Vec<Entry>> {
        let state = self.state.lock().expect("storage mutex poisoned");
        Ok(state.entries.iter().filter(|e| e.id.index >= start && e.id.index < end).cloned().collect())
    }

    async fn save_last_applied(&self, index: u64) -> RaftResult<()> {
        self.state.lock().expect("storage mutex poisoned").last_applied = index;
        Ok(())
    }
}
