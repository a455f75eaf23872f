//! Externally observable state, published over a `tokio::sync::watch`
//! channel the way the teacher's `RaftCore::report_metrics` does.

use crate::membership::ServerId;
use crate::{LogId, Role};

/// A point-in-time snapshot of one server's view of the cluster.
#[derive(Clone, Debug, PartialEq)]
pub struct RaftMetrics {
    pub id: ServerId,
    pub role: Role,
    pub current_term: u64,
    pub last_log_id: LogId,
    pub commit_index: u64,
    pub last_applied: u64,
    pub current_leader: Option<ServerId>,
}

impl RaftMetrics {
    pub fn new(id: ServerId) -> Self {
        Self {
            id,
            role: Role::Unavailable,
            current_term: 0,
            last_log_id: LogId::ZERO,
            commit_index: 0,
            last_applied: 0,
            current_leader: None,
        }
    }
}

/// Wraps a `watch::Receiver<RaftMetrics>` with the small set of polling
/// helpers the teacher's `Wait` type offers for tests, so scenarios can say
/// "wait until this condition holds" instead of hand-polling.
pub struct Wait {
    rx: tokio::sync::watch::Receiver<RaftMetrics>,
    timeout: std::time::Duration,
}

impl Wait {
    pub fn new(rx: tokio::sync::watch::Receiver<RaftMetrics>, timeout: std::time::Duration) -> Self {
        Self { rx, timeout }
    }

    pub async fn state(&mut self, want: Role) -> Result<RaftMetrics, String> {
        self.condition(|m| m.role == want, format!("role == {want:?}")).await
    }

    pub async fn log(&mut self, want: u64) -> Result<RaftMetrics, String> {
        self.condition(|m| m.last_log_id.index == want, format!("last_log_id.index == {want}")).await
    }

    pub async fn condition(
        &mut self,
        mut pred: impl FnMut(&RaftMetrics) -> bool,
        description: String,
    ) -> Result<RaftMetrics, String> {
        if pred(&self.rx.borrow()) {
            return Ok(self.rx.borrow().clone());
        }
        let fut = async {
            loop {
                if self.rx.changed().await.is_err() {
                    return Err(format!("metrics channel closed while waiting for {description}"));
                }
                if pred(&self.rx.borrow()) {
                    return Ok(self.rx.borrow().clone());
                }
            }
        };
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| format!("timed out waiting for {description}"))?
    }
}
