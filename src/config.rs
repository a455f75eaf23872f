//! Runtime configuration for a Raft instance.

use std::time::Duration;

use rand::Rng;

/// Tunables governing timing, batching and compaction.
///
/// Mirrors the knobs referenced throughout spec §4: `election_timeout`
/// (§4.2/4.8), `heartbeat_timeout` (§4.3/4.8), the lost-contact threshold
/// and send-queue depth (§4.3/§5), the promotion catch-up bounds (§4.7), and
/// the snapshot threshold (§4.6).
#[derive(Clone, Debug)]
pub struct Config {
    /// Name of the cluster, used only for tracing/log attribution.
    pub cluster_name: String,

    /// Lower bound, in milliseconds, of the randomized election timeout
    /// range `[election_timeout, 2 * election_timeout)`.
    pub election_timeout: u64,

    /// Leader heartbeat interval, in milliseconds.
    pub heartbeat_timeout: u64,

    /// If a leader has not heard from a peer within this many milliseconds,
    /// the peer's replication state is reset to `Snapshot`-probing mode
    /// (spec §4.3).
    pub lost_contact_timeout: u64,

    /// Maximum number of unacknowledged sends buffered per peer before the
    /// oldest is discarded (spec §5 backpressure).
    pub send_queue_depth: usize,

    /// Maximum entries appended/replicated per payload.
    pub max_payload_entries: usize,

    /// Number of log entries applied since the last snapshot before a new
    /// snapshot is triggered (spec §4.6).
    pub snapshot_threshold: u64,

    /// Number of entries kept live behind a snapshot's index, for
    /// replication efficiency to lagging followers (spec §4.6).
    pub snapshot_trailing_entries: u64,

    /// Number of catch-up rounds granted to a promotee before the
    /// promotion is abandoned (spec §4.7).
    pub max_catch_up_rounds: u32,

    /// Total wall-clock budget for a promotion to succeed (spec §4.7).
    pub max_catch_up_duration: Duration,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Draw a random election timeout uniformly from
    /// `[election_timeout, 2 * election_timeout)`, per spec §4.2.
    pub fn new_rand_election_timeout(&self) -> u64 {
        let mut rng = rand::thread_rng();
        rng.gen_range(self.election_timeout..(2 * self.election_timeout))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.election_timeout == 0 {
            return Err("election_timeout must be > 0".into());
        }
        if self.heartbeat_timeout >= self.election_timeout {
            return Err("heartbeat_timeout must be less than election_timeout".into());
        }
        if self.send_queue_depth == 0 {
            return Err("send_queue_depth must be > 0".into());
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster_name: "raft".into(),
            election_timeout: 150,
            heartbeat_timeout: 50,
            lost_contact_timeout: 5_000,
            send_queue_depth: 3,
            max_payload_entries: 256,
            snapshot_threshold: 1024,
            snapshot_trailing_entries: 100,
            max_catch_up_rounds: 10,
            max_catch_up_duration: Duration::from_secs(30),
        }
    }
}

/// Builder for [`Config`], following the teacher's `Config`/builder split so
/// that callers can override only the knobs they care about.
#[derive(Default)]
pub struct ConfigBuilder {
    inner: ConfigOverrides,
}

#[derive(Default)]
struct ConfigOverrides {
    cluster_name: Option<String>,
    election_timeout: Option<u64>,
    heartbeat_timeout: Option<u64>,
    lost_contact_timeout: Option<u64>,
    send_queue_depth: Option<usize>,
    max_payload_entries: Option<usize>,
    snapshot_threshold: Option<u64>,
    snapshot_trailing_entries: Option<u64>,
    max_catch_up_rounds: Option<u32>,
    max_catch_up_duration: Option<Duration>,
}

macro_rules! builder_field {
    ($name:ident, $ty:ty) => {
        pub fn $name(mut self, value: $ty) -> Self {
            self.inner.$name = Some(value);
            self
        }
    };
}

impl ConfigBuilder {
    builder_field!(cluster_name, String);

    builder_field!(election_timeout, u64);

    builder_field!(heartbeat_timeout, u64);

    builder_field!(lost_contact_timeout, u64);

    builder_field!(send_queue_depth, usize);

    builder_field!(max_payload_entries, usize);

    builder_field!(snapshot_threshold, u64);

    builder_field!(snapshot_trailing_entries, u64);

    builder_field!(max_catch_up_rounds, u32);

    builder_field!(max_catch_up_duration, Duration);

    pub fn build(self) -> Result<Config, String> {
        let default = Config::default();
        let config = Config {
            cluster_name: self.inner.cluster_name.unwrap_or(default.cluster_name),
            election_timeout: self.inner.election_timeout.unwrap_or(default.election_timeout),
            heartbeat_timeout: self.inner.heartbeat_timeout.unwrap_or(default.heartbeat_timeout),
            lost_contact_timeout: self.inner.lost_contact_timeout.unwrap_or(default.lost_contact_timeout),
            send_queue_depth: self.inner.send_queue_depth.unwrap_or(default.send_queue_depth),
            max_payload_entries: self.inner.max_payload_entries.unwrap_or(default.max_payload_entries),
            snapshot_threshold: self.inner.snapshot_threshold.unwrap_or(default.snapshot_threshold),
            snapshot_trailing_entries: self
                .inner
                .snapshot_trailing_entries
                .unwrap_or(default.snapshot_trailing_entries),
            max_catch_up_rounds: self.inner.max_catch_up_rounds.unwrap_or(default.max_catch_up_rounds),
            max_catch_up_duration: self.inner.max_catch_up_duration.unwrap_or(default.max_catch_up_duration),
        };
        config.validate()?;
        Ok(config)
    }
}
