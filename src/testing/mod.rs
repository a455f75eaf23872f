//! Deterministic, virtual-clock-driven test harness (spec §4.10).
//!
//! Everything here is concrete rather than generic over `Fsm`/`RaftStorage`/
//! `RaftTransport`/`Clock`: the harness exercises one fixed combination
//! (`CounterFsm` + `InMemoryStorage` + `InMemoryTransport` + `VirtualClock`),
//! the same way the teacher's `tests/fixtures/mod.rs` is written against its
//! concrete `MemStore` rather than staying generic.

pub mod clock;
pub mod fixture;
pub mod fsm;
pub mod storage;
pub mod transport;

pub use clock::VirtualClock;
pub use fixture::Fixture;
pub use fsm::CounterFsm;
pub use storage::InMemoryStorage;
pub use transport::{InMemoryTransport, Network, TestRaft};

/// Install a `tracing` subscriber once per test process, matching the
/// teacher's `fixtures::init_tracing` helper.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).try_init();
    });
}
