//! A trivial state machine for exercising the harness: applies each
//! command as a signed delta to a single integer counter.

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::RaftResult;
use crate::fsm::Fsm;
use crate::LogId;

#[derive(Default)]
pub struct CounterFsm {
    pub value: i64,
    pub last_applied: LogId,
}

#[async_trait]
impl Fsm for CounterFsm {
    async fn apply(&mut self, _index: u64, command: Bytes) -> RaftResult<Bytes> {
        let delta = i64::from_le_bytes(command.as_ref().try_into().unwrap_or_default());
        self.value += delta;
        let mut out = BytesMut::with_capacity(8);
        out.put_i64_le(self.value);
        Ok(out.freeze())
    }

    async fn snapshot(&mut self, last_applied: LogId) -> RaftResult<Bytes> {
        self.last_applied = last_applied;
        let mut out = BytesMut::with_capacity(8);
        out.put_i64_le(self.value);
        Ok(out.freeze())
    }

    async fn restore(&mut self, last_included: LogId, snapshot: Bytes) -> RaftResult<()> {
        let mut buf = snapshot;
        self.value = if buf.remaining() >= 8 { buf.get_i64_le() } else { 0 };
        self.last_applied = last_included;
        Ok(())
    }
}

pub fn encode_delta(delta: i64) -> Bytes {
    Bytes::copy_from_slice(&delta.to_le_bytes())
}
