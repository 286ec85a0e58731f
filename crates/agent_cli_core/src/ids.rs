use std::sync::atomic::{AtomicU64, Ordering};

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::control::RequestId;

const SUFFIX_LEN: usize = 6;

/// Per-session monotonic counter backing outbound control request ids,
/// grounded on `codex/src/mcp/jsonrpc.rs::JsonRpcTransport::next_id`
/// (an `AtomicU64` bumped with `fetch_add`), extended with a random
/// suffix per §6's `req_<counter>_<random>` wire format.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    counter: AtomicU64,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> RequestId {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SUFFIX_LEN)
            .map(char::from)
            .collect();
        format!("req_{n}_{suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_well_formed() {
        let gen = RequestIdGenerator::new();
        let a = gen.next();
        let b = gen.next();
        assert_ne!(a, b);
        assert!(a.starts_with("req_1_"));
        assert!(b.starts_with("req_2_"));
    }
}
