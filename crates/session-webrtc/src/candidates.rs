use crate::protocol::CandidateInit;

/// Holds remote candidates that arrive before the remote description is
/// applied. Owned exclusively by one session; non-empty only until the
/// remote description lands, then drained once in arrival order.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: Vec<CandidateInit>,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, candidate: CandidateInit) {
        self.pending.push(candidate);
    }

    /// Returns and clears the buffered candidates in insertion order.
    /// Draining an empty buffer yields an empty vec.
    pub fn drain_in_order(&mut self) -> Vec<CandidateInit> {
        std::mem::take(&mut self.pending)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
