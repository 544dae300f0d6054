use std::collections::BTreeMap;

/// Reorders a numbered stream, releasing values in strictly ascending order.
///
/// The first value observed fixes the stream position: it releases
/// immediately and later values are measured against it. Out-of-order
/// values park in a min-ordered buffer until the gap before them fills,
/// or until the buffer exceeds `max_pending` and the minimum is forced
/// out (skipping the gap) to bound memory.
pub struct SequenceBuffer<T> {
    next_expected: Option<u64>,
    pending: BTreeMap<u64, T>,
    max_pending: usize,
}

impl<T> SequenceBuffer<T> {
    pub fn new(max_pending: usize) -> Self {
        SequenceBuffer {
            next_expected: None,
            pending: BTreeMap::new(),
            max_pending,
        }
    }

    /// Accept one numbered value and return everything now releasable,
    /// in ascending sequence order.
    ///
    /// Values at already-released sequences are dropped, as are
    /// duplicates of parked ones. Nothing is ever released twice or out
    /// of order.
    pub fn push(&mut self, sequence: u64, value: T) -> Vec<(u64, T)> {
        match self.next_expected {
            // First value adopts the stream position
            None => self.next_expected = Some(sequence),
            Some(next) if sequence < next => {
                tracing::debug!(
                    "dropping stale sequence {} (next expected {})",
                    sequence,
                    next
                );
                return Vec::new();
            }
            _ => {}
        }

        if self.pending.contains_key(&sequence) {
            tracing::debug!("dropping duplicate sequence {}", sequence);
            return Vec::new();
        }

        self.pending.insert(sequence, value);
        self.drain()
    }

    /// Advance past `sequence`, discarding parked values at or below it.
    /// Used when a snapshot supersedes everything up to its sequence.
    pub fn fast_forward(&mut self, sequence: u64) -> Vec<(u64, T)> {
        self.pending = self.pending.split_off(&(sequence + 1));
        let next = self.next_expected.map_or(sequence + 1, |n| n.max(sequence + 1));
        self.next_expected = Some(next);
        self.drain()
    }

    /// Forget all state, as if freshly constructed.
    pub fn reset(&mut self) {
        self.next_expected = None;
        self.pending.clear();
    }

    /// Sequence the buffer wants next, None before the first push.
    pub fn next_expected(&self) -> Option<u64> {
        self.next_expected
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn drain(&mut self) -> Vec<(u64, T)> {
        let mut released = Vec::new();
        loop {
            let Some((&min_seq, _)) = self.pending.iter().next() else {
                break;
            };
            let next = self.next_expected.unwrap_or(min_seq);

            if min_seq != next && self.pending.len() <= self.max_pending {
                break;
            }
            if min_seq != next {
                tracing::warn!(
                    "sequence buffer over capacity, skipping gap {}..{}",
                    next,
                    min_seq
                );
            }

            // Releasing the minimum keeps ascending order even across a skip
            if let Some(value) = self.pending.remove(&min_seq) {
                self.next_expected = Some(min_seq + 1);
                released.push((min_seq, value));
            }
        }
        released
    }
}
