//! Deterministic dispatch ordering for a block range.
//!
//! All logs of a range are replayed in strict (block number, transaction
//! index, log index) order regardless of how the parallel fetch delivered
//! them. The queue also supports merging logs discovered mid-range (a
//! factory child's own events): merged entries slot into order *after* the
//! current cursor — a child created in transaction N never retroactively
//! claims a log from an earlier transaction, since creation precedes child
//! activity on-chain by construction.

use std::collections::BTreeSet;

use crate::types::LogEnvelope;

/// Sort envelopes into the canonical replay order.
pub fn sort_envelopes(envelopes: &mut [LogEnvelope]) {
    envelopes.sort_by_key(LogEnvelope::ordering_key);
}

/// An ordered, mergeable queue of logs for one block range.
pub struct DispatchQueue {
    /// Remaining entries, sorted descending so `pop` takes from the back.
    pending: Vec<LogEnvelope>,
    /// Ordering key of the last popped entry.
    cursor: Option<(u64, u32, u32)>,
    /// (block, log index) pairs ever enqueued — log index is unique within
    /// a block, so this dedupes overlapping fetches.
    seen: BTreeSet<(u64, u32)>,
}

impl DispatchQueue {
    pub fn new(mut envelopes: Vec<LogEnvelope>) -> Self {
        sort_envelopes(&mut envelopes);
        let seen = envelopes
            .iter()
            .map(|e| (e.block_number, e.log_index))
            .collect();
        envelopes.reverse();
        Self {
            pending: envelopes,
            cursor: None,
            seen,
        }
    }

    /// Take the next entry in replay order.
    pub fn pop(&mut self) -> Option<LogEnvelope> {
        let env = self.pending.pop()?;
        self.cursor = Some(env.ordering_key());
        Some(env)
    }

    /// Merge late-discovered entries into the remaining order.
    ///
    /// Entries at or before the cursor, and duplicates of anything already
    /// enqueued, are dropped. Returns how many entries were accepted.
    pub fn merge(&mut self, envelopes: Vec<LogEnvelope>) -> usize {
        let mut accepted = 0;
        for env in envelopes {
            if let Some(cursor) = self.cursor {
                if env.ordering_key() <= cursor {
                    continue;
                }
            }
            if !self.seen.insert((env.block_number, env.log_index)) {
                continue;
            }
            self.pending.push(env);
            accepted += 1;
        }
        if accepted > 0 {
            self.pending.sort_by_key(LogEnvelope::ordering_key);
            self.pending.reverse();
        }
        accepted
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(block: u64, tx: u32, log: u32) -> LogEnvelope {
        LogEnvelope {
            chain_id: 1,
            block_number: block,
            block_hash: format!("0xb{block}"),
            parent_hash: String::new(),
            tx_hash: format!("0xt{tx}"),
            tx_index: tx,
            log_index: log,
            address: "0xaaa".into(),
            topics: vec!["0xt0".into()],
            data: "0x".into(),
        }
    }

    fn keys(queue: &mut DispatchQueue) -> Vec<(u64, u32, u32)> {
        let mut out = vec![];
        while let Some(e) = queue.pop() {
            out.push(e.ordering_key());
        }
        out
    }

    #[test]
    fn sorted_regardless_of_input_order() {
        let shuffled = vec![env(102, 0, 3), env(101, 2, 0), env(102, 0, 1), env(101, 0, 5)];
        let reversed: Vec<_> = shuffled.iter().rev().cloned().collect();

        let mut a = DispatchQueue::new(shuffled);
        let mut b = DispatchQueue::new(reversed);
        let order = keys(&mut a);
        assert_eq!(order, keys(&mut b));
        assert_eq!(
            order,
            vec![(101, 0, 5), (101, 2, 0), (102, 0, 1), (102, 0, 3)]
        );
    }

    #[test]
    fn merge_slots_after_cursor() {
        let mut queue = DispatchQueue::new(vec![env(50, 2, 7), env(50, 5, 12)]);

        // Pop the creation event at tx 2…
        assert_eq!(queue.pop().unwrap().ordering_key(), (50, 2, 7));

        // …then merge the child's same-block logs: tx 3 accepted, tx 1 rejected.
        let accepted = queue.merge(vec![env(50, 3, 9), env(50, 1, 2)]);
        assert_eq!(accepted, 1);

        assert_eq!(queue.pop().unwrap().ordering_key(), (50, 3, 9));
        assert_eq!(queue.pop().unwrap().ordering_key(), (50, 5, 12));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn merge_dedupes_overlapping_fetch() {
        let mut queue = DispatchQueue::new(vec![env(50, 2, 7)]);
        assert_eq!(queue.merge(vec![env(50, 2, 7), env(51, 0, 0)]), 1);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn empty_queue() {
        let mut queue = DispatchQueue::new(vec![]);
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
        assert_eq!(queue.merge(vec![env(1, 0, 0)]), 1);
        assert_eq!(queue.pop().unwrap().ordering_key(), (1, 0, 0));
    }
}
