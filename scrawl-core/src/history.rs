//! Append-only stroke history with epoch-based invalidation.
//!
//! Each board owns one [`BoardHistory`]. A clear does not edit the log in
//! place: it starts a new epoch and truncates, and the epoch a stroke was
//! submitted against is re-checked on append. A stroke drawn just before a
//! clear therefore cannot land just after it — it fails with [`StaleEpoch`]
//! and the caller drops it.

use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

use crate::{StrokeInput, StrokeRecord};

/// The submitted epoch does not match the board's current epoch.
///
/// Recoverable: the submitting client is about to receive the clear
/// notification that made its stroke stale.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("stale epoch: stroke submitted for epoch {submitted}, board is at epoch {current}")]
pub struct StaleEpoch {
    pub submitted: u64,
    pub current: u64,
}

/// Ordered stroke log for a single board.
#[derive(Debug, Default)]
pub struct BoardHistory {
    epoch: u64,
    next_seq: u64,
    strokes: Vec<StrokeRecord>,
}

impl BoardHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current clear-epoch. Starts at 0, increments on every clear.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn len(&self) -> usize {
        self.strokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }

    /// Appends a stroke submitted against `epoch`.
    ///
    /// Assigns the next sequence number for the current epoch and stamps
    /// the record with server time. Fails with [`StaleEpoch`] when the
    /// submitted epoch is no longer current.
    pub fn append(
        &mut self,
        epoch: u64,
        author: Uuid,
        input: StrokeInput,
    ) -> Result<StrokeRecord, StaleEpoch> {
        if epoch != self.epoch {
            return Err(StaleEpoch {
                submitted: epoch,
                current: self.epoch,
            });
        }

        let record = StrokeRecord {
            seq: self.next_seq,
            author,
            path: input.path,
            color: input.color,
            width: input.width,
            timestamp_ms: unix_millis(),
        };
        self.next_seq += 1;
        self.strokes.push(record.clone());
        Ok(record)
    }

    /// Current epoch plus every record in sequence order.
    ///
    /// The returned vector is an owned copy, so callers can hand it to a
    /// joiner without holding any lock over the history.
    pub fn snapshot(&self) -> (u64, Vec<StrokeRecord>) {
        (self.epoch, self.strokes.clone())
    }

    /// Discards all strokes and starts the next epoch.
    ///
    /// Sequence numbers restart at 0; `(epoch, seq)` stays unique for the
    /// lifetime of the board. Returns the new epoch.
    pub fn clear(&mut self) -> u64 {
        self.epoch += 1;
        self.next_seq = 0;
        self.strokes.clear();
        log::debug!("history cleared, now at epoch {}", self.epoch);
        self.epoch
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Point;

    fn stroke() -> StrokeInput {
        StrokeInput {
            path: vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)],
            color: [0.0, 0.0, 0.0, 1.0],
            width: 1.0,
        }
    }

    #[test]
    fn test_append_assigns_monotonic_seq() {
        let mut history = BoardHistory::new();
        let author = Uuid::new_v4();

        let a = history.append(0, author, stroke()).unwrap();
        let b = history.append(0, author, stroke()).unwrap();
        let c = history.append(0, author, stroke()).unwrap();

        assert_eq!(a.seq, 0);
        assert_eq!(b.seq, 1);
        assert_eq!(c.seq, 2);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_append_stale_epoch_rejected() {
        let mut history = BoardHistory::new();
        let author = Uuid::new_v4();

        history.append(0, author, stroke()).unwrap();
        history.clear();

        let err = history.append(0, author, stroke()).unwrap_err();
        assert_eq!(err, StaleEpoch { submitted: 0, current: 1 });
        assert!(history.is_empty(), "stale stroke must not be stored");
    }

    #[test]
    fn test_clear_truncates_and_bumps_epoch() {
        let mut history = BoardHistory::new();
        let author = Uuid::new_v4();

        history.append(0, author, stroke()).unwrap();
        history.append(0, author, stroke()).unwrap();

        let epoch = history.clear();
        assert_eq!(epoch, 1);
        assert!(history.is_empty());

        // Sequence numbers restart inside the new epoch.
        let first = history.append(1, author, stroke()).unwrap();
        assert_eq!(first.seq, 0);
    }

    #[test]
    fn test_clear_twice_strictly_increasing() {
        let mut history = BoardHistory::new();
        let first = history.clear();
        let second = history.clear();

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert!(history.is_empty());
    }

    #[test]
    fn test_snapshot_preserves_order() {
        let mut history = BoardHistory::new();
        let author = Uuid::new_v4();

        for _ in 0..5 {
            history.append(0, author, stroke()).unwrap();
        }

        let (epoch, strokes) = history.snapshot();
        assert_eq!(epoch, 0);
        let seqs: Vec<u64> = strokes.iter().map(|s| s.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut history = BoardHistory::new();
        let author = Uuid::new_v4();

        history.append(0, author, stroke()).unwrap();
        let (_, snapshot) = history.snapshot();

        history.append(0, author, stroke()).unwrap();
        assert_eq!(snapshot.len(), 1, "snapshot must not see later appends");
    }

    #[test]
    fn test_future_epoch_also_stale() {
        let mut history = BoardHistory::new();
        let author = Uuid::new_v4();

        let err = history.append(7, author, stroke()).unwrap_err();
        assert_eq!(err.submitted, 7);
        assert_eq!(err.current, 0);
    }
}
