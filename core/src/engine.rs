use std::collections::VecDeque;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::RankError;

/// A comparison the caller must answer before ranking can continue.
/// Both sides are indices into the originating [`crate::store::ItemStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Comparison {
    /// The item currently being positioned.
    pub candidate: usize,
    /// The already-placed item at the probe position of the bracket.
    pub opponent: usize,
}

/// What the engine needs next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A comparison is pending; answer it with [`RankingEngine::answer`].
    Comparison(Comparison),
    /// Every item is placed; read the order with [`RankingEngine::sorted`].
    Complete,
}

/// Binary insertion sort driven one comparison at a time.
///
/// Items are identified by their original load-order index, so duplicate
/// rows stay distinguishable. Each candidate is popped from the pending
/// queue and positioned into `sorted` by a binary search over the
/// half-open bracket `[low, high)`; the caller supplies the outcome of
/// each probe. A candidate never costs more than `ceil(log2(k + 1))`
/// comparisons against a sorted prefix of length `k`.
#[derive(Debug, Clone)]
pub struct RankingEngine {
    sorted: Vec<usize>,
    pending: VecDeque<usize>,
    candidate: Option<usize>,
    low: usize,
    high: usize,
    comparison_count: usize,
}

/// Raw state used to rebuild an engine from a progress snapshot.
#[derive(Debug, Clone)]
pub struct EngineParts {
    pub sorted: Vec<usize>,
    pub pending: Vec<usize>,
    pub candidate: Option<usize>,
    pub low: usize,
    pub high: usize,
    pub comparison_count: usize,
}

impl RankingEngine {
    /// Fresh engine over `item_count` items, pending in load order.
    pub fn new(item_count: usize) -> Self {
        Self {
            sorted: Vec::with_capacity(item_count),
            pending: (0..item_count).collect(),
            candidate: None,
            low: 0,
            high: 0,
            comparison_count: 0,
        }
    }

    /// Rebuild an engine mid-flight. `total` is the item count of the
    /// store this engine runs against; the parts must partition exactly
    /// the indices `0..total`.
    pub fn from_parts(parts: EngineParts, total: usize) -> Result<Self, RankError> {
        let placed = parts.sorted.len() + parts.pending.len() + parts.candidate.iter().len();
        if placed != total {
            return Err(RankError::Format(format!(
                "snapshot accounts for {placed} items, expected {total}"
            )));
        }

        let mut seen = vec![false; total];
        let all = parts
            .sorted
            .iter()
            .chain(parts.pending.iter())
            .chain(parts.candidate.iter());
        for &index in all {
            if index >= total || seen[index] {
                return Err(RankError::Format(format!(
                    "snapshot item index {index} is out of range or duplicated"
                )));
            }
            seen[index] = true;
        }

        if parts.low > parts.high || parts.high > parts.sorted.len() {
            return Err(RankError::Format(format!(
                "bracket [{}, {}) is invalid for {} sorted items",
                parts.low,
                parts.high,
                parts.sorted.len()
            )));
        }

        let (low, high, comparison_count) = match parts.candidate {
            Some(_) => (parts.low, parts.high, parts.comparison_count),
            // The bracket only has meaning while a candidate is active.
            None => (0, 0, 0),
        };

        Ok(Self {
            sorted: parts.sorted,
            pending: parts.pending.into(),
            candidate: parts.candidate,
            low,
            high,
            comparison_count,
        })
    }

    /// Fisher-Yates shuffle of the pending queue. Only sensible before
    /// the first draw; the registry enforces that.
    pub fn shuffle_pending<R: Rng>(&mut self, rng: &mut R) {
        self.pending.make_contiguous().shuffle(rng);
    }

    /// Whether any item has been drawn yet.
    pub fn started(&self) -> bool {
        self.candidate.is_some() || !self.sorted.is_empty()
    }

    /// Drive the settle/draw loop until a comparison is pending or the
    /// ranking is complete. Candidates whose bracket is already collapsed
    /// (including every draw against an empty sorted prefix) are inserted
    /// without asking anything, so this is idempotent when a comparison
    /// is already pending.
    pub fn advance(&mut self) -> Outcome {
        loop {
            match self.candidate {
                Some(candidate) if self.low == self.high => {
                    self.sorted.insert(self.low, candidate);
                    self.candidate = None;
                }
                Some(candidate) => {
                    return Outcome::Comparison(Comparison {
                        candidate,
                        opponent: self.sorted[self.probe()],
                    });
                }
                None => match self.pending.pop_front() {
                    Some(next) => {
                        self.candidate = Some(next);
                        self.low = 0;
                        self.high = self.sorted.len();
                        self.comparison_count = 0;
                    }
                    None => return Outcome::Complete,
                },
            }
        }
    }

    /// Fold one answer into the bracket. `candidate_preferred` means the
    /// candidate ranks ahead of the opponent returned by the last
    /// [`Outcome::Comparison`].
    pub fn answer(&mut self, candidate_preferred: bool) -> Result<Outcome, RankError> {
        if self.candidate.is_none() || self.low >= self.high {
            return Err(RankError::NotComparing);
        }

        self.comparison_count += 1;
        let mid = self.probe();
        if candidate_preferred {
            self.high = mid;
        } else {
            self.low = mid + 1;
        }

        Ok(self.advance())
    }

    // Floor division biases the probe toward the lower half; resumed
    // sessions depend on this to reproduce the same comparison sequence.
    fn probe(&self) -> usize {
        (self.low + self.high) / 2
    }

    pub fn sorted(&self) -> &[usize] {
        &self.sorted
    }

    pub fn pending(&self) -> impl Iterator<Item = usize> + '_ {
        self.pending.iter().copied()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn candidate(&self) -> Option<usize> {
        self.candidate
    }

    pub fn bracket(&self) -> (usize, usize) {
        (self.low, self.high)
    }

    pub fn comparison_count(&self) -> usize {
        self.comparison_count
    }

    pub fn total_items(&self) -> usize {
        self.sorted.len() + self.candidate.iter().len() + self.pending.len()
    }
}
