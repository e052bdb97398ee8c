//! Bounded navigation history and the shuffle draw state.
//!
//! Shuffle traversal replays through a capped history of previously shown
//! cards and draws forward moves from a pre-shuffled queue of not-yet-seen
//! deck members. When the queue runs dry it is rebuilt from whatever the
//! bounded history has since evicted.
use std::collections::BTreeSet;

use rand::seq::SliceRandom;

// ============================================================================
// History
// ============================================================================

/// An append-only-but-bounded sequence of shown card numbers plus a cursor.
///
/// Invariant: the cursor is `Some(i)` with `i < len` whenever the history is
/// non-empty, and `None` when empty. Appending past capacity evicts the
/// oldest entry; the cursor saturates at the last slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct History {
    entries: Vec<u32>,
    cursor: Option<usize>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self { entries: Vec::new(), cursor: None, capacity: capacity.max(1) }
    }

    /// Restore from persisted entries, truncating to capacity (most recent
    /// kept) and placing the cursor on the last entry.
    pub fn from_entries(entries: Vec<u32>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut entries = entries;
        if entries.len() > capacity {
            entries.drain(..entries.len() - capacity);
        }
        let cursor = entries.len().checked_sub(1);
        Self { entries, cursor, capacity }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn entries(&self) -> &[u32] {
        &self.entries
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// The card under the cursor, if any.
    pub fn current(&self) -> Option<u32> {
        self.cursor.and_then(|i| self.entries.get(i).copied())
    }

    /// Whether the cursor sits on the newest entry (or the history is empty).
    pub fn at_end(&self) -> bool {
        match self.cursor {
            None => true,
            Some(i) => i + 1 == self.entries.len(),
        }
    }

    /// Move the cursor one step back. Returns the new current card, or
    /// `None` if already at the oldest entry.
    pub fn step_back(&mut self) -> Option<u32> {
        match self.cursor {
            Some(i) if i > 0 => {
                self.cursor = Some(i - 1);
                self.current()
            }
            _ => None,
        }
    }

    /// Move the cursor one step forward within existing entries. Returns
    /// the new current card, or `None` if already at the newest entry.
    pub fn step_forward(&mut self) -> Option<u32> {
        match self.cursor {
            Some(i) if i + 1 < self.entries.len() => {
                self.cursor = Some(i + 1);
                self.current()
            }
            _ => None,
        }
    }

    /// Append a newly drawn card, evicting the oldest entry at capacity.
    /// The cursor lands on the appended entry.
    pub fn push(&mut self, card: u32) {
        self.entries.push(card);
        if self.entries.len() > self.capacity {
            self.entries.remove(0);
        }
        self.cursor = Some(self.entries.len() - 1);
    }

    /// Drop entries not satisfying the predicate, keeping the cursor on the
    /// current card when it survives, else clamping to the last entry.
    pub fn retain(&mut self, keep: impl Fn(u32) -> bool) {
        let current = self.current();
        self.entries.retain(|&c| keep(c));
        self.cursor = match current.and_then(|c| self.entries.iter().rposition(|&e| e == c)) {
            Some(i) => Some(i),
            None => self.entries.len().checked_sub(1),
        };
    }

    /// Collapse to a single entry.
    pub fn reset_to(&mut self, card: u32) {
        self.entries.clear();
        self.entries.push(card);
        self.cursor = Some(0);
    }

    /// Move the cursor to the most recent occurrence of `card`, if present.
    pub fn seek_to(&mut self, card: u32) -> bool {
        match self.entries.iter().rposition(|&e| e == card) {
            Some(i) => {
                self.cursor = Some(i);
                true
            }
            None => false,
        }
    }

    /// The distinct cards present anywhere in the history.
    pub fn distinct(&self) -> BTreeSet<u32> {
        self.entries.iter().copied().collect()
    }
}

// ============================================================================
// Shuffle state
// ============================================================================

/// History plus the randomized lookahead for shuffle traversal.
///
/// `unvisited` is the complement of the history's distinct entries within
/// the deck; `queue` is a pre-shuffled materialization of it, consumed from
/// the back.
#[derive(Debug, Clone)]
pub struct ShuffleState {
    pub history: History,
    unvisited: BTreeSet<u32>,
    queue: Vec<u32>,
}

impl ShuffleState {
    /// Seed a fresh shuffle state from `history` over `deck`.
    pub fn new(deck: &[u32], history: History) -> Self {
        let mut state = Self { history, unvisited: BTreeSet::new(), queue: Vec::new() };
        state.refresh(deck);
        state
    }

    pub fn unvisited(&self) -> &BTreeSet<u32> {
        &self.unvisited
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Recompute the unvisited set as deck minus history and reshuffle the
    /// queue from it.
    pub fn refresh(&mut self, deck: &[u32]) {
        let seen = self.history.distinct();
        self.unvisited = deck.iter().copied().filter(|n| !seen.contains(n)).collect();
        self.queue = self.unvisited.iter().copied().collect();
        self.queue.shuffle(&mut rand::thread_rng());
    }

    /// Remove a card shown out-of-band (picked by revision rather than
    /// drawn from the queue) so it cannot be drawn again this cycle.
    pub fn remove_unvisited(&mut self, card: u32, deck: &[u32]) {
        self.unvisited.remove(&card);
        self.queue.retain(|&c| c != card);
        if self.queue.is_empty() {
            self.refresh(deck);
        }
    }

    /// Draw the next forward card: pop the queue, falling back to the
    /// deck's first element when both the queue and the deck complement are
    /// exhausted. The drawn card is appended to history and removed from
    /// the unvisited set; an emptied queue is rebuilt immediately so the
    /// next draw has lookahead ready.
    ///
    /// Returns `None` only for an empty deck.
    pub fn draw(&mut self, deck: &[u32]) -> Option<u32> {
        let card = match self.queue.pop() {
            Some(card) => card,
            None => *deck.first()?,
        };
        self.history.push(card);
        self.unvisited.remove(&card);
        if self.queue.is_empty() {
            self.refresh(deck);
        }
        Some(card)
    }
}

// ============================================================================
// Tests
// ============================================================================
