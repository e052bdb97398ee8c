//! The navigation engine: which card is current, and what next/previous
//! mean under each traversal mode.
//!
//! The two modes carry disjoint position state, so they are modeled as a
//! tagged union — sequential traversal is a bare index into the deck,
//! shuffle traversal is a bounded history plus a randomized lookahead
//! queue. Cross-mode field access is therefore unrepresentable.
use rand::seq::SliceRandom;

use super::history::{History, ShuffleState};

/// Session position, exactly one representation per traversal mode.
#[derive(Debug, Clone)]
pub enum Mode {
    Sequential { index: usize },
    Shuffle(ShuffleState),
}

impl Mode {
    pub fn is_shuffle(&self) -> bool {
        matches!(self, Mode::Shuffle(_))
    }
}

/// Owns the deck and the current position; produces next/previous moves.
///
/// Everything here is a total operation: an empty deck makes navigation a
/// no-op (`None`), never an error.
#[derive(Debug, Clone)]
pub struct Engine {
    deck: Vec<u32>,
    mode: Mode,
    history_capacity: usize,
}

impl Engine {
    pub fn new(deck: Vec<u32>, history_capacity: usize) -> Self {
        Self { deck, mode: Mode::Sequential { index: 0 }, history_capacity }
    }

    pub fn deck(&self) -> &[u32] {
        &self.deck
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn is_shuffle(&self) -> bool {
        self.mode.is_shuffle()
    }

    /// History entries for persistence (empty in sequential mode).
    pub fn history_entries(&self) -> &[u32] {
        match &self.mode {
            Mode::Sequential { .. } => &[],
            Mode::Shuffle(state) => state.history.entries(),
        }
    }

    /// The card currently shown, if any.
    pub fn current_card(&self) -> Option<u32> {
        match &self.mode {
            Mode::Sequential { index } => self.deck.get(*index).copied(),
            Mode::Shuffle(state) => state.history.current(),
        }
    }

    /// Move to the next card. Sequential mode wraps; shuffle mode replays
    /// forward through history first and only draws fresh randomness at
    /// the newest entry. Returns the new current card, `None` on empty deck.
    pub fn advance(&mut self) -> Option<u32> {
        if self.deck.is_empty() {
            return None;
        }
        match &mut self.mode {
            Mode::Sequential { index } => {
                *index = (*index + 1) % self.deck.len();
                self.deck.get(*index).copied()
            }
            Mode::Shuffle(state) => {
                if !state.history.at_end() {
                    state.history.step_forward()
                } else {
                    state.draw(&self.deck)
                }
            }
        }
    }

    /// Move to the previous card. Sequential mode wraps; shuffle mode only
    /// moves the cursor backward and never consumes randomness. Returns the
    /// new current card, `None` when the move is unavailable.
    pub fn retreat(&mut self) -> Option<u32> {
        if self.deck.is_empty() {
            return None;
        }
        match &mut self.mode {
            Mode::Sequential { index } => {
                *index = (*index + self.deck.len() - 1) % self.deck.len();
                self.deck.get(*index).copied()
            }
            Mode::Shuffle(state) => state.history.step_back(),
        }
    }

    /// Whether a retreat would move: always in sequential mode (wraps),
    /// only with room behind the cursor in shuffle mode.
    pub fn can_retreat(&self) -> bool {
        match &self.mode {
            Mode::Sequential { .. } => !self.deck.is_empty(),
            Mode::Shuffle(state) => state.history.cursor().is_some_and(|i| i > 0),
        }
    }

    /// Replace the deck, preserving position where possible.
    ///
    /// Sequential: the index points at `keep` when it survives the rebuild,
    /// else resets to 0. Shuffle: the history collapses to (or seeks to)
    /// `keep`; without a usable `keep` it is filtered to surviving members,
    /// reseeded from a random deck member if that empties it. The unvisited
    /// set and queue are recomputed either way.
    pub fn set_deck(&mut self, deck: Vec<u32>, keep: Option<u32>) {
        self.deck = deck;
        match &mut self.mode {
            Mode::Sequential { index } => {
                *index = keep
                    .and_then(|card| self.deck.iter().position(|&n| n == card))
                    .unwrap_or(0);
            }
            Mode::Shuffle(state) => {
                let in_deck = |card: u32| self.deck.contains(&card);
                match keep.filter(|&card| in_deck(card)) {
                    Some(card) => {
                        if !state.history.seek_to(card) {
                            state.history.reset_to(card);
                        }
                    }
                    None => {
                        state.history.retain(in_deck);
                        if state.history.is_empty() {
                            if let Some(&seed) =
                                self.deck.choose(&mut rand::thread_rng())
                            {
                                state.history.reset_to(seed);
                            }
                        }
                    }
                }
                state.refresh(&self.deck);
            }
        }
    }

    /// Switch to shuffle mode. The persisted history seeds the new state
    /// only when its last entry matches the card on screen; otherwise a
    /// fresh length-1 history starts from the current card.
    pub fn enter_shuffle(&mut self, persisted: Option<Vec<u32>>) {
        if self.is_shuffle() {
            return;
        }
        let current = self.current_card();
        let history = match (persisted, current) {
            (Some(entries), Some(card))
                if entries.last() == Some(&card)
                    && entries.iter().all(|n| self.deck.contains(n)) =>
            {
                History::from_entries(entries, self.history_capacity)
            }
            (_, Some(card)) => {
                let mut h = History::new(self.history_capacity);
                h.push(card);
                h
            }
            (_, None) => History::new(self.history_capacity),
        };
        self.mode = Mode::Shuffle(ShuffleState::new(&self.deck, history));
    }

    /// Collapse shuffle history to a single fresh seed: `prefer` when it
    /// is in the deck, else a random deck member. The unvisited set and
    /// queue are recomputed. No-op in sequential mode.
    pub fn reseed_shuffle(&mut self, prefer: Option<u32>) {
        if let Mode::Shuffle(state) = &mut self.mode {
            let seed = prefer
                .filter(|card| self.deck.contains(card))
                .or_else(|| self.deck.choose(&mut rand::thread_rng()).copied());
            match seed {
                Some(card) => state.history.reset_to(card),
                None => state.history.retain(|_| false),
            }
            state.refresh(&self.deck);
        }
    }

    /// Switch back to sequential mode, repositioning the index at the
    /// current card's deck position (0 if absent).
    pub fn exit_shuffle(&mut self) {
        if let Mode::Shuffle(state) = &self.mode {
            let index = state
                .history
                .current()
                .and_then(|card| self.deck.iter().position(|&n| n == card))
                .unwrap_or(0);
            self.mode = Mode::Sequential { index };
        }
    }

    /// Show a specific card in shuffle mode: append it to history and take
    /// it out of the unvisited set. Used by revision, which picks its own
    /// cards. No-op in sequential mode or when the card is not in the deck.
    pub fn force_show(&mut self, card: u32) -> bool {
        if !self.deck.contains(&card) {
            return false;
        }
        match &mut self.mode {
            Mode::Sequential { index } => {
                // Revision always runs shuffled; sequential just repositions.
                *index = self.deck.iter().position(|&n| n == card).unwrap_or(0);
                true
            }
            Mode::Shuffle(state) => {
                state.history.push(card);
                state.remove_unvisited(card, &self.deck);
                true
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
