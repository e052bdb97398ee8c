//! Round-based revision progress.
//!
//! Revision is a mastery loop layered on shuffle traversal: every card in
//! the round's deck is shown once and marked OK or not-OK. Cards marked
//! not-OK form the next round's (narrower) deck; the cycle ends when a
//! round finishes with nothing marked incorrect. This module owns the pure
//! set bookkeeping; the session controller wires it to the navigation
//! engine, the deck builder, and persistence.
use std::collections::BTreeSet;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// The user's verdict on the card currently shown.
///
/// Also tags the card-change event the presentation layer receives, which
/// styles the transition by outcome (styling only, never logic).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardOutcome {
    Ok,
    NotOk,
}

/// What a mark produced: either another card to show this round, or the
/// round boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkResult {
    /// Show this (randomly chosen, still-unseen) card next.
    NextCard(u32),
    /// Every card in the round's deck has been seen.
    RoundComplete {
        /// True when nothing was marked incorrect this cycle: the session
        /// is finished rather than rolling into another round.
        all_mastered: bool,
    },
}

/// Persisted per-chapter revision state.
///
/// Invariant: no card is in both `incorrect` and `mastered` — each mark
/// clears the opposite membership. `seen` is scoped to the current round
/// and always a subset of the round's deck.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevisionProgress {
    pub round: u32,
    pub incorrect: BTreeSet<u32>,
    pub seen: BTreeSet<u32>,
    pub mastered: BTreeSet<u32>,
}

impl Default for RevisionProgress {
    fn default() -> Self {
        Self {
            round: 1,
            incorrect: BTreeSet::new(),
            seen: BTreeSet::new(),
            mastered: BTreeSet::new(),
        }
    }
}

impl RevisionProgress {
    /// Record an outcome for `card` and decide what happens next.
    ///
    /// The card joins `seen`; an OK moves it into `mastered` and out of
    /// `incorrect`, a not-OK does the reverse. Round completion triggers
    /// exactly when `seen` covers the round's deck.
    pub fn mark(&mut self, card: u32, outcome: CardOutcome, round_deck: &[u32]) -> MarkResult {
        match outcome {
            CardOutcome::Ok => {
                self.mastered.insert(card);
                self.incorrect.remove(&card);
            }
            CardOutcome::NotOk => {
                self.incorrect.insert(card);
                self.mastered.remove(&card);
            }
        }
        self.seen.insert(card);

        if self.seen.len() >= round_deck.len() {
            MarkResult::RoundComplete { all_mastered: self.incorrect.is_empty() }
        } else {
            match self.pick_unseen(round_deck) {
                Some(next) => MarkResult::NextCard(next),
                // Unreachable while seen is below the deck length; treat
                // it as a round boundary rather than panic.
                None => MarkResult::RoundComplete { all_mastered: self.incorrect.is_empty() },
            }
        }
    }

    /// Uniformly random still-unseen card from the round's deck.
    pub fn pick_unseen(&self, round_deck: &[u32]) -> Option<u32> {
        let unseen: Vec<u32> = round_deck
            .iter()
            .copied()
            .filter(|n| !self.seen.contains(n))
            .collect();
        unseen.choose(&mut rand::thread_rng()).copied()
    }

    /// The deck for the round in progress: the full chapter deck in round
    /// 1 (or when nothing is pending), the incorrect set afterwards.
    pub fn narrowed_deck(&self, full_deck: &[u32]) -> Vec<u32> {
        if self.round > 1 && !self.incorrect.is_empty() {
            self.incorrect.iter().copied().collect()
        } else {
            full_deck.to_vec()
        }
    }

    /// Roll into the next round: bump the counter and clear `seen`. The
    /// incorrect set carries over as the new round's deck.
    pub fn begin_next_round(&mut self) {
        self.round += 1;
        self.seen.clear();
    }

    /// Back to round 1 with empty sets.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// Tests
// ============================================================================
