//! Deck construction: the ordered, filtered set of card numbers eligible
//! for display in a chapter.
//!
//! Building a deck is a pure derivation from manifest metadata, the active
//! filters, and the favourites set. An empty deck is an ordinary terminal
//! result (e.g. favourites-only with no favourites), never an error.
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::manifest::{BorderCategory, ChapterManifest, TimerCategory};

// ============================================================================
// Filters
// ============================================================================

/// Timer-badge filter. `All` disables the filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerFilter {
    #[default]
    All,
    Green,
    Yellow,
    Orange,
}

impl TimerFilter {
    pub fn matches(self, timer: Option<TimerCategory>) -> bool {
        match self {
            TimerFilter::All => true,
            TimerFilter::Green => timer == Some(TimerCategory::Green),
            TimerFilter::Yellow => timer == Some(TimerCategory::Yellow),
            TimerFilter::Orange => timer == Some(TimerCategory::Orange),
        }
    }
}

/// Difficulty filter, driven by the card's border category. `All` disables
/// the filter. Purple is not selectable: purple cards never enter a deck.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyFilter {
    #[default]
    All,
    Green,
    Orange,
    Red,
}

impl DifficultyFilter {
    pub fn matches(self, border: Option<BorderCategory>) -> bool {
        match self {
            DifficultyFilter::All => true,
            DifficultyFilter::Green => border == Some(BorderCategory::Green),
            DifficultyFilter::Orange => border == Some(BorderCategory::Orange),
            DifficultyFilter::Red => border == Some(BorderCategory::Red),
        }
    }
}

/// The active filter set for a chapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filters {
    pub timer: TimerFilter,
    pub difficulty: DifficultyFilter,
    pub favourites_only: bool,
}

// ============================================================================
// Deck builder
// ============================================================================

/// Build the deck for a chapter.
///
/// Candidate numbers come from the manifest's explicit per-card keys when
/// present (padded up to `total` if the explicit set is short), otherwise
/// the dense range `[1, total]`. Purple-bordered cards are dropped
/// unconditionally; the timer, difficulty, and favourites filters then
/// intersect. The result is sorted ascending and duplicate-free.
///
/// Building twice with the same inputs yields the same sequence.
pub fn build_deck(
    manifest: Option<&ChapterManifest>,
    total: u32,
    filters: &Filters,
    favourites: &BTreeSet<u32>,
) -> Vec<u32> {
    let mut candidates: BTreeSet<u32> = match manifest {
        Some(m) if !m.cards.is_empty() => {
            let mut set: BTreeSet<u32> = m.cards.keys().copied().collect();
            // A short explicit set means the manifest only annotates some
            // cards; the tail of the dense range still exists on disk.
            let listed = set.len() as u32;
            if listed < total {
                set.extend(listed + 1..=total);
            }
            set
        }
        _ => (1..=total).collect(),
    };
    candidates.remove(&0);

    let meta = |n: u32| manifest.and_then(|m| m.meta_for(n));

    candidates
        .into_iter()
        .filter(|&n| meta(n).map_or(true, |m| m.border != Some(BorderCategory::Purple)))
        .filter(|&n| filters.timer.matches(meta(n).and_then(|m| m.timer)))
        .filter(|&n| filters.difficulty.matches(meta(n).and_then(|m| m.border)))
        .filter(|&n| !filters.favourites_only || favourites.contains(&n))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn manifest(json: &str) -> ChapterManifest {
        ChapterManifest::from_json(json.as_bytes()).unwrap()
    }

    #[test]
    fn test_dense_range_without_manifest() {
        let deck = build_deck(None, 5, &Filters::default(), &BTreeSet::new());
        assert_eq!(deck, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_zero_total_gives_empty_deck() {
        let deck = build_deck(None, 0, &Filters::default(), &BTreeSet::new());
        assert!(deck.is_empty());
    }

    #[test]
    fn test_explicit_keys_padded_to_total() {
        let m = manifest(r#"{"per_card": {"2": {}, "5": {}}}"#);
        let deck = build_deck(Some(&m), 4, &Filters::default(), &BTreeSet::new());
        // Explicit {2, 5} has size 2 < total 4, so 3 and 4 are padded in.
        assert_eq!(deck, vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_purple_cards_always_excluded() {
        let m = manifest(r#"{"total_cards": 4, "cards_by_border": {"purple": [2, 4]}}"#);
        let deck = build_deck(Some(&m), 4, &Filters::default(), &BTreeSet::new());
        assert_eq!(deck, vec![1, 3]);
    }

    #[test]
    fn test_timer_filter() {
        let m = manifest(r#"{"cards_by_timer": {"green": [1, 3], "orange": [2]}}"#);
        let filters = Filters { timer: TimerFilter::Green, ..Filters::default() };
        let deck = build_deck(Some(&m), 3, &filters, &BTreeSet::new());
        assert_eq!(deck, vec![1, 3]);
    }

    #[test]
    fn test_timer_filter_without_source_data_empties_deck() {
        // No manifest at all: a non-All timer filter cannot match anything.
        let filters = Filters { timer: TimerFilter::Yellow, ..Filters::default() };
        let deck = build_deck(None, 10, &filters, &BTreeSet::new());
        assert!(deck.is_empty());
    }

    #[test]
    fn test_difficulty_filter() {
        let m = manifest(r#"{"cards_by_border": {"red": [2, 4], "green": [1, 3]}}"#);
        let filters = Filters { difficulty: DifficultyFilter::Red, ..Filters::default() };
        let deck = build_deck(Some(&m), 4, &filters, &BTreeSet::new());
        assert_eq!(deck, vec![2, 4]);
    }

    #[test]
    fn test_favourites_only() {
        let favourites: BTreeSet<u32> = [2, 4].into_iter().collect();
        let filters = Filters { favourites_only: true, ..Filters::default() };
        let deck = build_deck(None, 5, &filters, &favourites);
        assert_eq!(deck, vec![2, 4]);
    }

    #[test]
    fn test_favourites_only_with_no_favourites_is_empty() {
        let filters = Filters { favourites_only: true, ..Filters::default() };
        let deck = build_deck(None, 5, &filters, &BTreeSet::new());
        assert!(deck.is_empty());
    }

    #[test]
    fn test_filters_compose() {
        let m = manifest(
            r#"{
                "cards_by_border": {"red": [1, 2, 3]},
                "cards_by_timer": {"green": [1, 2]}
            }"#,
        );
        let favourites: BTreeSet<u32> = [2, 3].into_iter().collect();
        let filters = Filters {
            timer: TimerFilter::Green,
            difficulty: DifficultyFilter::Red,
            favourites_only: true,
        };
        let deck = build_deck(Some(&m), 3, &filters, &favourites);
        assert_eq!(deck, vec![2]);
    }

    #[test]
    fn test_build_is_idempotent() {
        let m = manifest(r#"{"total_cards": 6, "cards_by_border": {"purple": [3]}}"#);
        let favourites: BTreeSet<u32> = [1, 5].into_iter().collect();
        let filters = Filters { favourites_only: true, ..Filters::default() };
        let a = build_deck(Some(&m), 6, &filters, &favourites);
        let b = build_deck(Some(&m), 6, &filters, &favourites);
        assert_eq!(a, b);
        assert_eq!(a, vec![1, 5]);
    }

    #[test]
    fn test_filter_serde_round_trip() {
        let filters = Filters {
            timer: TimerFilter::Yellow,
            difficulty: DifficultyFilter::Red,
            favourites_only: true,
        };
        let json = serde_json::to_string(&filters).unwrap();
        let back: Filters = serde_json::from_str(&json).unwrap();
        assert_eq!(filters, back);
    }
}
