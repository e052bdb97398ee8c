//! The session controller: one owned object tying the deck builder, the
//! navigation engine, the revision loop, and storage together.
//!
//! All session state lives here; nothing is global. The presentation layer
//! drives the controller with plain method calls and consumes its decisions
//! from an event channel. Persistence is best-effort throughout: a failed
//! read or write is logged and the session continues in memory.
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::config::Config;
use crate::deck::{build_deck, Filters};
use crate::manifest::ChapterManifest;
use crate::revision::{CardOutcome, MarkResult, RevisionProgress};
use crate::session::burst::BurstDetector;
use crate::session::engine::Engine;
use crate::storage::Database;

/// How the presentation layer should style the card change. Styling only,
/// never logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionStyle {
    Forward,
    Backward,
    MarkedOk,
    MarkedNotOk,
}

/// Decisions the controller pushes to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A different card should be shown. `fast` asks for an instant redraw
    /// instead of a transition animation.
    CardChanged { card: u32, style: TransitionStyle, fast: bool },
    /// The deck was rebuilt (chapter, filter, or favourites change). An
    /// empty deck is an ordinary terminal state for the current filters.
    DeckChanged { len: usize },
    /// A revision round began (including round 1 on entry and restart).
    RoundStarted { round: u32, deck_len: usize },
    /// A revision round finished with nothing marked incorrect.
    RevisionComplete { rounds: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NavRequest {
    Next,
    Previous,
}

pub struct SessionController {
    db: Database,
    config: Config,
    events: mpsc::UnboundedSender<SessionEvent>,

    chapter: String,
    manifest: Option<Arc<ChapterManifest>>,
    total_cards: u32,
    filters: Filters,
    favourites: BTreeSet<u32>,

    engine: Engine,
    burst: BurstDetector,

    /// Set while the presentation layer animates a card change. The sole
    /// mutual-exclusion mechanism: navigation arriving under the lock is
    /// queued (lecture) or dropped (revision).
    transition_locked: bool,
    queued: VecDeque<NavRequest>,

    /// `Some` while revision mode is active.
    revision: Option<RevisionProgress>,
    /// favourites_only as it was before revision forced it off.
    favourites_only_before_revision: bool,
}

impl SessionController {
    pub fn new(db: Database, config: Config) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let burst = BurstDetector::new(
            Duration::from_millis(config.burst_window_ms),
            config.burst_threshold,
        );
        let controller = Self {
            db,
            events,
            chapter: String::new(),
            manifest: None,
            total_cards: 0,
            filters: Filters::default(),
            favourites: BTreeSet::new(),
            engine: Engine::new(Vec::new(), config.history_capacity),
            burst,
            transition_locked: false,
            queued: VecDeque::new(),
            revision: None,
            favourites_only_before_revision: false,
            config,
        };
        (controller, receiver)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn chapter(&self) -> &str {
        &self.chapter
    }

    pub fn current_card(&self) -> Option<u32> {
        self.engine.current_card()
    }

    pub fn deck(&self) -> &[u32] {
        self.engine.deck()
    }

    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    pub fn favourites(&self) -> &BTreeSet<u32> {
        &self.favourites
    }

    pub fn is_shuffle(&self) -> bool {
        self.engine.is_shuffle()
    }

    pub fn is_revision(&self) -> bool {
        self.revision.is_some()
    }

    pub fn revision_round(&self) -> Option<u32> {
        self.revision.as_ref().map(|p| p.round)
    }

    pub fn can_retreat(&self) -> bool {
        self.engine.can_retreat()
    }

    // ========================================================================
    // Chapter lifecycle
    // ========================================================================

    /// Open a chapter and restore its persisted session state: favourites,
    /// last-viewed card, the shuffle flag (with its saved history), and
    /// revision mode if it was active.
    pub async fn open_chapter(
        &mut self,
        chapter: &str,
        manifest: Option<Arc<ChapterManifest>>,
        fallback_total: u32,
    ) {
        self.chapter = chapter.to_string();
        self.total_cards = manifest
            .as_deref()
            .and_then(|m| m.total_cards)
            .unwrap_or(fallback_total);
        self.manifest = manifest;
        self.revision = None;
        self.transition_locked = false;
        self.queued.clear();
        self.burst.reset();

        self.favourites = self
            .ignore_failure("load favourites", self.db.get_favourites(chapter).await)
            .unwrap_or_default();

        let deck = self.build_current_deck();
        self.engine = Engine::new(deck, self.config.history_capacity);
        self.emit(SessionEvent::DeckChanged { len: self.engine.deck().len() });

        // Reposition on the last card seen in this chapter.
        let last = self
            .ignore_failure("load last card", self.db.last_card(chapter).await)
            .flatten();
        if let Some(card) = last {
            let deck = self.engine.deck().to_vec();
            self.engine.set_deck(deck, Some(card));
        }

        let shuffle = self
            .ignore_failure("load shuffle flag", self.db.shuffle_enabled().await)
            .unwrap_or(false);
        if shuffle {
            let persisted = self
                .ignore_failure("load history", self.db.load_history(chapter).await)
                .flatten();
            self.engine.enter_shuffle(persisted);
        }

        let revision = self
            .ignore_failure("load revision flag", self.db.revision_enabled().await)
            .unwrap_or(false);
        if revision {
            self.enter_revision().await;
        } else if let Some(card) = self.engine.current_card() {
            self.emit(SessionEvent::CardChanged {
                card,
                style: TransitionStyle::Forward,
                fast: true,
            });
        }
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Advance to the next card. Under a transition lock the request queues
    /// in lecture mode and drops in revision mode.
    pub async fn next(&mut self) {
        self.navigate(NavRequest::Next).await;
    }

    /// Go back one card. Sequential mode wraps; shuffle mode stops at the
    /// oldest history entry.
    pub async fn previous(&mut self) {
        self.navigate(NavRequest::Previous).await;
    }

    async fn navigate(&mut self, request: NavRequest) {
        if self.engine.deck().is_empty() {
            return;
        }
        if self.transition_locked {
            if self.revision.is_none() {
                self.queued.push_back(request);
            }
            return;
        }

        let fast = if self.revision.is_some() {
            self.burst.reset();
            false
        } else {
            self.burst.record(Instant::now())
        };

        let moved = match request {
            NavRequest::Next => self.engine.advance(),
            NavRequest::Previous => self.engine.retreat(),
        };
        let Some(card) = moved else {
            return;
        };

        self.persist_position().await;
        let style = match request {
            NavRequest::Next => TransitionStyle::Forward,
            NavRequest::Previous => TransitionStyle::Backward,
        };
        self.emit(SessionEvent::CardChanged { card, style, fast });
    }

    /// Mark the start of a presentation transition. Navigation requests
    /// arriving before `end_transition` queue up instead of applying.
    pub fn begin_transition(&mut self) {
        self.transition_locked = true;
    }

    /// Clear the transition lock and replay queued navigation in FIFO
    /// order, one request at a time.
    pub async fn end_transition(&mut self) {
        self.transition_locked = false;
        while let Some(request) = self.queued.pop_front() {
            self.navigate(request).await;
            if self.transition_locked {
                break;
            }
        }
    }

    // ========================================================================
    // Deck mutation
    // ========================================================================

    /// Toggle a card in the favourites set, persist it, and rebuild the
    /// deck. Removing the last favourite while the favourites-only filter
    /// is active legitimately empties the deck.
    pub async fn toggle_favourite(&mut self, card: u32) {
        let added = self.favourites.insert(card);
        if !added {
            self.favourites.remove(&card);
        }
        let result = if added {
            self.db.add_favourite(&self.chapter, card).await
        } else {
            self.db.remove_favourite(&self.chapter, card).await
        };
        self.ignore_failure("save favourite", result);
        self.rebuild_deck().await;
    }

    /// Replace the active filters and rebuild the deck, keeping the current
    /// card when it survives.
    pub async fn set_filters(&mut self, filters: Filters) {
        self.filters = filters;
        self.rebuild_deck().await;
    }

    async fn rebuild_deck(&mut self) {
        let keep = self.engine.current_card();
        let deck = match &self.revision {
            Some(progress) => progress.narrowed_deck(&self.build_current_deck()),
            None => self.build_current_deck(),
        };
        self.engine.set_deck(deck, keep);
        self.emit(SessionEvent::DeckChanged { len: self.engine.deck().len() });
        self.persist_position().await;
    }

    fn build_current_deck(&self) -> Vec<u32> {
        build_deck(
            self.manifest.as_deref(),
            self.total_cards,
            &self.filters,
            &self.favourites,
        )
    }

    // ========================================================================
    // Shuffle toggle
    // ========================================================================

    /// Toggle shuffle traversal. Entering restores the persisted history
    /// when it still matches the card on screen; leaving clears it.
    pub async fn toggle_shuffle(&mut self) {
        if self.engine.is_shuffle() {
            self.engine.exit_shuffle();
            self.ignore_failure("clear history", self.db.clear_history(&self.chapter).await);
            self.ignore_failure("save shuffle flag", self.db.set_shuffle_enabled(false).await);
        } else {
            let persisted = self
                .ignore_failure("load history", self.db.load_history(&self.chapter).await)
                .flatten();
            self.engine.enter_shuffle(persisted);
            self.ignore_failure("save shuffle flag", self.db.set_shuffle_enabled(true).await);
            self.persist_position().await;
        }
    }

    // ========================================================================
    // Revision mode
    // ========================================================================

    /// Enter revision mode: restore persisted progress, narrow the deck to
    /// the pending incorrect set past round 1, force shuffle traversal on
    /// and the favourites-only filter off, and reseed from the current card
    /// when it is still in the round's deck.
    pub async fn enter_revision(&mut self) {
        if self.revision.is_some() {
            return;
        }
        let progress = self
            .ignore_failure(
                "load revision progress",
                self.db.load_revision_progress(&self.chapter).await,
            )
            .flatten()
            .unwrap_or_default();

        self.favourites_only_before_revision = self.filters.favourites_only;
        self.filters.favourites_only = false;
        self.burst.reset();
        self.queued.clear();

        let round_deck = progress.narrowed_deck(&self.build_current_deck());
        let keep = self
            .engine
            .current_card()
            .filter(|card| round_deck.contains(card));
        self.engine.enter_shuffle(None);
        self.engine.set_deck(round_deck, keep);

        self.ignore_failure("save shuffle flag", self.db.set_shuffle_enabled(true).await);
        self.ignore_failure("save revision flag", self.db.set_revision_enabled(true).await);

        let round = progress.round;
        self.revision = Some(progress);
        self.emit(SessionEvent::RoundStarted { round, deck_len: self.engine.deck().len() });
        if let Some(card) = self.engine.current_card() {
            self.persist_position().await;
            self.emit(SessionEvent::CardChanged {
                card,
                style: TransitionStyle::Forward,
                fast: true,
            });
        }
    }

    /// Leave revision mode. Progress stays persisted; the deck is rebuilt
    /// without revision narrowing and the favourites-only filter returns to
    /// its pre-revision setting.
    pub async fn exit_revision(&mut self) {
        if self.revision.take().is_none() {
            return;
        }
        self.filters.favourites_only = self.favourites_only_before_revision;
        self.ignore_failure("save revision flag", self.db.set_revision_enabled(false).await);
        self.rebuild_deck().await;
    }

    /// Mark the current card as known.
    pub async fn mark_ok(&mut self) {
        self.mark(CardOutcome::Ok).await;
    }

    /// Mark the current card as needing another pass.
    pub async fn mark_not_ok(&mut self) {
        self.mark(CardOutcome::NotOk).await;
    }

    async fn mark(&mut self, outcome: CardOutcome) {
        let Some(card) = self.engine.current_card() else {
            return;
        };
        let Some(progress) = self.revision.as_mut() else {
            return;
        };

        let result = progress.mark(card, outcome, self.engine.deck());
        let progress = progress.clone();
        self.ignore_failure(
            "save revision progress",
            self.db.save_revision_progress(&self.chapter, &progress).await,
        );

        match result {
            MarkResult::NextCard(next) => {
                self.engine.force_show(next);
                self.persist_position().await;
                let style = match outcome {
                    CardOutcome::Ok => TransitionStyle::MarkedOk,
                    CardOutcome::NotOk => TransitionStyle::MarkedNotOk,
                };
                self.emit(SessionEvent::CardChanged { card: next, style, fast: false });
            }
            MarkResult::RoundComplete { all_mastered: true } => {
                let rounds = progress.round;
                self.emit(SessionEvent::RevisionComplete { rounds });
            }
            MarkResult::RoundComplete { all_mastered: false } => {
                self.begin_next_round().await;
            }
        }
    }

    async fn begin_next_round(&mut self) {
        let Some(progress) = self.revision.as_mut() else {
            return;
        };
        progress.begin_next_round();
        let round = progress.round;
        let round_deck = progress.narrowed_deck(&[]);
        let progress = progress.clone();
        self.ignore_failure(
            "save revision progress",
            self.db.save_revision_progress(&self.chapter, &progress).await,
        );

        // Each round starts over with a fresh history, seeded from the
        // card on screen when it carried into the narrowed deck.
        let prefer = self.engine.current_card();
        self.engine.set_deck(round_deck, None);
        self.engine.reseed_shuffle(prefer);
        self.emit(SessionEvent::RoundStarted { round, deck_len: self.engine.deck().len() });
        if let Some(card) = self.engine.current_card() {
            self.persist_position().await;
            self.emit(SessionEvent::CardChanged {
                card,
                style: TransitionStyle::Forward,
                fast: false,
            });
        }
    }

    /// Restart revision from round 1 over the full deck.
    pub async fn restart_revision(&mut self) {
        if self.revision.is_none() {
            return;
        }
        let progress = RevisionProgress::default();
        self.ignore_failure(
            "save revision progress",
            self.db.save_revision_progress(&self.chapter, &progress).await,
        );
        self.revision = Some(progress);

        let deck = self.build_current_deck();
        self.engine.enter_shuffle(None);
        self.engine.set_deck(deck, None);
        // The abandoned cycle's history must not replay through previous().
        self.engine.reseed_shuffle(None);
        self.emit(SessionEvent::RoundStarted { round: 1, deck_len: self.engine.deck().len() });
        if let Some(card) = self.engine.current_card() {
            self.persist_position().await;
            self.emit(SessionEvent::CardChanged {
                card,
                style: TransitionStyle::Forward,
                fast: true,
            });
        }
    }

    // ========================================================================
    // Persistence plumbing
    // ========================================================================

    /// Write the pieces of session position that survive a restart: the
    /// shuffle history (when shuffling) and the last-viewed card.
    async fn persist_position(&mut self) {
        if self.engine.is_shuffle() {
            let entries = self.engine.history_entries().to_vec();
            self.ignore_failure(
                "save history",
                self.db.save_history(&self.chapter, &entries).await,
            );
        }
        if let Some(card) = self.engine.current_card() {
            self.ignore_failure(
                "save last card",
                self.db.set_last_card(&self.chapter, card).await,
            );
        }
    }

    /// Log a storage failure and keep going. The session runs in memory
    /// when persistence is unavailable.
    fn ignore_failure<T>(&self, action: &str, result: anyhow::Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(chapter = %self.chapter, action, error = %e, "Persistence unavailable, continuing in memory");
                None
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        // A dropped receiver means no presentation layer is listening;
        // state transitions still apply.
        let _ = self.events.send(event);
    }
}

// ============================================================================
// Tests
// ============================================================================
