//! cartes — session engine for a paired front/back study-card viewer.
//!
//! The crate decides *which card is shown next*: it builds filtered decks
//! from chapter manifests, drives sequential and shuffle traversal with a
//! bounded history, runs the round-based revision loop, resolves card
//! numbers to working image URLs under format and cache-version
//! uncertainty, and persists session state to SQLite. Presentation
//! (rendering, animation, input) is an external collaborator consuming
//! the [`session::SessionEvent`] channel.

pub mod assets;
pub mod config;
pub mod deck;
pub mod manifest;
pub mod revision;
pub mod session;
pub mod storage;

pub use assets::{AssetResolver, ManifestStore, Preloader, Resolution};
pub use config::Config;
pub use deck::{build_deck, DifficultyFilter, Filters, TimerFilter};
pub use manifest::{ChapterManifest, Dimensions, Side};
pub use revision::{CardOutcome, MarkResult, RevisionProgress};
pub use session::{SessionController, SessionEvent, TransitionStyle};
pub use storage::{Database, DatabaseError};
