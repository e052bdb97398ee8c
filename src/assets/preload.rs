//! Background warm-up of cards the user is likely to look at next.
//!
//! Scheduling is idempotent per (chapter, card): a card already queued or
//! already warm is skipped, so calling on every navigation step is cheap.
//! The actual fetch is delayed so a user flipping quickly through cards
//! does not fan out requests for cards they skip straight past.
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::Config;
use crate::manifest::Side;

use super::resolver::AssetResolver;

#[derive(Clone)]
pub struct Preloader {
    resolver: Arc<AssetResolver>,
    delay: Duration,
    queued: Arc<Mutex<HashSet<(String, u32)>>>,
}

impl Preloader {
    pub fn new(resolver: Arc<AssetResolver>, config: &Config) -> Self {
        Self {
            resolver,
            delay: Duration::from_millis(config.preload_delay_ms),
            queued: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Queue both sides of a card for background resolution. Returns
    /// whether a task was actually spawned.
    pub fn schedule(&self, base: &str, number: u32) -> bool {
        // Both sides already resolved once: nothing left to warm up.
        if self.resolver.is_card_warm(base, number) {
            return false;
        }

        let key = (base.to_string(), number);
        {
            let mut queued = self.queued.lock().unwrap();
            if queued.contains(&key) {
                return false;
            }
            queued.insert(key.clone());
        }

        let resolver = self.resolver.clone();
        let queued = self.queued.clone();
        let delay = self.delay;
        let base = base.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            resolver.resolve(&base, Side::Front, number).await;
            resolver.resolve(&base, Side::Back, number).await;
            // Marker released whether the loads succeeded or not, so a
            // later schedule can retry after a transient failure.
            queued.lock().unwrap().remove(&(base, number));
        });
        true
    }

    /// Queue the immediate neighbours of the current deck position.
    pub fn schedule_neighbours(&self, base: &str, deck: &[u32], current: u32) {
        let Some(pos) = deck.iter().position(|&c| c == current) else {
            return;
        };
        if pos + 1 < deck.len() {
            self.schedule(base, deck[pos + 1]);
        }
        if pos > 0 {
            self.schedule(base, deck[pos - 1]);
        }
    }
}
