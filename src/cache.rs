//! In-memory read cache for poll records. Purely a coherency layer: entries
//! are dropped, never patched, and the next read refetches from storage.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::models::Poll;

#[derive(Default)]
pub struct PollCache {
    polls: RwLock<HashMap<i64, Arc<Poll>>>,
    listing: RwLock<Option<Arc<Vec<Poll>>>>,
}

impl PollCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, poll_id: i64) -> Option<Arc<Poll>> {
        self.polls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&poll_id)
            .cloned()
    }

    pub fn put(&self, poll: &Poll) {
        self.polls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(poll.id, Arc::new(poll.clone()));
    }

    // The cached listing is the full, viewer-independent poll collection.
    pub fn listing(&self) -> Option<Arc<Vec<Poll>>> {
        self.listing
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn put_listing(&self, polls: Vec<Poll>) -> Arc<Vec<Poll>> {
        let polls = Arc::new(polls);
        *self.listing.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&polls));
        polls
    }

    pub fn invalidate(&self, poll_id: i64) {
        self.polls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&poll_id);
    }

    pub fn invalidate_listing(&self) {
        *self.listing.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    // For when change notifications were missed and nothing can be trusted.
    pub fn clear(&self) {
        self.polls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.invalidate_listing();
    }
}
