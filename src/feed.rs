//! Running record list for one (collection, sort, page size) epoch.
//!
//! [`FeedSession`] owns the pagination [`Engine`], appends every batch it
//! emits in arrival order and starts over whenever the collection or the
//! fetch-relevant preferences change. Collection input is debounced and only
//! applied when it differs from the active collection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use tracing::{debug, info};

use crate::data::{FeedService, FetchQuery};
use crate::normalize::MediaRecord;
use crate::pagination::{AdvanceReport, Engine, EngineEvent, PaginationState, ScrollHandle};
use crate::preferences::{Preferences, PreferencesStore};

#[derive(Debug, Clone)]
pub struct FeedOptions {
    pub collection: String,
    pub debounce: Duration,
    pub max_attempts: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedUpdate {
    Reset { collection: String },
    Appended(Vec<MediaRecord>),
    Finished(AdvanceReport),
}

struct PendingInput {
    name: String,
    since: Instant,
}

pub struct FeedSession {
    engine: Engine,
    prefs: Preferences,
    prefs_rx: Receiver<Preferences>,
    collection: String,
    pending_input: Option<PendingInput>,
    debounce: Duration,
    records: Vec<MediaRecord>,
    queued: Vec<FeedUpdate>,
}

impl FeedSession {
    /// Creates the session and immediately starts fetching the first page.
    pub fn new(
        service: Arc<dyn FeedService>,
        options: FeedOptions,
        prefs: Preferences,
        prefs_rx: Receiver<Preferences>,
    ) -> Self {
        let mut session = Self {
            engine: Engine::new(service, options.max_attempts),
            prefs,
            prefs_rx,
            collection: normalize_collection(&options.collection),
            pending_input: None,
            debounce: options.debounce,
            records: Vec::new(),
            queued: Vec::new(),
        };
        session.restart();
        session
    }

    pub fn attach(
        service: Arc<dyn FeedService>,
        options: FeedOptions,
        store: &PreferencesStore,
    ) -> Self {
        let rx = store.subscribe();
        Self::new(service, options, store.current(), rx)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn preferences(&self) -> Preferences {
        self.prefs
    }

    pub fn records(&self) -> &[MediaRecord] {
        &self.records
    }

    pub fn is_loading(&self) -> bool {
        self.engine.is_loading()
    }

    pub fn pagination(&self) -> &PaginationState {
        self.engine.state()
    }

    /// Records collection input; applied by [`poll`](Self::poll) once it has
    /// been stable for the debounce interval.
    pub fn set_collection(&mut self, name: &str) {
        self.pending_input = Some(PendingInput {
            name: normalize_collection(name),
            since: Instant::now(),
        });
    }

    /// Asks for the next page after the last entry read. Rejected while an
    /// advance is still running; the scroll handle is completed either way.
    pub fn next_page(&mut self, scroll: Option<ScrollHandle>) -> bool {
        if self.engine.is_loading() {
            if let Some(scroll) = scroll {
                scroll.complete();
            }
            return false;
        }
        let cursor = self
            .engine
            .state()
            .cursor
            .clone()
            .or_else(|| self.records.last().map(|record| record.id.clone()));
        let query = self.query().with_cursor(cursor);
        if !query.is_issuable() {
            if let Some(scroll) = scroll {
                scroll.complete();
            }
            return false;
        }
        self.engine.start(query, scroll);
        true
    }

    /// Applies settled input and preference changes, then drains whatever the
    /// engine has produced so far.
    pub fn poll(&mut self) -> Vec<FeedUpdate> {
        self.apply_input();
        self.apply_preferences();
        while let Some(event) = self.engine.try_next_event() {
            self.apply_event(event);
        }
        std::mem::take(&mut self.queued)
    }

    /// Like [`poll`](Self::poll), but blocks until the running advance
    /// finishes or `timeout` elapses.
    pub fn wait_idle(&mut self, timeout: Duration) -> Vec<FeedUpdate> {
        let deadline = Instant::now() + timeout;
        let mut updates = self.poll();
        while self.engine.is_loading() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.engine.next_event(remaining) {
                Some(event) => self.apply_event(event),
                None => break,
            }
            updates.append(&mut self.queued);
        }
        updates
    }

    fn apply_input(&mut self) {
        let settled = match &self.pending_input {
            Some(input) => input.since.elapsed() >= self.debounce,
            None => false,
        };
        if !settled {
            return;
        }
        let Some(input) = self.pending_input.take() else {
            return;
        };
        if input.name.is_empty() || input.name == self.collection {
            return;
        }
        info!(from = %self.collection, to = %input.name, "switching collection");
        self.collection = input.name;
        self.restart();
    }

    fn apply_preferences(&mut self) {
        let Some(latest) = self.prefs_rx.try_iter().last() else {
            return;
        };
        let changed = !latest.same_fetch_params(&self.prefs);
        self.prefs = latest;
        if changed {
            debug!(page_size = latest.page_size, sort = latest.sort.as_str(), "preferences changed");
            self.restart();
        }
    }

    fn apply_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Batch { records, .. } => {
                self.records.extend(records.iter().cloned());
                self.queued.push(FeedUpdate::Appended(records));
            }
            EngineEvent::Finished { report, .. } => {
                self.queued.push(FeedUpdate::Finished(report));
            }
        }
    }

    fn query(&self) -> FetchQuery {
        FetchQuery::new(self.collection.clone(), self.prefs.sort, self.prefs.page_size)
    }

    fn restart(&mut self) {
        self.engine.reset();
        self.records.clear();
        self.queued.push(FeedUpdate::Reset {
            collection: self.collection.clone(),
        });
        let query = self.query();
        if query.is_issuable() {
            self.engine.start(query, None);
        }
    }
}

fn normalize_collection(name: &str) -> String {
    name.trim()
        .trim_start_matches("/")
        .trim_start_matches("r/")
        .trim_end_matches('/')
        .to_string()
}
