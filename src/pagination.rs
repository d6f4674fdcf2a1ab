//! Page-advance engine.
//!
//! One page-advance fetches a listing page, keeps the playable records and,
//! while the quota is not met and the upstream keeps returning entries,
//! fetches again from the last entry's cursor asking only for what is still
//! missing. Every fetch is capped at [`MAX_ATTEMPTS`] per advance. Each
//! attempt's records are emitted as soon as they arrive.
//!
//! [`Engine`] runs advances on worker threads. Every advance carries a
//! request id and a cancel flag; starting a new advance or resetting flips the
//! flag of the previous one and its late events are discarded.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use crate::data::{FeedService, FetchQuery, PageResult};
use crate::normalize::MediaRecord;

pub const MAX_ATTEMPTS: usize = 10;

/// One-shot completion signal for whoever asked for more content
/// (an infinite-scroll spinner, typically).
pub struct ScrollHandle(Box<dyn FnOnce() + Send>);

impl ScrollHandle {
    pub fn new(on_complete: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(on_complete))
    }

    pub fn complete(self) {
        (self.0)()
    }
}

impl fmt::Debug for ScrollHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ScrollHandle")
    }
}

#[derive(Debug, Default)]
pub struct PaginationState {
    pub cursor: Option<String>,
    pub retry_count: usize,
    pub total_found: usize,
    pub scroll: Option<ScrollHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// Quota met, or the upstream ran dry.
    Satisfied,
    /// Attempt ceiling reached with the quota still open.
    Exhausted,
    /// Superseded before it finished.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvanceReport {
    pub outcome: AdvanceOutcome,
    pub attempts: usize,
    pub total_found: usize,
    /// Cursor after the last upstream entry read, playable or not.
    pub last_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Expand {
        cursor: Option<String>,
        required: usize,
    },
    Finish(AdvanceOutcome),
}

/// Decides what follows a fetched page. `attempts` counts fetches made so far
/// in this advance, including the one that produced `page`.
pub fn next_step(page: &PageResult, attempts: usize, max_attempts: usize) -> Step {
    let still_needed = page.required.saturating_sub(page.records.len());
    let more_upstream = page.raw_count > 0 && page.last_cursor.is_some();

    if still_needed > 0 && more_upstream && attempts < max_attempts {
        return Step::Expand {
            cursor: page.last_cursor.clone(),
            required: still_needed,
        };
    }
    if still_needed == 0 || !more_upstream {
        Step::Finish(AdvanceOutcome::Satisfied)
    } else {
        Step::Finish(AdvanceOutcome::Exhausted)
    }
}

/// Runs one page-advance to completion on the calling thread.
///
/// `emit` receives each attempt's playable records, capped at that attempt's
/// quota, and the attempt number. Empty batches are not emitted.
pub fn run_advance<F>(
    service: &dyn FeedService,
    query: FetchQuery,
    max_attempts: usize,
    cancel: &AtomicBool,
    mut emit: F,
) -> AdvanceReport
where
    F: FnMut(usize, Vec<MediaRecord>),
{
    let mut report = AdvanceReport {
        outcome: AdvanceOutcome::Satisfied,
        attempts: 0,
        total_found: 0,
        last_cursor: None,
    };
    if !query.is_issuable() {
        return report;
    }

    let mut query = query;
    loop {
        if cancel.load(Ordering::SeqCst) {
            report.outcome = AdvanceOutcome::Cancelled;
            return report;
        }

        let page = service.fetch_page(&query);
        report.attempts += 1;

        if cancel.load(Ordering::SeqCst) {
            report.outcome = AdvanceOutcome::Cancelled;
            return report;
        }

        let step = next_step(&page, report.attempts, max_attempts);
        if page.last_cursor.is_some() {
            report.last_cursor = page.last_cursor.clone();
        }
        let batch: Vec<MediaRecord> = page.records.into_iter().take(page.required).collect();
        debug!(
            collection = %query.collection,
            attempt = report.attempts,
            required = query.required,
            found = batch.len(),
            raw = page.raw_count,
            "page attempt"
        );
        report.total_found += batch.len();
        if !batch.is_empty() {
            emit(report.attempts, batch);
        }

        match step {
            Step::Expand { cursor, required } => {
                query.cursor = cursor;
                query.required = required;
            }
            Step::Finish(outcome) => {
                report.outcome = outcome;
                return report;
            }
        }
    }
}

#[derive(Debug)]
pub enum EngineEvent {
    Batch {
        request_id: u64,
        attempt: usize,
        records: Vec<MediaRecord>,
    },
    Finished {
        request_id: u64,
        report: AdvanceReport,
    },
}

impl EngineEvent {
    fn request_id(&self) -> u64 {
        match self {
            EngineEvent::Batch { request_id, .. } | EngineEvent::Finished { request_id, .. } => {
                *request_id
            }
        }
    }
}

struct PendingAdvance {
    request_id: u64,
    cancel_flag: Arc<AtomicBool>,
}

pub struct Engine {
    service: Arc<dyn FeedService>,
    max_attempts: usize,
    state: PaginationState,
    pending: Option<PendingAdvance>,
    next_request_id: u64,
    events_tx: Sender<EngineEvent>,
    events_rx: Receiver<EngineEvent>,
}

impl Engine {
    pub fn new(service: Arc<dyn FeedService>, max_attempts: usize) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            service,
            max_attempts: max_attempts.max(1),
            state: PaginationState::default(),
            pending: None,
            next_request_id: 1,
            events_tx,
            events_rx,
        }
    }

    pub fn state(&self) -> &PaginationState {
        &self.state
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    /// Starts an advance on a worker thread, superseding any running one.
    pub fn start(&mut self, query: FetchQuery, scroll: Option<ScrollHandle>) -> u64 {
        self.cancel_pending();

        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.pending = Some(PendingAdvance {
            request_id,
            cancel_flag: cancel_flag.clone(),
        });
        self.state.cursor = query.cursor.clone();
        self.state.retry_count = 0;
        self.state.total_found = 0;
        self.state.scroll = scroll;

        debug!(
            request_id,
            collection = %query.collection,
            sort = query.sort.as_str(),
            cursor = ?query.cursor,
            required = query.required,
            "starting page advance"
        );

        let tx = self.events_tx.clone();
        let service = self.service.clone();
        let max_attempts = self.max_attempts;
        thread::spawn(move || {
            let report = run_advance(
                service.as_ref(),
                query,
                max_attempts,
                &cancel_flag,
                |attempt, records| {
                    if !cancel_flag.load(Ordering::SeqCst) {
                        let _ = tx.send(EngineEvent::Batch {
                            request_id,
                            attempt,
                            records,
                        });
                    }
                },
            );
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(EngineEvent::Finished { request_id, report });
        });

        request_id
    }

    /// Cancels any running advance and forgets the pagination state.
    pub fn reset(&mut self) {
        self.cancel_pending();
        self.state = PaginationState::default();
    }

    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
            debug!(request_id = pending.request_id, "page advance superseded");
        }
        if let Some(scroll) = self.state.scroll.take() {
            scroll.complete();
        }
    }

    /// Next event of the current advance, without blocking.
    pub fn try_next_event(&mut self) -> Option<EngineEvent> {
        while let Ok(event) = self.events_rx.try_recv() {
            if let Some(event) = self.accept(event) {
                return Some(event);
            }
        }
        None
    }

    /// Next event of the current advance, waiting at most `timeout`.
    pub fn next_event(&mut self, timeout: Duration) -> Option<EngineEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events_rx.recv_timeout(remaining) {
                Ok(event) => {
                    if let Some(event) = self.accept(event) {
                        return Some(event);
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None
                }
            }
        }
    }

    fn accept(&mut self, event: EngineEvent) -> Option<EngineEvent> {
        let pending = self.pending.as_ref()?;
        if pending.cancel_flag.load(Ordering::SeqCst) || pending.request_id != event.request_id()
        {
            return None;
        }
        match &event {
            EngineEvent::Batch {
                attempt, records, ..
            } => {
                self.state.retry_count = *attempt;
                self.state.total_found += records.len();
                if let Some(last) = records.last() {
                    self.state.cursor = Some(last.id.clone());
                }
            }
            EngineEvent::Finished { report, .. } => {
                self.state.retry_count = report.attempts;
                // Nothing past the last emitted record was dropped, so the
                // next advance can skip the unplayable tail.
                if report.outcome == AdvanceOutcome::Exhausted && report.last_cursor.is_some() {
                    self.state.cursor = report.last_cursor.clone();
                }
                self.pending = None;
                if let Some(scroll) = self.state.scroll.take() {
                    scroll.complete();
                }
                debug!(
                    outcome = ?report.outcome,
                    attempts = report.attempts,
                    found = report.total_found,
                    "page advance finished"
                );
            }
        }
        Some(event)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }
    }
}
