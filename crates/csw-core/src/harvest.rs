//! Harvesting session: count, concurrent paginated fetch, classification and
//! removed-record reconciliation.
//!
//! # Architecture
//!
//! A [`Harvester`] is a pull-based session over any [`CatalogClient`]. The
//! consumer drives it by calling [`Harvester::next`]; every state transition
//! happens inside that call, on the consumer's task. Requests in flight are
//! futures owned by the session and polled from `next`, so counters and
//! offsets are never mutated concurrently and no lock is needed around the
//! session state.
//!
//! ```text
//! idle -> counting -> running -> draining -> finished (successful | failed | cancelled)
//! ```
//!
//! # Backpressure
//!
//! New pages are only requested while the output queue is empty, and at most
//! `concurrency` requests are in flight. Buffered records are therefore
//! bounded by `step * concurrency`.
//!
//! # Failure model
//!
//! - A page that fails is not retried: its expected records are added to
//!   `missed` and the crawl moves on.
//! - A page with more records than requested aborts the session.
//! - No completed network operation within `activity_timeout` aborts the
//!   session.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use csw_core::{Harvester, HarvestConfig, TracingReporter};
//!
//! let mut harvester = Harvester::new(Arc::new(endpoint), HarvestConfig::default())?
//!     .with_reporter(TracingReporter);
//! while let Some(item) = harvester.next().await {
//!     let record = item?;
//!     println!("{} {}", record.status, record.original_id);
//! }
//! let report = harvester.report();
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::time::{timeout_at, Instant};

use crate::config::HarvestConfig;
use crate::error::AppError;
use crate::models::{
    CacheSnapshot, ElementSetName, RawRecord, Record, RecordStatus, Schema, SearchOptions,
    SearchResults,
};
use crate::progress::{HarvestEvent, HarvestReporter, SilentReporter};
use crate::records::{hash_identifier, normalize};
use crate::sync::{classify_record, compute_speed, HarvestCounters, HarvestReport, HarvestStatus};
use crate::traits::CatalogClient;

/// Internal state machine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestPhase {
    Idle,
    Counting,
    Running,
    Draining,
    Finished,
}

type TaskId = u64;

/// Completion flag of a dispatched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Pending,
    Completed,
}

impl Completion {
    /// Marks the task completed. Returns true only on the first call.
    fn complete(&mut self) -> bool {
        std::mem::replace(self, Completion::Completed) == Completion::Pending
    }
}

/// A page as dispatched.
#[derive(Debug, Clone, Copy)]
struct PageRequest {
    schema: Schema,
    start_position: u64,
    expected: u64,
}

enum TaskOutcome {
    Page {
        id: TaskId,
        page: PageRequest,
        result: Result<SearchResults, AppError>,
    },
    Probe {
        id: TaskId,
        original_id: String,
        result: Result<RawRecord, AppError>,
    },
}

/// A harvesting session bound to one catalog client.
pub struct Harvester<C: ?Sized, R = SilentReporter> {
    client: Arc<C>,
    reporter: R,
    config: HarvestConfig,
    cache: Option<CacheSnapshot>,

    phase: HarvestPhase,
    status: HarvestStatus,
    counters: HarvestCounters,
    count_known: bool,

    offset: u64,
    first_pass: Schema,
    current_pass: Schema,
    remaining_passes: VecDeque<Schema>,

    /// Identities seen per schema pass, for duplicate detection.
    seen: HashSet<(Schema, String)>,
    /// Distinct original identifiers observed.
    record_ids: HashSet<String>,

    tasks: HashMap<TaskId, Completion>,
    next_task_id: TaskId,
    pending_requests: usize,
    in_flight: FuturesUnordered<BoxFuture<'static, TaskOutcome>>,
    probes: VecDeque<String>,

    queue: VecDeque<Record>,
    fatal: Option<AppError>,
    error_message: Option<String>,

    deadline: Option<Instant>,
    clock: Option<Instant>,
    started_at: Option<DateTime<Utc>>,
    duration: Option<Duration>,
}

impl<C> Harvester<C, SilentReporter>
where
    C: CatalogClient + ?Sized + 'static,
{
    /// Creates an idle session. Nothing is requested before the first
    /// call to [`Harvester::next`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the configuration is out of bounds.
    pub fn new(client: Arc<C>, config: HarvestConfig) -> Result<Self, AppError> {
        config.validate()?;

        let mut passes: VecDeque<Schema> = config.schema.passes().into();
        let first_pass = passes.pop_front().unwrap_or(Schema::Dc);

        tracing::debug!(
            concurrency = config.concurrency,
            step = config.step,
            buffer = config.buffer_capacity(),
            schema = ?config.schema,
            "New harvester"
        );

        Ok(Self {
            client,
            reporter: SilentReporter,
            config,
            cache: None,
            phase: HarvestPhase::Idle,
            status: HarvestStatus::Pending,
            counters: HarvestCounters::default(),
            count_known: false,
            offset: 0,
            first_pass,
            current_pass: first_pass,
            remaining_passes: passes,
            seen: HashSet::new(),
            record_ids: HashSet::new(),
            tasks: HashMap::new(),
            next_task_id: 0,
            pending_requests: 0,
            in_flight: FuturesUnordered::new(),
            probes: VecDeque::new(),
            queue: VecDeque::new(),
            fatal: None,
            error_message: None,
            deadline: None,
            clock: None,
            started_at: None,
            duration: None,
        })
    }
}

impl<C, R> Harvester<C, R>
where
    C: CatalogClient + ?Sized + 'static,
    R: HarvestReporter,
{
    /// Replaces the event reporter.
    pub fn with_reporter<R2: HarvestReporter>(self, reporter: R2) -> Harvester<C, R2> {
        Harvester {
            client: self.client,
            reporter,
            config: self.config,
            cache: self.cache,
            phase: self.phase,
            status: self.status,
            counters: self.counters,
            count_known: self.count_known,
            offset: self.offset,
            first_pass: self.first_pass,
            current_pass: self.current_pass,
            remaining_passes: self.remaining_passes,
            seen: self.seen,
            record_ids: self.record_ids,
            tasks: self.tasks,
            next_task_id: self.next_task_id,
            pending_requests: self.pending_requests,
            in_flight: self.in_flight,
            probes: self.probes,
            queue: self.queue,
            fatal: self.fatal,
            error_message: self.error_message,
            deadline: self.deadline,
            clock: self.clock,
            started_at: self.started_at,
            duration: self.duration,
        }
    }

    /// Sets the snapshot of a previous harvest used for classification and
    /// removed-record reconciliation.
    pub fn with_cache(mut self, cache: CacheSnapshot) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn phase(&self) -> HarvestPhase {
        self.phase
    }

    pub fn status(&self) -> HarvestStatus {
        self.status
    }

    pub fn counters(&self) -> &HarvestCounters {
        &self.counters
    }

    pub fn pending_requests(&self) -> usize {
        self.pending_requests
    }

    /// True when every schema pass observed every matched record.
    pub fn is_exhaustive(&self) -> bool {
        self.count_known
            && self.config.schema.passes().iter().all(|pass| {
                self.seen.iter().filter(|(schema, _)| schema == pass).count() as u64
                    == self.counters.matched
            })
    }

    /// Pulls the next classified record.
    ///
    /// Returns `Some(Err(_))` once when a fatal error ends the session, and
    /// `None` when the session is finished. Records buffered before a fatal
    /// error are delivered first.
    pub async fn next(&mut self) -> Option<Result<Record, AppError>> {
        loop {
            if let Some(record) = self.queue.pop_front() {
                return Some(Ok(record));
            }
            if let Some(error) = self.fatal.take() {
                return Some(Err(error));
            }
            match self.phase {
                HarvestPhase::Idle | HarvestPhase::Counting => self.start().await,
                HarvestPhase::Running | HarvestPhase::Draining => self.poll_tasks().await,
                HarvestPhase::Finished => return None,
            }
        }
    }

    /// Drains the session, discarding records, and returns the final report.
    pub async fn run(mut self) -> HarvestReport {
        while let Some(item) = self.next().await {
            if let Err(error) = item {
                tracing::debug!(error = %error, "Harvest ended with a fatal error");
            }
        }
        self.report()
    }

    /// Stops the session: no further request is dispatched, requests in
    /// flight are dropped and buffered records are discarded.
    pub fn stop(&mut self) {
        if self.status.is_finished() {
            return;
        }
        tracing::debug!(pending = self.pending_requests, "Harvest stopped by consumer");
        self.abort_in_flight();
        self.queue.clear();
        self.probes.clear();
        self.finish(HarvestStatus::Cancelled);
    }

    /// Snapshot of the current accounting. Final once the session finished.
    pub fn report(&self) -> HarvestReport {
        let duration = self
            .duration
            .or_else(|| self.clock.map(|clock| clock.elapsed()))
            .unwrap_or_default();
        let duration_ms = duration.as_millis() as u64;

        HarvestReport {
            status: self.status,
            counters: self.counters.clone(),
            exhaustive: self.is_exhaustive(),
            started_at: self.started_at,
            duration: duration_ms,
            speed: compute_speed(self.counters.returned, duration_ms),
            endpoint: self.client.diagnostics(),
            error: self.error_message.clone(),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    async fn start(&mut self) {
        self.phase = HarvestPhase::Counting;
        self.started_at.get_or_insert_with(Utc::now);
        self.clock.get_or_insert_with(Instant::now);
        self.renew_activity_timeout();

        let options = SearchOptions::for_schema(self.first_pass);
        let deadline = self.current_deadline();
        let outcome = timeout_at(deadline, self.client.count(&options)).await;

        match outcome {
            Ok(Ok(matched)) => {
                self.renew_activity_timeout();
                let passes = 1 + self.remaining_passes.len() as u64;
                self.counters.matched = matched;
                self.counters.total = matched * passes;
                self.count_known = true;
                self.phase = HarvestPhase::Running;
                self.status = HarvestStatus::Running;
                tracing::debug!(matched, "Ready to harvest");
                self.reporter.report(HarvestEvent::Started {
                    matched,
                    total: self.counters.total,
                });
            }
            Ok(Err(error)) => self.fail(error),
            Err(_) => self.fail(self.activity_timeout_error()),
        }
    }

    /// Dispatches what can be dispatched, then waits for one task.
    async fn poll_tasks(&mut self) {
        self.schedule();

        if self.in_flight.is_empty() {
            self.advance();
            return;
        }

        let deadline = self.current_deadline();
        match timeout_at(deadline, self.in_flight.next()).await {
            Ok(Some(outcome)) => {
                self.renew_activity_timeout();
                self.on_outcome(outcome);
            }
            Ok(None) => {}
            Err(_) => self.fail(self.activity_timeout_error()),
        }
    }

    /// Moves to the next phase once nothing is left in flight.
    fn advance(&mut self) {
        if self.pending_requests > 0 {
            return;
        }
        match self.phase {
            HarvestPhase::Running => {
                if !self.has_more_pages() {
                    self.begin_draining();
                }
            }
            HarvestPhase::Draining => {
                if self.probes.is_empty() {
                    self.finish(HarvestStatus::Successful);
                }
            }
            _ => {}
        }
    }

    fn begin_draining(&mut self) {
        tracing::debug!(
            returned = self.counters.returned,
            "No more pages, draining"
        );
        self.phase = HarvestPhase::Draining;

        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let mut unseen: Vec<String> = cache
            .keys()
            .filter(|id| !self.record_ids.contains(*id))
            .cloned()
            .collect();
        unseen.sort();

        let exhaustive = self.is_exhaustive();
        self.reporter.report(HarvestEvent::Reconciling {
            unseen: unseen.len(),
            exhaustive,
        });

        if exhaustive {
            for original_id in unseen {
                self.emit_removed(original_id);
            }
        } else {
            self.probes.extend(unseen);
        }
    }

    fn finish(&mut self, status: HarvestStatus) {
        if self.status.is_finished() {
            return;
        }
        self.phase = HarvestPhase::Finished;
        self.status = status;
        self.deadline = None;
        self.duration = self.clock.map(|clock| clock.elapsed());

        let report = self.report();
        self.reporter.report(HarvestEvent::Finished { report: &report });
    }

    fn fail(&mut self, error: AppError) {
        if self.status.is_finished() {
            return;
        }
        self.abort_in_flight();
        self.probes.clear();
        self.reporter.report(HarvestEvent::Error { error: &error });
        self.error_message = Some(error.to_string());
        self.fatal = Some(error);
        self.finish(HarvestStatus::Failed);
    }

    fn abort_in_flight(&mut self) {
        self.in_flight = FuturesUnordered::new();
        for completion in self.tasks.values_mut() {
            if completion.complete() {
                self.pending_requests -= 1;
            }
        }
        self.tasks.clear();
    }

    // =========================================================================
    // Activity timeout
    // =========================================================================

    fn renew_activity_timeout(&mut self) {
        self.deadline = Some(Instant::now() + self.config.activity_timeout);
    }

    fn current_deadline(&self) -> Instant {
        self.deadline
            .unwrap_or_else(|| Instant::now() + self.config.activity_timeout)
    }

    fn activity_timeout_error(&self) -> AppError {
        AppError::ActivityTimeout(self.config.activity_timeout.as_millis() as u64)
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    fn schedule(&mut self) {
        match self.phase {
            HarvestPhase::Running => {
                while self.pending_requests < self.config.concurrency && self.has_more_pages() {
                    self.dispatch_page();
                }
            }
            HarvestPhase::Draining => {
                while self.pending_requests < self.config.concurrency {
                    let Some(original_id) = self.probes.pop_front() else {
                        break;
                    };
                    self.dispatch_probe(original_id);
                }
            }
            _ => {}
        }
    }

    /// True while the current pass has pages left, switching to the next
    /// schema pass when the current one is exhausted.
    fn has_more_pages(&mut self) -> bool {
        loop {
            if self.offset < self.counters.matched {
                return true;
            }
            match self.remaining_passes.pop_front() {
                Some(schema) => {
                    self.current_pass = schema;
                    self.offset = 0;
                    self.reporter.report(HarvestEvent::PassStarted { schema });
                }
                None => return false,
            }
        }
    }

    fn register_task(&mut self) -> TaskId {
        let id = self.next_task_id;
        self.next_task_id += 1;
        self.tasks.insert(id, Completion::Pending);
        self.pending_requests += 1;
        debug_assert!(self.pending_requests <= self.config.concurrency);
        id
    }

    /// Settles a task. Returns false if it was already settled.
    fn settle_task(&mut self, id: TaskId) -> bool {
        let Some(completion) = self.tasks.get_mut(&id) else {
            return false;
        };
        if !completion.complete() {
            return false;
        }
        self.tasks.remove(&id);
        self.pending_requests -= 1;
        true
    }

    fn dispatch_page(&mut self) {
        let step = self.config.step;
        let page = PageRequest {
            schema: self.current_pass,
            start_position: self.offset + 1,
            expected: (self.counters.matched - self.offset).min(step),
        };
        let options = SearchOptions::page(page.schema, self.offset, step);
        // Advanced before the request resolves; a failed range is not retried.
        self.offset += step;

        let id = self.register_task();
        tracing::debug!(
            start_position = page.start_position,
            pending = self.pending_requests,
            "Fetching records"
        );

        let client = Arc::clone(&self.client);
        self.in_flight.push(
            async move {
                let result = client.records(&options).await;
                TaskOutcome::Page { id, page, result }
            }
            .boxed(),
        );
    }

    fn dispatch_probe(&mut self, original_id: String) {
        let options = SearchOptions {
            schema: Some(self.first_pass),
            element_set_name: Some(ElementSetName::Brief),
            ..SearchOptions::default()
        };
        let id = self.register_task();
        let client = Arc::clone(&self.client);
        self.in_flight.push(
            async move {
                let result = client.record(&original_id, &options).await;
                TaskOutcome::Probe {
                    id,
                    original_id,
                    result,
                }
            }
            .boxed(),
        );
    }

    // =========================================================================
    // Results
    // =========================================================================

    fn on_outcome(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Page { id, page, result } => {
                if self.settle_task(id) {
                    self.on_page(page, result);
                }
            }
            TaskOutcome::Probe {
                id,
                original_id,
                result,
            } => {
                if self.settle_task(id) {
                    self.on_probe(original_id, result);
                }
            }
        }
    }

    fn on_page(&mut self, page: PageRequest, result: Result<SearchResults, AppError>) {
        let results = match result {
            Ok(results) => results,
            Err(error) => {
                self.counters.errored_pages += 1;
                self.counters.missed += page.expected;
                let error = AppError::FetchPage {
                    start_position: page.start_position,
                    source: Box::new(error),
                };
                self.reporter.report(HarvestEvent::PageError { error: &error });
                return;
            }
        };

        self.counters.returned_pages += 1;
        let received = results.records.len() as u64;

        if received > page.expected {
            self.fail(AppError::ProtocolViolation {
                start_position: page.start_position,
                expected: page.expected,
                returned: received,
            });
            return;
        }
        if received < page.expected {
            tracing::debug!(
                start_position = page.start_position,
                expected = page.expected,
                received,
                "Short page"
            );
            self.counters.missed += page.expected - received;
        }

        self.counters.returned += received;
        self.reporter.report(HarvestEvent::Progress { count: received });

        for raw in results.records {
            self.process_record(raw, page.schema);
        }
    }

    fn process_record(&mut self, raw: RawRecord, schema: Schema) {
        let normalized = normalize(raw);

        let Some(original_id) = normalized.original_id.clone() else {
            self.counters.record_errors += 1;
            self.reporter.report(HarvestEvent::RecordError {
                record_type: &normalized.record_type,
            });
            return;
        };

        if !self.seen.insert((schema, original_id.clone())) {
            self.counters.duplicate += 1;
            self.reporter.report(HarvestEvent::RecordDuplicate {
                original_id: &original_id,
                record_type: &normalized.record_type,
            });
            return;
        }

        let cached_hash = self
            .cache
            .as_ref()
            .and_then(|cache| cache.get(&original_id))
            .map(String::as_str);
        let decision = classify_record(cached_hash, &normalized.content_hash);
        tracing::trace!(
            original_id = original_id.as_str(),
            status = %decision.status,
            reason = decision.reason,
            "Classified record"
        );

        if let Some(record) = normalized.classified(decision.status) {
            self.record_ids.insert(original_id);
            self.counters
                .record(record.record_type.as_deref(), record.status);
            self.reporter.report(HarvestEvent::Record(&record));
            self.queue.push_back(record);
        }
    }

    fn on_probe(&mut self, original_id: String, result: Result<RawRecord, AppError>) {
        match result {
            Err(AppError::RecordNotFound(_)) => self.emit_removed(original_id),
            Ok(_) => {
                tracing::debug!(original_id = original_id.as_str(), "Record still present");
            }
            Err(error) => {
                tracing::debug!(
                    original_id = original_id.as_str(),
                    error = %error,
                    "Probe failed, keeping record"
                );
            }
        }
    }

    fn emit_removed(&mut self, original_id: String) {
        let content_hash = self
            .cache
            .as_ref()
            .and_then(|cache| cache.get(&original_id))
            .cloned()
            .unwrap_or_default();
        let record = Record {
            id: hash_identifier(&original_id),
            original_id,
            record_type: None,
            title: None,
            modified: None,
            content_hash,
            status: RecordStatus::Removed,
            body: None,
        };
        self.counters.record(None, RecordStatus::Removed);
        self.reporter.report(HarvestEvent::Record(&record));
        self.queue.push_back(record);
    }
}
