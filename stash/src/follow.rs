//! Search, paging and follow loop.
//!
//! Every mode starts from one initial search. After that the [`Tailer`]
//! either stops (source listing), asks the operator before each further
//! page, or polls forever with a coarse backoff. Pages are always rendered
//! oldest to newest, and the [`Cursor`] ends on the last rendered record.

use std::io::Write;
use std::thread;
use std::time::Duration;

use chrono::DateTime;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::{SearchBackend, SearchPage, SearchRequest, SortOrder};
use crate::clock::Clock;
use crate::partition::select_partitions;
use crate::query::{build_next_batch_query, build_query, QueryCriteria, SOURCE_FIELD};
use crate::render::Renderer;
use crate::{Error, Result};

/// Shortest pause between follow polls.
pub const MIN_DELAY: Duration = Duration::from_millis(500);

/// Longest pause between follow polls.
pub const MAX_DELAY: Duration = Duration::from_millis(2_000);

/// Amount the pause grows after an empty poll.
pub const DELAY_STEP: Duration = Duration::from_millis(500);

/// Page cap while following; nobody is pacing the requests.
pub const FOLLOW_PAGE_SIZE: usize = 9_000;

/// Number of distinct sources listed.
pub const SOURCE_LIMIT: usize = 100;

/// How a run proceeds after the initial search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Print the distinct sources and stop.
    ListSources,
    /// Fetch further pages when the operator asks for them.
    PagedFollow,
    /// Poll for new records until interrupted.
    ContinuousFollow,
}

/// Asks the operator whether to fetch another page.
pub trait MorePrompt {
    fn fetch_more(&mut self) -> Result<bool>;
}

/// Delay between follow polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self { delay: MIN_DELAY }
    }
}

impl Backoff {
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Delay after a poll: back to the floor when it returned records,
    /// one step longer (up to the ceiling) when it did not.
    pub fn next(self, had_results: bool) -> Self {
        let delay = if had_results {
            MIN_DELAY
        } else {
            (self.delay + DELAY_STEP).min(MAX_DELAY)
        };
        Self { delay }
    }
}

/// Timestamp of the most recent rendered record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor {
    last: Option<String>,
}

impl Cursor {
    pub fn get(&self) -> Option<&str> {
        self.last.as_deref()
    }

    pub fn is_set(&self) -> bool {
        self.last.is_some()
    }

    /// Move to `timestamp` unless that would move backward. Returns whether it moved.
    pub fn advance(&mut self, timestamp: &str) -> bool {
        let forward = match &self.last {
            None => true,
            Some(last) => match (DateTime::parse_from_rfc3339(last), DateTime::parse_from_rfc3339(timestamp)) {
                (Ok(last), Ok(next)) => next >= last,
                _ => timestamp >= last.as_str(),
            },
        };
        if forward {
            self.last = Some(timestamp.to_string());
        } else {
            warn!(cursor = ?self.last, %timestamp, "ignoring out of order timestamp");
        }
        forward
    }
}

/// Settings for a [`Tailer`].
#[derive(Debug, Clone)]
pub struct TailOptions {
    pub criteria: QueryCriteria,
    pub renderer: Renderer,
    /// Pattern index names must match.
    pub index_pattern: Regex,
    /// Page size for the initial search and operator requested pages.
    pub initial_entries: usize,
    /// Page size while following.
    pub follow_page_size: usize,
    /// Phrase highlighted when there are no search terms.
    pub watch: Option<String>,
}

impl TailOptions {
    pub fn new(criteria: QueryCriteria, renderer: Renderer, index_pattern: Regex) -> Self {
        Self {
            criteria,
            renderer,
            index_pattern,
            initial_entries: 100,
            follow_page_size: FOLLOW_PAGE_SIZE,
            watch: None,
        }
    }
}

/// Drives searches against a backend and writes rendered records to `out`.
pub struct Tailer<B, W, C> {
    backend: B,
    out: W,
    clock: C,
    criteria: QueryCriteria,
    renderer: Renderer,
    partitions: Vec<String>,
    cursor: Cursor,
    initial_entries: usize,
    follow_page_size: usize,
    highlight: Option<String>,
}

impl<B, W, C> Tailer<B, W, C>
where
    B: SearchBackend,
    W: Write,
    C: Clock,
{
    /// Validate the criteria and select the indices to search.
    pub fn open(backend: B, options: TailOptions, out: W, clock: C) -> Result<Self> {
        let TailOptions {
            criteria,
            renderer,
            index_pattern,
            initial_entries,
            follow_page_size,
            watch,
        } = options;

        let now = clock.now();
        build_query(&criteria, now)?;

        let available = backend.list_partitions()?;
        let window = criteria.time.window(now)?;
        let partitions = select_partitions(&available, &index_pattern, window.as_ref(), clock.today())?;
        if partitions.is_empty() {
            return Err(Error::NoPartition(index_pattern.as_str().to_string()));
        }
        info!("Using indices: {}", partitions.join(", "));

        let highlight = criteria.phrase().or(watch.filter(|w| !w.is_empty()));

        Ok(Self {
            backend,
            out,
            clock,
            criteria,
            renderer,
            partitions,
            cursor: Cursor::default(),
            initial_entries,
            follow_page_size,
            highlight,
        })
    }

    pub fn partitions(&self) -> &[String] {
        &self.partitions
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Run the selected mode to completion.
    pub fn run(&mut self, mode: Mode, prompt: &mut dyn MorePrompt) -> Result<()> {
        match mode {
            Mode::ListSources => self.list_sources().map(|_| ()),
            Mode::PagedFollow => {
                self.initial_search()?;
                while prompt.fetch_more()? {
                    self.next_batch(self.initial_entries)?;
                }
                Ok(())
            }
            Mode::ContinuousFollow => {
                self.initial_search()?;
                self.follow()
            }
        }
    }

    /// Print each distinct source once. Returns how many were printed.
    pub fn list_sources(&mut self) -> Result<usize> {
        let buckets = self
            .backend
            .aggregate_terms(&self.partitions, SOURCE_FIELD, SOURCE_LIMIT)?;
        for bucket in &buckets {
            writeln!(self.out, "{}", bucket.key)?;
        }
        self.out.flush()?;
        Ok(buckets.len())
    }

    /// Full query, oldest first when a lower bound is set, newest first otherwise.
    pub fn initial_search(&mut self) -> Result<usize> {
        let order = if self.criteria.sort_ascending() {
            SortOrder::Ascending
        } else {
            SortOrder::Descending
        };
        let request = SearchRequest {
            partitions: self.partitions.clone(),
            predicate: build_query(&self.criteria, self.clock.now())?,
            sort_field: self.criteria.timestamp_field.clone(),
            order,
            from: 0,
            size: self.initial_entries,
        };
        self.fetch(&request)
    }

    /// Records newer than the cursor, or the initial search again while the
    /// cursor is unset.
    pub fn next_batch(&mut self, size: usize) -> Result<usize> {
        let Some(cursor) = self.cursor.get() else {
            return self.initial_search();
        };
        let request = SearchRequest {
            partitions: self.partitions.clone(),
            predicate: build_next_batch_query(&self.criteria, cursor, self.clock.now())?,
            sort_field: self.criteria.timestamp_field.clone(),
            order: SortOrder::Descending,
            from: 0,
            size,
        };
        self.fetch(&request)
    }

    /// One follow iteration without the sleep.
    pub fn poll(&mut self, backoff: Backoff) -> Result<Backoff> {
        let rendered = self.next_batch(self.follow_page_size)?;
        Ok(backoff.next(rendered > 0))
    }

    /// Poll until the process is interrupted. Any backend error ends the loop.
    pub fn follow(&mut self) -> Result<()> {
        let mut backoff = Backoff::default();
        loop {
            thread::sleep(backoff.delay());
            backoff = self.poll(backoff)?;
        }
    }

    fn fetch(&mut self, request: &SearchRequest) -> Result<usize> {
        debug!(order = request.order.as_str(), size = request.size, "searching");
        let page = self.backend.search(request)?;
        self.render_page(&page, request.order)
    }

    fn render_page(&mut self, page: &SearchPage, order: SortOrder) -> Result<usize> {
        let docs: Box<dyn Iterator<Item = &Value>> = match order {
            SortOrder::Ascending => Box::new(page.documents.iter()),
            SortOrder::Descending => Box::new(page.documents.iter().rev()),
        };

        let mut rendered = 0;
        for doc in docs {
            let line = self.renderer.render(doc, self.highlight.as_deref());
            writeln!(self.out, "{}", line)?;
            rendered += 1;

            let field = &self.criteria.timestamp_field;
            let timestamp = doc
                .get(field)
                .and_then(Value::as_str)
                .ok_or_else(|| Error::MissingTimestamp(field.clone()))?;
            self.cursor.advance(timestamp);
        }
        self.out.flush()?;

        debug!(rendered, total = page.total, cursor = ?self.cursor.get(), "page rendered");
        Ok(rendered)
    }
}
