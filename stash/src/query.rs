//! Query criteria and predicate construction.
//!
//! Criteria are composed into a predicate tree in a fixed order: free-text
//! (or match-all), source filter, correlation-id filter, time range. Each
//! stage wraps the previous one as an AND filter.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, SecondsFormat, TimeDelta, TimeZone, Utc};
use serde_json::{json, Value};
use tracing::debug;

use crate::partition::{extract_ymd_date, DateWindow, TIMESTAMP_DATE_SEPARATOR};
use crate::{Error, Result};

/// Field holding the log line text.
pub const MESSAGE_FIELD: &str = "message";

/// Field holding the emitting application name.
pub const SOURCE_FIELD: &str = "source";

/// Field holding the request correlation id.
pub const REQUEST_ID_FIELD: &str = "x_request_id";

/// Correlation ids are matched on their short form.
pub const SHORT_ID_LEN: usize = 8;

/// Accepted layout for operator supplied timestamps (local time).
pub const TIMESTAMP_INPUT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Term prefix that selects a correlation id from the free-text terms.
const ID_TERM_PREFIX: &str = "id:";

/// Query string operator placed between two groups of terms.
const TERM_JOINER: &str = "AND";

/// Supported relative durations and their length in minutes.
const DURATIONS: &[(&str, u32)] = &[
    ("2m", 2),
    ("5m", 5),
    ("10m", 10),
    ("30m", 30),
    ("1h", 60),
    ("3h", 180),
    ("6h", 360),
    ("12h", 720),
    ("24h", 1_440),
    ("1d", 1_440),
    ("2d", 2_880),
    ("3d", 4_320),
    ("7d", 10_080),
    ("15d", 21_600),
    ("30d", 43_200),
];

/// A trailing time window such as `5m` or `7d`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelativeDuration {
    token: String,
    minutes: u32,
}

impl RelativeDuration {
    pub fn minutes(&self) -> u32 {
        self.minutes
    }

    pub fn as_delta(&self) -> TimeDelta {
        TimeDelta::minutes(i64::from(self.minutes))
    }

    /// Comma separated list of accepted tokens.
    pub fn accepted() -> String {
        DURATIONS
            .iter()
            .map(|(token, _)| *token)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromStr for RelativeDuration {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let token = s.trim();
        DURATIONS
            .iter()
            .find(|(name, _)| *name == token)
            .map(|(name, minutes)| RelativeDuration {
                token: name.to_string(),
                minutes: *minutes,
            })
            .ok_or_else(|| Error::InvalidDuration(s.to_string(), Self::accepted()))
    }
}

impl fmt::Display for RelativeDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token)
    }
}

/// Parse an operator timestamp (`YYYY-MM-DDTHH:MM:SS[.fraction]`) given in local time.
pub fn parse_local_timestamp(input: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(input.trim(), TIMESTAMP_INPUT_FORMAT)
        .map_err(|_| Error::InvalidTimestamp(input.to_string()))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| Error::InvalidTimestamp(input.to_string()))
}

/// Format an instant the way the backend stores timestamps.
pub fn to_wire_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Time range restriction on the timestamp field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeFilter {
    /// Inclusive lower bound, local time.
    pub after: Option<String>,
    /// Exclusive upper bound, local time.
    pub before: Option<String>,
    /// Trailing window, used only when neither bound is given.
    pub duration: Option<RelativeDuration>,
}

impl TimeFilter {
    pub fn is_active(&self) -> bool {
        self.after.is_some() || self.before.is_some() || self.duration.is_some()
    }

    fn duration_applies(&self) -> bool {
        self.duration.is_some() && self.after.is_none() && self.before.is_none()
    }

    /// Whether results have an effective lower bound (and so are read oldest first).
    pub fn has_lower_bound(&self) -> bool {
        self.after.is_some() || self.duration_applies()
    }

    /// Effective lower bound at `now`. A duration slides with `now`.
    pub fn lower_bound(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        if let Some(after) = &self.after {
            return parse_local_timestamp(after).map(Some);
        }
        match &self.duration {
            Some(duration) if self.duration_applies() => Ok(Some(now - duration.as_delta())),
            _ => Ok(None),
        }
    }

    pub fn upper_bound(&self) -> Result<Option<DateTime<Utc>>> {
        self.before.as_deref().map(parse_local_timestamp).transpose()
    }

    /// Day window used for index selection, or None when not time filtered.
    pub fn window(&self, now: DateTime<Utc>) -> Result<Option<DateWindow>> {
        if !self.is_active() {
            return Ok(None);
        }
        let after = match &self.after {
            Some(after) => Some(local_date(after)?),
            None => self
                .lower_bound(now)?
                .map(|bound| bound.with_timezone(&Local).date_naive()),
        };
        let before = self.before.as_deref().map(local_date).transpose()?;
        Ok(Some(DateWindow { after, before }))
    }
}

fn local_date(timestamp: &str) -> Result<NaiveDate> {
    parse_local_timestamp(timestamp)?;
    extract_ymd_date(timestamp, TIMESTAMP_DATE_SEPARATOR)
}

/// Everything the operator asked to search for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryCriteria {
    /// Free-text terms, in the order given.
    pub terms: Vec<String>,
    /// Allowed sources (empty = all).
    pub sources: BTreeSet<String>,
    /// Correlation id filter.
    pub correlation_id: Option<String>,
    /// Time range filter.
    pub time: TimeFilter,
    /// Field used for sorting, range filters and the cursor.
    pub timestamp_field: String,
}

impl QueryCriteria {
    pub fn new(timestamp_field: impl Into<String>) -> Self {
        Self {
            terms: Vec::new(),
            sources: BTreeSet::new(),
            correlation_id: None,
            time: TimeFilter::default(),
            timestamp_field: timestamp_field.into(),
        }
    }

    /// Set the free-text terms. `id:<value>` terms select a correlation id
    /// unless one is already set.
    pub fn with_terms<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for term in terms {
            let term = term.into();
            match term.strip_prefix(ID_TERM_PREFIX) {
                Some(id) if !id.is_empty() => {
                    if self.correlation_id.is_none() {
                        self.correlation_id = Some(id.to_string());
                    }
                }
                _ => self.terms.push(term),
            }
        }
        self
    }

    /// Append a further group of terms, joined to the existing free-text
    /// terms with `AND`. `id:` terms are lifted out before joining, so the
    /// operator only appears between two non-empty groups.
    pub fn and_terms<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let existing = std::mem::take(&mut self.terms);
        let mut criteria = self.with_terms(terms);
        let added = std::mem::replace(&mut criteria.terms, existing);
        if !criteria.terms.is_empty() && !added.is_empty() {
            criteria.terms.push(TERM_JOINER.to_string());
        }
        criteria.terms.extend(added);
        criteria
    }

    /// Restrict to a comma separated list of sources.
    pub fn with_sources(mut self, sources: &str) -> Self {
        self.sources = sources
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !id.is_empty() {
            self.correlation_id = Some(id);
        }
        self
    }

    pub fn with_time(mut self, time: TimeFilter) -> Self {
        self.time = time;
        self
    }

    /// Free-text terms as a single search phrase.
    pub fn phrase(&self) -> Option<String> {
        if self.terms.is_empty() {
            None
        } else {
            Some(self.terms.join(" "))
        }
    }

    /// Correlation id truncated to the short-id length.
    pub fn short_correlation_id(&self) -> Option<String> {
        self.correlation_id
            .as_deref()
            .map(|id| id.chars().take(SHORT_ID_LEN).collect())
    }

    /// Initial searches run oldest first whenever a lower bound is in effect.
    pub fn sort_ascending(&self) -> bool {
        self.time.has_lower_bound()
    }

    /// Validate every absolute timestamp without building a query.
    pub fn validate(&self) -> Result<()> {
        build_query(self, Utc::now()).map(|_| ())
    }
}

/// Inclusive or exclusive end of a range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bound {
    Inclusive(String),
    Exclusive(String),
}

/// Backend-native search predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    MatchAll,
    /// Full-text query with conjunctive term semantics.
    QueryString { query: String, default_field: String },
    /// Field equals any of the values.
    Terms { field: String, values: Vec<String> },
    /// Field equals the value.
    Term { field: String, value: String },
    Range {
        field: String,
        lower: Option<Bound>,
        upper: Option<Bound>,
    },
    /// `query` AND `filter`.
    Filtered {
        query: Box<Predicate>,
        filter: Box<Predicate>,
    },
}

impl Predicate {
    /// Wrap `self` so that `filter` must also hold.
    pub fn and(self, filter: Predicate) -> Predicate {
        Predicate::Filtered {
            query: Box::new(self),
            filter: Box::new(filter),
        }
    }

    pub fn is_match_all(&self) -> bool {
        matches!(self, Predicate::MatchAll)
    }

    /// Request body representation.
    pub fn to_json(&self) -> Value {
        match self {
            Predicate::MatchAll => json!({ "match_all": {} }),
            Predicate::QueryString { query, default_field } => json!({
                "query_string": {
                    "query": query,
                    "default_field": default_field,
                    "default_operator": "AND",
                }
            }),
            Predicate::Terms { field, values } => json!({ "terms": { field.as_str(): values } }),
            Predicate::Term { field, value } => json!({ "term": { field.as_str(): value } }),
            Predicate::Range { field, lower, upper } => {
                let mut bounds = serde_json::Map::new();
                match lower {
                    Some(Bound::Inclusive(v)) => {
                        bounds.insert("gte".to_string(), json!(v));
                    }
                    Some(Bound::Exclusive(v)) => {
                        bounds.insert("gt".to_string(), json!(v));
                    }
                    None => {}
                }
                match upper {
                    Some(Bound::Inclusive(v)) => {
                        bounds.insert("lte".to_string(), json!(v));
                    }
                    Some(Bound::Exclusive(v)) => {
                        bounds.insert("lt".to_string(), json!(v));
                    }
                    None => {}
                }
                json!({ "range": { field.as_str(): bounds } })
            }
            Predicate::Filtered { query, filter } => json!({
                "bool": {
                    "must": [query.to_json()],
                    "filter": [filter.to_json()],
                }
            }),
        }
    }
}

/// Build the predicate for `criteria` as of `now`.
pub fn build_query(criteria: &QueryCriteria, now: DateTime<Utc>) -> Result<Predicate> {
    let mut query = match criteria.phrase() {
        Some(phrase) => {
            debug!(%phrase, "query string query");
            Predicate::QueryString {
                query: phrase,
                default_field: MESSAGE_FIELD.to_string(),
            }
        }
        None => Predicate::MatchAll,
    };

    if !criteria.sources.is_empty() {
        debug!(sources = ?criteria.sources, "source filter");
        query = query.and(Predicate::Terms {
            field: SOURCE_FIELD.to_string(),
            values: criteria.sources.iter().cloned().collect(),
        });
    }

    if let Some(id) = criteria.short_correlation_id() {
        debug!(%id, "request id filter");
        query = query.and(Predicate::Term {
            field: REQUEST_ID_FIELD.to_string(),
            value: id,
        });
    }

    if criteria.time.is_active() {
        let lower = criteria.time.lower_bound(now)?;
        let upper = criteria.time.upper_bound()?;
        if lower.is_some() || upper.is_some() {
            debug!(?lower, ?upper, "time range filter");
            query = query.and(Predicate::Range {
                field: criteria.timestamp_field.clone(),
                lower: lower.map(|at| Bound::Inclusive(to_wire_timestamp(&at))),
                upper: upper.map(|at| Bound::Exclusive(to_wire_timestamp(&at))),
            });
        }
    }

    Ok(query)
}

/// Build the predicate for records strictly newer than `cursor`.
pub fn build_next_batch_query(
    criteria: &QueryCriteria,
    cursor: &str,
    now: DateTime<Utc>,
) -> Result<Predicate> {
    let base = build_query(criteria, now)?;
    Ok(base.and(Predicate::Range {
        field: criteria.timestamp_field.clone(),
        lower: Some(Bound::Exclusive(cursor.to_string())),
        upper: None,
    }))
}
