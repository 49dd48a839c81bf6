//! Search backend access.
//!
//! The follow engine talks to a [`SearchBackend`]; [`ElasticClient`] is the
//! HTTP implementation for Elasticsearch-compatible servers.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use serde_json::{json, Value};
use tracing::{debug, trace};
use url::Url;

use crate::query::Predicate;
use crate::{Error, Result};

/// Port assumed when the URL does not name one.
pub const DEFAULT_PORT: u16 = 9200;

/// Sort direction on the timestamp field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        }
    }
}

/// One page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub partitions: Vec<String>,
    pub predicate: Predicate,
    pub sort_field: String,
    pub order: SortOrder,
    pub from: usize,
    pub size: usize,
}

impl SearchRequest {
    /// `_search` request body.
    pub fn to_body(&self) -> Value {
        json!({
            "query": self.predicate.to_json(),
            "sort": [{ self.sort_field.as_str(): { "order": self.order.as_str() } }],
            "from": self.from,
            "size": self.size,
        })
    }
}

/// Documents returned for one request, in wire order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub documents: Vec<Value>,
    /// Total matches on the backend (may exceed `documents.len()`).
    pub total: u64,
}

/// A distinct field value and how many documents carry it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermBucket {
    pub key: String,
    pub count: u64,
}

/// Operations the follow engine needs from a search backend.
pub trait SearchBackend {
    /// Names of every index on the backend.
    fn list_partitions(&self) -> Result<Vec<String>>;

    /// Run one search.
    fn search(&self, request: &SearchRequest) -> Result<SearchPage>;

    /// Distinct values of `field`, ordered by value.
    fn aggregate_terms(&self, partitions: &[String], field: &str, limit: usize) -> Result<Vec<TermBucket>>;
}

impl<T: SearchBackend + ?Sized> SearchBackend for &T {
    fn list_partitions(&self) -> Result<Vec<String>> {
        (**self).list_partitions()
    }

    fn search(&self, request: &SearchRequest) -> Result<SearchPage> {
        (**self).search(request)
    }

    fn aggregate_terms(&self, partitions: &[String], field: &str, limit: usize) -> Result<Vec<TermBucket>> {
        (**self).aggregate_terms(partitions, field, limit)
    }
}

/// Connection settings for [`ElasticClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

impl ClientOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: None,
            password: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }
}

/// Add a scheme and default port to a bare host URL.
///
/// `localhost` becomes `http://localhost:9200`; URLs that already carry a
/// port or a path (even a lone `/`) keep the scheme's port. The result has
/// no trailing slash.
pub fn normalize_url(input: &str) -> Result<String> {
    let input = input.trim();
    let input = if input.contains("://") {
        input.to_string()
    } else {
        trace!(url = %input, "adding http:// prefix");
        format!("http://{}", input)
    };

    let mut url = Url::parse(&input)?;
    let has_path = url.path() != "/" || input.ends_with('/');
    if !has_path && !has_explicit_port(&url, &input) {
        url.set_port(Some(DEFAULT_PORT))
            .map_err(|_| Error::Config(format!("Cannot set a port on '{}'", input)))?;
        trace!(url = %url, "added default port");
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// `Url` forgets ports equal to the scheme default, so look at the input too.
fn has_explicit_port(url: &Url, input: &str) -> bool {
    if url.port().is_some() {
        return true;
    }
    match (url.host_str(), url.port_or_known_default()) {
        (Some(host), Some(port)) => input.contains(&format!("{}:{}", host, port)),
        _ => false,
    }
}

/// Blocking HTTP client for an Elasticsearch-compatible backend.
#[derive(Debug)]
pub struct ElasticClient {
    base_url: String,
    http: Client,
    auth: Option<(String, Option<String>)>,
}

impl ElasticClient {
    /// Create a client and check that the backend answers.
    pub fn connect(options: ClientOptions) -> Result<Self> {
        let http = Client::builder().timeout(options.timeout).build()?;
        let client = Self {
            base_url: normalize_url(&options.url)?,
            http,
            auth: options.user.map(|user| (user, options.password)),
        };
        client.ping()?;
        Ok(client)
    }

    fn ping(&self) -> Result<()> {
        let info = self.send(self.http.get(&self.base_url))?;
        debug!(
            version = info["version"]["number"].as_str().unwrap_or("unknown"),
            "connected to {}", self.base_url
        );
        Ok(())
    }

    fn send(&self, request: RequestBuilder) -> Result<Value> {
        let request = match &self.auth {
            Some((user, password)) => request.basic_auth(user, password.as_ref()),
            None => request,
        };
        let response = request.send()?;
        let status = response.status();
        let url = response.url().to_string();
        let text = response.text()?;
        trace!(%url, %status, body = %text, "response");

        if !status.is_success() {
            return Err(Error::Backend(format!("{} returned {}: {}", url, status, text)));
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path);
        trace!(%url, %body, "request");
        self.send(self.http.post(&url).json(body))
    }
}

impl SearchBackend for ElasticClient {
    fn list_partitions(&self) -> Result<Vec<String>> {
        let url = format!("{}/_cat/indices?format=json&h=index", self.base_url);
        let listing = self.send(self.http.get(&url))?;
        parse_index_listing(&listing)
    }

    fn search(&self, request: &SearchRequest) -> Result<SearchPage> {
        let path = format!("{}/_search", request.partitions.join(","));
        let response = self.post(&path, &request.to_body())?;
        parse_search_response(&response)
    }

    fn aggregate_terms(&self, partitions: &[String], field: &str, limit: usize) -> Result<Vec<TermBucket>> {
        let path = format!("{}/_search", partitions.join(","));
        let response = self.post(&path, &terms_aggregation_body(field, limit))?;
        parse_terms_response(&response, field)
    }
}

/// Body for a value-ordered terms aggregation named after `field`.
pub fn terms_aggregation_body(field: &str, limit: usize) -> Value {
    json!({
        "size": 0,
        "aggs": {
            field: {
                "terms": {
                    "field": field,
                    "size": limit,
                    "order": { "_key": "asc" },
                }
            }
        }
    })
}

fn malformed(what: &str) -> Error {
    Error::Backend(format!("malformed response: {}", what))
}

/// Parse `_cat/indices?format=json` output into sorted index names.
pub fn parse_index_listing(listing: &Value) -> Result<Vec<String>> {
    let rows = listing.as_array().ok_or_else(|| malformed("index listing is not an array"))?;
    let mut names: Vec<String> = rows
        .iter()
        .filter_map(|row| row["index"].as_str().map(str::to_string))
        .collect();
    names.sort();
    Ok(names)
}

/// Extract documents and total hit count from a `_search` response.
pub fn parse_search_response(response: &Value) -> Result<SearchPage> {
    let hits = &response["hits"];
    let total = match &hits["total"] {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::Object(obj) => obj.get("value").and_then(Value::as_u64).unwrap_or(0),
        _ => 0,
    };
    let documents = hits["hits"]
        .as_array()
        .ok_or_else(|| malformed("missing hits.hits"))?
        .iter()
        .map(|hit| hit.get("_source").cloned().ok_or_else(|| malformed("hit without _source")))
        .collect::<Result<Vec<_>>>()?;
    Ok(SearchPage { documents, total })
}

/// Extract buckets of the aggregation named `name`.
pub fn parse_terms_response(response: &Value, name: &str) -> Result<Vec<TermBucket>> {
    let buckets = response["aggregations"][name]["buckets"]
        .as_array()
        .ok_or_else(|| malformed("missing aggregation buckets"))?;
    Ok(buckets
        .iter()
        .filter_map(|bucket| {
            let key = match &bucket["key"] {
                Value::String(s) => s.clone(),
                Value::Null => return None,
                other => other.to_string(),
            };
            let count = bucket["doc_count"].as_u64().unwrap_or(0);
            Some(TermBucket { key, count })
        })
        .collect())
}
