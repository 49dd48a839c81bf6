//! stash: log search and tailing for Elasticsearch-style backends.
//!
//! Picks date-partitioned indices, builds search predicates from operator
//! criteria, and renders matching documents through a `%field` template,
//! optionally following new records as they arrive.

pub mod backend;
pub mod clock;
pub mod config;
pub mod error;
pub mod expr;
pub mod follow;
pub mod partition;
pub mod query;
pub mod render;
pub mod tunnel;

pub use backend::{normalize_url, ClientOptions, ElasticClient, SearchBackend, SearchPage, SearchRequest, SortOrder, TermBucket};
pub use clock::{Clock, SystemClock};
pub use config::{Profile, ProfileStore, DEFAULT_PROFILE};
pub use error::{Error, Result};
pub use expr::evaluate;
pub use follow::{Backoff, Cursor, Mode, MorePrompt, TailOptions, Tailer};
pub use partition::{select_partitions, DateWindow};
pub use query::{build_next_batch_query, build_query, Predicate, QueryCriteria, RelativeDuration, TimeFilter};
pub use render::{RenderTemplate, Renderer, DEFAULT_FORMAT};
pub use tunnel::{NoTunnel, SshTunnel, SshTunnelParams, TunnelProvider};
