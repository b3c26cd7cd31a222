//! Sweep Client: paginated datastore scans with pacing and rate-limit
//! backoff, the HTTP transports, and the `sweep` command surface.

pub mod abort;
pub mod accessor;
pub mod app;
pub mod cli;
pub mod config;
pub mod dump;
pub mod error;
pub mod pacing;
pub mod paginator;
pub mod ranking;
pub mod runner;
pub mod transport;
pub mod users;

pub use abort::{AbortController, AbortSignal};
pub use accessor::EntryAccessor;
pub use app::{App, RunStatus};
pub use config::{ConfigError, PacingConfig, SweepConfig};
pub use dump::DumpRecord;
pub use error::SweepError;
pub use pacing::Pacer;
pub use paginator::{Page, Paginator};
pub use ranking::{RankingSink, SortedMapClient};
pub use runner::{Confirmation, KeyError, ScanCounts, ScanOutcome, ScanResult, ScanRunner};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
#[cfg(any(test, feature = "test-util"))]
pub use transport::MemoryRemote;
