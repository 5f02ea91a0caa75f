//! Live game ingestion
//!
//! - `GameSource`: upstream seam (ESPN NFL, NBA CDN)
//! - `GameFeedProvider`: adaptive poller with breaker, timeout and change gate
//! - `FeedRegistry`: providers by league

pub mod provider;
pub mod registry;
pub mod source;

pub use provider::{GameFeedProvider, PollSummary};
pub use registry::FeedRegistry;
pub use source::GameSource;
