//! AI summaries: durable records, the two-level cache and the
//! quota-gated generate-or-fetch service

mod cache;
mod inflight;
mod service;
mod store;
mod tests;

pub use cache::SummaryCache;
pub use inflight::{InFlightGuard, InFlightTicket};
pub use service::{SummaryOutcome, SummaryService};
pub use store::{PutOutcome, SqliteSummaryStore, SummaryRecord, SummaryStore};
