//! The check pipeline: fetch, reconcile, dedup, filter, persist, dispatch,
//! plus failure bookkeeping and retention.

mod dispatcher;
mod error_tracker;
pub mod filter;
mod poller;
mod retention;

use crate::ai::Summarizer;
use crate::settings::Settings;

pub use dispatcher::Dispatcher;
pub use error_tracker::ErrorTracker;
pub use poller::{CheckOutcome, Poller};
pub use retention::{RetentionManager, RetentionReport};

/// What one pass over the sources runs with. Built once per pass from the
/// settings store.
#[derive(Clone, Copy)]
pub struct PassContext<'a> {
    pub settings: &'a Settings,
    pub summarizer: Option<&'a dyn Summarizer>,
}
