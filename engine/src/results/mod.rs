//! Request outcomes, their collection and the run artifacts built from them

mod collector;
mod metadata;
mod outcome;
mod summary;
mod writer;

pub use collector::{CollectorError, ResultCollector};
pub use metadata::RunMetadata;
pub use outcome::{CSV_HEADER, CsvRow, GuardAction, RequestOutcome, RequestRecord, THROTTLED_STATUS};
pub use summary::{FairnessSummary, TenantSummary, interpolated_percentile, summarize};
pub use writer::{FAIRNESS_SUMMARY_JSON, META_JSON, REQUESTS_CSV, RunWriter};
