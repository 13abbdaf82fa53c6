//! # Usage Ledger Module
//!
//! Append-only accounting of every paid API call attempt, cached or live.
//! Recording is non-blocking and can never fail the request it describes.

pub mod entry;
pub mod ledger;
pub mod sinks;

pub use entry::{
    BillingCategory, QueryType, UsageContext, UsageLogEntry, UsageLogParams, MAX_FIELD_CHARS,
};
pub use ledger::{LedgerShutdownResult, UsageLedger, UsageLedgerHandle, UsageLedgerStats};
pub use sinks::{
    sink_from_config, MemoryUsageSink, PostgresUsageSink, TracingUsageSink, UsageSink,
    UsageSinkError,
};
