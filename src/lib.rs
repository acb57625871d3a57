//! Compatibility adapter between a chart-rendering widget and any backend
//! speaking the Universal Data Feed (UDF) REST convention: historical bars,
//! symbol metadata, quotes, annotations, and timer-driven real-time updates.

pub mod config;
pub mod datafeed;
pub mod error;
pub mod fetch;
pub mod marks;
pub mod pulse;
pub mod symbols;
pub mod symbols_storage;

pub use config::{DatafeedConfiguration, Exchange};
pub use datafeed::{UdfDatafeed, DEFAULT_UPDATE_FREQUENCY};
pub use error::{FeedError, Result};
pub use fetch::{Bar, HistoryMeta, HistoryResult, QuoteData};
pub use marks::{Mark, TimescaleMark};
pub use symbols::{SearchResultItem, SymbolInfo};
