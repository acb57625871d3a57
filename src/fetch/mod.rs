pub mod history;
pub mod quotes;
pub mod request;

pub use history::{Bar, HistoryMeta, HistoryProvider, HistoryResult};
pub use quotes::{QuoteData, QuotesProvider};
pub use request::Requester;

/// Backend "OK" sentinel shared by the status-bearing endpoints.
pub const STATUS_OK: i64 = 0;
