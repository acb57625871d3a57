use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;

use crate::config::{DatafeedConfiguration, DEFAULT_RESOLUTIONS};
use crate::error::{FeedError, Result};
use crate::fetch::history::{Bar, HistoryMeta, HistoryProvider};
use crate::fetch::quotes::{QuoteData, QuotesProvider};
use crate::fetch::{Requester, STATUS_OK};
use crate::marks::{self, Mark, TimescaleMark, MARK_FIELDS, TIMESCALE_MARK_FIELDS};
use crate::pulse::{BarTickCallback, DataPulseProvider, QuoteTickCallback, QuotesPulseProvider};
use crate::symbols::{backend_pair, SearchResultItem, SymbolInfo};
use crate::symbols_storage::SymbolsStorage;

pub const DEFAULT_UPDATE_FREQUENCY: Duration = Duration::from_secs(10);

const SEARCH_ITEMS_LIMIT: usize = 30;
const NOT_READY: &str = "datafeed_not_ready";

/// How `search_symbols` is served, fixed at construction so an inconsistent
/// configuration cannot surface later as a per-call failure.
enum SearchDispatch {
    Backend,
    Storage(Arc<SymbolsStorage>),
}

/// How `resolve_symbol` is served, fixed at construction.
enum ResolveDispatch {
    Direct,
    Storage(Arc<SymbolsStorage>),
}

/// Adapter between the charting widget and a UDF-convention backend.
///
/// Owns the negotiated configuration and the collaborators it dispatches to;
/// every widget-facing operation routes through here. Constructed inside a
/// tokio runtime (the pulse collaborators spawn their update tasks eagerly).
pub struct UdfDatafeed {
    base_url: String,
    configuration: DatafeedConfiguration,
    requester: Arc<Requester>,
    history: Arc<HistoryProvider>,
    quotes: Arc<QuotesProvider>,
    data_pulse: DataPulseProvider,
    quotes_pulse: QuotesPulseProvider,
    search_dispatch: SearchDispatch,
    resolve_dispatch: ResolveDispatch,
    ready: AtomicBool,
}

impl UdfDatafeed {
    /// Default adapter: built-in configuration, default collaborators, 10 s
    /// update cadence.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_configuration(
            base_url,
            DatafeedConfiguration::default(),
            DEFAULT_UPDATE_FREQUENCY,
        )
    }

    pub fn with_configuration(
        base_url: impl Into<String>,
        configuration: DatafeedConfiguration,
        update_frequency: Duration,
    ) -> Result<Self> {
        configuration.validate()?;

        let base_url = base_url.into();
        let requester = Arc::new(Requester::new());
        let history = Arc::new(HistoryProvider::new(base_url.clone(), Arc::clone(&requester)));
        let quotes = Arc::new(QuotesProvider::new(base_url.clone(), Arc::clone(&requester)));

        let storage = if configuration.needs_symbols_storage() {
            let exchanges = configuration
                .exchanges
                .iter()
                .map(|exchange| exchange.value.clone())
                .collect();
            Some(Arc::new(SymbolsStorage::new(
                base_url.clone(),
                exchanges,
                configuration.supported_resolutions.clone(),
                Arc::clone(&requester),
            )))
        } else {
            None
        };

        let search_dispatch = match (&storage, configuration.supports_search) {
            (_, true) => SearchDispatch::Backend,
            (Some(storage), false) => SearchDispatch::Storage(Arc::clone(storage)),
            (None, false) => {
                return Err(FeedError::message(
                    "UdfDatafeed: inconsistent configuration (symbols storage)",
                ))
            }
        };
        let resolve_dispatch = match (&storage, configuration.supports_group_request) {
            (_, false) => ResolveDispatch::Direct,
            (Some(storage), true) => ResolveDispatch::Storage(Arc::clone(storage)),
            (None, true) => {
                return Err(FeedError::message(
                    "UdfDatafeed: inconsistent configuration (symbols storage)",
                ))
            }
        };

        let data_pulse = DataPulseProvider::new(Arc::clone(&history), update_frequency);
        let quotes_pulse = QuotesPulseProvider::new(Arc::clone(&quotes), update_frequency);

        debug!(
            "UdfDatafeed: initialized with {}",
            serde_json::to_string(&configuration).unwrap_or_default()
        );

        Ok(Self {
            base_url,
            configuration,
            requester,
            history,
            quotes,
            data_pulse,
            quotes_pulse,
            search_dispatch,
            resolve_dispatch,
            ready: AtomicBool::new(false),
        })
    }

    /// Delivers the negotiated configuration and opens the gate for every
    /// other operation. The widget calls this first, exactly once; repeat
    /// calls re-deliver the same configuration.
    pub fn on_ready(&self, callback: impl FnOnce(&DatafeedConfiguration)) {
        self.ready.store(true, Ordering::SeqCst);
        callback(&self.configuration);
    }

    pub fn configuration(&self) -> &DatafeedConfiguration {
        &self.configuration
    }

    /// Latent extension point: fetch a backend-provided configuration from
    /// the `config` endpoint. Any failure falls back to `None` so callers
    /// keep the built-in defaults.
    pub async fn request_configuration(&self) -> Option<DatafeedConfiguration> {
        match self.send("config", &[]).await {
            Ok(response) => match serde_json::from_value(response) {
                Ok(configuration) => Some(configuration),
                Err(err) => {
                    warn!("UdfDatafeed: cannot parse datafeed configuration, using defaults: {err}");
                    None
                }
            },
            Err(err) => {
                warn!("UdfDatafeed: cannot get datafeed configuration, using defaults: {err}");
                None
            }
        }
    }

    pub async fn get_quotes(
        &self,
        symbols: &[String],
        on_data: impl FnOnce(Vec<QuoteData>),
        on_error: impl FnOnce(String),
    ) {
        if !self.is_ready() {
            on_error(NOT_READY.to_string());
            return;
        }
        match self.quotes.get_quotes(symbols).await {
            Ok(data) => on_data(data),
            Err(err) => on_error(err.to_string()),
        }
    }

    pub fn subscribe_quotes(
        &self,
        symbols: Vec<String>,
        fast_symbols: Vec<String>,
        on_tick: QuoteTickCallback,
        listener_guid: String,
    ) {
        self.quotes_pulse
            .subscribe_quotes(symbols, fast_symbols, on_tick, listener_guid);
    }

    pub fn unsubscribe_quotes(&self, listener_guid: &str) {
        self.quotes_pulse.unsubscribe_quotes(listener_guid);
    }

    /// No-op unless marks are supported. Failures degrade to "no marks":
    /// the widget always gets `on_data`, never an error.
    pub async fn get_marks(
        &self,
        symbol_info: &SymbolInfo,
        range_start: i64,
        range_end: i64,
        on_data: impl FnOnce(Vec<Mark>),
        resolution: &str,
    ) {
        if !self.configuration.supports_marks {
            return;
        }
        if !self.is_ready() {
            warn!("UdfDatafeed: get_marks called before on_ready");
            on_data(Vec::new());
            return;
        }

        let result = self
            .request_marks("marks", symbol_info, range_start, range_end, resolution)
            .await
            .and_then(|response| marks::parse_marks(response, MARK_FIELDS));

        match result {
            Ok(marks) => on_data(marks),
            Err(err) => {
                warn!("UdfDatafeed: marks request failed: {err}");
                on_data(Vec::new());
            }
        }
    }

    /// Same contract as `get_marks`, gated by `supports_timescale_marks`.
    pub async fn get_timescale_marks(
        &self,
        symbol_info: &SymbolInfo,
        range_start: i64,
        range_end: i64,
        on_data: impl FnOnce(Vec<TimescaleMark>),
        resolution: &str,
    ) {
        if !self.configuration.supports_timescale_marks {
            return;
        }
        if !self.is_ready() {
            warn!("UdfDatafeed: get_timescale_marks called before on_ready");
            on_data(Vec::new());
            return;
        }

        let result = self
            .request_marks(
                "timescale_marks",
                symbol_info,
                range_start,
                range_end,
                resolution,
            )
            .await
            .and_then(|response| marks::parse_marks(response, TIMESCALE_MARK_FIELDS));

        match result {
            Ok(marks) => on_data(marks),
            Err(err) => {
                warn!("UdfDatafeed: timescale marks request failed: {err}");
                on_data(Vec::new());
            }
        }
    }

    /// No-op unless server time is supported; the callback fires only when
    /// the response parses as an integer.
    pub async fn get_server_time(&self, callback: impl FnOnce(i64)) {
        if !self.configuration.supports_time {
            return;
        }
        if !self.is_ready() {
            warn!("UdfDatafeed: get_server_time called before on_ready");
            return;
        }

        match self.send("time", &[]).await {
            Ok(response) => {
                if let Some(time) = parse_server_time(&response) {
                    callback(time);
                }
            }
            Err(err) => {
                warn!("UdfDatafeed: failed to load server time: {err}");
            }
        }
    }

    /// Search failures degrade to an empty result list by design.
    pub async fn search_symbols(
        &self,
        user_input: &str,
        exchange: &str,
        symbol_type: &str,
        on_result: impl FnOnce(Vec<SearchResultItem>),
    ) {
        if !self.is_ready() {
            warn!("UdfDatafeed: search_symbols called before on_ready");
            on_result(Vec::new());
            return;
        }

        match &self.search_dispatch {
            SearchDispatch::Backend => {
                let params = search_params(user_input, exchange, symbol_type);
                match self.send("search", &params).await {
                    Ok(response) => {
                        if let Some(errmsg) = search_error(&response) {
                            warn!("UdfDatafeed: search symbols error={errmsg}");
                            on_result(Vec::new());
                            return;
                        }
                        match serde_json::from_value(response) {
                            Ok(items) => on_result(items),
                            Err(err) => {
                                warn!("UdfDatafeed: malformed search response: {err}");
                                on_result(Vec::new());
                            }
                        }
                    }
                    Err(err) => {
                        warn!("UdfDatafeed: search symbols for '{user_input}' failed: {err}");
                        on_result(Vec::new());
                    }
                }
            }
            SearchDispatch::Storage(storage) => {
                match storage
                    .search_symbols(user_input, exchange, symbol_type, SEARCH_ITEMS_LIMIT)
                    .await
                {
                    Ok(items) => on_result(items),
                    Err(err) => {
                        warn!("UdfDatafeed: storage search for '{user_input}' failed: {err}");
                        on_result(Vec::new());
                    }
                }
            }
        }
    }

    /// Direct mode resolves through the backend pair lookup and reports any
    /// failure as `unknown_symbol`; storage mode forwards the storage's own
    /// error message.
    pub async fn resolve_symbol(
        &self,
        symbol_name: &str,
        on_resolve: impl FnOnce(SymbolInfo),
        on_error: impl FnOnce(String),
    ) {
        if !self.is_ready() {
            on_error(NOT_READY.to_string());
            return;
        }
        debug!("UdfDatafeed: resolve requested for {symbol_name}");

        match &self.resolve_dispatch {
            ResolveDispatch::Direct => {
                let pair = backend_pair(symbol_name);
                match self.resolve_direct(&pair).await {
                    Ok(symbol_info) => on_resolve(symbol_info),
                    Err(err) => {
                        warn!("UdfDatafeed: error resolving symbol {symbol_name}: {err}");
                        on_error("unknown_symbol".to_string());
                    }
                }
            }
            ResolveDispatch::Storage(storage) => match storage.resolve_symbol(symbol_name).await {
                Ok(symbol_info) => on_resolve(symbol_info),
                Err(err) => on_error(err.to_string()),
            },
        }
    }

    pub async fn get_bars(
        &self,
        symbol_info: &SymbolInfo,
        resolution: &str,
        range_start: i64,
        range_end: i64,
        on_result: impl FnOnce(Vec<Bar>, HistoryMeta),
        on_error: impl FnOnce(String),
    ) {
        if !self.is_ready() {
            on_error(NOT_READY.to_string());
            return;
        }
        match self
            .history
            .get_bars(symbol_info, resolution, range_start, range_end)
            .await
        {
            Ok(result) => on_result(result.bars, result.meta),
            Err(err) => on_error(err.to_string()),
        }
    }

    pub fn subscribe_bars(
        &self,
        symbol_info: SymbolInfo,
        resolution: String,
        on_tick: BarTickCallback,
        listener_guid: String,
    ) {
        self.data_pulse
            .subscribe_bars(symbol_info, resolution, on_tick, listener_guid);
    }

    pub fn unsubscribe_bars(&self, listener_guid: &str) {
        self.data_pulse.unsubscribe_bars(listener_guid);
    }

    async fn resolve_direct(&self, pair: &str) -> Result<SymbolInfo> {
        let response = self
            .send("assetPair/get", &[("currencyPair", pair.to_string())])
            .await?;
        parse_asset_pair(pair, &response)
    }

    async fn request_marks(
        &self,
        path: &str,
        symbol_info: &SymbolInfo,
        range_start: i64,
        range_end: i64,
        resolution: &str,
    ) -> Result<Value> {
        let params = [
            ("symbol", backend_pair(&symbol_info.ticker)),
            ("from", range_start.to_string()),
            ("to", range_end.to_string()),
            ("resolution", resolution.to_string()),
        ];
        self.send(path, &params).await
    }

    /// Single chokepoint for every backend call issued by the adapter.
    async fn send(&self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        self.requester
            .send_request(&self.base_url, path, params)
            .await
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Backend search queries are always capped and uppercased before sending.
fn search_params(user_input: &str, exchange: &str, symbol_type: &str) -> [(&'static str, String); 4] {
    [
        ("limit", SEARCH_ITEMS_LIMIT.to_string()),
        ("query", user_input.to_uppercase()),
        ("type", symbol_type.to_string()),
        ("exchange", exchange.to_string()),
    ]
}

/// The search endpoint signals an error by carrying an `s` field.
fn search_error(response: &Value) -> Option<String> {
    response.get("s")?;
    Some(
        response
            .get("errmsg")
            .and_then(Value::as_str)
            .unwrap_or("search rejected by backend")
            .to_string(),
    )
}

fn parse_server_time(response: &Value) -> Option<i64> {
    match response {
        Value::Number(num) => num.as_i64().or_else(|| num.as_f64().map(|f| f as i64)),
        Value::String(raw) => {
            let trimmed = raw.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    }
}

/// Synthesize the fixed-shape symbol metadata the direct-resolve path
/// returns: 24x7 session, the default resolution ladder, precision derived
/// from the backend-reported accuracy.
fn parse_asset_pair(pair: &str, root: &Value) -> Result<SymbolInfo> {
    let status = root.get("status").and_then(Value::as_i64);
    if status != Some(STATUS_OK) {
        let errmsg = root
            .get("errmsg")
            .and_then(Value::as_str)
            .unwrap_or("symbol lookup rejected by backend");
        return Err(FeedError::backend(errmsg));
    }

    let asset_pair = &root["dataWrapper"]["assetPair"];
    let accuracy_index = asset_pair
        .get("accuracyIndex")
        .and_then(Value::as_i64)
        .ok_or_else(|| FeedError::message("Asset pair payload missing accuracyIndex"))?;
    let accuracy_quantity = asset_pair
        .get("accuracyQuantity")
        .and_then(Value::as_i64)
        .unwrap_or(0);

    let mut names = pair.splitn(2, '_');
    let exchange = names.next().unwrap_or_default().to_string();
    let name = names.next().unwrap_or(pair).to_string();
    let resolutions: Vec<String> = DEFAULT_RESOLUTIONS.iter().map(|s| s.to_string()).collect();

    Ok(SymbolInfo {
        ticker: pair.to_string(),
        name,
        description: pair.to_string(),
        exchange_traded: exchange.clone(),
        exchange_listed: exchange,
        symbol_type: "stock".to_string(),
        session: "24x7".to_string(),
        timezone: "America/New_York".to_string(),
        minmov: 1,
        minmov2: 0,
        pricescale: 10f64.powi(accuracy_index as i32),
        pointvalue: 1,
        volume_precision: accuracy_quantity,
        has_intraday: true,
        has_daily: true,
        has_weekly_and_monthly: true,
        has_no_volume: false,
        intraday_multipliers: resolutions.clone(),
        supported_resolutions: resolutions,
    })
}
