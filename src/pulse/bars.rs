use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::fetch::history::{Bar, HistoryProvider};
use crate::symbols::SymbolInfo;

use super::period_length_seconds;

pub type BarTickCallback = Arc<dyn Fn(&Bar) + Send + Sync>;

/// The re-fetch window trails this many candles behind now.
const REFETCH_PERIODS: u64 = 10;

struct BarSubscription {
    symbol_info: SymbolInfo,
    resolution: String,
    last_bar_time: Option<i64>,
    on_tick: BarTickCallback,
}

/// Timer-driven bar updates: re-fetches recent history for every
/// subscription on each tick and pushes the newest bar to its listener.
pub struct DataPulseProvider {
    subscriptions: Arc<Mutex<HashMap<String, BarSubscription>>>,
    task: JoinHandle<()>,
}

impl DataPulseProvider {
    pub fn new(history: Arc<HistoryProvider>, update_frequency: Duration) -> Self {
        let subscriptions: Arc<Mutex<HashMap<String, BarSubscription>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let task = tokio::spawn(run_updates(
            history,
            Arc::clone(&subscriptions),
            update_frequency,
        ));
        Self {
            subscriptions,
            task,
        }
    }

    pub fn subscribe_bars(
        &self,
        symbol_info: SymbolInfo,
        resolution: String,
        on_tick: BarTickCallback,
        listener_guid: String,
    ) {
        debug!(
            "DataPulseProvider: subscribed {} ({}, {})",
            listener_guid, symbol_info.ticker, resolution
        );
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let previous = subscriptions.insert(
            listener_guid.clone(),
            BarSubscription {
                symbol_info,
                resolution,
                last_bar_time: None,
                on_tick,
            },
        );
        if previous.is_some() {
            warn!("DataPulseProvider: replaced existing subscription for {listener_guid}");
        }
    }

    pub fn unsubscribe_bars(&self, listener_guid: &str) {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        if subscriptions.remove(listener_guid).is_none() {
            warn!("DataPulseProvider: unsubscribe for unknown guid {listener_guid}");
        } else {
            debug!("DataPulseProvider: unsubscribed {listener_guid}");
        }
    }
}

impl Drop for DataPulseProvider {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_updates(
    history: Arc<HistoryProvider>,
    subscriptions: Arc<Mutex<HashMap<String, BarSubscription>>>,
    update_frequency: Duration,
) {
    let mut ticker = tokio::time::interval(update_frequency);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let pending: Vec<(String, SymbolInfo, String)> = {
            let subscriptions = subscriptions.lock().unwrap();
            subscriptions
                .iter()
                .map(|(guid, sub)| {
                    (
                        guid.clone(),
                        sub.symbol_info.clone(),
                        sub.resolution.clone(),
                    )
                })
                .collect()
        };

        for (guid, symbol_info, resolution) in pending {
            let now = chrono::Utc::now().timestamp();
            let from = now - period_length_seconds(&resolution, REFETCH_PERIODS) as i64;

            match history.get_bars(&symbol_info, &resolution, from, now).await {
                Ok(result) => deliver_latest(&subscriptions, &guid, result.bars.last()),
                Err(err) => {
                    warn!("DataPulseProvider: update for {guid} failed: {err}");
                }
            }
        }
    }
}

fn deliver_latest(
    subscriptions: &Mutex<HashMap<String, BarSubscription>>,
    guid: &str,
    latest: Option<&Bar>,
) {
    let Some(bar) = latest else {
        return;
    };

    // Invoke the listener outside the lock.
    let on_tick = {
        let mut subscriptions = subscriptions.lock().unwrap();
        // The subscription may have been removed while the fetch was in flight.
        let Some(subscription) = subscriptions.get_mut(guid) else {
            return;
        };
        if matches!(subscription.last_bar_time, Some(prev) if bar.time < prev) {
            return;
        }
        subscription.last_bar_time = Some(bar.time);
        Arc::clone(&subscription.on_tick)
    };

    on_tick(bar);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bar(time: i64) -> Bar {
        Bar {
            time,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 10.0,
        }
    }

    fn subscription_with(last_bar_time: Option<i64>, on_tick: BarTickCallback) -> BarSubscription {
        BarSubscription {
            symbol_info: sample_symbol(),
            resolution: "1D".to_string(),
            last_bar_time,
            on_tick,
        }
    }

    fn sample_symbol() -> SymbolInfo {
        serde_json::from_value(serde_json::json!({
            "ticker": "BTC_USDT",
            "name": "USDT",
            "session": "24x7",
            "timezone": "UTC",
            "minmov": 1,
            "pricescale": 100.0
        }))
        .expect("symbol info fixture parses")
    }

    #[test]
    fn delivers_advancing_bars_and_skips_stale_ones() {
        let delivered: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&delivered);
        let on_tick: BarTickCallback = Arc::new(move |bar: &Bar| {
            sink.lock().unwrap().push(bar.time);
        });

        let subscriptions = Mutex::new(HashMap::from([(
            "guid-1".to_string(),
            subscription_with(Some(100), on_tick),
        )]));

        deliver_latest(&subscriptions, "guid-1", Some(&sample_bar(99)));
        deliver_latest(&subscriptions, "guid-1", Some(&sample_bar(100)));
        deliver_latest(&subscriptions, "guid-1", Some(&sample_bar(160)));
        deliver_latest(&subscriptions, "guid-1", None);
        deliver_latest(&subscriptions, "missing", Some(&sample_bar(200)));

        // The stale bar is dropped; same-candle and advancing updates pass.
        assert_eq!(*delivered.lock().unwrap(), vec![100, 160]);
        assert_eq!(
            subscriptions.lock().unwrap()["guid-1"].last_bar_time,
            Some(160)
        );
    }

    #[tokio::test]
    async fn duplicate_subscribe_replaces_previous_entry() {
        let _ = env_logger::builder().is_test(true).try_init();
        let history = Arc::new(HistoryProvider::new(
            "http://localhost:0",
            Arc::new(crate::fetch::Requester::new()),
        ));
        let provider = DataPulseProvider::new(history, Duration::from_secs(3600));

        let noop: BarTickCallback = Arc::new(|_| {});
        provider.subscribe_bars(sample_symbol(), "1D".to_string(), Arc::clone(&noop), "g".into());
        provider.subscribe_bars(sample_symbol(), "60".to_string(), noop, "g".into());

        {
            let subscriptions = provider.subscriptions.lock().unwrap();
            assert_eq!(subscriptions.len(), 1);
            assert_eq!(subscriptions["g"].resolution, "60");
        }

        provider.unsubscribe_bars("g");
        assert!(provider.subscriptions.lock().unwrap().is_empty());
        // Unknown guid is a logged no-op.
        provider.unsubscribe_bars("g");
    }
}
