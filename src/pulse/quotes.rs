use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::fetch::quotes::{QuoteData, QuotesProvider};

pub type QuoteTickCallback = Arc<dyn Fn(&[QuoteData]) + Send + Sync>;

/// Full symbol sets refresh every Nth tick; fast symbols refresh every tick.
const FULL_UPDATE_EVERY: u64 = 6;

struct QuoteSubscription {
    symbols: Vec<String>,
    fast_symbols: Vec<String>,
    on_tick: QuoteTickCallback,
}

/// Timer-driven quote updates with a two-cadence schedule: fast symbols on
/// every tick, the full symbol set on a slower cycle.
pub struct QuotesPulseProvider {
    subscriptions: Arc<Mutex<HashMap<String, QuoteSubscription>>>,
    task: JoinHandle<()>,
}

impl QuotesPulseProvider {
    pub fn new(quotes: Arc<QuotesProvider>, update_frequency: Duration) -> Self {
        let subscriptions: Arc<Mutex<HashMap<String, QuoteSubscription>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let task = tokio::spawn(run_updates(
            quotes,
            Arc::clone(&subscriptions),
            update_frequency,
        ));
        Self {
            subscriptions,
            task,
        }
    }

    pub fn subscribe_quotes(
        &self,
        symbols: Vec<String>,
        fast_symbols: Vec<String>,
        on_tick: QuoteTickCallback,
        listener_guid: String,
    ) {
        debug!(
            "QuotesPulseProvider: subscribed {} ({} symbols, {} fast)",
            listener_guid,
            symbols.len(),
            fast_symbols.len()
        );
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let previous = subscriptions.insert(
            listener_guid.clone(),
            QuoteSubscription {
                symbols,
                fast_symbols,
                on_tick,
            },
        );
        if previous.is_some() {
            warn!("QuotesPulseProvider: replaced existing subscription for {listener_guid}");
        }
    }

    pub fn unsubscribe_quotes(&self, listener_guid: &str) {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        if subscriptions.remove(listener_guid).is_none() {
            warn!("QuotesPulseProvider: unsubscribe for unknown guid {listener_guid}");
        } else {
            debug!("QuotesPulseProvider: unsubscribed {listener_guid}");
        }
    }
}

impl Drop for QuotesPulseProvider {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_updates(
    quotes: Arc<QuotesProvider>,
    subscriptions: Arc<Mutex<HashMap<String, QuoteSubscription>>>,
    update_frequency: Duration,
) {
    let mut ticker = tokio::time::interval(update_frequency);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tick: u64 = 0;

    loop {
        ticker.tick().await;
        let full_update = tick % FULL_UPDATE_EVERY == 0;
        tick = tick.wrapping_add(1);

        let pending: Vec<(String, Vec<String>)> = {
            let subscriptions = subscriptions.lock().unwrap();
            subscriptions
                .iter()
                .filter_map(|(guid, sub)| {
                    let symbols = select_symbols(sub, full_update);
                    (!symbols.is_empty()).then(|| (guid.clone(), symbols))
                })
                .collect()
        };

        for (guid, symbols) in pending {
            match quotes.get_quotes(&symbols).await {
                Ok(data) => {
                    let on_tick = {
                        let subscriptions = subscriptions.lock().unwrap();
                        subscriptions.get(&guid).map(|sub| Arc::clone(&sub.on_tick))
                    };
                    if let Some(on_tick) = on_tick {
                        on_tick(&data);
                    }
                }
                Err(err) => {
                    warn!("QuotesPulseProvider: update for {guid} failed: {err}");
                }
            }
        }
    }
}

fn select_symbols(subscription: &QuoteSubscription, full_update: bool) -> Vec<String> {
    if full_update {
        // Fast symbols are a subset in practice, but dedup in case they are not.
        let mut symbols = subscription.symbols.clone();
        for fast in &subscription.fast_symbols {
            if !symbols.contains(fast) {
                symbols.push(fast.clone());
            }
        }
        symbols
    } else {
        subscription.fast_symbols.clone()
    }
}
