use crate::builder::BarBuilder;
use chrono::{DateTime, TimeDelta, Utc};
use configuration::AggregatorConfig;
use core_types::{Bar, Timeframe};
use events::{BarUpdate, EventSink, WsMessage};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// Everything the tick path and the broadcast task share, behind one lock.
#[derive(Default)]
struct BookState {
    /// symbol -> timeframe -> live builder
    builders: HashMap<String, HashMap<Timeframe, BarBuilder>>,
    /// symbol -> timeframe -> last finalised bar
    completed: HashMap<String, HashMap<Timeframe, Bar>>,
    /// Timeframes a symbol gets when its builders are (re)initialised.
    registered: HashMap<String, Vec<Timeframe>>,
}

struct Shared {
    state: Mutex<BookState>,
    /// Only touched by the broadcast pass.
    broadcast_counts: Mutex<HashMap<(String, Timeframe), u32>>,
    sink: Option<Arc<dyn EventSink>>,
    default_timeframes: Vec<Timeframe>,
    broadcast_interval: Duration,
    stale_after: TimeDelta,
    broadcast_log_limit: u32,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, BookState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, message: WsMessage) -> bool {
        let Some(sink) = &self.sink else {
            return false;
        };
        match sink.publish(message) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Bar update was not delivered");
                false
            }
        }
    }

    /// Emits one `market_update` per fresh, non-empty builder. Returns how many
    /// messages the sink accepted.
    fn broadcast_pass(&self, now: DateTime<Utc>) -> usize {
        if self.sink.is_none() {
            return 0;
        }

        let snapshots: Vec<Bar> = {
            let state = self.state();
            state
                .builders
                .values()
                .flat_map(|by_tf| by_tf.values())
                .filter(|builder| {
                    builder
                        .last_update()
                        .is_some_and(|last| now - last <= self.stale_after)
                })
                .filter_map(|builder| builder.to_bar().ok())
                .collect()
        };

        let mut delivered = 0;
        for bar in snapshots {
            let update = BarUpdate::partial(&bar);
            if !self.publish(WsMessage::market_update(update)) {
                continue;
            }
            delivered += 1;

            let mut counts = self
                .broadcast_counts
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let count = counts
                .entry((bar.symbol.clone(), bar.timeframe.clone()))
                .or_insert(0);
            if *count < self.broadcast_log_limit {
                *count += 1;
                tracing::info!(
                    symbol = %bar.symbol,
                    timeframe = %bar.timeframe,
                    open = %bar.open,
                    high = %bar.high,
                    low = %bar.low,
                    close = %bar.close,
                    tick_count = bar.tick_count,
                    "Broadcast partial bar"
                );
            }
        }
        delivered
    }
}

/// Routes quotes to per-(symbol, timeframe) builders and promotes completed bars.
///
/// Symbols are upper-cased on every entry point. Timeframe strings are parsed
/// leniently (see [`Timeframe::parse`]).
pub struct BarAggregator {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BarAggregator {
    pub fn new(config: &AggregatorConfig, sink: Option<Arc<dyn EventSink>>) -> Self {
        let shared = Shared {
            state: Mutex::new(BookState::default()),
            broadcast_counts: Mutex::new(HashMap::new()),
            sink,
            default_timeframes: config.timeframes(),
            broadcast_interval: Duration::from_millis(config.broadcast_interval_ms.max(1)),
            stale_after: TimeDelta::milliseconds(config.stale_after_ms as i64),
            broadcast_log_limit: config.broadcast_log_limit,
        };
        Self {
            shared: Arc::new(shared),
            task: Mutex::new(None),
        }
    }

    /// Ensures a builder exists for (symbol, timeframe). Idempotent.
    pub fn subscribe_timeframe(&self, symbol: &str, timeframe: &str) {
        let symbol = symbol.trim().to_uppercase();
        let tf = parse_with_warning(timeframe);
        let now = Utc::now();

        let mut state = self.shared.state();
        let builders = state.builders.entry(symbol.clone()).or_default();
        if !builders.contains_key(&tf) {
            tracing::debug!(symbol = %symbol, timeframe = %tf, "Subscribed timeframe");
            builders.insert(tf.clone(), BarBuilder::new(symbol, tf.clone(), tf.bucket_start(now)));
        }
    }

    /// Registers several timeframes for a symbol at once.
    ///
    /// The symbol's registered set becomes the union of the defaults, anything
    /// registered before, and `timeframes`; a builder is ensured for each member.
    pub fn register_timeframes(&self, symbol: &str, timeframes: &[&str]) {
        let symbol = symbol.trim().to_uppercase();
        let requested: Vec<Timeframe> = timeframes.iter().map(|tf| parse_with_warning(tf)).collect();
        let now = Utc::now();

        let mut state = self.shared.state();
        let registered = state
            .registered
            .entry(symbol.clone())
            .or_insert_with(|| self.shared.default_timeframes.clone());
        for tf in requested {
            if !registered.contains(&tf) {
                registered.push(tf);
            }
        }
        let wanted = registered.clone();

        let builders = state.builders.entry(symbol.clone()).or_default();
        for tf in wanted {
            builders
                .entry(tf.clone())
                .or_insert_with(|| BarBuilder::new(symbol.clone(), tf.clone(), tf.bucket_start(now)));
        }
        tracing::info!(symbol = %symbol, timeframes = builders.len(), "Registered timeframes");
    }

    /// Drops the builder for (symbol, timeframe). The symbol entry goes with its
    /// last timeframe. The last completed bar stays readable.
    pub fn unsubscribe_timeframe(&self, symbol: &str, timeframe: &str) {
        let symbol = symbol.trim().to_uppercase();
        let tf = Timeframe::parse(timeframe);

        let mut state = self.shared.state();
        let now_empty = match state.builders.get_mut(&symbol) {
            Some(builders) => {
                builders.remove(&tf);
                builders.is_empty()
            }
            None => return,
        };
        if let Some(registered) = state.registered.get_mut(&symbol) {
            registered.retain(|r| r != &tf);
        }
        if now_empty {
            state.builders.remove(&symbol);
            state.registered.remove(&symbol);
        }
        tracing::debug!(symbol = %symbol, timeframe = %tf, "Unsubscribed timeframe");
    }

    /// Folds a quote into every timeframe of `symbol`.
    ///
    /// The first quote for an unknown symbol creates builders for its registered
    /// timeframes (or the defaults). A quote at or past a builder's bucket end
    /// finalises that builder into the completed-bars map and opens a new one at
    /// the quote's bucket before the quote is folded in.
    pub fn add_quote(&self, symbol: &str, price: Decimal, volume: Decimal, timestamp: Option<DateTime<Utc>>) {
        let symbol = symbol.trim().to_uppercase();
        let ts = timestamp.unwrap_or_else(Utc::now);
        let mut closed: Vec<Bar> = Vec::new();

        {
            let mut state = self.shared.state();
            let BookState {
                builders,
                completed,
                registered,
            } = &mut *state;

            let by_tf = builders.entry(symbol.clone()).or_insert_with(|| {
                let timeframes = registered
                    .get(&symbol)
                    .cloned()
                    .unwrap_or_else(|| self.shared.default_timeframes.clone());
                tracing::info!(symbol = %symbol, timeframes = timeframes.len(), "Auto-subscribed symbol");
                timeframes
                    .into_iter()
                    .map(|tf| {
                        let start = tf.bucket_start(ts);
                        (tf.clone(), BarBuilder::new(symbol.clone(), tf, start))
                    })
                    .collect()
            });

            for (tf, builder) in by_tf.iter_mut() {
                if ts >= builder.bar_end() {
                    // An empty builder has nothing to finalise.
                    if let Ok(bar) = builder.to_bar() {
                        completed
                            .entry(symbol.clone())
                            .or_default()
                            .insert(tf.clone(), bar.clone());
                        closed.push(bar);
                    }
                    *builder = BarBuilder::new(symbol.clone(), tf.clone(), tf.bucket_start(ts));
                }
                builder.add_tick(price, volume, ts);
            }
        }

        for bar in closed {
            tracing::debug!(symbol = %bar.symbol, timeframe = %bar.timeframe, close = %bar.close, "Completed bar");
            self.shared.publish(WsMessage::bar_closed(bar));
        }
    }

    /// Snapshot of the forming bar, `None` if unknown or still empty.
    pub fn get_current_bar(&self, symbol: &str, timeframe: &str) -> Option<Bar> {
        let symbol = symbol.trim().to_uppercase();
        let tf = Timeframe::parse(timeframe);
        let state = self.shared.state();
        state
            .builders
            .get(&symbol)
            .and_then(|by_tf| by_tf.get(&tf))
            .and_then(|builder| builder.to_bar().ok())
    }

    pub fn get_last_completed_bar(&self, symbol: &str, timeframe: &str) -> Option<Bar> {
        let symbol = symbol.trim().to_uppercase();
        let tf = Timeframe::parse(timeframe);
        let state = self.shared.state();
        state
            .completed
            .get(&symbol)
            .and_then(|by_tf| by_tf.get(&tf))
            .cloned()
    }

    /// Timeframes with a live builder for `symbol`, sorted by period.
    pub fn subscribed_timeframes(&self, symbol: &str) -> Vec<Timeframe> {
        let symbol = symbol.trim().to_uppercase();
        let state = self.shared.state();
        let mut out: Vec<Timeframe> = state
            .builders
            .get(&symbol)
            .map(|by_tf| by_tf.keys().cloned().collect())
            .unwrap_or_default();
        out.sort_by_key(|tf| (tf.period_secs(), tf.as_str().to_string()));
        out
    }

    pub fn symbols(&self) -> Vec<String> {
        let state = self.shared.state();
        let mut out: Vec<String> = state.builders.keys().cloned().collect();
        out.sort();
        out
    }

    /// Runs one broadcast pass immediately. Returns the number of delivered updates.
    pub fn broadcast_now(&self) -> usize {
        self.shared.broadcast_pass(Utc::now())
    }

    /// Spawns the periodic broadcast task. Must be called inside a Tokio runtime.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            tracing::warn!("Bar aggregator is already running");
            return;
        }

        let shared = Arc::clone(&self.shared);
        *task = Some(tokio::spawn(async move {
            let mut timer = interval(shared.broadcast_interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the first pass runs one interval in.
            timer.tick().await;
            loop {
                timer.tick().await;
                shared.broadcast_pass(Utc::now());
            }
        }));
        tracing::info!(
            interval_ms = self.shared.broadcast_interval.as_millis() as u64,
            "Bar aggregator started"
        );
    }

    /// Cancels the broadcast task and waits for it to finish.
    pub async fn stop(&self) {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };

        handle.abort();
        match handle.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => tracing::error!(error = %e, "Bar aggregator task failed"),
        }
        tracing::info!("Bar aggregator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

fn parse_with_warning(raw: &str) -> Timeframe {
    if Timeframe::parse_strict(raw).is_err() {
        tracing::warn!(timeframe = raw, "Unrecognised timeframe, using a 1 minute period");
    }
    Timeframe::parse(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tokio::sync::broadcast;

    fn config(timeframes: &[&str]) -> AggregatorConfig {
        AggregatorConfig {
            default_timeframes: timeframes.iter().map(|s| s.to_string()).collect(),
            ..AggregatorConfig::default()
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn reference_scenario_on_five_minutes() {
        let agg = BarAggregator::new(&config(&["5m"]), None);
        let t0 = 1_700_000_100;
        agg.add_quote("MNQ", dec!(15000), dec!(100), Some(at(t0)));
        agg.add_quote("MNQ", dec!(15050), dec!(50), Some(at(t0 + 10)));
        agg.add_quote("MNQ", dec!(14980), dec!(75), Some(at(t0 + 20)));

        let bar = agg.get_current_bar("MNQ", "5m").unwrap();
        assert_eq!(bar.open, dec!(15000));
        assert_eq!(bar.high, dec!(15050));
        assert_eq!(bar.low, dec!(14980));
        assert_eq!(bar.close, dec!(14980));
        assert_eq!(bar.volume, dec!(225));
        assert_eq!(bar.tick_count, 3);
        assert!(agg.get_last_completed_bar("MNQ", "5m").is_none());
    }

    #[test]
    fn boundary_crossing_promotes_exactly_one_bar() {
        let agg = BarAggregator::new(&config(&["1m"]), None);
        let t0 = 1_700_000_040; // 60-aligned
        agg.add_quote("MNQ", dec!(100), dec!(1), Some(at(t0 + 5)));
        agg.add_quote("MNQ", dec!(105), dec!(2), Some(at(t0 + 30)));
        agg.add_quote("MNQ", dec!(99), dec!(3), Some(at(t0 + 61)));

        let done = agg.get_last_completed_bar("MNQ", "1m").unwrap();
        assert_eq!(done.timestamp, at(t0));
        assert_eq!(done.open, dec!(100));
        assert_eq!(done.close, dec!(105));
        assert_eq!(done.tick_count, 2);
        assert_eq!(done.volume, dec!(3));

        let live = agg.get_current_bar("MNQ", "1m").unwrap();
        assert_eq!(live.timestamp, at(t0 + 60));
        assert_eq!(live.open, dec!(99));
        assert_eq!(live.tick_count, 1);
    }

    #[test]
    fn late_tick_merges_into_current_builder() {
        let agg = BarAggregator::new(&config(&["1m"]), None);
        let t0 = 1_700_000_040;
        agg.add_quote("MNQ", dec!(100), dec!(1), Some(at(t0 + 70)));
        agg.add_quote("MNQ", dec!(90), dec!(1), Some(at(t0 + 5)));

        let live = agg.get_current_bar("MNQ", "1m").unwrap();
        assert_eq!(live.timestamp, at(t0 + 60));
        assert_eq!(live.low, dec!(90));
        assert_eq!(live.tick_count, 2);
        assert!(agg.get_last_completed_bar("MNQ", "1m").is_none());
    }

    #[test]
    fn symbols_are_case_insensitive() {
        let agg = BarAggregator::new(&config(&["1m"]), None);
        agg.add_quote("mnq", dec!(1), dec!(1), Some(at(1_700_000_040)));
        assert!(agg.get_current_bar("MNQ", "1M").is_some());
        assert_eq!(agg.symbols(), vec!["MNQ".to_string()]);
    }

    #[test]
    fn subscribe_is_idempotent_and_unsubscribe_drops_symbol() {
        let agg = BarAggregator::new(&config(&["1m"]), None);
        agg.subscribe_timeframe("ES", "5m");
        agg.subscribe_timeframe("ES", "5M");
        assert_eq!(agg.subscribed_timeframes("ES"), vec![Timeframe::parse("5m")]);

        agg.unsubscribe_timeframe("ES", "5m");
        assert!(agg.symbols().is_empty());
        assert!(agg.get_current_bar("ES", "5m").is_none());
    }

    #[test]
    fn absurd_timeframe_aggregates_on_the_fallback_period() {
        let agg = BarAggregator::new(&config(&["1m"]), None);
        agg.subscribe_timeframe("MNQ", "100000000d");
        // Past the subscribed builder's bucket, so the first quote reopens it.
        let t0 = 4_102_444_800;
        agg.add_quote("MNQ", dec!(100), dec!(1), Some(at(t0 + 5)));
        agg.add_quote("MNQ", dec!(101), dec!(1), Some(at(t0 + 65)));

        let done = agg.get_last_completed_bar("MNQ", "100000000d").unwrap();
        assert_eq!(done.timestamp, at(t0));
        assert_eq!(done.close, dec!(100));
    }

    #[test]
    fn subscribed_but_untraded_builder_reports_no_bar() {
        let agg = BarAggregator::new(&config(&["1m"]), None);
        agg.subscribe_timeframe("ES", "1m");
        assert!(agg.get_current_bar("ES", "1m").is_none());
        assert!(agg.get_current_bar("NQ", "1m").is_none());
    }

    #[test]
    fn register_timeframes_extends_the_default_set() {
        let agg = BarAggregator::new(&config(&["1m", "5m"]), None);
        agg.register_timeframes("MES", &["15s", "5m"]);
        let tfs: Vec<String> = agg
            .subscribed_timeframes("MES")
            .iter()
            .map(|tf| tf.to_string())
            .collect();
        assert_eq!(tfs, vec!["15s", "1m", "5m"]);
    }

    #[test]
    fn unsubscribed_timeframe_stays_gone() {
        let agg = BarAggregator::new(&config(&["1m"]), None);
        agg.register_timeframes("MES", &["30s"]);
        agg.unsubscribe_timeframe("MES", "1m");
        agg.add_quote("MES", dec!(5000), dec!(1), Some(at(1_700_000_040)));
        assert!(agg.get_current_bar("MES", "30s").is_some());
        assert!(agg.get_current_bar("MES", "1m").is_none());
    }

    #[test]
    fn broadcast_skips_stale_builders() {
        let (tx, mut rx) = broadcast::channel::<WsMessage>(64);
        let sink: Arc<dyn EventSink> = Arc::new(tx);
        let agg = BarAggregator::new(&config(&["1m"]), Some(sink));

        agg.add_quote("NQ", dec!(1), dec!(1), Some(Utc::now() - TimeDelta::seconds(30)));
        agg.add_quote("ES", dec!(2), dec!(1), Some(Utc::now()));

        assert_eq!(agg.broadcast_now(), 1);
        match rx.try_recv().unwrap() {
            WsMessage::MarketUpdate { data, .. } => {
                assert_eq!(data.symbol, "ES");
                assert!(data.is_partial);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn boundary_publishes_bar_closed() {
        let (tx, mut rx) = broadcast::channel::<WsMessage>(64);
        let sink: Arc<dyn EventSink> = Arc::new(tx);
        let agg = BarAggregator::new(&config(&["1m"]), Some(sink));
        agg.add_quote("NQ", dec!(1), dec!(1), Some(at(1_700_000_040)));
        agg.add_quote("NQ", dec!(2), dec!(1), Some(at(1_700_000_100)));

        match rx.try_recv().unwrap() {
            WsMessage::BarClosed { data, .. } => assert_eq!(data.close, dec!(1)),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn sink_failures_are_swallowed() {
        let (tx, rx) = broadcast::channel::<WsMessage>(4);
        drop(rx);
        let sink: Arc<dyn EventSink> = Arc::new(tx);
        let agg = BarAggregator::new(&config(&["1m"]), Some(sink));
        agg.add_quote("NQ", dec!(1), dec!(1), None);
        assert_eq!(agg.broadcast_now(), 0);
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_joins() {
        let agg = BarAggregator::new(&config(&["1m"]), None);
        agg.start();
        agg.start();
        assert!(agg.is_running());
        agg.stop().await;
        assert!(!agg.is_running());
        agg.stop().await;
    }
}
