use crate::status::StatusHandle;
use crate::view::ViewHandle;
use core_types::StrategyStatus;
use events::{EventSink, LogLevel, WsMessage};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use strategies::Strategy;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// A strategy instance shared between the manager and its run loop.
pub type SharedStrategy = Arc<Mutex<Box<dyn Strategy>>>;

/// The generic per-strategy loop.
///
/// Runs passes while the status stays `Active`, sleeping `interval` between
/// them. Errors inside a pass are logged and the loop carries on; a panic ends
/// the loop and leaves the strategy in `Error`. Faults also go out as `log`
/// events. Cancellation happens through the task's abort handle.
pub async fn run_strategy(
    name: String,
    instance: SharedStrategy,
    status: StatusHandle,
    view: ViewHandle,
    interval: Duration,
    events: Option<Arc<dyn EventSink>>,
) {
    info!(strategy = %name, interval_secs = interval.as_secs(), "Strategy loop started");

    let events = events.as_deref();
    let outcome = AssertUnwindSafe(run_loop(&name, &instance, &status, &view, interval, events))
        .catch_unwind()
        .await;

    match outcome {
        Ok(()) => info!(strategy = %name, "Strategy loop exited"),
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            error!(strategy = %name, reason = %reason, "Strategy loop crashed");
            status.set(StrategyStatus::Error);
            emit(
                &name,
                events,
                WsMessage::log(LogLevel::Error, format!("Strategy {name} crashed: {reason}")),
            );
            emit(&name, events, WsMessage::strategy_status(&name, StrategyStatus::Error, reason));
        }
    }
}

async fn run_loop(
    name: &str,
    instance: &SharedStrategy,
    status: &StatusHandle,
    view: &ViewHandle,
    interval: Duration,
    events: Option<&dyn EventSink>,
) {
    while status.is_active() {
        run_pass(name, instance, view, events).await;
        if !status.is_active() {
            break;
        }
        tokio::time::sleep(interval).await;
    }
}

/// One pass: gate, analyze and execute per symbol in config order, then manage
/// positions once. The instance lock is taken per step and `view` is refreshed
/// before each release.
pub async fn run_pass(
    name: &str,
    instance: &SharedStrategy,
    view: &ViewHandle,
    events: Option<&dyn EventSink>,
) {
    let symbols = instance.lock().await.config().symbols.clone();

    for symbol in &symbols {
        let mut strategy = instance.lock().await;

        let gate = strategy.should_trade(symbol);
        if !gate.is_allowed() {
            debug!(strategy = %name, symbol = %symbol, reason = %gate.reason(), "Trading gated");
            continue;
        }

        let analysis = strategy.analyze(symbol).await;
        view.refresh(&**strategy);
        let signal = match analysis {
            Ok(Some(signal)) => signal,
            Ok(None) => continue,
            Err(e) => {
                warn!(strategy = %name, symbol = %symbol, error = %e, "Analysis failed");
                let text = format!("Strategy {name} analysis failed on {symbol}: {e}");
                emit(name, events, WsMessage::log(LogLevel::Warn, text));
                continue;
            }
        };

        info!(
            strategy = %name,
            symbol = %symbol,
            side = ?signal.side,
            entry = %signal.entry_price,
            confidence = %signal.confidence,
            "Signal generated"
        );
        if let Err(e) = strategy.execute(&signal).await {
            warn!(strategy = %name, symbol = %symbol, error = %e, "Execution failed");
            let text = format!("Strategy {name} execution failed on {symbol}: {e}");
            emit(name, events, WsMessage::log(LogLevel::Warn, text));
        }
        view.refresh(&**strategy);
    }

    let mut strategy = instance.lock().await;
    if let Err(e) = strategy.manage_positions().await {
        warn!(strategy = %name, error = %e, "Position management failed");
        let text = format!("Strategy {name} position management failed: {e}");
        emit(name, events, WsMessage::log(LogLevel::Warn, text));
    }
    view.refresh(&**strategy);
}

fn emit(name: &str, events: Option<&dyn EventSink>, message: WsMessage) {
    let Some(sink) = events else {
        return;
    };
    if let Err(e) = sink.publish(message) {
        debug!(strategy = %name, error = %e, "Event not delivered");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "strategy loop panicked".to_string()
    }
}
