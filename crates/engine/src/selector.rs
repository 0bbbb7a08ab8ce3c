//! Scoring used by automatic strategy selection.

use configuration::StrategyConfig;
use core_types::{MarketCondition, StrategyMetrics};
use rust_decimal_macros::dec;

/// Scores a strategy against the current condition of each of its symbols and
/// its own track record.
///
/// +2 per symbol in a preferred condition, otherwise -3 if in an avoided one;
/// +2 for a win rate above 60%, -1 below 40%; +1 for a profit factor above 1.5.
pub fn score(config: &StrategyConfig, conditions: &[MarketCondition], metrics: &StrategyMetrics) -> i32 {
    let mut score = 0;
    for condition in conditions {
        if config.preferred_conditions.contains(condition) {
            score += 2;
        } else if config.avoid_conditions.contains(condition) {
            score -= 3;
        }
    }

    if metrics.win_rate > dec!(0.6) {
        score += 2;
    } else if metrics.win_rate < dec!(0.4) {
        score -= 1;
    }
    if metrics.profit_factor > dec!(1.5) {
        score += 1;
    }
    score
}

/// The best `limit` candidates with a positive score, best first. Equal scores
/// keep their input order.
pub fn select_top(mut scored: Vec<(String, i32)>, limit: usize) -> Vec<String> {
    // `sort_by` is stable.
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored
        .into_iter()
        .take(limit)
        .filter(|(_, score)| *score > 0)
        .map(|(name, _)| name)
        .collect()
}
