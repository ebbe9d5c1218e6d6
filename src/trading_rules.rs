use crate::config::BacktestConfig;
use crate::kline_utils::DayPrices;
use crate::models::{PositionMode, Signal, LOT_SIZE};
use crate::portfolio::Portfolio;
use std::collections::HashMap;

/// Probability assigned to a symbol with no signal entry: hold in
/// per-symbol mode, not selected in equal-weight mode.
pub const NEUTRAL_PROBABILITY: f64 = 0.5;

/// Largest lot-aligned share count purchasable with `value` at `price`.
pub fn lot_aligned_shares(value: f64, price: f64) -> i64 {
    if price <= 0.0 || value <= 0.0 {
        return 0;
    }
    let lots = (value / price / LOT_SIZE as f64).floor() as i64;
    (lots * LOT_SIZE).max(0)
}

/// Converts today's signals and the current portfolio into target share
/// counts per symbol. Symbols absent from the map keep their position.
pub fn target_positions(
    config: &BacktestConfig,
    signals: &HashMap<String, Signal>,
    day: &DayPrices<'_>,
    portfolio: &Portfolio,
) -> HashMap<String, i64> {
    match config.position_mode {
        PositionMode::EqualWeight => equal_weight_targets(config, signals, day, portfolio),
        PositionMode::PerSymbol => per_symbol_targets(config, signals, day, portfolio),
    }
}

fn probability_of(signals: &HashMap<String, Signal>, ts_code: &str) -> f64 {
    signals
        .get(ts_code)
        .map(|signal| signal.predict_prob)
        .unwrap_or(NEUTRAL_PROBABILITY)
}

/// Full daily rebalance: the buy list shares `total_value * max_position`
/// equally; every held symbol that fell off the list is exited outright.
fn equal_weight_targets(
    config: &BacktestConfig,
    signals: &HashMap<String, Signal>,
    day: &DayPrices<'_>,
    portfolio: &Portfolio,
) -> HashMap<String, i64> {
    let mut buy_list: Vec<&str> = day
        .symbols()
        .filter(|ts_code| probability_of(signals, ts_code) > config.buy_threshold)
        .collect();
    buy_list.sort_unstable();

    let mut targets = HashMap::new();
    if !buy_list.is_empty() {
        let total_value = portfolio.total_equity(|code| day.close(code));
        let value_per_symbol = total_value * config.max_position / buy_list.len() as f64;

        for ts_code in &buy_list {
            let Some(close) = day.close(ts_code) else {
                continue;
            };
            targets.insert(ts_code.to_string(), lot_aligned_shares(value_per_symbol, close));
        }
    }

    for (ts_code, _) in portfolio.positions() {
        if !targets.contains_key(ts_code) {
            targets.insert(ts_code.clone(), 0);
        }
    }

    targets
}

/// Independent per-symbol rule: enter when flat above the buy threshold,
/// exit below the sell threshold, otherwise hold. No add-ons to an
/// existing position.
fn per_symbol_targets(
    config: &BacktestConfig,
    signals: &HashMap<String, Signal>,
    day: &DayPrices<'_>,
    portfolio: &Portfolio,
) -> HashMap<String, i64> {
    let total_value = portfolio.total_equity(|code| day.close(code));
    let mut targets = HashMap::new();

    for ts_code in day.symbols() {
        let probability = probability_of(signals, ts_code);
        let current = portfolio.shares(ts_code);

        let target = if probability > config.buy_threshold {
            if current == 0 {
                let Some(close) = day.close(ts_code) else {
                    continue;
                };
                lot_aligned_shares(total_value * config.max_position, close)
            } else {
                current
            }
        } else if probability < config.sell_threshold {
            0
        } else {
            current
        };

        targets.insert(ts_code.to_string(), target);
    }

    targets
}
