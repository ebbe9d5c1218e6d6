use crate::config::BacktestConfig;
use crate::error::EngineError;
use crate::execution::execute_trade;
use crate::kline_utils::{group_klines_by_date, DayPrices};
use crate::models::{BacktestMetrics, Kline, NavPoint, Trade};
use crate::performance::PerformanceCalculator;
use crate::portfolio::Portfolio;
use crate::signals::SignalProvider;
use crate::trading_rules::target_positions;
use anyhow::Result;
use chrono::Utc;
use log::info;

/// Everything one finished simulation produced.
#[derive(Debug)]
pub struct BacktestRun {
    pub metrics: BacktestMetrics,
    pub trades: Vec<Trade>,
    pub navs: Vec<NavPoint>,
}

/// Replays the loaded price history day by day, in strict chronological
/// order: signals, sizing, execution, then the end-of-day NAV snapshot.
/// Pure over the preloaded data; persistence belongs to the task runner.
pub struct BacktestEngine {
    config: BacktestConfig,
    portfolio: Portfolio,
    trades: Vec<Trade>,
    navs: Vec<NavPoint>,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        let portfolio = Portfolio::new(config.initial_cash);
        Self {
            config,
            portfolio,
            trades: Vec::new(),
            navs: Vec::new(),
        }
    }

    /// Runs the full simulation. `on_progress` is invoked with a percentage
    /// after each 10% quantile of days and always on the last day; values
    /// are non-decreasing and end at exactly 100.
    ///
    /// Per-day errors here abort the whole run; only signal generation in
    /// online mode degrades locally (inside `SignalProvider`).
    pub fn run<F>(
        mut self,
        klines: &[Kline],
        signals: &SignalProvider,
        mut on_progress: F,
    ) -> Result<BacktestRun>
    where
        F: FnMut(i32) -> Result<()>,
    {
        let by_date = group_klines_by_date(klines);
        if by_date.is_empty() {
            return Err(EngineError::data_unavailable("no kline rows to replay").into());
        }

        let total_days = by_date.len();
        let report_every = std::cmp::max(1, total_days / 10);
        info!(
            "Replaying {} trading days for task {}",
            total_days, self.config.task_id
        );

        for (idx, (date, rows)) in by_date.iter().enumerate() {
            let day = DayPrices::new(rows);
            let daily_signals = signals.signals_for(*date, &day);
            let targets = target_positions(&self.config, &daily_signals, &day, &self.portfolio);

            let mut symbols: Vec<&String> = targets.keys().collect();
            symbols.sort_unstable();
            for ts_code in symbols {
                let target_shares = targets[ts_code];
                if target_shares == self.portfolio.shares(ts_code) {
                    continue;
                }
                // A held symbol missing from today's rows cannot be priced
                // or traded; it waits for the next day it appears.
                let Some(raw_price) = day.close(ts_code) else {
                    continue;
                };
                if let Some(trade) = execute_trade(
                    &self.config,
                    &mut self.portfolio,
                    &day,
                    *date,
                    Utc::now(),
                    ts_code,
                    target_shares,
                    raw_price,
                ) {
                    self.trades.push(trade);
                }
            }

            self.record_nav(*date, &day);

            if (idx + 1) % report_every == 0 || idx + 1 == total_days {
                let progress = ((idx + 1) * 100 / total_days) as i32;
                on_progress(progress)?;
            }
        }

        let metrics = PerformanceCalculator::calculate_metrics(
            &self.navs,
            &self.trades,
            self.config.initial_cash,
        )?;
        info!(
            "Backtest finished for task {}: {} trades, final equity {:.2}",
            self.config.task_id,
            self.trades.len(),
            metrics.final_equity
        );

        Ok(BacktestRun {
            metrics,
            trades: self.trades,
            navs: self.navs,
        })
    }

    /// End-of-day snapshot. A held symbol absent from today's rows (e.g. a
    /// trading halt) contributes zero to position value for the day.
    fn record_nav(&mut self, date: chrono::NaiveDate, day: &DayPrices<'_>) {
        let position_value = self.portfolio.position_value(|code| day.close(code));
        let total_equity = self.portfolio.cash + position_value;
        let nav = if self.config.initial_cash > 0.0 {
            total_equity / self.config.initial_cash
        } else {
            1.0
        };

        self.navs.push(NavPoint {
            task_id: self.config.task_id,
            trade_date: date,
            nav,
            cash: self.portfolio.cash,
            position_value,
            total_equity,
        });
    }
}
