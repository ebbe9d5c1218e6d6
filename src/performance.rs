use crate::models::{BacktestMetrics, EquityPoint, NavPoint, Trade, TradeSide};
use anyhow::{anyhow, Result};
use statrs::statistics::Statistics;
use std::collections::{HashMap, VecDeque};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    /// Summary statistics over the complete NAV series and trade history of
    /// one run. Pure over its inputs; no I/O.
    pub fn calculate_metrics(
        navs: &[NavPoint],
        trades: &[Trade],
        initial_cash: f64,
    ) -> Result<BacktestMetrics> {
        if navs.is_empty() {
            return Err(anyhow!("NAV series is empty; nothing to summarize"));
        }

        let mut navs: Vec<&NavPoint> = navs.iter().collect();
        navs.sort_by_key(|point| point.trade_date);
        let nav_values: Vec<f64> = navs.iter().map(|point| point.nav).collect();

        let total_return = if nav_values[0] > 0.0 {
            nav_values[nav_values.len() - 1] / nav_values[0] - 1.0
        } else {
            0.0
        };

        let daily_returns: Vec<f64> = nav_values
            .windows(2)
            .filter(|window| window[0] > 0.0)
            .map(|window| window[1] / window[0] - 1.0)
            .collect();

        let days = nav_values.len() as f64;
        let annual_return = (1.0 + total_return).powf(TRADING_DAYS_PER_YEAR / days) - 1.0;

        let max_drawdown = Self::max_drawdown(&nav_values);

        let volatility = if daily_returns.len() < 2 {
            0.0
        } else {
            daily_returns.as_slice().std_dev() * TRADING_DAYS_PER_YEAR.sqrt()
        };

        // Zero risk-free rate.
        let sharpe_ratio = if volatility > 0.0 {
            annual_return / volatility
        } else {
            0.0
        };
        let calmar_ratio = if max_drawdown > 0.0 {
            annual_return / max_drawdown
        } else {
            0.0
        };

        let (win_rate, profit_loss_ratio) = Self::match_trades_fifo(trades);

        let equity_curve = navs
            .iter()
            .map(|point| EquityPoint {
                date: point.trade_date,
                nav: point.nav,
            })
            .collect();

        Ok(BacktestMetrics {
            final_equity: nav_values[nav_values.len() - 1] * initial_cash,
            total_return,
            annual_return,
            max_drawdown,
            volatility,
            sharpe_ratio,
            calmar_ratio,
            win_rate,
            profit_loss_ratio,
            trade_count: trades.len() as i64,
            equity_curve,
        })
    }

    /// Largest peak-to-trough decline over the series, as a positive fraction.
    fn max_drawdown(nav_values: &[f64]) -> f64 {
        let mut peak = nav_values[0];
        let mut max_drawdown = 0.0;
        for nav in nav_values {
            if *nav > peak {
                peak = *nav;
            }
            let drawdown = if peak > 0.0 { (peak - nav) / peak } else { 0.0 };
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
        }
        max_drawdown
    }

    /// Pairs each sell with the oldest unmatched buy price of the same
    /// symbol. Returns (win_rate, profit_loss_ratio) over matched pairs.
    fn match_trades_fifo(trades: &[Trade]) -> (f64, f64) {
        let mut ordered: Vec<&Trade> = trades.iter().collect();
        ordered.sort_by(|a, b| {
            (a.trade_date, a.trade_datetime).cmp(&(b.trade_date, b.trade_datetime))
        });

        let mut open_buys: HashMap<&str, VecDeque<f64>> = HashMap::new();
        let mut profits: Vec<f64> = Vec::new();

        for trade in ordered {
            match trade.side {
                TradeSide::Buy => {
                    open_buys
                        .entry(trade.ts_code.as_str())
                        .or_default()
                        .push_back(trade.price);
                }
                TradeSide::Sell => {
                    if let Some(buy_price) = open_buys
                        .get_mut(trade.ts_code.as_str())
                        .and_then(|queue| queue.pop_front())
                    {
                        profits.push((trade.price - buy_price) * trade.volume as f64 - trade.fee);
                    }
                }
            }
        }

        if profits.is_empty() {
            return (0.0, 0.0);
        }

        let winners: Vec<f64> = profits.iter().copied().filter(|p| *p > 0.0).collect();
        let losers: Vec<f64> = profits.iter().copied().filter(|p| *p < 0.0).collect();

        let win_rate = winners.len() as f64 / profits.len() as f64;
        let profit_loss_ratio = if losers.is_empty() {
            0.0
        } else {
            let avg_profit = if winners.is_empty() {
                0.0
            } else {
                winners.as_slice().mean()
            };
            let avg_loss = losers.as_slice().mean().abs();
            if avg_loss > 0.0 {
                avg_profit / avg_loss
            } else {
                0.0
            }
        };

        (win_rate, profit_loss_ratio)
    }
}
