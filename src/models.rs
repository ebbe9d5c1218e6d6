use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lot size on the simulated exchange; every order volume is a multiple of this.
pub const LOT_SIZE: i64 = 100;

/// One daily bar of a symbol, loaded from the kline table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kline {
    pub ts_code: String,
    pub trade_date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub pre_close: Option<f64>,
    pub vol: f64,
    pub amount: f64,
}

/// One stored prediction row keyed by (result_id, symbol, date).
#[derive(Debug, Clone)]
pub struct SignalRow {
    pub ts_code: String,
    pub trade_date: NaiveDate,
    pub predict_label: Option<i32>,
    pub predict_prob: f64,
}

/// A model's view of one symbol on one day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signal {
    pub predict_label: Option<i32>,
    pub predict_prob: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "succeeded" => Ok(TaskStatus::Succeeded),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(anyhow!("Unknown task status: {}", other)),
        }
    }
}

/// Where daily buy/sell scores come from. Resolved once from the task row
/// before the loop starts; each variant carries only what it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalSource {
    /// Precomputed predictions stored under this training result id.
    PredictTable { result_id: i64 },
    /// A stored classifier scored in-process, one inference pass per day.
    OnlineModel { result_id: i64 },
    /// Rule-based factor evaluation. Not implemented; rejected up front.
    FactorRule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionMode {
    /// Rebalance fully each day to an equal-weight basket of the buy list.
    EqualWeight,
    /// Independent per-symbol enter/hold/exit rule. The original system
    /// called this "single_stock" although it never restricted the
    /// portfolio to one asset; both wire values are accepted.
    PerSymbol,
}

impl PositionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionMode::EqualWeight => "equal_weight",
            PositionMode::PerSymbol => "per_symbol",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim() {
            "equal_weight" => Ok(PositionMode::EqualWeight),
            "per_symbol" | "single_stock" => Ok(PositionMode::PerSymbol),
            other => Err(anyhow!("Unknown position mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim() {
            "buy" => Ok(TradeSide::Buy),
            "sell" => Ok(TradeSide::Sell),
            other => Err(anyhow!("Unknown trade side: {}", other)),
        }
    }
}

/// Configuration row of one backtest run, as stored in the task table.
#[derive(Debug, Clone)]
pub struct BacktestTask {
    pub id: i64,
    pub task_name: String,
    /// Comma-separated symbols; empty or missing means "all available".
    pub symbol_list: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_cash: f64,
    pub max_position: f64,
    pub commission_rate: f64,
    pub slippage_bp: f64,
    pub signal_source_type: String,
    pub result_id: Option<i64>,
    pub signal_buy_threshold: f64,
    pub signal_sell_threshold: f64,
    pub position_mode: String,
    pub status: TaskStatus,
    pub progress: i32,
    pub error_msg: Option<String>,
}

impl BacktestTask {
    /// Explicit symbol universe, or `None` when the task leaves it to be
    /// derived from the available data.
    pub fn symbols(&self) -> Option<Vec<String>> {
        let raw = self.symbol_list.as_deref()?.trim();
        let symbols: Vec<String> = raw
            .split(',')
            .map(|code| code.trim().to_string())
            .filter(|code| !code.is_empty())
            .collect();
        if symbols.is_empty() {
            None
        } else {
            Some(symbols)
        }
    }
}

/// One executed order plus the portfolio snapshot right after it.
///
/// Snapshot fields are marked at the raw close, not the slipped execution
/// price, so they agree with the daily NAV series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub task_id: i64,
    pub trade_date: NaiveDate,
    pub trade_datetime: DateTime<Utc>,
    pub ts_code: String,
    pub side: TradeSide,
    pub price: f64,
    pub volume: i64,
    pub amount: f64,
    pub fee: f64,
    pub position_after: i64,
    pub position_value_after: f64,
    pub cash_after: f64,
    pub equity_after: f64,
}

/// End-of-day portfolio snapshot. `nav` is the equity ratio to initial cash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavPoint {
    pub task_id: i64,
    pub trade_date: NaiveDate,
    pub nav: f64,
    pub cash: f64,
    pub position_value: f64,
    pub total_equity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub nav: f64,
}

/// Summary statistics of one completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub final_equity: f64,
    pub total_return: f64,
    pub annual_return: f64,
    pub max_drawdown: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub calmar_ratio: f64,
    pub win_rate: f64,
    pub profit_loss_ratio: f64,
    pub trade_count: i64,
    pub equity_curve: Vec<EquityPoint>,
}
