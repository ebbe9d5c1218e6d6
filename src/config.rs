use crate::error::EngineError;
use crate::models::{BacktestTask, PositionMode, SignalSource};
use anyhow::Result;
use chrono::NaiveDate;

/// Validated per-run configuration, resolved once from the task row.
///
/// String-typed task columns (signal source, position mode) are parsed into
/// closed enums here so the day loop never branches on raw strings.
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub task_id: i64,
    pub symbols: Option<Vec<String>>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_cash: f64,
    pub max_position: f64,
    pub commission_rate: f64,
    pub slippage_bp: f64,
    pub buy_threshold: f64,
    pub sell_threshold: f64,
    pub position_mode: PositionMode,
    pub signal_source: SignalSource,
}

impl BacktestConfig {
    pub fn from_task(task: &BacktestTask) -> Result<Self> {
        if task.end_date < task.start_date {
            return Err(EngineError::configuration(format!(
                "end_date {} is before start_date {}",
                task.end_date, task.start_date
            ))
            .into());
        }

        let initial_cash = require_range(task.initial_cash, "initial_cash", f64::MIN_POSITIVE, None)?;
        let max_position = require_range(task.max_position, "max_position", 0.0, Some(1.0))?;
        let commission_rate = require_range(task.commission_rate, "commission_rate", 0.0, None)?;
        let slippage_bp = require_range(task.slippage_bp, "slippage_bp", 0.0, None)?;
        let buy_threshold = require_range(task.signal_buy_threshold, "signal_buy_threshold", 0.0, Some(1.0))?;
        let sell_threshold = require_range(task.signal_sell_threshold, "signal_sell_threshold", 0.0, Some(1.0))?;

        let position_mode = PositionMode::parse(&task.position_mode)
            .map_err(|err| EngineError::configuration(err.to_string()))?;
        let signal_source = resolve_signal_source(task)?;

        Ok(Self {
            task_id: task.id,
            symbols: task.symbols(),
            start_date: task.start_date,
            end_date: task.end_date,
            initial_cash,
            max_position,
            commission_rate,
            slippage_bp,
            buy_threshold,
            sell_threshold,
            position_mode,
            signal_source,
        })
    }

    /// Slippage as a price fraction, applied against the trader.
    pub fn slippage_fraction(&self) -> f64 {
        self.slippage_bp / 10_000.0
    }
}

fn resolve_signal_source(task: &BacktestTask) -> Result<SignalSource> {
    match task.signal_source_type.trim() {
        "predict_table" => {
            let result_id = task.result_id.ok_or_else(|| {
                EngineError::configuration("predict_table mode requires result_id")
            })?;
            Ok(SignalSource::PredictTable { result_id })
        }
        "online_model" => {
            let result_id = task.result_id.ok_or_else(|| {
                EngineError::configuration("online_model mode requires result_id")
            })?;
            Ok(SignalSource::OnlineModel { result_id })
        }
        "factor_rule" => Err(EngineError::UnsupportedSignalSource(
            "factor_rule signal generation is not implemented".to_string(),
        )
        .into()),
        other => Err(EngineError::configuration(format!(
            "unknown signal source type: {}",
            other
        ))
        .into()),
    }
}

fn require_range(value: f64, name: &str, min: f64, max: Option<f64>) -> Result<f64> {
    if !value.is_finite() || value < min {
        return Err(EngineError::configuration(format!(
            "{} must be >= {} (value: {})",
            name, min, value
        ))
        .into());
    }
    if let Some(max) = max {
        if value > max {
            return Err(EngineError::configuration(format!(
                "{} must be <= {} (value: {})",
                name, max, value
            ))
            .into());
        }
    }
    Ok(value)
}
