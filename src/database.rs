use crate::models::{
    BacktestMetrics, BacktestTask, Kline, NavPoint, SignalRow, TaskStatus, Trade,
};
use crate::signals::FeatureRow;
use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, Utc};
use log::error;
use serde_json::Value;
use tokio_postgres::{Client, NoTls, Row};
use uuid::Uuid;

/// Stored classifier dump plus its ordered feature list.
pub struct ModelRecord {
    pub model_text: String,
    pub feature_names: Vec<String>,
}

pub struct Database {
    client: Client,
}

impl Database {
    pub async fn new<S: AsRef<str>>(database_url: S) -> Result<Self> {
        let database_url = database_url.as_ref().to_string();
        let (client, connection) = tokio_postgres::connect(&database_url, NoTls)
            .await
            .with_context(|| format!("failed to connect to PostgreSQL at {}", database_url))?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!("PostgreSQL connection error: {}", err);
            }
        });

        Ok(Self { client })
    }

    pub async fn get_task(&self, task_id: i64) -> Result<Option<BacktestTask>> {
        let row = self
            .client
            .query_opt(
                "SELECT id, task_name, symbol_list, start_date, end_date, initial_cash,
                        max_position, commission_rate, slippage_bp, signal_source_type,
                        result_id, signal_buy_threshold, signal_sell_threshold,
                        position_mode, status, progress, error_msg
                 FROM backtest_task WHERE id = $1",
                &[&task_id],
            )
            .await?;
        row.map(task_from_row).transpose()
    }

    /// Transitions a task to running. Returns false when the task is
    /// already running (or does not exist); a running task must reject
    /// re-execution so two workers never share one portfolio's rows.
    pub async fn claim_task(&self, task_id: i64) -> Result<bool> {
        let updated = self
            .client
            .execute(
                "UPDATE backtest_task
                 SET status = 'running', progress = 0, error_msg = NULL
                 WHERE id = $1 AND status <> 'running'",
                &[&task_id],
            )
            .await?;
        Ok(updated == 1)
    }

    pub async fn update_task_progress(&self, task_id: i64, progress: i32) -> Result<()> {
        self.client
            .execute(
                "UPDATE backtest_task SET progress = $2 WHERE id = $1",
                &[&task_id, &progress],
            )
            .await?;
        Ok(())
    }

    pub async fn mark_task_succeeded(&self, task_id: i64) -> Result<()> {
        self.client
            .execute(
                "UPDATE backtest_task SET status = 'succeeded', progress = 100 WHERE id = $1",
                &[&task_id],
            )
            .await?;
        Ok(())
    }

    pub async fn mark_task_failed(&self, task_id: i64, error_msg: &str) -> Result<()> {
        self.client
            .execute(
                "UPDATE backtest_task SET status = 'failed', error_msg = $2 WHERE id = $1",
                &[&task_id, &error_msg],
            )
            .await?;
        Ok(())
    }

    /// Daily bars for the date range, all symbols when `symbols` is `None`.
    pub async fn load_kline(
        &self,
        symbols: Option<&[String]>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<Kline>> {
        let rows = if let Some(symbols) = symbols {
            self.client
                .query(
                    "SELECT ts_code, trade_date, open, high, low, close, pre_close, vol, amount
                     FROM kline_daily
                     WHERE trade_date >= $1 AND trade_date <= $2 AND ts_code = ANY($3)
                     ORDER BY trade_date, ts_code",
                    &[&start_date, &end_date, &symbols],
                )
                .await?
        } else {
            self.client
                .query(
                    "SELECT ts_code, trade_date, open, high, low, close, pre_close, vol, amount
                     FROM kline_daily
                     WHERE trade_date >= $1 AND trade_date <= $2
                     ORDER BY trade_date, ts_code",
                    &[&start_date, &end_date],
                )
                .await?
        };

        Ok(rows
            .into_iter()
            .map(|row| Kline {
                ts_code: row.get(0),
                trade_date: row.get(1),
                open: row.get(2),
                high: row.get(3),
                low: row.get(4),
                close: row.get(5),
                pre_close: row.get(6),
                vol: row.get(7),
                amount: row.get(8),
            })
            .collect())
    }

    /// Stored predictions of one training result over the date range.
    pub async fn load_predict_signals(
        &self,
        result_id: i64,
        symbols: Option<&[String]>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<SignalRow>> {
        let rows = if let Some(symbols) = symbols {
            self.client
                .query(
                    "SELECT ts_code, trade_date, predict_label, predict_prob
                     FROM model_predict_result
                     WHERE result_id = $1 AND trade_date >= $2 AND trade_date <= $3
                       AND ts_code = ANY($4)
                     ORDER BY trade_date, ts_code",
                    &[&result_id, &start_date, &end_date, &symbols],
                )
                .await?
        } else {
            self.client
                .query(
                    "SELECT ts_code, trade_date, predict_label, predict_prob
                     FROM model_predict_result
                     WHERE result_id = $1 AND trade_date >= $2 AND trade_date <= $3
                     ORDER BY trade_date, ts_code",
                    &[&result_id, &start_date, &end_date],
                )
                .await?
        };

        Ok(rows
            .into_iter()
            .map(|row| SignalRow {
                ts_code: row.get(0),
                trade_date: row.get(1),
                predict_label: row.get(2),
                predict_prob: row.get(3),
            })
            .collect())
    }

    /// Distinct symbols a training result covers in the range; used to
    /// derive the universe when the task leaves its symbol list empty.
    pub async fn list_predict_symbols(
        &self,
        result_id: i64,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<String>> {
        let rows = self
            .client
            .query(
                "SELECT DISTINCT ts_code
                 FROM model_predict_result
                 WHERE result_id = $1 AND trade_date >= $2 AND trade_date <= $3
                 ORDER BY ts_code",
                &[&result_id, &start_date, &end_date],
            )
            .await?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    pub async fn load_model_record(&self, result_id: i64) -> Result<Option<ModelRecord>> {
        let Some(row) = self
            .client
            .query_opt(
                "SELECT model_text, feature_names
                 FROM model_train_result WHERE id = $1",
                &[&result_id],
            )
            .await?
        else {
            return Ok(None);
        };

        let model_text: Option<String> = row.get(0);
        let feature_names_json: Option<Value> = row.get(1);
        let model_text =
            model_text.ok_or_else(|| anyhow!("training result {} has no stored model", result_id))?;
        let feature_names = feature_names_json
            .as_ref()
            .and_then(|value| value.as_array())
            .map(|values| {
                values
                    .iter()
                    .map(|value| {
                        value
                            .as_str()
                            .map(str::to_string)
                            .ok_or_else(|| anyhow!("feature_names entry is not a string"))
                    })
                    .collect::<Result<Vec<String>>>()
            })
            .transpose()?
            .ok_or_else(|| anyhow!("training result {} has no feature list", result_id))?;

        Ok(Some(ModelRecord {
            model_text,
            feature_names,
        }))
    }

    /// Feature values for the online model, one row per (symbol, day),
    /// columns in the model's stored feature order.
    pub async fn load_feature_rows(
        &self,
        feature_cols: &[String],
        symbols: &[String],
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<FeatureRow>> {
        if feature_cols.is_empty() {
            return Err(anyhow!("online model has an empty feature list"));
        }
        let column_list = feature_cols
            .iter()
            .map(|name| quote_identifier(name))
            .collect::<Result<Vec<String>>>()?
            .join(", ");

        let query = format!(
            "SELECT ts_code, trade_date, {}
             FROM model_feature_data
             WHERE trade_date >= $1 AND trade_date <= $2 AND ts_code = ANY($3)
             ORDER BY trade_date, ts_code",
            column_list
        );
        let rows = self
            .client
            .query(&query, &[&start_date, &end_date, &symbols])
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let values = (0..feature_cols.len())
                    .map(|idx| row.get::<_, Option<f64>>(idx + 2))
                    .collect();
                FeatureRow {
                    ts_code: row.get(0),
                    trade_date: row.get(1),
                    values,
                }
            })
            .collect())
    }

    /// Replaces a task's trade and NAV rows in one transaction: prior rows
    /// are deleted first so a rerun never accumulates duplicates.
    pub async fn replace_run_outputs(
        &mut self,
        task_id: i64,
        trades: &[Trade],
        navs: &[NavPoint],
    ) -> Result<()> {
        let tx = self.client.transaction().await?;

        tx.execute("DELETE FROM backtest_trade WHERE task_id = $1", &[&task_id])
            .await?;
        tx.execute("DELETE FROM backtest_nav WHERE task_id = $1", &[&task_id])
            .await?;

        let trade_stmt = tx
            .prepare(
                "INSERT INTO backtest_trade
                     (task_id, trade_date, trade_datetime, ts_code, side, price, volume,
                      amount, fee, position_after, position_value_after, cash_after,
                      equity_after)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            )
            .await?;
        for trade in trades {
            tx.execute(
                &trade_stmt,
                &[
                    &trade.task_id,
                    &trade.trade_date,
                    &trade.trade_datetime,
                    &trade.ts_code,
                    &trade.side.as_str(),
                    &trade.price,
                    &trade.volume,
                    &trade.amount,
                    &trade.fee,
                    &trade.position_after,
                    &trade.position_value_after,
                    &trade.cash_after,
                    &trade.equity_after,
                ],
            )
            .await?;
        }

        let nav_stmt = tx
            .prepare(
                "INSERT INTO backtest_nav
                     (task_id, trade_date, nav, cash, position_value, total_equity)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .await?;
        for nav in navs {
            tx.execute(
                &nav_stmt,
                &[
                    &nav.task_id,
                    &nav.trade_date,
                    &nav.nav,
                    &nav.cash,
                    &nav.position_value,
                    &nav.total_equity,
                ],
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Creates or overwrites the one summary row a task owns.
    pub async fn upsert_result(&self, task_id: i64, metrics: &BacktestMetrics) -> Result<()> {
        let run_id = Uuid::new_v4().to_string();
        let equity_curve = serde_json::to_value(&metrics.equity_curve)
            .context("failed to serialize equity curve")?;
        let updated_at = Utc::now();

        self.client
            .execute(
                "INSERT INTO backtest_result
                     (task_id, run_id, final_equity, total_return, annual_return, max_drawdown,
                      volatility, sharpe_ratio, calmar_ratio, win_rate, profit_loss_ratio,
                      trade_count, equity_curve_json, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                 ON CONFLICT (task_id) DO UPDATE SET
                     run_id = EXCLUDED.run_id,
                     final_equity = EXCLUDED.final_equity,
                     total_return = EXCLUDED.total_return,
                     annual_return = EXCLUDED.annual_return,
                     max_drawdown = EXCLUDED.max_drawdown,
                     volatility = EXCLUDED.volatility,
                     sharpe_ratio = EXCLUDED.sharpe_ratio,
                     calmar_ratio = EXCLUDED.calmar_ratio,
                     win_rate = EXCLUDED.win_rate,
                     profit_loss_ratio = EXCLUDED.profit_loss_ratio,
                     trade_count = EXCLUDED.trade_count,
                     equity_curve_json = EXCLUDED.equity_curve_json,
                     updated_at = EXCLUDED.updated_at",
                &[
                    &task_id,
                    &run_id,
                    &metrics.final_equity,
                    &metrics.total_return,
                    &metrics.annual_return,
                    &metrics.max_drawdown,
                    &metrics.volatility,
                    &metrics.sharpe_ratio,
                    &metrics.calmar_ratio,
                    &metrics.win_rate,
                    &metrics.profit_loss_ratio,
                    &metrics.trade_count,
                    &equity_curve,
                    &updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    /// Stored result row as JSON, for the show-result command.
    pub async fn get_result_json(&self, task_id: i64) -> Result<Option<Value>> {
        let Some(row) = self
            .client
            .query_opt(
                "SELECT task_id, run_id, final_equity, total_return, annual_return,
                        max_drawdown, volatility, sharpe_ratio, calmar_ratio, win_rate,
                        profit_loss_ratio, trade_count, equity_curve_json
                 FROM backtest_result WHERE task_id = $1",
                &[&task_id],
            )
            .await?
        else {
            return Ok(None);
        };

        Ok(Some(serde_json::json!({
            "taskId": row.get::<_, i64>(0),
            "runId": row.get::<_, String>(1),
            "finalEquity": row.get::<_, f64>(2),
            "totalReturn": row.get::<_, f64>(3),
            "annualReturn": row.get::<_, f64>(4),
            "maxDrawdown": row.get::<_, f64>(5),
            "volatility": row.get::<_, f64>(6),
            "sharpeRatio": row.get::<_, f64>(7),
            "calmarRatio": row.get::<_, f64>(8),
            "winRate": row.get::<_, f64>(9),
            "profitLossRatio": row.get::<_, f64>(10),
            "tradeCount": row.get::<_, i64>(11),
            "equityCurve": row.get::<_, Value>(12),
        })))
    }
}

fn task_from_row(row: Row) -> Result<BacktestTask> {
    let status_raw: String = row.get(14);
    Ok(BacktestTask {
        id: row.get(0),
        task_name: row.get(1),
        symbol_list: row.get(2),
        start_date: row.get(3),
        end_date: row.get(4),
        initial_cash: row.get(5),
        max_position: row.get(6),
        commission_rate: row.get(7),
        slippage_bp: row.get(8),
        signal_source_type: row.get(9),
        result_id: row.get(10),
        signal_buy_threshold: row.get(11),
        signal_sell_threshold: row.get(12),
        position_mode: row.get(13),
        status: TaskStatus::parse(&status_raw)?,
        progress: row.get(15),
        error_msg: row.get(16),
    })
}

/// Double-quotes a column name for interpolation into a dynamic SELECT.
fn quote_identifier(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(anyhow!("invalid feature column name: {:?}", name));
    }
    Ok(format!("\"{}\"", trimmed))
}
