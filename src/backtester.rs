use crate::config::BacktestConfig;
use crate::database::Database;
use crate::engine::{BacktestEngine, BacktestRun};
use crate::error::EngineError;
use crate::model::GbdtModel;
use crate::models::{BacktestMetrics, BacktestTask, Kline, SignalSource};
use crate::retry::retry_db_operation;
use crate::signals::SignalProvider;
use anyhow::{anyhow, Result};
use log::{error, info, warn};

/// Runs one backtest task end to end: claim, load, replay, persist.
///
/// Any failure after the claim lands in the task row as `failed` with the
/// error message, so the caller sees the outcome even when this returns Err.
pub async fn run_task(db: &mut Database, task_id: i64) -> Result<()> {
    let task = db
        .get_task(task_id)
        .await?
        .ok_or_else(|| anyhow!("backtest task {} not found", task_id))?;

    if !db.claim_task(task_id).await? {
        return Err(anyhow!(
            "backtest task {} is already running; refusing to start a second run",
            task_id
        ));
    }
    info!("Claimed backtest task {} ({})", task_id, task.task_name);

    match execute(db, &task).await {
        Ok(metrics) => {
            db.mark_task_succeeded(task_id).await?;
            info!(
                "Backtest task {} succeeded: total return {:.4}, max drawdown {:.4}, {} trades",
                task_id, metrics.total_return, metrics.max_drawdown, metrics.trade_count
            );
            Ok(())
        }
        Err(err) => {
            let message = format!("{:#}", err);
            error!("Backtest task {} failed: {}", task_id, message);
            db.mark_task_failed(task_id, &message).await?;
            Err(err)
        }
    }
}

async fn execute(db: &mut Database, task: &BacktestTask) -> Result<BacktestMetrics> {
    let config = BacktestConfig::from_task(task)?;
    let task_id = config.task_id;

    let symbols = resolve_universe(db, &config).await?;
    let klines = db
        .load_kline(symbols.as_deref(), config.start_date, config.end_date)
        .await?;
    if klines.is_empty() {
        return Err(EngineError::data_unavailable(format!(
            "no kline data between {} and {}",
            config.start_date, config.end_date
        ))
        .into());
    }

    let provider = build_signal_provider(db, &config, &klines).await?;

    // The replay itself is CPU-bound and synchronous; progress flows back
    // through a channel so the task row updates while the loop runs.
    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel::<i32>();
    let engine = BacktestEngine::new(config);
    let handle = tokio::task::spawn_blocking(move || {
        engine.run(&klines, &provider, |progress| {
            let _ = progress_tx.send(progress);
            Ok(())
        })
    });

    while let Some(progress) = progress_rx.recv().await {
        if let Err(err) = db.update_task_progress(task_id, progress).await {
            warn!("Failed to persist progress for task {}: {}", task_id, err);
        }
    }

    let BacktestRun {
        metrics,
        trades,
        navs,
    } = handle.await??;

    retry_db_operation!(
        format!("replacing outputs of task {}", task_id),
        db.replace_run_outputs(task_id, &trades, &navs)
    )?;
    retry_db_operation!(
        format!("upserting result of task {}", task_id),
        db.upsert_result(task_id, &metrics)
    )?;

    Ok(metrics)
}

/// Symbols to load klines for. An explicit task list wins; otherwise
/// predict-table mode derives the universe from the stored predictions,
/// and online mode replays every symbol with data in the window.
async fn resolve_universe(db: &Database, config: &BacktestConfig) -> Result<Option<Vec<String>>> {
    if config.symbols.is_some() {
        return Ok(config.symbols.clone());
    }

    match config.signal_source {
        SignalSource::PredictTable { result_id } => {
            let symbols = db
                .list_predict_symbols(result_id, config.start_date, config.end_date)
                .await?;
            if symbols.is_empty() {
                return Err(EngineError::data_unavailable(format!(
                    "result {} has no predictions between {} and {}",
                    result_id, config.start_date, config.end_date
                ))
                .into());
            }
            Ok(Some(symbols))
        }
        SignalSource::OnlineModel { .. } | SignalSource::FactorRule => Ok(None),
    }
}

async fn build_signal_provider(
    db: &Database,
    config: &BacktestConfig,
    klines: &[Kline],
) -> Result<SignalProvider> {
    match config.signal_source {
        SignalSource::PredictTable { result_id } => {
            let rows = db
                .load_predict_signals(
                    result_id,
                    config.symbols.as_deref(),
                    config.start_date,
                    config.end_date,
                )
                .await?;
            if rows.is_empty() {
                return Err(EngineError::data_unavailable(format!(
                    "result {} has no predictions between {} and {}",
                    result_id, config.start_date, config.end_date
                ))
                .into());
            }
            info!("Loaded {} prediction rows for result {}", rows.len(), result_id);
            Ok(SignalProvider::from_predict_rows(rows))
        }
        SignalSource::OnlineModel { result_id } => {
            let record = db.load_model_record(result_id).await?.ok_or_else(|| {
                EngineError::data_unavailable(format!("training result {} not found", result_id))
            })?;
            let model = GbdtModel::from_model_text(&record.model_text)?;

            let symbols = distinct_symbols(klines);
            let feature_rows = db
                .load_feature_rows(
                    &record.feature_names,
                    &symbols,
                    config.start_date,
                    config.end_date,
                )
                .await?;
            info!(
                "Loaded {} feature rows across {} symbols for result {}",
                feature_rows.len(),
                symbols.len(),
                result_id
            );
            SignalProvider::from_online_model(model, feature_rows)
        }
        // Rejected when the config is resolved; unreachable here.
        SignalSource::FactorRule => Err(EngineError::UnsupportedSignalSource(
            "factor_rule signal generation is not implemented".to_string(),
        )
        .into()),
    }
}

fn distinct_symbols(klines: &[Kline]) -> Vec<String> {
    let mut symbols: Vec<String> = klines.iter().map(|k| k.ts_code.clone()).collect();
    symbols.sort_unstable();
    symbols.dedup();
    symbols
}
