use crate::kline_utils::DayPrices;
use crate::model::GbdtModel;
use crate::models::{Signal, SignalRow};
use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use log::warn;
use std::collections::HashMap;

/// One symbol's feature vector on one day, aligned to the model's ordered
/// feature list. Missing cells stay `None` until matrix preparation.
#[derive(Debug, Clone)]
pub struct FeatureRow {
    pub ts_code: String,
    pub trade_date: NaiveDate,
    pub values: Vec<Option<f64>>,
}

/// Source of daily buy/sell scores. One variant per supported mode; the
/// unsupported factor-rule mode never reaches this type.
pub enum SignalProvider {
    /// Predictions joined from the stored table, grouped by day up front.
    PredictTable {
        by_day: HashMap<NaiveDate, HashMap<String, Signal>>,
    },
    /// In-process model scoring over preloaded daily feature rows.
    OnlineModel {
        model: GbdtModel,
        feature_count: usize,
        features_by_day: HashMap<NaiveDate, Vec<FeatureRow>>,
    },
}

impl SignalProvider {
    pub fn from_predict_rows(rows: Vec<SignalRow>) -> Self {
        let mut by_day: HashMap<NaiveDate, HashMap<String, Signal>> = HashMap::new();
        for row in rows {
            by_day.entry(row.trade_date).or_default().insert(
                row.ts_code,
                Signal {
                    predict_label: row.predict_label,
                    predict_prob: row.predict_prob,
                },
            );
        }
        SignalProvider::PredictTable { by_day }
    }

    pub fn from_online_model(model: GbdtModel, feature_rows: Vec<FeatureRow>) -> Result<Self> {
        let feature_count = feature_rows
            .first()
            .map(|row| row.values.len())
            .unwrap_or_else(|| model.num_features());
        if feature_count < model.num_features() {
            return Err(anyhow!(
                "feature rows carry {} columns but the model expects {}",
                feature_count,
                model.num_features()
            ));
        }

        let mut features_by_day: HashMap<NaiveDate, Vec<FeatureRow>> = HashMap::new();
        for row in feature_rows {
            features_by_day.entry(row.trade_date).or_default().push(row);
        }

        Ok(SignalProvider::OnlineModel {
            model,
            feature_count,
            features_by_day,
        })
    }

    /// Signals for one trading day, keyed by symbol.
    ///
    /// In online mode a scoring failure is local to the day: it is logged
    /// and the day degrades to "no signal", which the sizer treats as
    /// neutral. Table mode cannot fail per-day.
    pub fn signals_for(&self, date: NaiveDate, day: &DayPrices<'_>) -> HashMap<String, Signal> {
        match self {
            SignalProvider::PredictTable { by_day } => {
                by_day.get(&date).cloned().unwrap_or_default()
            }
            SignalProvider::OnlineModel {
                model,
                feature_count,
                features_by_day,
            } => match score_day(model, *feature_count, features_by_day, date, day) {
                Ok(signals) => signals,
                Err(err) => {
                    warn!("Online signal generation failed for {}: {}", date, err);
                    HashMap::new()
                }
            },
        }
    }
}

fn score_day(
    model: &GbdtModel,
    feature_count: usize,
    features_by_day: &HashMap<NaiveDate, Vec<FeatureRow>>,
    date: NaiveDate,
    day: &DayPrices<'_>,
) -> Result<HashMap<String, Signal>> {
    let mut signals = HashMap::new();
    let Some(rows) = features_by_day.get(&date) else {
        return Ok(signals);
    };

    let rows: Vec<&FeatureRow> = rows
        .iter()
        .filter(|row| day.contains(&row.ts_code))
        .collect();
    if rows.is_empty() {
        return Ok(signals);
    }

    let matrix = prepare_matrix(&rows, feature_count)?;
    for (row, features) in rows.iter().zip(matrix.iter()) {
        let probability = model.predict_probability(features).ok_or_else(|| {
            anyhow!(
                "model rejected feature vector for {} ({} columns)",
                row.ts_code,
                features.len()
            )
        })?;
        signals.insert(
            row.ts_code.clone(),
            Signal {
                predict_label: Some(if probability > 0.5 { 1 } else { 0 }),
                predict_prob: probability,
            },
        );
    }

    Ok(signals)
}

/// Fills the day's feature matrix: forward-fill each column down the rows,
/// then zero-fill whatever is still missing.
fn prepare_matrix(rows: &[&FeatureRow], feature_count: usize) -> Result<Vec<Vec<f64>>> {
    for row in rows {
        if row.values.len() != feature_count {
            return Err(anyhow!(
                "feature row for {} has {} columns, expected {}",
                row.ts_code,
                row.values.len(),
                feature_count
            ));
        }
    }

    let mut matrix = vec![vec![0.0; feature_count]; rows.len()];
    for col in 0..feature_count {
        let mut last_seen: Option<f64> = None;
        for (row_idx, row) in rows.iter().enumerate() {
            let cell = row.values[col].or(last_seen);
            if let Some(value) = cell {
                last_seen = Some(value);
                matrix[row_idx][col] = value;
            }
        }
    }

    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Kline;

    fn kline(ts_code: &str, date: NaiveDate, close: f64) -> Kline {
        Kline {
            ts_code: ts_code.to_string(),
            trade_date: date,
            open: close,
            high: close,
            low: close,
            close,
            pre_close: None,
            vol: 0.0,
            amount: 0.0,
        }
    }

    fn signal_row(ts_code: &str, date: NaiveDate, prob: f64) -> SignalRow {
        SignalRow {
            ts_code: ts_code.to_string(),
            trade_date: date,
            predict_label: Some(if prob > 0.5 { 1 } else { 0 }),
            predict_prob: prob,
        }
    }

    #[test]
    fn predict_table_returns_the_days_signals() {
        let d1 = NaiveDate::from_ymd_opt(2023, 1, 3).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2023, 1, 4).unwrap();
        let provider = SignalProvider::from_predict_rows(vec![
            signal_row("AAA", d1, 0.8),
            signal_row("BBB", d1, 0.3),
            signal_row("AAA", d2, 0.2),
        ]);

        let rows = vec![kline("AAA", d1, 10.0), kline("BBB", d1, 20.0)];
        let refs: Vec<&Kline> = rows.iter().collect();
        let day = DayPrices::new(&refs);

        let signals = provider.signals_for(d1, &day);
        assert_eq!(signals.len(), 2);
        assert!((signals["AAA"].predict_prob - 0.8).abs() < 1e-12);

        let missing = provider.signals_for(NaiveDate::from_ymd_opt(2023, 2, 1).unwrap(), &day);
        assert!(missing.is_empty());
    }

    #[test]
    fn matrix_forward_fills_then_zero_fills() {
        let date = NaiveDate::from_ymd_opt(2023, 1, 3).unwrap();
        let rows = vec![
            FeatureRow {
                ts_code: "AAA".to_string(),
                trade_date: date,
                values: vec![None, Some(2.0)],
            },
            FeatureRow {
                ts_code: "BBB".to_string(),
                trade_date: date,
                values: vec![Some(1.0), None],
            },
            FeatureRow {
                ts_code: "CCC".to_string(),
                trade_date: date,
                values: vec![None, None],
            },
        ];
        let refs: Vec<&FeatureRow> = rows.iter().collect();
        let matrix = prepare_matrix(&refs, 2).unwrap();

        // Column 0: zero-fill, then 1.0 carried forward.
        assert_eq!(matrix[0], vec![0.0, 2.0]);
        assert_eq!(matrix[1], vec![1.0, 2.0]);
        assert_eq!(matrix[2], vec![1.0, 2.0]);
    }
}
