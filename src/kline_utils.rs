use crate::models::Kline;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

/// Groups kline rows (by reference) keyed by trading date. The backtest
/// calendar is whatever the price table actually contains.
pub fn group_klines_by_date(klines: &[Kline]) -> BTreeMap<NaiveDate, Vec<&Kline>> {
    let mut grouped: BTreeMap<NaiveDate, Vec<&Kline>> = BTreeMap::new();
    for row in klines {
        grouped.entry(row.trade_date).or_default().push(row);
    }
    grouped
}

/// One trading day's bars indexed by symbol.
pub struct DayPrices<'a> {
    by_symbol: HashMap<&'a str, &'a Kline>,
}

impl<'a> DayPrices<'a> {
    pub fn new(rows: &[&'a Kline]) -> Self {
        let mut by_symbol = HashMap::with_capacity(rows.len());
        for row in rows {
            by_symbol.insert(row.ts_code.as_str(), *row);
        }
        Self { by_symbol }
    }

    pub fn close(&self, ts_code: &str) -> Option<f64> {
        self.by_symbol.get(ts_code).map(|row| row.close)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.by_symbol.keys().copied()
    }

    pub fn contains(&self, ts_code: &str) -> bool {
        self.by_symbol.contains_key(ts_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kline(ts_code: &str, date: NaiveDate, close: f64) -> Kline {
        Kline {
            ts_code: ts_code.to_string(),
            trade_date: date,
            open: close,
            high: close,
            low: close,
            close,
            pre_close: None,
            vol: 1_000.0,
            amount: close * 1_000.0,
        }
    }

    #[test]
    fn grouping_keeps_days_sorted_and_distinct() {
        let d1 = NaiveDate::from_ymd_opt(2023, 1, 4).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2023, 1, 3).unwrap();
        let klines = vec![
            kline("AAA", d1, 10.0),
            kline("BBB", d1, 20.0),
            kline("AAA", d2, 9.5),
        ];

        let grouped = group_klines_by_date(&klines);
        assert_eq!(grouped.keys().copied().collect::<Vec<_>>(), vec![d2, d1]);
        assert_eq!(grouped[&d1].len(), 2);
        assert_eq!(grouped[&d2].len(), 1);
    }

    #[test]
    fn day_prices_looks_up_closes_by_symbol() {
        let date = NaiveDate::from_ymd_opt(2023, 1, 3).unwrap();
        let rows = vec![kline("AAA", date, 10.0), kline("BBB", date, 20.0)];
        let refs: Vec<&Kline> = rows.iter().collect();
        let day = DayPrices::new(&refs);

        assert_eq!(day.close("AAA"), Some(10.0));
        assert_eq!(day.close("CCC"), None);
        assert!(day.contains("BBB"));
        assert!(!day.contains("CCC"));
    }
}
