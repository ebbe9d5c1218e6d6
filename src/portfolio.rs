use std::collections::BTreeMap;

/// Cash and share positions of one running simulation.
///
/// Owned exclusively by a single backtest loop; mutated only by the trade
/// executor. A symbol whose shares reach zero is removed outright.
#[derive(Debug, Clone)]
pub struct Portfolio {
    pub cash: f64,
    positions: BTreeMap<String, i64>,
}

impl Portfolio {
    pub fn new(initial_cash: f64) -> Self {
        Self {
            cash: initial_cash,
            positions: BTreeMap::new(),
        }
    }

    pub fn shares(&self, ts_code: &str) -> i64 {
        self.positions.get(ts_code).copied().unwrap_or(0)
    }

    pub fn set_shares(&mut self, ts_code: &str, shares: i64) {
        if shares == 0 {
            self.positions.remove(ts_code);
        } else {
            self.positions.insert(ts_code.to_string(), shares);
        }
    }

    pub fn holds(&self, ts_code: &str) -> bool {
        self.positions.contains_key(ts_code)
    }

    pub fn positions(&self) -> impl Iterator<Item = (&String, i64)> {
        self.positions.iter().map(|(code, shares)| (code, *shares))
    }

    /// Mark-to-market value of all held positions using the provided close
    /// lookup. A symbol the lookup cannot price contributes zero.
    pub fn position_value<F>(&self, close_of: F) -> f64
    where
        F: Fn(&str) -> Option<f64>,
    {
        self.positions
            .iter()
            .map(|(code, shares)| {
                close_of(code)
                    .map(|close| *shares as f64 * close)
                    .unwrap_or(0.0)
            })
            .sum()
    }

    /// Cash plus mark-to-market position value.
    pub fn total_equity<F>(&self, close_of: F) -> f64
    where
        F: Fn(&str) -> Option<f64>,
    {
        self.cash + self.position_value(close_of)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_shares_removes_the_entry() {
        let mut portfolio = Portfolio::new(10_000.0);
        portfolio.set_shares("AAA", 200);
        assert!(portfolio.holds("AAA"));

        portfolio.set_shares("AAA", 0);
        assert!(!portfolio.holds("AAA"));
        assert_eq!(portfolio.shares("AAA"), 0);
        assert_eq!(portfolio.positions().count(), 0);
    }

    #[test]
    fn unpriced_symbol_contributes_zero_value() {
        let mut portfolio = Portfolio::new(1_000.0);
        portfolio.set_shares("AAA", 100);
        portfolio.set_shares("BBB", 300);

        let value = portfolio.position_value(|code| match code {
            "AAA" => Some(10.0),
            _ => None,
        });
        assert!((value - 1_000.0).abs() < 1e-9);
        assert!((portfolio.total_equity(|_| None) - 1_000.0).abs() < 1e-9);
    }
}
