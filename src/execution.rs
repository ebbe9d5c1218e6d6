use crate::config::BacktestConfig;
use crate::kline_utils::DayPrices;
use crate::models::{Trade, TradeSide};
use crate::portfolio::Portfolio;
use crate::trading_rules::lot_aligned_shares;
use chrono::{DateTime, NaiveDate, Utc};

/// Executes one order against the portfolio and emits the trade record.
///
/// Either the full effect is applied together with the record, or (when the
/// order is dropped) nothing is touched. Buys that exceed available cash
/// are downsized to the largest affordable lot-aligned volume; a downsize
/// to zero drops the order silently.
#[allow(clippy::too_many_arguments)]
pub fn execute_trade(
    config: &BacktestConfig,
    portfolio: &mut Portfolio,
    day: &DayPrices<'_>,
    trade_date: NaiveDate,
    executed_at: DateTime<Utc>,
    ts_code: &str,
    target_shares: i64,
    raw_price: f64,
) -> Option<Trade> {
    let current_shares = portfolio.shares(ts_code);
    let delta = target_shares - current_shares;
    if delta == 0 {
        return None;
    }

    let slippage = config.slippage_fraction();
    let (side, executed_price, mut volume) = if delta > 0 {
        (TradeSide::Buy, raw_price * (1.0 + slippage), delta)
    } else {
        (TradeSide::Sell, raw_price * (1.0 - slippage), -delta)
    };

    let mut amount = executed_price * volume as f64;
    let mut fee = amount * config.commission_rate;

    match side {
        TradeSide::Buy => {
            if portfolio.cash < amount + fee {
                let affordable = portfolio.cash / (1.0 + config.commission_rate);
                volume = lot_aligned_shares(affordable, executed_price);
                if volume <= 0 {
                    return None;
                }
                amount = executed_price * volume as f64;
                fee = amount * config.commission_rate;
            }
            portfolio.cash -= amount + fee;
            portfolio.set_shares(ts_code, current_shares + volume);
        }
        TradeSide::Sell => {
            portfolio.cash += amount - fee;
            portfolio.set_shares(ts_code, target_shares);
        }
    }

    // Snapshot at the raw close so trade rows and the NAV series share one mark.
    let position_after = portfolio.shares(ts_code);
    let equity_after = portfolio.total_equity(|code| day.close(code));

    Some(Trade {
        task_id: config.task_id,
        trade_date,
        trade_datetime: executed_at,
        ts_code: ts_code.to_string(),
        side,
        price: executed_price,
        volume,
        amount,
        fee,
        position_after,
        position_value_after: position_after as f64 * raw_price,
        cash_after: portfolio.cash,
        equity_after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BacktestTask, Kline, TaskStatus, LOT_SIZE};

    fn config(commission_rate: f64, slippage_bp: f64) -> BacktestConfig {
        let task = BacktestTask {
            id: 9,
            task_name: "execution".to_string(),
            symbol_list: None,
            start_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
            initial_cash: 1_000_000.0,
            max_position: 1.0,
            commission_rate,
            slippage_bp,
            signal_source_type: "predict_table".to_string(),
            result_id: Some(1),
            signal_buy_threshold: 0.6,
            signal_sell_threshold: 0.4,
            position_mode: "equal_weight".to_string(),
            status: TaskStatus::Pending,
            progress: 0,
            error_msg: None,
        };
        BacktestConfig::from_task(&task).unwrap()
    }

    fn kline(ts_code: &str, close: f64) -> Kline {
        Kline {
            ts_code: ts_code.to_string(),
            trade_date: NaiveDate::from_ymd_opt(2023, 1, 3).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            pre_close: None,
            vol: 0.0,
            amount: 0.0,
        }
    }

    fn run(
        config: &BacktestConfig,
        portfolio: &mut Portfolio,
        rows: &[Kline],
        ts_code: &str,
        target: i64,
        raw_price: f64,
    ) -> Option<Trade> {
        let refs: Vec<&Kline> = rows.iter().collect();
        let day = DayPrices::new(&refs);
        execute_trade(
            config,
            portfolio,
            &day,
            NaiveDate::from_ymd_opt(2023, 1, 3).unwrap(),
            Utc::now(),
            ts_code,
            target,
            raw_price,
        )
    }

    #[test]
    fn unchanged_target_is_a_no_op() {
        let config = config(0.001, 5.0);
        let mut portfolio = Portfolio::new(50_000.0);
        portfolio.set_shares("AAA", 200);
        let rows = vec![kline("AAA", 10.0)];

        let trade = run(&config, &mut portfolio, &rows, "AAA", 200, 10.0);
        assert!(trade.is_none());
        assert!((portfolio.cash - 50_000.0).abs() < 1e-9);
        assert_eq!(portfolio.shares("AAA"), 200);
    }

    #[test]
    fn buy_applies_slippage_and_commission() {
        let config = config(0.001, 10.0);
        let mut portfolio = Portfolio::new(1_000_000.0);
        let rows = vec![kline("AAA", 10.0)];

        let trade = run(&config, &mut portfolio, &rows, "AAA", 1_000, 10.0).unwrap();
        assert_eq!(trade.side, TradeSide::Buy);
        assert_eq!(trade.volume, 1_000);
        assert!((trade.price - 10.01).abs() < 1e-9);
        assert!((trade.amount - 10_010.0).abs() < 1e-9);
        assert!((trade.fee - 10.01).abs() < 1e-9);
        assert!((portfolio.cash - (1_000_000.0 - 10_010.0 - 10.01)).abs() < 1e-6);
        // Snapshot marks at the raw close.
        assert!((trade.position_value_after - 10_000.0).abs() < 1e-9);
        assert!((trade.equity_after - (portfolio.cash + 10_000.0)).abs() < 1e-9);
    }

    #[test]
    fn insufficient_cash_downsizes_to_affordable_lots() {
        let config = config(0.0, 0.0);
        let mut portfolio = Portfolio::new(100_000.0);
        let rows = vec![kline("AAA", 100.0)];

        // Target cost 200k against 100k cash: downsized to 1000 shares.
        let trade = run(&config, &mut portfolio, &rows, "AAA", 2_000, 100.0).unwrap();
        assert_eq!(trade.volume, 1_000);
        assert_eq!(trade.volume % LOT_SIZE, 0);
        assert!((portfolio.cash - 0.0).abs() < 1e-9);
        assert!(portfolio.cash >= 0.0);
    }

    #[test]
    fn unaffordable_lot_drops_the_order_without_effect() {
        let config = config(0.0, 0.0);
        let mut portfolio = Portfolio::new(999.0);
        let rows = vec![kline("AAA", 10.0)];

        // One lot costs 1000; nothing affordable.
        let trade = run(&config, &mut portfolio, &rows, "AAA", 100, 10.0);
        assert!(trade.is_none());
        assert!((portfolio.cash - 999.0).abs() < 1e-9);
        assert!(!portfolio.holds("AAA"));
    }

    #[test]
    fn full_exit_removes_the_position_entry() {
        let config = config(0.001, 5.0);
        let mut portfolio = Portfolio::new(0.0);
        portfolio.set_shares("AAA", 500);
        let rows = vec![kline("AAA", 12.0)];

        let trade = run(&config, &mut portfolio, &rows, "AAA", 0, 12.0).unwrap();
        assert_eq!(trade.side, TradeSide::Sell);
        assert_eq!(trade.volume, 500);
        assert!(!portfolio.holds("AAA"));
        assert_eq!(trade.position_after, 0);

        let expected_price = 12.0 * (1.0 - 0.0005);
        let expected_amount = expected_price * 500.0;
        let expected_fee = expected_amount * 0.001;
        assert!((portfolio.cash - (expected_amount - expected_fee)).abs() < 1e-9);
    }

    #[test]
    fn cash_never_goes_negative_after_a_buy() {
        let config = config(0.0025, 15.0);
        let mut portfolio = Portfolio::new(25_000.0);
        let rows = vec![kline("AAA", 37.0)];

        run(&config, &mut portfolio, &rows, "AAA", 10_000, 37.0);
        assert!(portfolio.cash >= 0.0);
    }
}
