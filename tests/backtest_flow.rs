use backtest_engine::config::BacktestConfig;
use backtest_engine::engine::BacktestEngine;
use backtest_engine::models::{BacktestTask, Kline, SignalRow, TaskStatus, TradeSide};
use backtest_engine::signals::SignalProvider;
use chrono::NaiveDate;

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, day).unwrap()
}

fn kline(ts_code: &str, day: u32, close: f64) -> Kline {
    Kline {
        ts_code: ts_code.to_string(),
        trade_date: date(day),
        open: close,
        high: close,
        low: close,
        close,
        pre_close: None,
        vol: 10_000.0,
        amount: close * 10_000.0,
    }
}

fn signal_row(ts_code: &str, day: u32, prob: f64) -> SignalRow {
    SignalRow {
        ts_code: ts_code.to_string(),
        trade_date: date(day),
        predict_label: Some(if prob > 0.5 { 1 } else { 0 }),
        predict_prob: prob,
    }
}

fn task() -> BacktestTask {
    BacktestTask {
        id: 77,
        task_name: "two symbol flow".to_string(),
        symbol_list: Some("AAA,BBB".to_string()),
        start_date: date(2),
        end_date: date(5),
        initial_cash: 1_000_000.0,
        max_position: 1.0,
        commission_rate: 0.001,
        slippage_bp: 5.0,
        signal_source_type: "predict_table".to_string(),
        result_id: Some(1),
        signal_buy_threshold: 0.6,
        signal_sell_threshold: 0.4,
        position_mode: "equal_weight".to_string(),
        status: TaskStatus::Pending,
        progress: 0,
        error_msg: None,
    }
}

/// Four-day, two-symbol replay with commission and slippage, including a
/// trading halt of a held symbol. Expected values are derived from the
/// stated rules: buys fill at close*(1+slippage), sells at close*(1-slippage),
/// commission on both sides, lots of 100, and cash-constrained downsizing.
#[test]
fn two_symbol_run_with_halt_and_fees() {
    let klines = vec![
        kline("AAA", 2, 10.0),
        kline("BBB", 2, 20.0),
        kline("AAA", 3, 11.0), // BBB halted while held
        kline("AAA", 4, 12.0),
        kline("BBB", 4, 18.0),
        kline("AAA", 5, 12.0),
    ];
    let signals = SignalProvider::from_predict_rows(vec![
        signal_row("AAA", 2, 0.9),
        signal_row("BBB", 2, 0.9),
        signal_row("AAA", 3, 0.9),
        signal_row("AAA", 4, 0.9),
        signal_row("BBB", 4, 0.1),
        signal_row("AAA", 5, 0.1),
    ]);

    let config = BacktestConfig::from_task(&task()).unwrap();
    let mut progress = Vec::new();
    let run = BacktestEngine::new(config)
        .run(&klines, &signals, |p| {
            progress.push(p);
            Ok(())
        })
        .unwrap();

    // Day 2: 500k per symbol. AAA fills in full, BBB is downsized to what
    // the remaining cash affords.
    let aaa_buy_price = 10.0 * 1.0005;
    let aaa_amount = aaa_buy_price * 50_000.0;
    let cash_after_aaa = 1_000_000.0 - aaa_amount * 1.001;

    let bbb_buy_price = 20.0 * 1.0005;
    let affordable: f64 = cash_after_aaa / 1.001;
    let bbb_volume = ((affordable / bbb_buy_price / 100.0).floor() * 100.0) as i64;
    assert_eq!(bbb_volume, 24_900);
    let bbb_amount = bbb_buy_price * bbb_volume as f64;
    let cash_after_day2 = cash_after_aaa - bbb_amount * 1.001;

    assert_eq!(run.trades.len(), 4);
    assert_eq!(run.trades[0].ts_code, "AAA");
    assert_eq!(run.trades[0].side, TradeSide::Buy);
    assert_eq!(run.trades[0].volume, 50_000);
    assert_eq!(run.trades[1].ts_code, "BBB");
    assert_eq!(run.trades[1].volume, bbb_volume);
    assert!((run.trades[1].cash_after - cash_after_day2).abs() < 1e-6);

    // Day 2 NAV marks both positions at the raw close.
    let day2_equity = cash_after_day2 + 50_000.0 * 10.0 + bbb_volume as f64 * 20.0;
    assert!((run.navs[0].total_equity - day2_equity).abs() < 1e-6);

    // Day 3: BBB has no bar, so it contributes zero to the snapshot and
    // cannot be traded; AAA's rebalanced target matches its holding.
    let day3_equity = cash_after_day2 + 50_000.0 * 11.0;
    assert!((run.navs[1].total_equity - day3_equity).abs() < 1e-6);

    // Day 4: the AAA top-up is unaffordable and is dropped; BBB exits.
    let bbb_sell_price = 18.0 * 0.9995;
    let bbb_sell_amount = bbb_sell_price * bbb_volume as f64;
    let cash_after_day4 = cash_after_day2 + bbb_sell_amount * 0.999;
    assert_eq!(run.trades[2].ts_code, "BBB");
    assert_eq!(run.trades[2].side, TradeSide::Sell);
    assert!((run.trades[2].cash_after - cash_after_day4).abs() < 1e-6);
    let day4_equity = cash_after_day4 + 50_000.0 * 12.0;
    assert!((run.navs[2].total_equity - day4_equity).abs() < 1e-6);

    // Day 5: full AAA exit.
    let aaa_sell_price = 12.0 * 0.9995;
    let final_cash = cash_after_day4 + aaa_sell_price * 50_000.0 * 0.999;
    assert_eq!(run.trades[3].ts_code, "AAA");
    assert_eq!(run.trades[3].volume, 50_000);
    assert!((run.navs[3].total_equity - final_cash).abs() < 1e-6);
    assert!((run.metrics.final_equity - final_cash).abs() < 1e-3);

    // One winning AAA round trip, one losing BBB round trip.
    assert!((run.metrics.win_rate - 0.5).abs() < 1e-9);
    assert!(run.metrics.profit_loss_ratio > 0.0);
    assert_eq!(run.metrics.trade_count, 4);

    for nav in &run.navs {
        assert!(nav.cash >= 0.0);
    }
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last().copied(), Some(100));
}

#[test]
fn equity_curve_serializes_with_dates_and_navs() {
    let klines = vec![kline("AAA", 2, 10.0), kline("AAA", 3, 11.0)];
    let signals = SignalProvider::from_predict_rows(vec![
        signal_row("AAA", 2, 0.9),
        signal_row("AAA", 3, 0.9),
    ]);

    let mut raw = task();
    raw.symbol_list = Some("AAA".to_string());
    raw.commission_rate = 0.0;
    raw.slippage_bp = 0.0;
    let config = BacktestConfig::from_task(&raw).unwrap();

    let run = BacktestEngine::new(config)
        .run(&klines, &signals, |_| Ok(()))
        .unwrap();

    let value = serde_json::to_value(&run.metrics.equity_curve).unwrap();
    let points = value.as_array().unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0]["date"], "2023-01-02");
    assert!(points[1]["nav"].as_f64().unwrap() > 1.0);
}
