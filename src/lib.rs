pub mod backtester;
pub mod commands;
pub mod config;
pub mod context;
pub mod database;
pub mod engine;
pub mod error;
pub mod execution;
pub mod kline_utils;
pub mod model;
pub mod models;
pub mod performance;
pub mod portfolio;
mod retry;
pub mod signals;
pub mod trading_rules;
