//! OI Writer Library
//!
//! Open-interest driven short-option writing engine for NSE index options

pub mod broker;
pub mod config;
pub mod engine;
pub mod error;
pub mod market_data;
pub mod oi_tracker;
pub mod persistence;
pub mod risk;
pub mod trade;
pub mod types;
