// src/detector/mod.rs

//! # Opportunity Detection
//!
//! Per-chain price books, whale flow tracking and the scanning engine that
//! turns market events into published opportunities.

pub mod engine;
pub mod price_book;
pub mod whale;

pub use engine::DetectorEngine;
pub use price_book::{ApplyOutcome, PriceBook};
pub use whale::WhaleTracker;
