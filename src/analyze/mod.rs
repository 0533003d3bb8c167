// src/analyze/mod.rs
//! Listing analysis. Currently a single concern: how plum is it.

pub mod color;

pub use color::ColorAnalyzer;
