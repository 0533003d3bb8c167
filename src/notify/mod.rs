// src/notify/mod.rs
//! Outbound delivery of the daily digest.

pub mod email;

pub use email::EmailSender;
