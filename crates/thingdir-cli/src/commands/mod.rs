//! Command handlers

pub mod config;
pub mod serve;
pub mod things;
