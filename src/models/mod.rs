// src/models/mod.rs
//! Data structures shared across the wallet core.

pub mod card;
pub mod token;
