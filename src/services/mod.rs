// src/services/mod.rs
//! Remote collaborators and the background coordinator.

pub mod helper_client;
pub mod orchestrator;
