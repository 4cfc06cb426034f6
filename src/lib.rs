// src/lib.rs

// Modules du moteur multi-portefeuilles, utilisés par les outils de src/bin.
pub mod config;
pub mod constants;
pub mod error;
pub mod execution;
pub mod monitoring;
pub mod orchestration;
pub mod rpc;
pub mod state;
pub mod toolkit;
pub mod wallet;

pub use error::EngineError;
