//! NetWatch - real-time network traffic anomaly detection.
//!
//! Streaming pipeline: packet capture -> flow tracking -> multi-horizon
//! window aggregation -> rule-based detection -> alert gating -> LLM
//! enrichment -> persistence and broadcast.

pub mod broadcast;
pub mod capture;
pub mod config;
pub mod db;
pub mod engine;
pub mod llm;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod state;
