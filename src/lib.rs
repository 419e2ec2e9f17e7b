// ===============================
// src/lib.rs
// ===============================
pub mod domain;
pub mod config;
pub mod metrics;
pub mod recorder;

// core
pub mod positions;
pub mod risk;
pub mod registry;
pub mod strategy;
pub mod coordinator;
pub mod engine;

// collaborators
pub mod feed;
pub mod gateway;          // VenueGateway + simulated venue
pub mod binance;          // helper (signer/types) for Binance
pub mod gateway_binance;  // real Binance Spot (REST + User Data Stream)
