// src/lib.rs

// 1. Data Structures (The "Nouns")
pub mod models;

// 2. Interfaces (The "Contract")
pub mod traits;

// 3. Settings and the dependency manifest
pub mod config;
pub mod settings;
pub mod manifest;

// 4. Market Analysis (The "Brains")
pub mod indicators;
pub mod analysis;
pub mod prediction;

// 5. Signals, sizing and execution
pub mod trading;

// 6. Adapters (The "Plumbing")
pub mod connectors;
pub mod data;
pub mod store;
pub mod notifier;

// 7. Scan loop (The "Orchestrator")
pub mod engine;
pub mod dashboard;
