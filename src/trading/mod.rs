// src/trading/mod.rs

//! Signal generation, position sizing and order routing.

pub mod desk;
pub mod risk_manager;
pub mod signal_generator;

pub use desk::{PendingConfirmation, Routing, TradingDesk};
pub use risk_manager::{RiskManager, RiskParams, RiskSummary};
pub use signal_generator::SignalGenerator;
