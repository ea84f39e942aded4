//! Trading session state synchronizer.
//!
//! Owns the dashboard's view of the bot: status, position, config, daily
//! summary, live market data and candle history. The stream ingestor and the
//! command gateway are the only writers; everything else reads immutable
//! snapshots.

pub mod api;
pub mod commands;
pub mod gates;
pub mod ingest;
pub mod store;
pub mod types;

pub use commands::{CommandError, CommandGateway, CommandKind};
pub use gates::ControlGates;
pub use store::{SessionState, SessionStore, StatePatch};
pub use types::{BotConfig, BotStatus, Candle, ConfigPatch, DailySummary, Position, TradingMode};
