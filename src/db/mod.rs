//! Persistent record store: target and history models plus the SQLite
//! implementation behind them.

mod models;
mod store;

pub use models::*;
pub use store::*;
