//! Control gate evaluator: pure derivation of which commands are currently
//! permitted, from a session snapshot.
//!
//! The gates are advisory UI-level checks; the command gateway re-validates
//! before dispatch and the backend is authoritative.

use crate::session::store::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlGates {
    /// Paper/live switching is blocked while a position is open.
    pub can_change_mode: bool,
    /// Index/timeframe/config changes are blocked while the strategy loop
    /// runs or a position is open. The trading-enabled toggle is exempt.
    pub can_change_settings: bool,
}

impl ControlGates {
    pub fn evaluate(state: &SessionState) -> Self {
        let holding = state.position.is_open();
        Self {
            can_change_mode: !holding,
            can_change_settings: !state.bot_status.is_running && !holding,
        }
    }
}
