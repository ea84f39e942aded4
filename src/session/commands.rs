//! Command gateway: the mutating operations exposed to the controls panel.
//!
//! Every operation is asynchronous, single-flight per kind, and applies only
//! confirmed state from the backend response — no optimistic flips, since
//! start/stop/square-off have real-world side effects.

use crate::session::api::{
    ApiError, BackendErrorKind, BotBackend, CommandResponse, StateSnapshotMsg,
};
use crate::session::gates::ControlGates;
use crate::session::store::{SessionStore, StatePatch};
use crate::session::types::{
    index_meta, ConfigPatch, Position, TradingMode, SUPPORTED_TIMEFRAMES,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// One slot per operation kind; doubles as the UI's loading flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Start,
    Stop,
    SquareOff,
    Mode,
    TradingEnabled,
    Config,
    SelectedIndex,
    Timeframe,
}

const KIND_COUNT: usize = 8;

impl CommandKind {
    fn index(self) -> usize {
        match self {
            CommandKind::Start => 0,
            CommandKind::Stop => 1,
            CommandKind::SquareOff => 2,
            CommandKind::Mode => 3,
            CommandKind::TradingEnabled => 4,
            CommandKind::Config => 5,
            CommandKind::SelectedIndex => 6,
            CommandKind::Timeframe => 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Start => "start",
            CommandKind::Stop => "stop",
            CommandKind::SquareOff => "squareoff",
            CommandKind::Mode => "mode",
            CommandKind::TradingEnabled => "trading_enabled",
            CommandKind::Config => "config",
            CommandKind::SelectedIndex => "selected_index",
            CommandKind::Timeframe => "timeframe",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    /// A request of the same kind is still outstanding. Caller error, not a
    /// queueing mechanism; no backend call is made.
    #[error("{0} request already in flight")]
    Busy(CommandKind),

    /// Control gate violated locally; never dispatched.
    #[error("rejected locally: {0}")]
    Validation(&'static str),

    /// Backend refused the command (its gates are authoritative).
    #[error("backend rejected: {0}")]
    Backend(BackendErrorKind),

    #[error("network failure: {0}")]
    Network(#[from] ApiError),

    /// The request timed out after the action may have taken effect. State
    /// has been re-fetched; do not retry until the snapshot is verified.
    #[error("outcome unknown: request timed out after dispatch")]
    Ambiguous,
}

struct InFlight {
    flags: [AtomicBool; KIND_COUNT],
}

impl InFlight {
    fn new() -> Self {
        Self {
            flags: std::array::from_fn(|_| AtomicBool::new(false)),
        }
    }

    fn begin(&self, kind: CommandKind) -> Result<InFlightGuard<'_>, CommandError> {
        if self.flags[kind.index()].swap(true, Ordering::AcqRel) {
            return Err(CommandError::Busy(kind));
        }
        Ok(InFlightGuard {
            flag: &self.flags[kind.index()],
        })
    }

    fn is_set(&self, kind: CommandKind) -> bool {
        self.flags[kind.index()].load(Ordering::Acquire)
    }
}

/// Clears the in-flight flag on drop, so it resets on success, failure and
/// panic alike.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct CommandGateway<B: BotBackend> {
    store: Arc<SessionStore>,
    backend: B,
    inflight: InFlight,
}

impl<B: BotBackend> CommandGateway<B> {
    pub fn new(store: Arc<SessionStore>, backend: B) -> Self {
        Self {
            store,
            backend,
            inflight: InFlight::new(),
        }
    }

    /// Loading flag for one operation kind.
    pub fn in_flight(&self, kind: CommandKind) -> bool {
        self.inflight.is_set(kind)
    }

    pub async fn gates(&self) -> ControlGates {
        ControlGates::evaluate(&self.store.snapshot().await)
    }

    /// Ask the backend to begin trading. `is_running` flips only after the
    /// confirmed status lands.
    pub async fn start_bot(&self) -> Result<(), CommandError> {
        let _guard = self.inflight.begin(CommandKind::Start)?;
        let resp = self.backend.start().await?;
        self.absorb(resp).await
    }

    pub async fn stop_bot(&self) -> Result<(), CommandError> {
        let _guard = self.inflight.begin(CommandKind::Stop)?;
        let resp = self.backend.stop().await?;
        self.absorb(resp).await
    }

    /// Force-close the open position. Destructive and irreversible: a
    /// timeout is never retried automatically; the state is re-fetched and
    /// the caller must verify the position before acting again.
    pub async fn square_off(&self) -> Result<(), CommandError> {
        let _guard = self.inflight.begin(CommandKind::SquareOff)?;
        if !self.store.snapshot().await.position.is_open() {
            return Err(CommandError::Validation("no open position to square off"));
        }
        match self.backend.square_off().await {
            Ok(resp) => self.absorb(resp).await,
            Err(ApiError::Timeout) => {
                if let Err(err) = self.resync().await {
                    warn!(err = %err, "state re-fetch after ambiguous square-off failed");
                }
                Err(CommandError::Ambiguous)
            }
            Err(err) => Err(CommandError::Network(err)),
        }
    }

    /// Switch paper/live. Blocked while a position is open; the backend
    /// re-validates in case the local gate is stale.
    pub async fn set_mode(&self, mode: TradingMode) -> Result<(), CommandError> {
        let _guard = self.inflight.begin(CommandKind::Mode)?;
        if !self.gates().await.can_change_mode {
            return Err(CommandError::Validation(
                "close the position before switching mode",
            ));
        }
        let resp = self.backend.set_mode(mode).await?;
        self.absorb(resp).await
    }

    /// Merge a partial config update. A patch limited to `trading_enabled`
    /// bypasses the settings lock (the emergency brake must always work);
    /// anything else requires the bot stopped and the book flat.
    pub async fn update_config(&self, patch: ConfigPatch) -> Result<(), CommandError> {
        if patch.is_empty() {
            return Ok(());
        }
        let kind = if patch.only_trading_enabled() {
            CommandKind::TradingEnabled
        } else {
            CommandKind::Config
        };
        let _guard = self.inflight.begin(kind)?;
        if kind == CommandKind::Config && !self.gates().await.can_change_settings {
            return Err(CommandError::Validation(
                "settings are locked while running or holding a position",
            ));
        }
        let resp = self.backend.update_config(&patch).await?;
        self.absorb(resp).await
    }

    pub async fn set_selected_index(&self, name: &str) -> Result<(), CommandError> {
        let _guard = self.inflight.begin(CommandKind::SelectedIndex)?;
        if index_meta(name).is_none() {
            return Err(CommandError::Validation("unknown index"));
        }
        if !self.gates().await.can_change_settings {
            return Err(CommandError::Validation(
                "settings are locked while running or holding a position",
            ));
        }
        let patch = ConfigPatch {
            selected_index: Some(name.to_string()),
            ..ConfigPatch::default()
        };
        let resp = self.backend.update_config(&patch).await?;
        self.absorb(resp).await
    }

    pub async fn set_timeframe(&self, seconds: u32) -> Result<(), CommandError> {
        let _guard = self.inflight.begin(CommandKind::Timeframe)?;
        if !SUPPORTED_TIMEFRAMES.contains(&seconds) {
            return Err(CommandError::Validation("unsupported candle interval"));
        }
        if !self.gates().await.can_change_settings {
            return Err(CommandError::Validation(
                "settings are locked while running or holding a position",
            ));
        }
        let patch = ConfigPatch {
            candle_interval: Some(seconds),
            ..ConfigPatch::default()
        };
        let resp = self.backend.update_config(&patch).await?;
        self.absorb(resp).await
    }

    /// Re-fetch the full backend snapshot and reconcile the store. Used at
    /// startup and after an ambiguous outcome.
    pub async fn resync(&self) -> Result<(), ApiError> {
        let snap = self.backend.fetch_snapshot().await?;
        apply_snapshot(&self.store, snap).await;
        Ok(())
    }

    /// Fold a confirmed command response into the store.
    async fn absorb(&self, resp: CommandResponse) -> Result<(), CommandError> {
        if !resp.success {
            let kind = resp
                .error_kind()
                .unwrap_or_else(|| BackendErrorKind::Other("unspecified".to_string()));
            return Err(CommandError::Backend(kind));
        }
        if let Some(status) = resp.status {
            self.store.apply(StatePatch::Status(status)).await;
        }
        if let Some(config) = resp.config {
            self.store.apply(StatePatch::Config(config)).await;
        }
        if let Some(msg) = resp.position {
            match Position::try_from(msg) {
                Ok(position) => self.store.apply(StatePatch::Position(position)).await,
                Err(err) => warn!(err = %err, "dropping malformed position in command response"),
            }
        }
        Ok(())
    }
}

/// Apply a full backend snapshot to the store, slice by slice.
pub async fn apply_snapshot(store: &Arc<SessionStore>, snap: StateSnapshotMsg) {
    if let Some(status) = snap.status {
        store.apply(StatePatch::Status(status)).await;
    }
    if let Some(config) = snap.config {
        store.apply(StatePatch::Config(config)).await;
    }
    if let Some(summary) = snap.summary {
        store.apply(StatePatch::Summary(summary)).await;
    }
    if let Some(msg) = snap.position {
        match Position::try_from(msg) {
            Ok(position) => store.apply(StatePatch::Position(position)).await,
            Err(err) => warn!(err = %err, "dropping malformed position in state snapshot"),
        }
    }
    if let Some(ltp) = snap.ltp {
        store.apply_tick(ltp).await;
    }
    for candle in snap.candles {
        store.apply(StatePatch::Candle(candle)).await;
    }
}
