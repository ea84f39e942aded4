//! Session state store: the single authoritative holder of the data model.
//!
//! All writers (stream ingestor, command gateway) serialize through
//! [`SessionStore::apply`]; readers clone a snapshot under the read guard and
//! can never observe a partially applied update.

use crate::session::types::{
    BotConfig, BotStatus, Candle, DailySummary, FlashDirection, MarketData, Position,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// How long a price flash stays visible before the scheduled reset clears it.
pub const FLASH_DURATION: Duration = Duration::from_millis(300);

/// Full session state as observed by readers.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub bot_status: BotStatus,
    pub position: Position,
    pub config: BotConfig,
    pub summary: DailySummary,
    pub market_data: MarketData,
    pub candle_history: Vec<Candle>,
    pub ws_connected: bool,
    /// Transient flash for the LTP display, cleared by a scheduled reset.
    pub flash: Option<FlashDirection>,
    /// Bumped on every new flash; a pending reset only fires if its sequence
    /// still matches, so a burst of ticks replaces the timer instead of
    /// flickering.
    pub flash_seq: u64,
}

/// Mutations accepted by the store. Each variant replaces or merges one
/// slice of state atomically.
#[derive(Debug, Clone)]
pub enum StatePatch {
    Status(BotStatus),
    Position(Position),
    Config(BotConfig),
    Summary(DailySummary),
    Candle(Candle),
    WsConnected(bool),
    /// Day/session rollover: drop candle history and reset the daily summary.
    SessionRollover,
    /// Scheduled flash reset; ignored unless `seq` is still current.
    FlashExpired { seq: u64 },
}

pub struct SessionStore {
    state: RwLock<SessionState>,
}

impl SessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(SessionState::default()),
        })
    }

    /// Immutable snapshot of the current state.
    pub async fn snapshot(&self) -> SessionState {
        self.state.read().await.clone()
    }

    /// Apply a single mutation. The only write path into the state.
    pub async fn apply(&self, patch: StatePatch) {
        let mut guard = self.state.write().await;
        match patch {
            StatePatch::Status(status) => guard.bot_status = status,
            StatePatch::Position(position) => guard.position = position,
            StatePatch::Config(config) => guard.config = config,
            StatePatch::Summary(summary) => guard.summary = summary,
            StatePatch::Candle(candle) => upsert_candle(&mut guard.candle_history, candle),
            StatePatch::WsConnected(connected) => guard.ws_connected = connected,
            StatePatch::SessionRollover => {
                guard.candle_history.clear();
                guard.summary = DailySummary::default();
            }
            StatePatch::FlashExpired { seq } => {
                if guard.flash_seq == seq {
                    guard.flash = None;
                }
            }
        }
    }

    /// Apply an incoming tick: update the LTP and, when the price moved,
    /// raise a flash and schedule its reset.
    pub async fn apply_tick(self: &Arc<Self>, ltp: f64) {
        let flash_seq = {
            let mut guard = self.state.write().await;
            let prev = guard.market_data.ltp;
            guard.market_data.ltp = ltp;

            let direction = if prev <= 0.0 || ltp == prev {
                None
            } else if ltp > prev {
                Some(FlashDirection::Up)
            } else {
                Some(FlashDirection::Down)
            };
            match direction {
                Some(dir) => {
                    guard.flash = Some(dir);
                    guard.flash_seq += 1;
                    Some(guard.flash_seq)
                }
                None => None,
            }
        };

        if let Some(seq) = flash_seq {
            let store = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(FLASH_DURATION).await;
                store.apply(StatePatch::FlashExpired { seq }).await;
            });
        }
    }
}

/// Merge a candle into the history, keyed by open time. Reconnect replays
/// re-deliver candles, so the same `time` overwrites in place; anything older
/// than the tail is a stale replay and is dropped.
fn upsert_candle(history: &mut Vec<Candle>, candle: Candle) {
    // Matches land at or near the tail; scan backwards.
    for existing in history.iter_mut().rev() {
        if existing.time == candle.time {
            existing.price = candle.price;
            return;
        }
        if existing.time < candle.time {
            break;
        }
    }
    match history.last() {
        Some(last) if candle.time < last.time => {}
        _ => history.push(candle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::{OpenPosition, OptionSide};
    use chrono::NaiveDate;

    fn candle(time: i64, price: f64) -> Candle {
        Candle { time, price }
    }

    #[tokio::test]
    async fn snapshot_is_detached_from_later_writes() {
        let store = SessionStore::new();
        let before = store.snapshot().await;
        store
            .apply(StatePatch::Candle(candle(1, 24510.0)))
            .await;
        assert!(before.candle_history.is_empty());
        assert_eq!(store.snapshot().await.candle_history.len(), 1);
    }

    #[tokio::test]
    async fn position_swap_is_never_torn() {
        let store = SessionStore::new();
        store
            .apply(StatePatch::Position(Position::Open(OpenPosition {
                option_type: OptionSide::Ce,
                strike: 24500.0,
                expiry: NaiveDate::from_ymd_opt(2026, 8, 27).unwrap(),
                entry_price: 110.0,
                current_ltp: 112.0,
                unrealized_pnl: 150.0,
                trailing_sl: None,
                qty: 75.0,
                index_name: "NIFTY".to_string(),
            })))
            .await;
        let snap = store.snapshot().await;
        // An open position always carries its entry price.
        let open = snap.position.open().unwrap();
        assert_eq!(open.entry_price, 110.0);
    }

    #[tokio::test(start_paused = true)]
    async fn flash_sequence_matches_tick_direction() {
        let store = SessionStore::new();
        let mut observed = Vec::new();
        for ltp in [100.0, 105.0, 105.0, 98.0] {
            store.apply_tick(ltp).await;
            observed.push(store.snapshot().await.flash);
            // Let each flash expire before the next tick.
            tokio::time::sleep(FLASH_DURATION * 2).await;
        }
        assert_eq!(
            observed,
            vec![
                None,
                Some(FlashDirection::Up),
                None,
                Some(FlashDirection::Down)
            ]
        );
        assert!(store.snapshot().await.flash.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn flash_auto_clears_after_duration() {
        let store = SessionStore::new();
        store.apply_tick(100.0).await;
        store.apply_tick(101.0).await;
        assert_eq!(store.snapshot().await.flash, Some(FlashDirection::Up));
        tokio::time::sleep(FLASH_DURATION + Duration::from_millis(10)).await;
        assert!(store.snapshot().await.flash.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_ticks_replace_pending_reset() {
        let store = SessionStore::new();
        store.apply_tick(100.0).await;
        store.apply_tick(101.0).await;
        tokio::time::sleep(FLASH_DURATION / 2).await;
        // Second flash before the first reset fires.
        store.apply_tick(102.0).await;
        // The first timer expires now but must not clear the newer flash.
        tokio::time::sleep(FLASH_DURATION / 2 + Duration::from_millis(10)).await;
        assert_eq!(store.snapshot().await.flash, Some(FlashDirection::Up));
        tokio::time::sleep(FLASH_DURATION).await;
        assert!(store.snapshot().await.flash.is_none());
    }

    #[tokio::test]
    async fn equal_tick_keeps_ltp_without_flash() {
        let store = SessionStore::new();
        store.apply_tick(100.0).await;
        store.apply_tick(100.0).await;
        let snap = store.snapshot().await;
        assert_eq!(snap.market_data.ltp, 100.0);
        assert!(snap.flash.is_none());
    }

    #[tokio::test]
    async fn duplicate_candle_time_merges() {
        let store = SessionStore::new();
        store.apply(StatePatch::Candle(candle(100, 24500.0))).await;
        store.apply(StatePatch::Candle(candle(105, 24510.0))).await;
        // Reconnect replay of the same candle with a fresher close.
        store.apply(StatePatch::Candle(candle(105, 24512.0))).await;
        let history = store.snapshot().await.candle_history;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].price, 24512.0);
    }

    #[tokio::test]
    async fn stale_replay_older_than_tail_is_dropped() {
        let store = SessionStore::new();
        store.apply(StatePatch::Candle(candle(100, 24500.0))).await;
        store.apply(StatePatch::Candle(candle(110, 24520.0))).await;
        store.apply(StatePatch::Candle(candle(90, 24480.0))).await;
        let history = store.snapshot().await.candle_history;
        assert_eq!(
            history.iter().map(|c| c.time).collect::<Vec<_>>(),
            vec![100, 110]
        );
    }

    #[tokio::test]
    async fn reconnect_appends_in_order() {
        let store = SessionStore::new();
        for t in [100, 105, 110] {
            store.apply(StatePatch::Candle(candle(t, 24500.0))).await;
        }
        // Replay of the last pre-disconnect candle, then fresh ones.
        for t in [110, 115, 120] {
            store.apply(StatePatch::Candle(candle(t, 24505.0))).await;
        }
        let times: Vec<i64> = store
            .snapshot()
            .await
            .candle_history
            .iter()
            .map(|c| c.time)
            .collect();
        assert_eq!(times, vec![100, 105, 110, 115, 120]);
    }

    #[tokio::test]
    async fn session_rollover_clears_candles_and_summary() {
        let store = SessionStore::new();
        store.apply(StatePatch::Candle(candle(100, 24500.0))).await;
        store
            .apply(StatePatch::Summary(DailySummary {
                total_pnl: -500.0,
                total_trades: 3,
                max_drawdown: 700.0,
                daily_stop_triggered: false,
            }))
            .await;
        store.apply(StatePatch::SessionRollover).await;
        let snap = store.snapshot().await;
        assert!(snap.candle_history.is_empty());
        assert_eq!(snap.summary, DailySummary::default());
    }
}
