//! Data model shared between the stream ingestor, the command gateway and
//! the presentational readers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Trading mode (paper vs live)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Paper,
    Live,
}

impl Default for TradingMode {
    fn default() -> Self {
        TradingMode::Paper
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Paper => write!(f, "paper"),
            TradingMode::Live => write!(f, "live"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    Open,
    Closed,
}

impl Default for MarketStatus {
    fn default() -> Self {
        MarketStatus::Closed
    }
}

/// Option leg side. CE tracks upward signals, PE downward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionSide {
    #[serde(rename = "CE")]
    Ce,
    #[serde(rename = "PE")]
    Pe,
}

impl std::fmt::Display for OptionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionSide::Ce => write!(f, "CE"),
            OptionSide::Pe => write!(f, "PE"),
        }
    }
}

/// Direction reported by the bot's MDS scoring indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalDirection {
    #[serde(rename = "CE")]
    Ce,
    #[serde(rename = "PE")]
    Pe,
    #[serde(rename = "NONE")]
    None,
}

impl Default for SignalDirection {
    fn default() -> Self {
        SignalDirection::None
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketDetails {
    pub current_time_ist: String,
}

/// Bot status snapshot. Mutated only by confirmed server snapshots, never
/// guessed locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotStatus {
    #[serde(default)]
    pub is_running: bool,
    #[serde(default)]
    pub mode: TradingMode,
    #[serde(default = "default_true")]
    pub trading_enabled: bool,
    #[serde(default = "default_interval")]
    pub candle_interval: u32,
    #[serde(default)]
    pub market_status: MarketStatus,
    #[serde(default)]
    pub market_details: Option<MarketDetails>,
    #[serde(default)]
    pub mds_score: f64,
    #[serde(default)]
    pub mds_confidence: f64,
    #[serde(default)]
    pub mds_is_choppy: bool,
    #[serde(default)]
    pub mds_direction: SignalDirection,
}

impl Default for BotStatus {
    fn default() -> Self {
        Self {
            is_running: false,
            mode: TradingMode::Paper,
            trading_enabled: true,
            candle_interval: 5,
            market_status: MarketStatus::Closed,
            market_details: None,
            mds_score: 0.0,
            mds_confidence: 0.0,
            mds_is_choppy: false,
            mds_direction: SignalDirection::None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u32 {
    5
}

/// An open option position with all fields present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub option_type: OptionSide,
    pub strike: f64,
    pub expiry: NaiveDate,
    pub entry_price: f64,
    pub current_ltp: f64,
    pub unrealized_pnl: f64,
    pub trailing_sl: Option<f64>,
    pub qty: f64,
    pub index_name: String,
}

/// Current position. `Open` carries every price/qty field, so a reader can
/// never see a half-populated position.
#[derive(Debug, Clone, PartialEq)]
pub enum Position {
    Flat,
    Open(OpenPosition),
}

impl Position {
    pub fn is_open(&self) -> bool {
        matches!(self, Position::Open(_))
    }

    pub fn open(&self) -> Option<&OpenPosition> {
        match self {
            Position::Open(p) => Some(p),
            Position::Flat => None,
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Position::Flat
    }
}

/// Position as the backend serializes it: a `has_position` flag plus
/// optional fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PositionMsg {
    #[serde(default)]
    pub has_position: bool,
    #[serde(default)]
    pub option_type: Option<OptionSide>,
    #[serde(default)]
    pub strike: Option<f64>,
    #[serde(default)]
    pub expiry: Option<NaiveDate>,
    #[serde(default)]
    pub entry_price: Option<f64>,
    #[serde(default)]
    pub current_ltp: Option<f64>,
    #[serde(default)]
    pub unrealized_pnl: Option<f64>,
    #[serde(default)]
    pub trailing_sl: Option<f64>,
    #[serde(default)]
    pub qty: Option<f64>,
    #[serde(default)]
    pub index_name: Option<String>,
}

impl TryFrom<PositionMsg> for Position {
    type Error = anyhow::Error;

    fn try_from(msg: PositionMsg) -> Result<Self, Self::Error> {
        if !msg.has_position {
            return Ok(Position::Flat);
        }
        let option_type = msg
            .option_type
            .ok_or_else(|| anyhow::anyhow!("open position missing option_type"))?;
        let strike = msg
            .strike
            .ok_or_else(|| anyhow::anyhow!("open position missing strike"))?;
        let expiry = msg
            .expiry
            .ok_or_else(|| anyhow::anyhow!("open position missing expiry"))?;
        let entry_price = msg
            .entry_price
            .ok_or_else(|| anyhow::anyhow!("open position missing entry_price"))?;
        let current_ltp = msg.current_ltp.unwrap_or(entry_price);
        if entry_price < 0.0 || current_ltp < 0.0 || strike < 0.0 {
            anyhow::bail!("open position has negative price fields");
        }
        let qty = msg.qty.unwrap_or(0.0);
        if qty < 0.0 {
            anyhow::bail!("open position has negative qty");
        }
        Ok(Position::Open(OpenPosition {
            option_type,
            strike,
            expiry,
            entry_price,
            current_ltp,
            unrealized_pnl: msg.unrealized_pnl.unwrap_or(0.0),
            trailing_sl: msg.trailing_sl,
            qty,
            index_name: msg.index_name.unwrap_or_default(),
        }))
    }
}

/// Bot working configuration. Mutated only through the command gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    pub selected_index: String,
    pub candle_interval: u32,
    pub trading_enabled: bool,
    pub daily_max_loss: f64,
    pub max_trades_per_day: u32,
    pub order_qty: u32,
    pub lot_size: u32,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            selected_index: "NIFTY".to_string(),
            candle_interval: 5,
            trading_enabled: true,
            daily_max_loss: 2000.0,
            max_trades_per_day: 5,
            order_qty: 1,
            lot_size: 75,
        }
    }
}

/// Partial config update sent to `POST config`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_index: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candle_interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trading_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_max_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_trades_per_day: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_qty: Option<u32>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        self.selected_index.is_none()
            && self.candle_interval.is_none()
            && self.trading_enabled.is_none()
            && self.daily_max_loss.is_none()
            && self.max_trades_per_day.is_none()
            && self.order_qty.is_none()
    }

    /// True when the patch touches `trading_enabled` and nothing else. Such
    /// patches bypass the settings lock: pausing entries must work while the
    /// bot is running or holding.
    pub fn only_trading_enabled(&self) -> bool {
        self.trading_enabled.is_some()
            && self.selected_index.is_none()
            && self.candle_interval.is_none()
            && self.daily_max_loss.is_none()
            && self.max_trades_per_day.is_none()
            && self.order_qty.is_none()
    }

    pub fn trading_enabled(value: bool) -> Self {
        Self {
            trading_enabled: Some(value),
            ..Self::default()
        }
    }
}

/// Daily trading summary, refreshed by the stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    #[serde(default)]
    pub total_pnl: f64,
    #[serde(default)]
    pub total_trades: u32,
    #[serde(default)]
    pub max_drawdown: f64,
    #[serde(default)]
    pub daily_stop_triggered: bool,
}

/// Live index data. `ltp == 0.0` means no tick has arrived yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub ltp: f64,
}

/// One point of the index price chart, keyed by candle open time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub price: f64,
}

/// Transient price-flash direction for the LTP display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryType {
    Weekly,
    Monthly,
}

/// Static index catalog. Not mutated by the session.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct IndexMeta {
    pub name: &'static str,
    pub lot_size: u32,
    pub expiry_type: ExpiryType,
    /// Weekday of expiry, 0 = Monday .. 6 = Sunday.
    pub expiry_day: u8,
}

pub const INDEX_CATALOG: &[IndexMeta] = &[
    IndexMeta {
        name: "NIFTY",
        lot_size: 75,
        expiry_type: ExpiryType::Weekly,
        expiry_day: 1,
    },
    IndexMeta {
        name: "BANKNIFTY",
        lot_size: 35,
        expiry_type: ExpiryType::Monthly,
        expiry_day: 1,
    },
    IndexMeta {
        name: "FINNIFTY",
        lot_size: 65,
        expiry_type: ExpiryType::Monthly,
        expiry_day: 1,
    },
    IndexMeta {
        name: "MIDCPNIFTY",
        lot_size: 120,
        expiry_type: ExpiryType::Monthly,
        expiry_day: 1,
    },
    IndexMeta {
        name: "SENSEX",
        lot_size: 20,
        expiry_type: ExpiryType::Weekly,
        expiry_day: 1,
    },
];

/// Candle intervals the market-data service builds, in seconds.
pub const SUPPORTED_TIMEFRAMES: &[u32] = &[5, 15, 30, 60, 300, 900];

pub fn index_meta(name: &str) -> Option<&'static IndexMeta> {
    INDEX_CATALOG.iter().find(|m| m.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_msg_flat_ignores_stray_fields() {
        let msg = PositionMsg {
            has_position: false,
            entry_price: Some(112.5),
            ..PositionMsg::default()
        };
        assert_eq!(Position::try_from(msg).unwrap(), Position::Flat);
    }

    #[test]
    fn position_msg_open_requires_core_fields() {
        let msg = PositionMsg {
            has_position: true,
            option_type: Some(OptionSide::Ce),
            strike: Some(24500.0),
            ..PositionMsg::default()
        };
        assert!(Position::try_from(msg).is_err());
    }

    #[test]
    fn position_msg_open_converts() {
        let msg: PositionMsg = serde_json::from_str(
            r#"{
                "has_position": true,
                "option_type": "PE",
                "strike": 24500,
                "expiry": "2026-08-27",
                "entry_price": 118.4,
                "current_ltp": 121.0,
                "unrealized_pnl": 195.0,
                "qty": 75,
                "index_name": "NIFTY"
            }"#,
        )
        .unwrap();
        let pos = Position::try_from(msg).unwrap();
        let open = pos.open().unwrap();
        assert_eq!(open.option_type, OptionSide::Pe);
        assert_eq!(open.expiry, NaiveDate::from_ymd_opt(2026, 8, 27).unwrap());
        assert!(open.trailing_sl.is_none());
    }

    #[test]
    fn position_msg_rejects_negative_prices() {
        let msg = PositionMsg {
            has_position: true,
            option_type: Some(OptionSide::Ce),
            strike: Some(24500.0),
            expiry: NaiveDate::from_ymd_opt(2026, 8, 27),
            entry_price: Some(-1.0),
            ..PositionMsg::default()
        };
        assert!(Position::try_from(msg).is_err());
    }

    #[test]
    fn config_patch_predicates() {
        assert!(ConfigPatch::default().is_empty());
        let toggle = ConfigPatch::trading_enabled(false);
        assert!(toggle.only_trading_enabled());
        let mixed = ConfigPatch {
            trading_enabled: Some(false),
            candle_interval: Some(60),
            ..ConfigPatch::default()
        };
        assert!(!mixed.only_trading_enabled());
        assert!(!mixed.is_empty());
    }

    #[test]
    fn status_defaults_fill_missing_fields() {
        let status: BotStatus =
            serde_json::from_str(r#"{"is_running": true, "mode": "live"}"#).unwrap();
        assert!(status.is_running);
        assert_eq!(status.mode, TradingMode::Live);
        assert!(status.trading_enabled);
        assert_eq!(status.candle_interval, 5);
        assert_eq!(status.mds_direction, SignalDirection::None);
    }

    #[test]
    fn index_catalog_lookup() {
        assert_eq!(index_meta("NIFTY").unwrap().lot_size, 75);
        assert!(index_meta("DAX").is_none());
    }
}
