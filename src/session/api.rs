//! Typed client for the bot backend's REST endpoints.
//!
//! The gateway talks to the backend through the [`BotBackend`] trait so the
//! command logic can be exercised against a stub in tests; [`BotApi`] is the
//! real reqwest-based implementation.

use crate::session::types::{
    BotConfig, BotStatus, Candle, ConfigPatch, DailySummary, PositionMsg, TradingMode,
};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid backend url: {0}")]
    Url(#[from] url::ParseError),

    #[error("request failed: {0}")]
    Http(reqwest::Error),

    #[error("request timed out")]
    Timeout,
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Http(err)
        }
    }
}

/// Machine-readable rejection codes returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendErrorKind {
    BotAlreadyRunning,
    BotNotRunning,
    PositionOpen,
    SettingsLocked,
    NoOpenPosition,
    Other(String),
}

impl BackendErrorKind {
    pub fn from_code(code: &str) -> Self {
        match code {
            "bot_already_running" => Self::BotAlreadyRunning,
            "bot_not_running" => Self::BotNotRunning,
            "position_open" => Self::PositionOpen,
            "settings_locked" => Self::SettingsLocked,
            "no_open_position" => Self::NoOpenPosition,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BotAlreadyRunning => write!(f, "bot already running"),
            Self::BotNotRunning => write!(f, "bot not running"),
            Self::PositionOpen => write!(f, "position open"),
            Self::SettingsLocked => write!(f, "settings locked"),
            Self::NoOpenPosition => write!(f, "no open position"),
            Self::Other(code) => write!(f, "{code}"),
        }
    }
}

/// Response shape shared by all control endpoints. On success the backend
/// echoes the confirmed slices it changed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub status: Option<BotStatus>,
    #[serde(default)]
    pub config: Option<BotConfig>,
    #[serde(default)]
    pub position: Option<PositionMsg>,
}

impl CommandResponse {
    pub fn error_kind(&self) -> Option<BackendErrorKind> {
        self.error.as_deref().map(BackendErrorKind::from_code)
    }
}

/// Full state snapshot from `GET state`, used for the initial fetch and for
/// reconciliation after an ambiguous outcome.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateSnapshotMsg {
    #[serde(default)]
    pub status: Option<BotStatus>,
    #[serde(default)]
    pub position: Option<PositionMsg>,
    #[serde(default)]
    pub config: Option<BotConfig>,
    #[serde(default)]
    pub summary: Option<DailySummary>,
    #[serde(default)]
    pub ltp: Option<f64>,
    #[serde(default)]
    pub candles: Vec<Candle>,
}

/// Seam between the command gateway and the backend transport.
pub trait BotBackend: Send + Sync {
    fn start(&self) -> impl Future<Output = Result<CommandResponse, ApiError>> + Send;
    fn stop(&self) -> impl Future<Output = Result<CommandResponse, ApiError>> + Send;
    fn square_off(&self) -> impl Future<Output = Result<CommandResponse, ApiError>> + Send;
    fn set_mode(
        &self,
        mode: TradingMode,
    ) -> impl Future<Output = Result<CommandResponse, ApiError>> + Send;
    fn update_config(
        &self,
        patch: &ConfigPatch,
    ) -> impl Future<Output = Result<CommandResponse, ApiError>> + Send;
    fn fetch_snapshot(&self) -> impl Future<Output = Result<StateSnapshotMsg, ApiError>> + Send;
}

#[derive(Clone)]
pub struct BotApi {
    http: reqwest::Client,
    base_url: Url,
}

impl BotApi {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)?;
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(ApiError::Http)?;
        Ok(Self { http, base_url })
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<CommandResponse, ApiError> {
        let url = self.base_url.join(path)?;
        let resp = self.http.post(url).json(body).send().await?;
        // Rejections arrive as non-2xx with the same body shape; decode
        // rather than bailing on status so the error code survives.
        Ok(resp.json().await?)
    }
}

impl BotBackend for BotApi {
    async fn start(&self) -> Result<CommandResponse, ApiError> {
        self.post("api/bot/start", &json!({})).await
    }

    async fn stop(&self) -> Result<CommandResponse, ApiError> {
        self.post("api/bot/stop", &json!({})).await
    }

    async fn square_off(&self) -> Result<CommandResponse, ApiError> {
        self.post("api/bot/square-off", &json!({})).await
    }

    async fn set_mode(&self, mode: TradingMode) -> Result<CommandResponse, ApiError> {
        self.post("api/bot/mode", &json!({ "mode": mode })).await
    }

    async fn update_config(&self, patch: &ConfigPatch) -> Result<CommandResponse, ApiError> {
        self.post("api/config", patch).await
    }

    async fn fetch_snapshot(&self) -> Result<StateSnapshotMsg, ApiError> {
        let url = self.base_url.join("api/state")?;
        let resp = self.http.get(url).send().await?;
        let resp = resp.error_for_status().map_err(ApiError::from)?;
        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_maps_known_codes() {
        assert_eq!(
            BackendErrorKind::from_code("bot_already_running"),
            BackendErrorKind::BotAlreadyRunning
        );
        assert_eq!(
            BackendErrorKind::from_code("settings_locked"),
            BackendErrorKind::SettingsLocked
        );
        assert_eq!(
            BackendErrorKind::from_code("daily_stop_active"),
            BackendErrorKind::Other("daily_stop_active".to_string())
        );
    }

    #[test]
    fn command_response_decodes_rejection() {
        let resp: CommandResponse =
            serde_json::from_str(r#"{"success": false, "error": "position_open"}"#).unwrap();
        assert!(!resp.success);
        assert_eq!(resp.error_kind(), Some(BackendErrorKind::PositionOpen));
    }

    #[test]
    fn command_response_decodes_confirmed_status() {
        let resp: CommandResponse = serde_json::from_str(
            r#"{"success": true, "status": {"is_running": true, "mode": "paper"}}"#,
        )
        .unwrap();
        assert!(resp.success);
        assert!(resp.status.unwrap().is_running);
    }

    #[test]
    fn snapshot_msg_tolerates_partial_payloads() {
        let snap: StateSnapshotMsg =
            serde_json::from_str(r#"{"status": {"is_running": false}}"#).unwrap();
        assert!(snap.status.is_some());
        assert!(snap.position.is_none());
        assert!(snap.candles.is_empty());
    }
}
