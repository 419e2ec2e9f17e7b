// ===============================
// src/binance.rs
// ===============================
//
// Helper Binance Spot: signing, konversi harga/qty ke tick/lot, dan model
// JSON (bookTicker, executionReport, order REST).
//
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::domain::{EngineEvent, Fill, OrderId, Side, VenueAck, VenueOrderId};
use crate::gateway::{GatewayError, OpenOrder, VenueOrderStatus};

pub fn timestamp_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

pub fn sign_query(secret: &str, query: &str) -> Result<String, hmac::digest::InvalidLength> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// `"25.3519"` with scale 100 -> `2535`.
pub fn to_scaled(s: &str, scale: i64) -> Option<i64> {
    let v = s.trim().parse::<f64>().ok()?;
    v.is_finite().then(|| (v * scale as f64).round() as i64)
}

pub fn from_scaled(v: i64, scale: i64) -> String {
    format!("{}", v as f64 / scale as f64)
}

pub fn side_str(side: Side) -> &'static str {
    match side {
        Side::Buy => "BUY",
        Side::Sell => "SELL",
    }
}

fn parse_side(s: &str) -> Option<Side> {
    match s {
        "BUY" => Some(Side::Buy),
        "SELL" => Some(Side::Sell),
        _ => None,
    }
}

// ---- Market data ----
// {"u":400900217,"s":"BNBUSDT","b":"25.35190000","B":"31.21000000","a":"25.36520000","A":"40.66000000"}
#[derive(Debug, Deserialize)]
pub struct BookTicker {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "b")]
    pub bid_px: String,
    #[serde(rename = "B")]
    pub bid_qty: String,
    #[serde(rename = "a")]
    pub ask_px: String,
    #[serde(rename = "A")]
    pub ask_qty: String,
}

// ---- User data stream (spot) ----
#[derive(Debug, Deserialize)]
pub struct WsEnvelope {
    #[serde(rename = "e", default)]
    pub event_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExecutionReport {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c")]
    pub client_order_id: String,
    /// Original client id, set on cancels.
    #[serde(rename = "C", default)]
    pub orig_client_order_id: String,
    #[serde(rename = "S")]
    pub side: String,
    /// NEW, CANCELED, REJECTED, TRADE, EXPIRED, ...
    #[serde(rename = "x")]
    pub exec_type: String,
    #[serde(rename = "X")]
    pub status: String,
    #[serde(rename = "r", default)]
    pub reject_reason: String,
    #[serde(rename = "i")]
    pub order_id: u64,
    #[serde(rename = "l", default)]
    pub last_qty: String,
    #[serde(rename = "L", default)]
    pub last_px: String,
    #[serde(rename = "t", default)]
    pub trade_id: i64,
    #[serde(rename = "T", default)]
    pub transact_ms: i64,
}

/// Map an executionReport into an intake event. `None` for reports the
/// engine has no use for.
pub fn map_execution_report(er: &ExecutionReport, px_scale: i64, qty_scale: i64) -> Option<EngineEvent> {
    let ts_ns = er.transact_ms as i128 * 1_000_000;
    let order_id = OrderId(er.client_order_id.clone());
    let venue_order_id = VenueOrderId(er.order_id.to_string());
    match er.exec_type.as_str() {
        "NEW" => Some(EngineEvent::Ack(VenueAck::Accepted { order_id, venue_order_id, ts_ns })),
        "REJECTED" => Some(EngineEvent::Ack(VenueAck::Rejected {
            order_id,
            reason: er.reject_reason.clone(),
            ts_ns,
        })),
        "CANCELED" | "EXPIRED" => {
            // cancel request punya client id baru; order aslinya di `C`
            let id = if er.orig_client_order_id.is_empty() { order_id } else { OrderId(er.orig_client_order_id.clone()) };
            Some(EngineEvent::Ack(VenueAck::CancelAck { order_id: id, ts_ns }))
        }
        "TRADE" => {
            let qty = to_scaled(&er.last_qty, qty_scale)?;
            let px = to_scaled(&er.last_px, px_scale)?;
            if qty <= 0 || er.trade_id < 0 {
                return None;
            }
            Some(EngineEvent::Fill(Fill {
                order_id,
                venue_order_id,
                symbol: er.symbol.clone(),
                side: parse_side(&er.side)?,
                seq: er.trade_id as u64,
                px,
                qty,
                ts_ns,
            }))
        }
        _ => None,
    }
}

// ---- REST ----
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestOrder {
    pub symbol: String,
    pub order_id: u64,
    pub client_order_id: String,
    pub price: String,
    pub orig_qty: String,
    pub executed_qty: String,
    pub status: String,
    pub side: String,
}

impl RestOrder {
    pub fn venue_status(&self) -> VenueOrderStatus {
        let venue_order_id = VenueOrderId(self.order_id.to_string());
        match self.status.as_str() {
            "CANCELED" | "EXPIRED" | "EXPIRED_IN_MATCH" => VenueOrderStatus::Cancelled { venue_order_id },
            "FILLED" => VenueOrderStatus::Filled { venue_order_id },
            "REJECTED" => VenueOrderStatus::Rejected { reason: "REJECTED".into() },
            _ => VenueOrderStatus::Accepted { venue_order_id },
        }
    }

    pub fn to_open_order(&self, px_scale: i64, qty_scale: i64) -> Option<OpenOrder> {
        let orig = to_scaled(&self.orig_qty, qty_scale)?;
        let done = to_scaled(&self.executed_qty, qty_scale)?;
        Some(OpenOrder {
            venue_order_id: VenueOrderId(self.order_id.to_string()),
            client_order_id: (!self.client_order_id.is_empty()).then(|| OrderId(self.client_order_id.clone())),
            symbol: self.symbol.clone(),
            side: parse_side(&self.side)?,
            px: to_scaled(&self.price, px_scale)?,
            remaining: orig - done,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
}

/// Binance error code for "Order does not exist".
pub const ERR_NO_SUCH_ORDER: i64 = -2013;
/// Timestamp outside recvWindow (clock drift, slow request).
pub const ERR_TIMESTAMP: i64 = -1021;

/// Non-2xx REST answer -> gateway error. Rate limits (429, 418 ban) and
/// timestamp drift are worth retrying; other 4xx are a refusal.
pub fn rest_error(status: u16, body: String) -> GatewayError {
    let code = serde_json::from_str::<ApiError>(&body).map(|e| e.code).ok();
    match status {
        429 | 418 => GatewayError::Transport(format!("{status} rate limited: {body}")),
        400..=499 if code == Some(ERR_TIMESTAMP) => GatewayError::Transport(format!("{status}: {body}")),
        400..=499 => GatewayError::Rejected(body),
        _ => GatewayError::Transport(format!("{status}: {body}")),
    }
}
