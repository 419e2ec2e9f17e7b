// ===============================
// src/domain.rs
// ===============================
//
// Shared event/state types for the engine.
// - Harga dalam tick (i64), qty dalam lot (i64), PnL dalam tick*lot.
// - ts_ns selalu diambil dari event pemicu, bukan dari jam dinding.
//
use serde::{Deserialize, Serialize};
use std::fmt;

pub type InstrumentId = String;

/// Wall clock in ns. Only for the edges (feeds, venue adapters, timer);
/// core logic uses the timestamp of the triggering event.
pub fn wall_clock_ns() -> i128 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0) as i128
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side { Buy, Sell }
impl Side {
    pub fn sign(&self) -> i64 { match self { Side::Buy => 1, Side::Sell => -1 } }
    pub fn opposite(&self) -> Side { match self { Side::Buy => Side::Sell, Side::Sell => Side::Buy } }
    pub fn as_str(&self) -> &'static str { match self { Side::Buy => "buy", Side::Sell => "sell" } }
}

/// Engine-generated order id, unique per run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub String);
impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}
impl From<&str> for OrderId { fn from(s: &str) -> Self { OrderId(s.to_string()) } }

/// Id assigned by the venue once the order is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VenueOrderId(pub String);
impl fmt::Display for VenueOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}
impl From<&str> for VenueOrderId { fn from(s: &str) -> Self { VenueOrderId(s.to_string()) } }

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub ts_ns: i128,
    pub symbol: InstrumentId,
    pub best_bid: i64,
    pub bid_size: i64,
    pub best_ask: i64,
    pub ask_size: i64,
    pub last_px: Option<i64>,
}
impl MarketSnapshot {
    pub fn mid(&self) -> i64 { (self.best_bid + self.best_ask) / 2 }
    pub fn is_valid(&self) -> bool { self.best_bid > 0 && self.best_ask > self.best_bid }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote { pub symbol: InstrumentId, pub side: Side, pub px: i64, pub qty: i64 }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState { Pending, Live, PartiallyFilled, Filled, Cancelling, Cancelled, Rejected }
impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Filled | OrderState::Cancelled | OrderState::Rejected)
    }
    /// States that still represent exposure the venue may execute.
    pub fn is_committed(&self) -> bool {
        matches!(
            self,
            OrderState::Pending | OrderState::Live | OrderState::PartiallyFilled | OrderState::Cancelling
        )
    }
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Pending => "pending",
            OrderState::Live => "live",
            OrderState::PartiallyFilled => "partially_filled",
            OrderState::Filled => "filled",
            OrderState::Cancelling => "cancelling",
            OrderState::Cancelled => "cancelled",
            OrderState::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: InstrumentId,
    pub side: Side,
    pub px: i64,
    pub qty: i64,
    pub remaining: i64,
    pub filled: i64,
    pub state: OrderState,
    pub venue_order_id: Option<VenueOrderId>,
    /// Cancel sent and not yet acknowledged.
    pub cancel_in_flight: bool,
    pub reject_reason: Option<String>,
    pub created_ns: i128,
    pub updated_ns: i128,
}

/// Dedup key: (order id, venue fill sequence).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FillKey(pub OrderId, pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub venue_order_id: VenueOrderId,
    pub symbol: InstrumentId,
    pub side: Side,
    pub seq: u64,
    pub px: i64,
    pub qty: i64,
    pub ts_ns: i128,
}
impl Fill {
    pub fn key(&self) -> FillKey { FillKey(self.order_id.clone(), self.seq) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VenueAck {
    Accepted { order_id: OrderId, venue_order_id: VenueOrderId, ts_ns: i128 },
    Rejected { order_id: OrderId, reason: String, ts_ns: i128 },
    CancelAck { order_id: OrderId, ts_ns: i128 },
}
impl VenueAck {
    pub fn order_id(&self) -> &OrderId {
        match self {
            VenueAck::Accepted { order_id, .. }
            | VenueAck::Rejected { order_id, .. }
            | VenueAck::CancelAck { order_id, .. } => order_id,
        }
    }
    pub fn ts_ns(&self) -> i128 {
        match self {
            VenueAck::Accepted { ts_ns, .. }
            | VenueAck::Rejected { ts_ns, .. }
            | VenueAck::CancelAck { ts_ns, .. } => *ts_ns,
        }
    }
}

/// Item of the single intake queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineEvent {
    MarketData(MarketSnapshot),
    Ack(VenueAck),
    Fill(Fill),
    Timer { ts_ns: i128 },
}
impl EngineEvent {
    pub fn ts_ns(&self) -> i128 {
        match self {
            EngineEvent::MarketData(s) => s.ts_ns,
            EngineEvent::Ack(a) => a.ts_ns(),
            EngineEvent::Fill(f) => f.ts_ns,
            EngineEvent::Timer { ts_ns } => *ts_ns,
        }
    }
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::MarketData(_) => "market_data",
            EngineEvent::Ack(_) => "ack",
            EngineEvent::Fill(_) => "fill",
            EngineEvent::Timer { .. } => "timer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Create(Quote),
    Cancel { order_id: OrderId },
    Replace { order_id: OrderId, quote: Quote },
}
impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::Create(_) => "create",
            Action::Cancel { .. } => "cancel",
            Action::Replace { .. } => "replace",
        }
    }
}

// Inventory structures
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: InstrumentId,
    pub qty: i64,
    pub avg_cost_px: i64,
    pub realized_pnl: i64,
    pub unrealized_pnl: i64,
    pub last_mid: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionDelta { pub symbol: InstrumentId, pub qty_before: i64, pub qty_after: i64, pub realized_pnl: i64 }

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exposure { pub qty: i64, pub notional: i64 }

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PnlSummary { pub realized: i64, pub unrealized: i64 }

/// Read-only copy of engine state, for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub ts_ns: i128,
    pub positions: Vec<Position>,
    pub live_orders: Vec<Order>,
    pub pnl: PnlSummary,
    pub degraded: bool,
    pub degraded_orders: Vec<OrderId>,
    pub events_handled: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event { Md(MarketSnapshot), Ack(VenueAck), Fill(Fill), Act(Action), Snap(EngineSnapshot), Note(String) }
