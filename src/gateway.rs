// ===============================
// src/gateway.rs (venue interface + simulated venue)
// ===============================
//
// - VenueGateway : kapabilitas yang dibutuhkan engine dari venue mana pun
//                  (live Binance, sandbox, simulasi backtest).
// - RetryPolicy  : retry terbatas + exponential backoff + jitter, hanya
//                  untuk panggilan idempotent (cancel, query status).
// - SimGateway   : venue simulasi deterministik. ACK langsung, fill saat
//                  book menembus harga order yang resting.
//
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use thiserror::Error;
use tokio::time::{sleep, Duration};

use crate::domain::{
    EngineEvent, Fill, InstrumentId, MarketSnapshot, OrderId, Side, VenueAck, VenueOrderId,
};
use crate::engine::IntakeTx;
use crate::metrics::EXECS;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Network, timeout or disconnect. Outcome at the venue is unknown.
    #[error("venue transport error: {0}")]
    Transport(String),
    /// The venue answered and refused the request.
    #[error("venue rejected request: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub order_id: OrderId,
    pub symbol: InstrumentId,
    pub side: Side,
    pub px: i64,
    pub qty: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRef {
    pub order_id: OrderId,
    pub symbol: InstrumentId,
    pub venue_order_id: Option<VenueOrderId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VenueOrderStatus {
    /// Resting at the venue, possibly partially filled.
    Accepted { venue_order_id: VenueOrderId },
    /// Fully executed; the fills may still be on their way.
    Filled { venue_order_id: VenueOrderId },
    Cancelled { venue_order_id: VenueOrderId },
    Rejected { reason: String },
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOrder {
    pub venue_order_id: VenueOrderId,
    pub client_order_id: Option<OrderId>,
    pub symbol: InstrumentId,
    pub side: Side,
    pub px: i64,
    pub remaining: i64,
}

/// Acks and fills are not returned from these calls; the gateway delivers
/// them into the intake queue.
#[async_trait]
pub trait VenueGateway: Send + Sync {
    async fn create_order(&self, order: &NewOrder) -> Result<(), GatewayError>;
    async fn cancel_order(&self, order: &OrderRef) -> Result<(), GatewayError>;
    async fn query_order_status(&self, order: &OrderRef) -> Result<VenueOrderStatus, GatewayError>;
    async fn open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, GatewayError>;
}

#[async_trait]
impl<G: VenueGateway + ?Sized> VenueGateway for Arc<G> {
    async fn create_order(&self, order: &NewOrder) -> Result<(), GatewayError> {
        (**self).create_order(order).await
    }
    async fn cancel_order(&self, order: &OrderRef) -> Result<(), GatewayError> {
        (**self).cancel_order(order).await
    }
    async fn query_order_status(&self, order: &OrderRef) -> Result<VenueOrderStatus, GatewayError> {
        (**self).query_order_status(order).await
    }
    async fn open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, GatewayError> {
        (**self).open_orders(symbol).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self { Self { max_attempts: 3, base_delay_ms: 100, max_delay_ms: 2_000 } }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based), jitter included.
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(6);
        let base_ms = self.base_delay_ms.saturating_mul(1u64 << shift).min(self.max_delay_ms);
        let jitter = if self.base_delay_ms == 0 { 0 } else { rand::thread_rng().gen_range(0..=self.base_delay_ms / 2) };
        Duration::from_millis(base_ms + jitter)
    }

    /// Run `op` until it succeeds, the venue rejects it, or attempts run out.
    /// Only transport errors are retried.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op().await {
                Err(GatewayError::Transport(e)) if attempt < self.max_attempts.max(1) => {
                    tracing::debug!(attempt, error = %e, "transport error, retrying");
                    sleep(self.delay(attempt)).await;
                }
                other => return other,
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Simulated venue
// -----------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct SimOrder {
    order_id: OrderId,
    venue_order_id: VenueOrderId,
    symbol: InstrumentId,
    side: Side,
    px: i64,
    remaining: i64,
    fill_seq: u64,
}

#[derive(Debug, Default)]
struct SimState {
    clock_ns: i128,
    next_venue_id: u64,
    // BTreeMap: urutan fill deterministik
    resting: BTreeMap<OrderId, SimOrder>,
    status: BTreeMap<OrderId, VenueOrderStatus>,
    fail_creates: u32,
    fail_cancels: u32,
    fail_queries: u32,
    reject_creates: bool,
    silent_acks: bool,
    creates_seen: u64,
    cancels_seen: u64,
}

/// Deterministic venue used by mock and backtest modes.
pub struct SimGateway {
    tx: IntakeTx,
    name: String,
    state: Mutex<SimState>,
}

impl SimGateway {
    pub fn new(tx: IntakeTx) -> Self { Self::named(tx, "sim") }

    pub fn named(tx: IntakeTx, name: &str) -> Self {
        Self { tx, name: name.to_string(), state: Mutex::new(SimState::default()) }
    }

    fn push(&self, ev: EngineEvent, label: &str) {
        if self.tx.send(ev).is_ok() {
            EXECS.with_label_values(&[label, &self.name]).inc();
        }
    }

    /// Next `n` creates/cancels/queries fail with a transport error.
    pub fn fail_next_creates(&self, n: u32) { self.state.lock().fail_creates = n; }
    pub fn fail_next_cancels(&self, n: u32) { self.state.lock().fail_cancels = n; }
    pub fn fail_next_queries(&self, n: u32) { self.state.lock().fail_queries = n; }
    /// Venue refuses every create.
    pub fn set_reject_creates(&self, on: bool) { self.state.lock().reject_creates = on; }
    /// Accept creates without delivering the ack (lost ack).
    pub fn set_silent_acks(&self, on: bool) { self.state.lock().silent_acks = on; }

    pub fn creates_seen(&self) -> u64 { self.state.lock().creates_seen }
    pub fn cancels_seen(&self) -> u64 { self.state.lock().cancels_seen }

    pub fn resting_qty(&self, symbol: &str, side: Side) -> i64 {
        self.state
            .lock()
            .resting
            .values()
            .filter(|o| o.symbol == symbol && o.side == side)
            .map(|o| o.remaining)
            .sum()
    }

    /// Advance the venue clock and fill resting orders the book trades through.
    pub fn on_market(&self, md: &MarketSnapshot) {
        let mut fills = Vec::new();
        {
            let mut st = self.state.lock();
            st.clock_ns = st.clock_ns.max(md.ts_ns);
            let ts_ns = st.clock_ns;
            let mut done = Vec::new();
            for o in st.resting.values_mut().filter(|o| o.symbol == md.symbol) {
                let (crossed, avail) = match o.side {
                    Side::Buy => (md.best_ask <= o.px, md.ask_size),
                    Side::Sell => (md.best_bid >= o.px, md.bid_size),
                };
                if !crossed {
                    continue;
                }
                let qty = if avail > 0 { avail.min(o.remaining) } else { o.remaining };
                o.remaining -= qty;
                o.fill_seq += 1;
                fills.push(Fill {
                    order_id: o.order_id.clone(),
                    venue_order_id: o.venue_order_id.clone(),
                    symbol: o.symbol.clone(),
                    side: o.side,
                    seq: o.fill_seq,
                    px: o.px,
                    qty,
                    ts_ns,
                });
                if o.remaining == 0 {
                    done.push(o.order_id.clone());
                }
            }
            for id in done {
                if let Some(o) = st.resting.remove(&id) {
                    st.status.insert(id, VenueOrderStatus::Filled { venue_order_id: o.venue_order_id });
                }
            }
        }
        for f in fills {
            self.push(EngineEvent::Fill(f), "filled");
        }
    }
}

#[async_trait]
impl VenueGateway for SimGateway {
    async fn create_order(&self, order: &NewOrder) -> Result<(), GatewayError> {
        let ack = {
            let mut st = self.state.lock();
            st.creates_seen += 1;
            if st.fail_creates > 0 {
                st.fail_creates -= 1;
                return Err(GatewayError::Transport("simulated timeout".into()));
            }
            let ts_ns = st.clock_ns;
            if st.reject_creates || order.qty <= 0 || order.px <= 0 {
                let reason = "simulated reject".to_string();
                st.status.insert(order.order_id.clone(), VenueOrderStatus::Rejected { reason: reason.clone() });
                Some(VenueAck::Rejected { order_id: order.order_id.clone(), reason, ts_ns })
            } else {
                st.next_venue_id += 1;
                let venue_order_id = VenueOrderId(format!("SIM-{}", st.next_venue_id));
                st.resting.insert(
                    order.order_id.clone(),
                    SimOrder {
                        order_id: order.order_id.clone(),
                        venue_order_id: venue_order_id.clone(),
                        symbol: order.symbol.clone(),
                        side: order.side,
                        px: order.px,
                        remaining: order.qty,
                        fill_seq: 0,
                    },
                );
                st.status.insert(
                    order.order_id.clone(),
                    VenueOrderStatus::Accepted { venue_order_id: venue_order_id.clone() },
                );
                if st.silent_acks {
                    None
                } else {
                    Some(VenueAck::Accepted { order_id: order.order_id.clone(), venue_order_id, ts_ns })
                }
            }
        };
        if let Some(ack) = ack {
            let label = if matches!(ack, VenueAck::Accepted { .. }) { "ack" } else { "rejected" };
            self.push(EngineEvent::Ack(ack), label);
        }
        Ok(())
    }

    async fn cancel_order(&self, order: &OrderRef) -> Result<(), GatewayError> {
        let ts_ns = {
            let mut st = self.state.lock();
            st.cancels_seen += 1;
            if st.fail_cancels > 0 {
                st.fail_cancels -= 1;
                return Err(GatewayError::Transport("simulated disconnect".into()));
            }
            let Some(o) = st.resting.remove(&order.order_id) else {
                return Err(GatewayError::Rejected(format!("unknown order {}", order.order_id)));
            };
            st.status.insert(order.order_id.clone(), VenueOrderStatus::Cancelled { venue_order_id: o.venue_order_id });
            st.clock_ns
        };
        self.push(EngineEvent::Ack(VenueAck::CancelAck { order_id: order.order_id.clone(), ts_ns }), "cancelled");
        Ok(())
    }

    async fn query_order_status(&self, order: &OrderRef) -> Result<VenueOrderStatus, GatewayError> {
        let mut st = self.state.lock();
        if st.fail_queries > 0 {
            st.fail_queries -= 1;
            return Err(GatewayError::Transport("simulated timeout".into()));
        }
        Ok(st.status.get(&order.order_id).cloned().unwrap_or(VenueOrderStatus::NotFound))
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, GatewayError> {
        Ok(self
            .state
            .lock()
            .resting
            .values()
            .filter(|o| o.symbol == symbol)
            .map(|o| OpenOrder {
                venue_order_id: o.venue_order_id.clone(),
                client_order_id: Some(o.order_id.clone()),
                symbol: o.symbol.clone(),
                side: o.side,
                px: o.px,
                remaining: o.remaining,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    fn new_order(id: &str, side: Side, px: i64, qty: i64) -> NewOrder {
        NewOrder { order_id: OrderId(id.into()), symbol: "XYZ".into(), side, px, qty }
    }

    fn snap(ts: i128, bid: i64, ask: i64, size: i64) -> MarketSnapshot {
        MarketSnapshot { ts_ns: ts, symbol: "XYZ".into(), best_bid: bid, bid_size: size, best_ask: ask, ask_size: size, last_px: None }
    }

    #[tokio::test]
    async fn retry_stops_after_max_attempts() {
        let policy = RetryPolicy { max_attempts: 3, base_delay_ms: 0, max_delay_ms: 0 };
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = policy
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::Transport("down".into()))
            })
            .await;
        assert!(matches!(res, Err(GatewayError::Transport(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_does_not_repeat_rejections() {
        let policy = RetryPolicy { max_attempts: 5, base_delay_ms: 0, max_delay_ms: 0 };
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = policy
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::Rejected("nope".into()))
            })
            .await;
        assert_eq!(res, Err(GatewayError::Rejected("nope".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy { max_attempts: 10, base_delay_ms: 100, max_delay_ms: 1_000 };
        let d1 = policy.delay(1).as_millis();
        let d3 = policy.delay(3).as_millis();
        let d9 = policy.delay(9).as_millis();
        assert!((100..=150).contains(&d1));
        assert!((400..=450).contains(&d3));
        assert!((1_000..=1_050).contains(&d9));
    }

    #[tokio::test]
    async fn sim_acks_fills_and_cancels() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let gw = SimGateway::new(tx);
        gw.create_order(&new_order("a", Side::Buy, 1000, 10)).await.unwrap();
        let ack = rx.try_recv().unwrap();
        assert!(matches!(ack, EngineEvent::Ack(VenueAck::Accepted { .. })));

        // ask turun ke 1000 dengan size 4 -> partial fill 4
        gw.on_market(&snap(5, 990, 1000, 4));
        match rx.try_recv().unwrap() {
            EngineEvent::Fill(f) => {
                assert_eq!((f.qty, f.px, f.seq, f.ts_ns), (4, 1000, 1, 5));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(gw.resting_qty("XYZ", Side::Buy), 6);

        let r = OrderRef { order_id: OrderId("a".into()), symbol: "XYZ".into(), venue_order_id: None };
        gw.cancel_order(&r).await.unwrap();
        assert!(matches!(rx.try_recv().unwrap(), EngineEvent::Ack(VenueAck::CancelAck { .. })));
        assert!(matches!(gw.query_order_status(&r).await.unwrap(), VenueOrderStatus::Cancelled { .. }));
        assert!(matches!(gw.cancel_order(&r).await, Err(GatewayError::Rejected(_))));
    }

    #[tokio::test]
    async fn sim_silent_ack_is_visible_through_status() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let gw = SimGateway::new(tx);
        gw.set_silent_acks(true);
        gw.create_order(&new_order("a", Side::Sell, 1000, 1)).await.unwrap();
        assert!(rx.try_recv().is_err());
        let r = OrderRef { order_id: OrderId("a".into()), symbol: "XYZ".into(), venue_order_id: None };
        assert!(matches!(gw.query_order_status(&r).await.unwrap(), VenueOrderStatus::Accepted { .. }));
        assert_eq!(gw.open_orders("XYZ").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sim_reports_filled_status_and_refuses_cancel() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let gw = SimGateway::new(tx);
        gw.create_order(&new_order("a", Side::Buy, 1000, 10)).await.unwrap();
        gw.on_market(&snap(5, 990, 1000, 50));
        let r = OrderRef { order_id: OrderId("a".into()), symbol: "XYZ".into(), venue_order_id: None };
        assert!(matches!(gw.query_order_status(&r).await.unwrap(), VenueOrderStatus::Filled { .. }));
        assert!(matches!(gw.cancel_order(&r).await, Err(GatewayError::Rejected(_))));
        assert_eq!(gw.cancels_seen(), 1);
        assert!(gw.open_orders("XYZ").await.unwrap().is_empty());
    }
}
