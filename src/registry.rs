// ===============================
// src/registry.rs (order lifecycle)
// ===============================
//
// Catatan lokal untuk setiap order yang pernah dikirim engine.
//
//   Pending --ack accepted--> Live            Pending --ack rejected--> Rejected
//   Live --fill--> PartiallyFilled | Filled   Live/PartiallyFilled --cancel--> Cancelling
//   Cancelling --cancel ack--> Cancelled      Cancelling --fill--> PartiallyFilled | Filled
//
// Race fill vs cancel ack: kedua urutan berakhir di state dan filled qty yang
// sama. Fill setelah Cancelled tetap dihitung; jika melengkapi order -> Filled.
// Partial fill + cancel ack berakhir di Cancelled (bukan PartiallyFilled): sisa
// qty sudah tidak ada di venue, jadi tidak lagi dihitung sebagai exposure.
//
// Order terminal disimpan selama retention window (untuk fill terlambat),
// lalu dibuang lewat `prune` bersama fill key dan venue id-nya.
//
use std::collections::{BTreeSet, VecDeque};

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{
    Fill, FillKey, InstrumentId, Order, OrderId, OrderState, Quote, VenueAck, VenueOrderId,
};
use crate::gateway::{OpenOrder, OrderRef, VenueOrderStatus};

/// Ack or fill that cannot be applied. Expected under races and restarts;
/// callers log and drop it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StaleAck {
    #[error("unknown order {0}")]
    UnknownOrder(OrderId),
    #[error("duplicate fill {0:?}")]
    DuplicateFill(FillKey),
    #[error("venue order id {venue_order_id} already bound to {bound_to}")]
    DuplicateVenueId { venue_order_id: VenueOrderId, bound_to: OrderId },
    #[error("{event} not applicable to order {order_id} in state {state:?}")]
    InvalidState { order_id: OrderId, state: OrderState, event: &'static str },
}

#[derive(Debug, Default)]
pub struct OrderRegistry {
    run_id: String,
    seq: u64,
    orders: HashMap<OrderId, Order>,
    by_venue: HashMap<VenueOrderId, OrderId>,
    fills: HashMap<OrderId, HashSet<u64>>,
    // order committed per symbol
    open: HashMap<InstrumentId, BTreeSet<OrderId>>,
    // (ts jadi terminal, id), urut waktu
    retired: VecDeque<(i128, OrderId)>,
}

impl OrderRegistry {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self { run_id: run_id.into(), ..Self::default() }
    }

    pub fn get(&self, id: &OrderId) -> Option<&Order> { self.orders.get(id) }

    pub fn order_ref(&self, id: &OrderId) -> Option<OrderRef> {
        self.orders.get(id).map(|o| OrderRef {
            order_id: o.id.clone(),
            symbol: o.symbol.clone(),
            venue_order_id: o.venue_order_id.clone(),
        })
    }

    fn next_id(&mut self) -> OrderId {
        self.seq += 1;
        OrderId(format!("{}-{}", self.run_id, self.seq))
    }

    fn insert(&mut self, id: OrderId, quote: &Quote, ts_ns: i128) {
        self.open.entry(quote.symbol.clone()).or_default().insert(id.clone());
        self.orders.insert(
            id.clone(),
            Order {
                id,
                symbol: quote.symbol.clone(),
                side: quote.side,
                px: quote.px,
                qty: quote.qty,
                remaining: quote.qty,
                filled: 0,
                state: OrderState::Pending,
                venue_order_id: None,
                cancel_in_flight: false,
                reject_reason: None,
                created_ns: ts_ns,
                updated_ns: ts_ns,
            },
        );
    }

    /// Record a new order as `Pending`; the venue call happens elsewhere.
    pub fn submit(&mut self, quote: &Quote, ts_ns: i128) -> OrderId {
        let id = self.next_id();
        self.insert(id.clone(), quote, ts_ns);
        id
    }

    fn order_mut(&mut self, id: &OrderId) -> Result<&mut Order, StaleAck> {
        self.orders.get_mut(id).ok_or_else(|| StaleAck::UnknownOrder(id.clone()))
    }

    /// Move an order that just turned terminal out of the open index.
    fn settle(&mut self, id: &OrderId) {
        let Some(o) = self.orders.get(id) else { return };
        if !o.state.is_terminal() {
            return;
        }
        if self.open.get_mut(&o.symbol).map_or(false, |set| set.remove(id)) {
            self.retired.push_back((o.updated_ns, id.clone()));
        }
    }

    /// `Pending -> Live` with the venue id, or `Pending -> Rejected`.
    pub fn on_ack(
        &mut self,
        id: &OrderId,
        outcome: Result<VenueOrderId, String>,
        ts_ns: i128,
    ) -> Result<OrderState, StaleAck> {
        if let Ok(vid) = &outcome {
            if let Some(bound) = self.by_venue.get(vid) {
                if bound != id {
                    return Err(StaleAck::DuplicateVenueId { venue_order_id: vid.clone(), bound_to: bound.clone() });
                }
            }
        }
        let order = self.order_mut(id)?;
        let res = match (order.state, outcome) {
            (OrderState::Pending, Ok(vid)) => {
                order.state = OrderState::Live;
                order.venue_order_id = Some(vid.clone());
                order.updated_ns = ts_ns;
                self.by_venue.insert(vid, id.clone());
                Ok(OrderState::Live)
            }
            (OrderState::Pending, Err(reason)) => {
                order.state = OrderState::Rejected;
                order.reject_reason = Some(reason);
                order.updated_ns = ts_ns;
                Ok(OrderState::Rejected)
            }
            // ack ganda dengan venue id yang sama
            (state, Ok(vid)) if order.venue_order_id.as_ref() == Some(&vid) => Ok(state),
            (state, _) => Err(StaleAck::InvalidState { order_id: id.clone(), state, event: "ack" }),
        };
        self.settle(id);
        res
    }

    /// Dispatch a venue ack to `on_ack` / `on_cancel_ack`.
    pub fn apply_ack(&mut self, ack: &VenueAck) -> Result<OrderState, StaleAck> {
        match ack {
            VenueAck::Accepted { order_id, venue_order_id, ts_ns } => {
                self.on_ack(order_id, Ok(venue_order_id.clone()), *ts_ns)
            }
            VenueAck::Rejected { order_id, reason, ts_ns } => self.on_ack(order_id, Err(reason.clone()), *ts_ns),
            VenueAck::CancelAck { order_id, ts_ns } => self.on_cancel_ack(order_id, *ts_ns),
        }
    }

    /// Apply a fill once. Returns the fill as applied: side from the order,
    /// quantity clamped to what was still open.
    pub fn on_fill(&mut self, fill: &Fill) -> Result<Fill, StaleAck> {
        if self.fills.get(&fill.order_id).map_or(false, |seen| seen.contains(&fill.seq)) {
            return Err(StaleAck::DuplicateFill(fill.key()));
        }
        let state = self.order_mut(&fill.order_id)?.state;
        match state {
            OrderState::Rejected | OrderState::Filled => {
                return Err(StaleAck::InvalidState { order_id: fill.order_id.clone(), state, event: "fill" });
            }
            OrderState::Pending => {
                // fill membuktikan order sudah diterima venue
                debug!(order_id = %fill.order_id, "fill before ack, promoting to live");
                self.on_ack(&fill.order_id, Ok(fill.venue_order_id.clone()), fill.ts_ns)?;
            }
            _ => {}
        }

        let order = self.order_mut(&fill.order_id)?;
        let qty = fill.qty.min(order.remaining);
        if qty <= 0 {
            return Err(StaleAck::InvalidState { order_id: fill.order_id.clone(), state: order.state, event: "fill" });
        }
        if qty < fill.qty {
            warn!(order_id = %order.id, reported = fill.qty, applied = qty, "fill exceeds remaining, clamped");
        }
        order.remaining -= qty;
        order.filled += qty;
        order.updated_ns = fill.ts_ns;
        order.state = match (order.state, order.remaining) {
            (_, 0) => {
                order.cancel_in_flight = false;
                OrderState::Filled
            }
            (OrderState::Cancelled, _) => OrderState::Cancelled,
            _ => OrderState::PartiallyFilled,
        };
        let applied = Fill {
            symbol: order.symbol.clone(),
            side: order.side,
            qty,
            ..fill.clone()
        };
        self.fills.entry(fill.order_id.clone()).or_default().insert(fill.seq);
        self.settle(&fill.order_id);
        Ok(applied)
    }

    /// Only `Live`/`PartiallyFilled` without a cancel already in flight.
    pub fn request_cancel(&mut self, id: &OrderId, ts_ns: i128) -> bool {
        match self.orders.get_mut(id) {
            Some(o) if matches!(o.state, OrderState::Live | OrderState::PartiallyFilled) && !o.cancel_in_flight => {
                o.state = OrderState::Cancelling;
                o.cancel_in_flight = true;
                o.updated_ns = ts_ns;
                true
            }
            _ => false,
        }
    }

    pub fn on_cancel_ack(&mut self, id: &OrderId, ts_ns: i128) -> Result<OrderState, StaleAck> {
        let order = self.order_mut(id)?;
        match order.state {
            OrderState::Cancelling => {}
            OrderState::PartiallyFilled if order.cancel_in_flight => {}
            OrderState::Live | OrderState::PartiallyFilled => {
                // cancel dari sisi venue (expire, STP, ...)
                warn!(order_id = %id, "unsolicited cancel ack");
            }
            OrderState::Filled | OrderState::Rejected | OrderState::Cancelled => return Ok(order.state),
            OrderState::Pending => {
                return Err(StaleAck::InvalidState { order_id: id.clone(), state: order.state, event: "cancel ack" });
            }
        }
        order.state = OrderState::Cancelled;
        order.cancel_in_flight = false;
        order.updated_ns = ts_ns;
        self.settle(id);
        Ok(OrderState::Cancelled)
    }

    /// Resolve an order whose ack or cancel ack never arrived, using the
    /// venue's answer and legal transitions only.
    pub fn reconcile_status(
        &mut self,
        id: &OrderId,
        status: &VenueOrderStatus,
        ts_ns: i128,
    ) -> Result<OrderState, StaleAck> {
        let state = self.order_mut(id)?.state;
        match (state, status) {
            (
                OrderState::Pending,
                VenueOrderStatus::Accepted { venue_order_id } | VenueOrderStatus::Filled { venue_order_id },
            ) => self.on_ack(id, Ok(venue_order_id.clone()), ts_ns),
            (OrderState::Pending, VenueOrderStatus::Cancelled { venue_order_id }) => {
                self.on_ack(id, Ok(venue_order_id.clone()), ts_ns)?;
                self.request_cancel(id, ts_ns);
                self.on_cancel_ack(id, ts_ns)
            }
            (OrderState::Pending, VenueOrderStatus::Rejected { reason }) => self.on_ack(id, Err(reason.clone()), ts_ns),
            (OrderState::Pending, VenueOrderStatus::NotFound) => {
                self.on_ack(id, Err("not found at venue".to_string()), ts_ns)
            }
            (_, VenueOrderStatus::Cancelled { .. }) | (_, VenueOrderStatus::NotFound) if !state.is_terminal() => {
                self.on_cancel_ack(id, ts_ns)
            }
            (state, _) => Ok(state),
        }
    }

    /// Bring a venue-resident order found at start-up under management.
    pub fn adopt(&mut self, open: &OpenOrder, ts_ns: i128) -> Result<OrderId, StaleAck> {
        if let Some(bound) = self.by_venue.get(&open.venue_order_id) {
            return Err(StaleAck::DuplicateVenueId {
                venue_order_id: open.venue_order_id.clone(),
                bound_to: bound.clone(),
            });
        }
        let id = match &open.client_order_id {
            Some(cid) if !self.orders.contains_key(cid) => cid.clone(),
            _ => self.next_id(),
        };
        let quote = Quote { symbol: open.symbol.clone(), side: open.side, px: open.px, qty: open.remaining };
        self.insert(id.clone(), &quote, ts_ns);
        self.on_ack(&id, Ok(open.venue_order_id.clone()), ts_ns)?;
        Ok(id)
    }

    fn committed<'a>(&'a self, ids: &'a BTreeSet<OrderId>) -> impl Iterator<Item = &'a Order> + 'a {
        ids.iter().filter_map(|id| self.orders.get(id)).filter(|o| o.state.is_committed())
    }

    /// Committed orders (`Pending`, `Live`, `PartiallyFilled`, `Cancelling`)
    /// for one instrument, oldest first.
    pub fn live_orders(&self, symbol: &str) -> Vec<Order> {
        let Some(ids) = self.open.get(symbol) else { return Vec::new() };
        let mut out: Vec<Order> = self.committed(ids).cloned().collect();
        out.sort_by(|a, b| (a.created_ns, &a.id).cmp(&(b.created_ns, &b.id)));
        out
    }

    pub fn all_live_orders(&self) -> Vec<Order> {
        let mut out: Vec<Order> = self.open.values().flat_map(|ids| self.committed(ids)).cloned().collect();
        out.sort_by(|a, b| (&a.symbol, a.created_ns, &a.id).cmp(&(&b.symbol, b.created_ns, &b.id)));
        out
    }

    /// Orders still held, terminal ones inside the retention window included.
    pub fn tracked(&self) -> usize { self.orders.len() }

    /// `Pending` orders older than `timeout_ns`, and cancels unanswered for as long.
    pub fn stuck_orders(&self, now_ns: i128, timeout_ns: i128) -> Vec<OrderId> {
        let mut out: Vec<&Order> = self
            .open
            .values()
            .flat_map(|ids| self.committed(ids))
            .filter(|o| match o.state {
                OrderState::Pending => now_ns - o.created_ns >= timeout_ns,
                OrderState::Cancelling => now_ns - o.updated_ns >= timeout_ns,
                OrderState::PartiallyFilled => o.cancel_in_flight && now_ns - o.updated_ns >= timeout_ns,
                _ => false,
            })
            .collect();
        out.sort_by(|a, b| (a.created_ns, &a.id).cmp(&(b.created_ns, &b.id)));
        out.into_iter().map(|o| o.id.clone()).collect()
    }

    /// Forget terminal orders untouched for `retain_ns`, with their fill keys
    /// and venue id binding. Acks or fills arriving later are `UnknownOrder`.
    /// Returns the evicted ids.
    pub fn prune(&mut self, now_ns: i128, retain_ns: i128) -> Vec<OrderId> {
        let mut evicted = Vec::new();
        while let Some((ts, _)) = self.retired.front() {
            if now_ns - *ts < retain_ns {
                break;
            }
            let Some((_, id)) = self.retired.pop_front() else { break };
            let Some(order) = self.orders.get(&id) else { continue };
            if now_ns - order.updated_ns < retain_ns {
                // disentuh lagi (fill terlambat): tunggu window berikutnya
                self.retired.push_back((order.updated_ns, id));
                continue;
            }
            if let Some(order) = self.orders.remove(&id) {
                if let Some(vid) = order.venue_order_id {
                    if self.by_venue.get(&vid) == Some(&id) {
                        self.by_venue.remove(&vid);
                    }
                }
            }
            self.fills.remove(&id);
            evicted.push(id);
        }
        if !evicted.is_empty() {
            debug!(count = evicted.len(), held = self.orders.len(), "terminal orders evicted");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;

    fn quote(side: Side, qty: i64) -> Quote { Quote { symbol: "XYZ".into(), side, px: 1000, qty } }

    fn fill(id: &OrderId, seq: u64, qty: i64) -> Fill {
        Fill {
            order_id: id.clone(),
            venue_order_id: VenueOrderId(format!("V-{id}")),
            symbol: "XYZ".into(),
            side: Side::Buy,
            seq,
            px: 1000,
            qty,
            ts_ns: 10,
        }
    }

    fn live_order(reg: &mut OrderRegistry, qty: i64) -> OrderId {
        let id = reg.submit(&quote(Side::Buy, qty), 1);
        reg.on_ack(&id, Ok(VenueOrderId(format!("V-{id}"))), 2).unwrap();
        id
    }

    #[test]
    fn submit_assigns_unique_pending_ids() {
        let mut reg = OrderRegistry::new("run");
        let a = reg.submit(&quote(Side::Buy, 5), 1);
        let b = reg.submit(&quote(Side::Sell, 5), 1);
        assert_ne!(a, b);
        assert_eq!(a.0, "run-1");
        assert_eq!(reg.get(&a).unwrap().state, OrderState::Pending);
        assert_eq!(reg.live_orders("XYZ").len(), 2);
    }

    #[test]
    fn ack_accept_and_reject() {
        let mut reg = OrderRegistry::new("r");
        let a = reg.submit(&quote(Side::Buy, 5), 1);
        let b = reg.submit(&quote(Side::Buy, 5), 1);
        assert_eq!(reg.on_ack(&a, Ok("V1".into()), 2), Ok(OrderState::Live));
        assert_eq!(reg.on_ack(&b, Err("no margin".into()), 2), Ok(OrderState::Rejected));
        assert_eq!(reg.get(&b).unwrap().reject_reason.as_deref(), Some("no margin"));
        // duplicate ack is harmless
        assert_eq!(reg.on_ack(&a, Ok("V1".into()), 3), Ok(OrderState::Live));
        assert_eq!(reg.live_orders("XYZ").len(), 1);
    }

    #[test]
    fn unknown_and_conflicting_acks_are_stale() {
        let mut reg = OrderRegistry::new("r");
        let ghost = OrderId("old-7".into());
        assert_eq!(reg.on_ack(&ghost, Ok("V9".into()), 1), Err(StaleAck::UnknownOrder(ghost.clone())));
        let a = reg.submit(&quote(Side::Buy, 5), 1);
        let b = reg.submit(&quote(Side::Buy, 5), 1);
        reg.on_ack(&a, Ok("V1".into()), 2).unwrap();
        assert!(matches!(reg.on_ack(&b, Ok("V1".into()), 2), Err(StaleAck::DuplicateVenueId { .. })));
        assert_eq!(reg.get(&b).unwrap().state, OrderState::Pending);
    }

    #[test]
    fn fills_walk_live_to_filled() {
        let mut reg = OrderRegistry::new("r");
        let id = live_order(&mut reg, 10);
        let f = reg.on_fill(&fill(&id, 1, 4)).unwrap();
        assert_eq!(f.qty, 4);
        assert_eq!(reg.get(&id).unwrap().state, OrderState::PartiallyFilled);
        reg.on_fill(&fill(&id, 2, 6)).unwrap();
        let o = reg.get(&id).unwrap();
        assert_eq!((o.state, o.remaining, o.filled), (OrderState::Filled, 0, 10));
        assert!(reg.live_orders("XYZ").is_empty());
        assert!(matches!(reg.on_fill(&fill(&id, 3, 1)), Err(StaleAck::InvalidState { .. })));
    }

    #[test]
    fn duplicate_fill_is_dropped() {
        let mut reg = OrderRegistry::new("r");
        let id = live_order(&mut reg, 10);
        reg.on_fill(&fill(&id, 1, 4)).unwrap();
        let before = reg.get(&id).unwrap().clone();
        assert!(matches!(reg.on_fill(&fill(&id, 1, 4)), Err(StaleAck::DuplicateFill(_))));
        assert_eq!(reg.get(&id).unwrap(), &before);
    }

    #[test]
    fn overfill_is_clamped_and_side_comes_from_order() {
        let mut reg = OrderRegistry::new("r");
        let id = reg.submit(&quote(Side::Sell, 3), 1);
        reg.on_ack(&id, Ok("V1".into()), 2).unwrap();
        let mut f = fill(&id, 1, 5);
        f.venue_order_id = "V1".into();
        let applied = reg.on_fill(&f).unwrap();
        assert_eq!((applied.qty, applied.side), (3, Side::Sell));
    }

    #[test]
    fn fill_before_ack_promotes_pending() {
        let mut reg = OrderRegistry::new("r");
        let id = reg.submit(&quote(Side::Buy, 10), 1);
        reg.on_fill(&fill(&id, 1, 10)).unwrap();
        let o = reg.get(&id).unwrap();
        assert_eq!(o.state, OrderState::Filled);
        assert_eq!(o.venue_order_id, Some(VenueOrderId(format!("V-{id}"))));
        // late accept is a duplicate
        assert_eq!(reg.on_ack(&id, Ok(VenueOrderId(format!("V-{id}"))), 3), Ok(OrderState::Filled));
    }

    #[test]
    fn request_cancel_only_from_live_states() {
        let mut reg = OrderRegistry::new("r");
        let pending = reg.submit(&quote(Side::Buy, 10), 1);
        assert!(!reg.request_cancel(&pending, 2));
        let id = live_order(&mut reg, 10);
        assert!(reg.request_cancel(&id, 3));
        assert!(!reg.request_cancel(&id, 4));
        assert_eq!(reg.get(&id).unwrap().state, OrderState::Cancelling);
        assert_eq!(reg.on_cancel_ack(&id, 5), Ok(OrderState::Cancelled));
        assert!(!reg.request_cancel(&id, 6));
        assert!(!reg.request_cancel(&OrderId("nope".into()), 6));
    }

    #[test]
    fn cancel_ack_after_fill_is_noop() {
        let mut reg = OrderRegistry::new("r");
        let id = live_order(&mut reg, 10);
        reg.request_cancel(&id, 3);
        reg.on_fill(&fill(&id, 1, 10)).unwrap();
        assert_eq!(reg.on_cancel_ack(&id, 5), Ok(OrderState::Filled));
    }

    fn race(fill_first: bool, qty: i64) -> Order {
        let mut reg = OrderRegistry::new("r");
        let id = live_order(&mut reg, 10);
        assert!(reg.request_cancel(&id, 3));
        if fill_first {
            reg.on_fill(&fill(&id, 1, qty)).unwrap();
            reg.on_cancel_ack(&id, 5).unwrap();
        } else {
            reg.on_cancel_ack(&id, 5).unwrap();
            reg.on_fill(&fill(&id, 1, qty)).unwrap();
        }
        reg.get(&id).unwrap().clone()
    }

    #[test]
    fn fill_cancel_race_is_order_independent() {
        for qty in [4, 10] {
            let a = race(true, qty);
            let b = race(false, qty);
            assert_eq!((a.state, a.filled, a.remaining), (b.state, b.filled, b.remaining));
            assert!(!a.state.is_committed());
        }
        assert_eq!(race(true, 10).state, OrderState::Filled);
        assert_eq!(race(false, 4).state, OrderState::Cancelled);
    }

    #[test]
    fn partial_fill_while_cancelling_keeps_cancel_in_flight() {
        let mut reg = OrderRegistry::new("r");
        let id = live_order(&mut reg, 10);
        reg.request_cancel(&id, 3);
        reg.on_fill(&fill(&id, 1, 4)).unwrap();
        let o = reg.get(&id).unwrap();
        assert_eq!(o.state, OrderState::PartiallyFilled);
        assert!(o.cancel_in_flight);
        assert!(!reg.request_cancel(&id, 4));
        assert_eq!(reg.on_cancel_ack(&id, 5), Ok(OrderState::Cancelled));
    }

    #[test]
    fn stuck_orders_respect_timeout() {
        let mut reg = OrderRegistry::new("r");
        let a = reg.submit(&quote(Side::Buy, 1), 100);
        let b = live_order(&mut reg, 1);
        reg.request_cancel(&b, 150);
        assert!(reg.stuck_orders(150, 100).is_empty());
        assert_eq!(reg.stuck_orders(200, 100), vec![a.clone()]);
        assert_eq!(reg.stuck_orders(260, 100), vec![b, a]);
    }

    #[test]
    fn terminal_orders_are_evicted_after_retention() {
        let mut reg = OrderRegistry::new("r");
        let done = live_order(&mut reg, 10);
        reg.on_fill(&fill(&done, 1, 10)).unwrap();
        let open = live_order(&mut reg, 5);
        assert_eq!(reg.live_orders("XYZ").len(), 1);

        // masih dalam window: fill terlambat tetap dikenali sebagai duplikat
        assert!(reg.prune(50, 100).is_empty());
        assert!(matches!(reg.on_fill(&fill(&done, 1, 10)), Err(StaleAck::DuplicateFill(_))));

        assert_eq!(reg.prune(110, 100), vec![done.clone()]);
        assert_eq!(reg.tracked(), 1);
        assert!(reg.get(&done).is_none());
        assert_eq!(reg.on_fill(&fill(&done, 2, 1)), Err(StaleAck::UnknownOrder(done.clone())));
        // venue id lepas, order hidup tidak tersentuh
        let again = reg.submit(&quote(Side::Buy, 1), 120);
        assert_eq!(reg.on_ack(&again, Ok(VenueOrderId(format!("V-{done}"))), 121), Ok(OrderState::Live));
        assert_eq!(reg.get(&open).unwrap().state, OrderState::Live);
    }

    #[test]
    fn late_fill_after_cancel_extends_retention() {
        let mut reg = OrderRegistry::new("r");
        let id = live_order(&mut reg, 10);
        reg.request_cancel(&id, 3);
        reg.on_cancel_ack(&id, 5).unwrap();
        let mut late = fill(&id, 1, 4);
        late.ts_ns = 90;
        reg.on_fill(&late).unwrap();
        assert!(reg.prune(120, 100).is_empty());
        assert_eq!(reg.get(&id).unwrap().filled, 4);
        assert_eq!(reg.prune(190, 100), vec![id]);
    }

    #[test]
    fn reconcile_filled_at_venue_waits_for_fills() {
        let mut reg = OrderRegistry::new("r");
        let pending = reg.submit(&quote(Side::Buy, 3), 1);
        let filled = VenueOrderStatus::Filled { venue_order_id: "VP".into() };
        assert_eq!(reg.reconcile_status(&pending, &filled, 2), Ok(OrderState::Live));

        let id = live_order(&mut reg, 10);
        reg.request_cancel(&id, 3);
        let filled = VenueOrderStatus::Filled { venue_order_id: VenueOrderId(format!("V-{id}")) };
        assert_eq!(reg.reconcile_status(&id, &filled, 4), Ok(OrderState::Cancelling));
        assert_eq!(reg.on_fill(&fill(&id, 1, 10)).map(|f| f.qty), Ok(10));
        assert_eq!(reg.get(&id).unwrap().state, OrderState::Filled);
    }

    #[test]
    fn reconcile_status_uses_legal_edges() {
        let mut reg = OrderRegistry::new("r");
        let a = reg.submit(&quote(Side::Buy, 1), 1);
        let b = reg.submit(&quote(Side::Buy, 1), 1);
        let c = reg.submit(&quote(Side::Buy, 1), 1);
        let d = reg.submit(&quote(Side::Buy, 1), 1);
        let accepted = VenueOrderStatus::Accepted { venue_order_id: "VA".into() };
        assert_eq!(reg.reconcile_status(&a, &accepted, 9), Ok(OrderState::Live));
        let cancelled = VenueOrderStatus::Cancelled { venue_order_id: "VB".into() };
        assert_eq!(reg.reconcile_status(&b, &cancelled, 9), Ok(OrderState::Cancelled));
        assert_eq!(reg.reconcile_status(&c, &VenueOrderStatus::NotFound, 9), Ok(OrderState::Rejected));
        let rejected = VenueOrderStatus::Rejected { reason: "post only".into() };
        assert_eq!(reg.reconcile_status(&d, &rejected, 9), Ok(OrderState::Rejected));
        // cancel yang ack-nya hilang
        reg.request_cancel(&a, 10);
        assert_eq!(reg.reconcile_status(&a, &VenueOrderStatus::NotFound, 11), Ok(OrderState::Cancelled));
    }

    #[test]
    fn adopt_keeps_client_id_and_binds_venue_id() {
        let mut reg = OrderRegistry::new("r");
        let open = OpenOrder {
            venue_order_id: "V77".into(),
            client_order_id: Some("prev-3".into()),
            symbol: "XYZ".into(),
            side: Side::Sell,
            px: 1010,
            remaining: 7,
        };
        let id = reg.adopt(&open, 1).unwrap();
        assert_eq!(id, OrderId("prev-3".into()));
        let o = reg.get(&id).unwrap();
        assert_eq!((o.state, o.remaining), (OrderState::Live, 7));
        assert!(matches!(reg.adopt(&open, 2), Err(StaleAck::DuplicateVenueId { .. })));
    }
}
