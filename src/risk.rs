// ===============================
// src/risk.rs
// ===============================
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RiskLimits;
use crate::domain::{Action, Order, Position, Quote, Side};

/// What to do with a create that does not fit the limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskPolicy {
    /// Reduce to the largest size that fits.
    Shrink,
    /// Drop the create.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RiskViolation {
    #[error("invalid quote {symbol} {side:?} px={px} qty={qty}")]
    InvalidQuote { symbol: String, side: Side, px: i64, qty: i64 },
    #[error("quote for {symbol} evaluated against position in {expected}")]
    InstrumentMismatch { symbol: String, expected: String },
    #[error("order size {requested} above max order size {limit}")]
    OrderSize { requested: i64, limit: i64 },
    #[error("{side:?} exposure limit: requested {requested}, headroom {headroom}")]
    Position { side: Side, requested: i64, headroom: i64 },
    #[error("notional limit: requested {requested} lots, at most {allowed} fit")]
    Notional { requested: i64, allowed: i64 },
    #[error("open order limit {limit} reached")]
    OpenOrders { limit: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RiskDecision {
    pub approved: Vec<Action>,
    pub violations: Vec<RiskViolation>,
}

/// Running commitments while a batch is evaluated.
#[derive(Debug, Clone, Copy)]
struct Book {
    position: i64,
    buy_committed: i64,
    sell_committed: i64,
    open_orders: usize,
}

impl Book {
    fn side_exposure(&self, side: Side) -> i64 {
        match side {
            Side::Buy => self.position + self.buy_committed,
            Side::Sell => self.sell_committed - self.position,
        }
    }

    fn commit(&mut self, side: Side, qty: i64) {
        match side {
            Side::Buy => self.buy_committed += qty,
            Side::Sell => self.sell_committed += qty,
        }
        self.open_orders += 1;
    }
}

/// Pre-trade checks. Holds only the static limits; `evaluate` is a pure
/// function of its arguments.
#[derive(Debug, Clone)]
pub struct RiskManager {
    limits: RiskLimits,
    policy: RiskPolicy,
}

impl RiskManager {
    pub fn new(limits: RiskLimits, policy: RiskPolicy) -> Self { Self { limits, policy } }

    pub fn limits(&self) -> &RiskLimits { &self.limits }

    /// Evaluate `actions` in order, each against the effect of the approvals
    /// before it. Cancels always pass; a replace whose new leg fails is
    /// reduced to a cancel of the old order.
    pub fn evaluate(&self, actions: &[Action], position: &Position, live_orders: &[Order]) -> RiskDecision {
        let mut book = Book { position: position.qty, buy_committed: 0, sell_committed: 0, open_orders: 0 };
        for o in live_orders.iter().filter(|o| o.symbol == position.symbol && o.state.is_committed()) {
            match o.side {
                Side::Buy => book.buy_committed += o.remaining,
                Side::Sell => book.sell_committed += o.remaining,
            }
            book.open_orders += 1;
        }

        let mut decision = RiskDecision::default();
        for action in actions {
            match action {
                Action::Cancel { .. } => decision.approved.push(action.clone()),
                Action::Create(quote) => match self.check_create(quote, &position.symbol, &book) {
                    Ok(qty) => {
                        book.commit(quote.side, qty);
                        decision.approved.push(Action::Create(Quote { qty, ..quote.clone() }));
                    }
                    Err(v) => decision.violations.push(v),
                },
                Action::Replace { order_id, quote } => match self.check_create(quote, &position.symbol, &book) {
                    Ok(qty) => {
                        book.commit(quote.side, qty);
                        decision.approved.push(Action::Replace {
                            order_id: order_id.clone(),
                            quote: Quote { qty, ..quote.clone() },
                        });
                    }
                    Err(v) => {
                        decision.violations.push(v);
                        decision.approved.push(Action::Cancel { order_id: order_id.clone() });
                    }
                },
            }
        }
        decision
    }

    fn check_create(&self, q: &Quote, symbol: &str, book: &Book) -> Result<i64, RiskViolation> {
        let lim = &self.limits;
        if q.symbol != symbol {
            return Err(RiskViolation::InstrumentMismatch { symbol: q.symbol.clone(), expected: symbol.to_string() });
        }
        if q.qty <= 0 || q.px <= 0 {
            return Err(RiskViolation::InvalidQuote { symbol: q.symbol.clone(), side: q.side, px: q.px, qty: q.qty });
        }

        // 1) Open orders
        if book.open_orders >= lim.max_open_orders {
            return Err(RiskViolation::OpenOrders { limit: lim.max_open_orders });
        }

        // 2) Order size
        let mut qty = q.qty;
        if qty > lim.max_order_size {
            if self.policy == RiskPolicy::Reject {
                return Err(RiskViolation::OrderSize { requested: qty, limit: lim.max_order_size });
            }
            qty = lim.max_order_size;
        }

        // 3) Position (per side)
        let current = book.side_exposure(q.side);
        let headroom = lim.max_position - current;
        if qty > headroom {
            if headroom <= 0 || self.policy == RiskPolicy::Reject {
                return Err(RiskViolation::Position { side: q.side, requested: qty, headroom: headroom.max(0) });
            }
            qty = headroom;
        }

        // 4) Notional (resulting side exposure at order price)
        let allowed = lim.max_notional / q.px - current;
        if qty > allowed {
            if allowed <= 0 || self.policy == RiskPolicy::Reject {
                return Err(RiskViolation::Notional { requested: qty, allowed: allowed.max(0) });
            }
            qty = allowed;
        }

        Ok(qty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderId, OrderState, VenueOrderId};
    use proptest::prelude::*;

    fn limits() -> RiskLimits {
        RiskLimits { max_position: 100, max_order_size: 80, max_open_orders: 4, max_notional: 10_000_000 }
    }

    fn quote(side: Side, px: i64, qty: i64) -> Quote { Quote { symbol: "XYZ".into(), side, px, qty } }

    fn pos(qty: i64) -> Position { Position { symbol: "XYZ".into(), qty, ..Position::default() } }

    fn live(id: &str, side: Side, remaining: i64, state: OrderState) -> Order {
        Order {
            id: OrderId(id.into()),
            symbol: "XYZ".into(),
            side,
            px: 1000,
            qty: remaining,
            remaining,
            filled: 0,
            state,
            venue_order_id: Some(VenueOrderId(format!("V{id}"))),
            cancel_in_flight: false,
            reject_reason: None,
            created_ns: 0,
            updated_ns: 0,
        }
    }

    #[test]
    fn shrinks_create_to_position_cap() {
        let rm = RiskManager::new(limits(), RiskPolicy::Shrink);
        let d = rm.evaluate(&[Action::Create(quote(Side::Buy, 1000, 60))], &pos(50), &[]);
        assert_eq!(d.approved, vec![Action::Create(quote(Side::Buy, 1000, 50))]);
        assert!(d.violations.is_empty());
    }

    #[test]
    fn reject_policy_drops_oversize_create() {
        let rm = RiskManager::new(limits(), RiskPolicy::Reject);
        let d = rm.evaluate(&[Action::Create(quote(Side::Buy, 1000, 60))], &pos(50), &[]);
        assert!(d.approved.is_empty());
        assert!(matches!(d.violations[0], RiskViolation::Position { side: Side::Buy, .. }));
    }

    #[test]
    fn batch_approves_only_the_prefix_that_fits() {
        let rm = RiskManager::new(limits(), RiskPolicy::Reject);
        let a = Action::Create(quote(Side::Buy, 1000, 60));
        let b = Action::Create(quote(Side::Buy, 999, 60));
        // each alone passes
        assert_eq!(rm.evaluate(std::slice::from_ref(&a), &pos(0), &[]).approved.len(), 1);
        assert_eq!(rm.evaluate(std::slice::from_ref(&b), &pos(0), &[]).approved.len(), 1);
        let d = rm.evaluate(&[a.clone(), b], &pos(0), &[]);
        assert_eq!(d.approved, vec![a]);
        assert_eq!(d.violations.len(), 1);
    }

    #[test]
    fn committed_orders_count_including_pending_and_cancelling() {
        let rm = RiskManager::new(limits(), RiskPolicy::Shrink);
        let orders = vec![
            live("1", Side::Buy, 30, OrderState::Pending),
            live("2", Side::Buy, 30, OrderState::Cancelling),
            live("3", Side::Buy, 30, OrderState::Filled),
        ];
        let d = rm.evaluate(&[Action::Create(quote(Side::Buy, 1000, 80))], &pos(10), &orders);
        assert_eq!(d.approved, vec![Action::Create(quote(Side::Buy, 1000, 30))]);
    }

    #[test]
    fn long_position_frees_sell_side() {
        let rm = RiskManager::new(limits(), RiskPolicy::Reject);
        let d = rm.evaluate(&[Action::Create(quote(Side::Sell, 1000, 80))], &pos(100), &[]);
        assert_eq!(d.approved.len(), 1);
    }

    #[test]
    fn cancels_always_pass_and_failed_replace_becomes_cancel() {
        let rm = RiskManager::new(limits(), RiskPolicy::Reject);
        let orders = vec![live("1", Side::Buy, 50, OrderState::Live)];
        let actions = vec![
            Action::Cancel { order_id: OrderId("9".into()) },
            Action::Replace { order_id: OrderId("1".into()), quote: quote(Side::Buy, 1001, 60) },
        ];
        let d = rm.evaluate(&actions, &pos(0), &orders);
        assert_eq!(
            d.approved,
            vec![
                Action::Cancel { order_id: OrderId("9".into()) },
                Action::Cancel { order_id: OrderId("1".into()) },
            ]
        );
        assert_eq!(d.violations.len(), 1);
    }

    #[test]
    fn order_size_and_open_orders_limits() {
        let rm = RiskManager::new(limits(), RiskPolicy::Shrink);
        let d = rm.evaluate(&[Action::Create(quote(Side::Sell, 1000, 95))], &pos(0), &[]);
        assert_eq!(d.approved, vec![Action::Create(quote(Side::Sell, 1000, 80))]);

        let full: Vec<Order> = (0..4).map(|i| live(&i.to_string(), Side::Sell, 1, OrderState::Live)).collect();
        let d = rm.evaluate(&[Action::Create(quote(Side::Buy, 1000, 1))], &pos(0), &full);
        assert_eq!(d.violations, vec![RiskViolation::OpenOrders { limit: 4 }]);
    }

    #[test]
    fn notional_limit_shrinks() {
        let lim = RiskLimits { max_notional: 50_000, ..limits() };
        let rm = RiskManager::new(lim, RiskPolicy::Shrink);
        let d = rm.evaluate(&[Action::Create(quote(Side::Buy, 1000, 80))], &pos(20), &[]);
        assert_eq!(d.approved, vec![Action::Create(quote(Side::Buy, 1000, 30))]);
    }

    #[test]
    fn rejects_other_instrument_and_bad_quotes() {
        let rm = RiskManager::new(limits(), RiskPolicy::Shrink);
        let other = Quote { symbol: "ABC".into(), side: Side::Buy, px: 10, qty: 1 };
        let d = rm.evaluate(&[Action::Create(other), Action::Create(quote(Side::Buy, 0, 1))], &pos(0), &[]);
        assert!(d.approved.is_empty());
        assert_eq!(d.violations.len(), 2);
    }

    proptest! {
        #[test]
        fn approved_batch_never_exceeds_side_limits(
            start in -100i64..=100,
            reqs in proptest::collection::vec((any::<bool>(), 1i64..150, 1i64..2000), 0..12),
            shrink in any::<bool>(),
        ) {
            let policy = if shrink { RiskPolicy::Shrink } else { RiskPolicy::Reject };
            let lim = RiskLimits { max_open_orders: 64, ..limits() };
            let rm = RiskManager::new(lim.clone(), policy);
            let actions: Vec<Action> = reqs
                .iter()
                .map(|(buy, qty, px)| Action::Create(quote(if *buy { Side::Buy } else { Side::Sell }, *px, *qty)))
                .collect();
            let d = rm.evaluate(&actions, &pos(start), &[]);
            let mut buys = 0;
            let mut sells = 0;
            for a in &d.approved {
                if let Action::Create(q) = a {
                    prop_assert!(q.qty > 0 && q.qty <= lim.max_order_size);
                    match q.side {
                        Side::Buy => buys += q.qty,
                        Side::Sell => sells += q.qty,
                    }
                }
            }
            // approved creates never open exposure beyond what was already there
            prop_assert!(buys == 0 || start + buys <= lim.max_position);
            prop_assert!(sells == 0 || sells - start <= lim.max_position);
        }
    }
}
