// ===============================
// src/coordinator.rs (execution coordinator)
// ===============================
//
// Satu event per panggilan `handle`, berurutan. Registry dan tracker hanya
// dimiliki coordinator; pembaca luar mendapat salinan lewat `inspect()`.
//
//   MarketData -> quote -> diff vs live orders -> risk -> gateway + registry
//   Ack        -> registry
//   Fill       -> registry -> tracker -> requote dari snapshot terakhir
//   Timer      -> sweep order yang macet (ack / cancel ack tidak datang)
//
// Setiap event diakhiri sweep lalu prune order terminal yang sudah lewat
// window retensi. Cancel ulang hanya dari sweep, paling banyak sekali.
//
use std::collections::BTreeSet;

use ahash::AHashMap as HashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::domain::{
    Action, EngineEvent, EngineSnapshot, InstrumentId, MarketSnapshot, Order, OrderId, OrderState,
    PositionDelta, Quote, Side,
};
use crate::gateway::{GatewayError, NewOrder, OrderRef, VenueGateway, VenueOrderStatus};
use crate::positions::PositionTracker;
use crate::registry::{OrderRegistry, StaleAck};
use crate::risk::{RiskManager, RiskViolation};
use crate::strategy::QuoteGenerator;

/// What to do with orders already resting at the venue when the engine starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcilePolicy {
    #[default]
    CancelAll,
    Adopt,
    Skip,
}

/// Outcome of one handled event, for the run loop to log and count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventReport {
    pub submitted: Vec<Action>,
    pub violations: Vec<RiskViolation>,
    pub stale: Vec<StaleAck>,
    pub transport_errors: u32,
    pub position_delta: Option<PositionDelta>,
}

pub struct Coordinator<G: VenueGateway> {
    cfg: EngineConfig,
    gateway: G,
    quoter: QuoteGenerator,
    risk: RiskManager,
    registry: OrderRegistry,
    tracker: PositionTracker,
    last_md: HashMap<InstrumentId, MarketSnapshot>,
    // transport failures beruntun per order
    failures: HashMap<OrderId, u32>,
    degraded: BTreeSet<OrderId>,
    // kapan status terakhir ditanyakan, hanya untuk order yang macet
    last_query: HashMap<OrderId, i128>,
    now_ns: i128,
    events_handled: u64,
}

impl<G: VenueGateway> Coordinator<G> {
    pub fn new(cfg: EngineConfig, gateway: G) -> Self {
        let quoter = QuoteGenerator::new(cfg.quoting.clone(), cfg.limits.max_position);
        let risk = RiskManager::new(cfg.limits.clone(), cfg.risk_policy);
        let registry = OrderRegistry::new(cfg.run_id.clone());
        Self {
            cfg,
            gateway,
            quoter,
            risk,
            registry,
            tracker: PositionTracker::new(),
            last_md: HashMap::new(),
            failures: HashMap::new(),
            degraded: BTreeSet::new(),
            last_query: HashMap::new(),
            now_ns: 0,
            events_handled: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig { &self.cfg }
    pub fn gateway(&self) -> &G { &self.gateway }
    pub fn registry(&self) -> &OrderRegistry { &self.registry }
    pub fn tracker(&self) -> &PositionTracker { &self.tracker }
    pub fn is_degraded(&self) -> bool { !self.degraded.is_empty() }

    /// Start from a known position (e.g. balances read at start-up).
    pub fn seed_position(&mut self, symbol: &str, qty: i64, avg_cost_px: i64) {
        self.tracker.seed(symbol, qty, avg_cost_px);
    }

    /// Copy of positions, committed orders, PnL and health.
    pub fn inspect(&self) -> EngineSnapshot {
        EngineSnapshot {
            ts_ns: self.now_ns,
            positions: self.tracker.positions(),
            live_orders: self.registry.all_live_orders(),
            pnl: self.tracker.pnl(),
            degraded: self.is_degraded(),
            degraded_orders: self.degraded.iter().cloned().collect(),
            events_handled: self.events_handled,
        }
    }

    /// Deal with venue-resident orders before the first event.
    /// Returns how many orders were cancelled or adopted.
    pub async fn reconcile_on_start(&mut self, ts_ns: i128) -> Result<usize, GatewayError> {
        self.now_ns = self.now_ns.max(ts_ns);
        let policy = self.cfg.reconcile;
        if policy == ReconcilePolicy::Skip {
            return Ok(0);
        }
        let mut handled = 0;
        for symbol in self.cfg.symbols.clone() {
            let gw = &self.gateway;
            let open = self.cfg.retry.run(|| gw.open_orders(&symbol)).await?;
            if !open.is_empty() {
                info!(%symbol, count = open.len(), ?policy, "orders resting at venue on start");
            }
            for o in open {
                match policy {
                    ReconcilePolicy::Adopt => match self.registry.adopt(&o, ts_ns) {
                        Ok(id) => {
                            info!(order_id = %id, venue_order_id = %o.venue_order_id, "adopted");
                            handled += 1;
                        }
                        Err(e) => warn!(error = %e, "adopt skipped"),
                    },
                    ReconcilePolicy::CancelAll => {
                        let r = OrderRef {
                            order_id: o.client_order_id.clone().unwrap_or_else(|| OrderId(o.venue_order_id.0.clone())),
                            symbol: o.symbol.clone(),
                            venue_order_id: Some(o.venue_order_id.clone()),
                        };
                        let gw = &self.gateway;
                        match self.cfg.retry.run(|| gw.cancel_order(&r)).await {
                            Ok(()) => handled += 1,
                            Err(e) => warn!(venue_order_id = %o.venue_order_id, error = %e, "orphan cancel failed"),
                        }
                    }
                    ReconcilePolicy::Skip => {}
                }
            }
        }
        Ok(handled)
    }

    /// Process one intake event to completion.
    pub async fn handle(&mut self, event: EngineEvent) -> EventReport {
        let mut report = EventReport::default();
        let ts_ns = event.ts_ns();
        self.now_ns = self.now_ns.max(ts_ns);
        self.events_handled += 1;

        match event {
            EngineEvent::MarketData(md) => {
                if !self.cfg.symbols.iter().any(|s| s == &md.symbol) {
                    debug!(symbol = %md.symbol, "market data for unconfigured symbol");
                } else if !md.is_valid() {
                    debug!(symbol = %md.symbol, bid = md.best_bid, ask = md.best_ask, "unusable book, skip");
                } else {
                    self.tracker.mark_to_market(&md.symbol, md.mid());
                    let symbol = md.symbol.clone();
                    self.last_md.insert(symbol.clone(), md);
                    self.requote(&symbol, ts_ns, &mut report).await;
                }
            }
            EngineEvent::Ack(ack) => match self.registry.apply_ack(&ack) {
                Ok(state) => {
                    debug!(order_id = %ack.order_id(), state = state.as_str(), "ack applied");
                    self.clear_failures(ack.order_id());
                }
                Err(e) => {
                    warn!(error = %e, "stale ack dropped");
                    report.stale.push(e);
                }
            },
            EngineEvent::Fill(fill) => match self.registry.on_fill(&fill) {
                Ok(applied) => {
                    report.position_delta = self.tracker.apply_fill(&applied);
                    self.clear_failures(&applied.order_id);
                    self.requote(&applied.symbol, ts_ns, &mut report).await;
                }
                Err(e) => {
                    warn!(error = %e, "stale fill dropped");
                    report.stale.push(e);
                }
            },
            EngineEvent::Timer { .. } => {}
        }

        let now = self.now_ns;
        self.sweep_stuck(now, &mut report).await;
        self.evict_retired(now);
        report
    }

    fn evict_retired(&mut self, now_ns: i128) {
        let evicted = self.registry.prune(now_ns, self.cfg.retain_terminal_ns());
        if evicted.is_empty() {
            return;
        }
        self.tracker.forget(&evicted);
        for id in &evicted {
            self.last_query.remove(id);
            self.failures.remove(id);
            self.degraded.remove(id);
        }
    }

    async fn requote(&mut self, symbol: &str, ts_ns: i128, report: &mut EventReport) {
        let Some(md) = self.last_md.get(symbol) else { return };
        let position = self.tracker.position(symbol);
        let targets = self.quoter.generate(md, &position);
        let live = self.registry.live_orders(symbol);
        let actions = diff_quotes(&targets, &live, self.cfg.requote_threshold_ticks);
        if actions.is_empty() {
            return;
        }
        let decision = self.risk.evaluate(&actions, &position, &live);
        for v in &decision.violations {
            debug!(%symbol, violation = %v, "risk");
        }
        report.violations.extend(decision.violations);
        for action in decision.approved {
            self.execute(action, ts_ns, report).await;
        }
    }

    async fn execute(&mut self, action: Action, ts_ns: i128, report: &mut EventReport) {
        match action {
            Action::Create(quote) => {
                if self.create(&quote, ts_ns, report).await {
                    report.submitted.push(Action::Create(quote));
                }
            }
            Action::Cancel { order_id } => {
                if self.cancel(&order_id, ts_ns, report).await {
                    report.submitted.push(Action::Cancel { order_id });
                }
            }
            Action::Replace { order_id, quote } => {
                // risk sudah menghitung order lama sebagai committed
                self.cancel(&order_id, ts_ns, report).await;
                if self.create(&quote, ts_ns, report).await {
                    report.submitted.push(Action::Replace { order_id, quote });
                }
            }
        }
    }

    /// Never retried: a lost response may still have created the order.
    async fn create(&mut self, quote: &Quote, ts_ns: i128, report: &mut EventReport) -> bool {
        let order_id = self.registry.submit(quote, ts_ns);
        let req = NewOrder {
            order_id: order_id.clone(),
            symbol: quote.symbol.clone(),
            side: quote.side,
            px: quote.px,
            qty: quote.qty,
        };
        let res = self.gateway.create_order(&req).await;
        match res {
            Ok(()) => true,
            Err(GatewayError::Rejected(reason)) => {
                warn!(%order_id, %reason, "create rejected");
                if let Err(e) = self.registry.on_ack(&order_id, Err(reason), ts_ns) {
                    report.stale.push(e);
                }
                false
            }
            Err(e @ GatewayError::Transport(_)) => {
                // tetap Pending: sweep akan query status
                warn!(%order_id, error = %e, "create outcome unknown");
                self.note_failure(&order_id, report);
                false
            }
        }
    }

    async fn cancel(&mut self, order_id: &OrderId, ts_ns: i128, report: &mut EventReport) -> bool {
        if !self.registry.request_cancel(order_id, ts_ns) {
            return false;
        }
        self.send_cancel(order_id, ts_ns, report).await
    }

    async fn send_cancel(&mut self, order_id: &OrderId, ts_ns: i128, report: &mut EventReport) -> bool {
        let Some(r) = self.registry.order_ref(order_id) else { return false };
        let gw = &self.gateway;
        let res = self.cfg.retry.run(|| gw.cancel_order(&r)).await;
        match res {
            Ok(()) => {
                self.clear_failures(order_id);
                true
            }
            Err(GatewayError::Rejected(reason)) => {
                // venue tidak kenal / sudah selesai -> tanya status, jangan kirim ulang
                debug!(%order_id, %reason, "cancel refused, querying status");
                self.query_status(order_id, ts_ns, report).await;
                false
            }
            Err(e) => {
                warn!(%order_id, error = %e, "cancel failed after retries");
                self.note_failure(order_id, report);
                false
            }
        }
    }

    async fn sweep_stuck(&mut self, now_ns: i128, report: &mut EventReport) {
        let timeout = self.cfg.ack_timeout_ns();
        let stuck = self.registry.stuck_orders(now_ns, timeout);
        self.last_query.retain(|id, _| stuck.contains(id));
        for order_id in stuck {
            let due = self.last_query.get(&order_id).map_or(true, |t| now_ns - t >= timeout);
            if !due {
                continue;
            }
            self.last_query.insert(order_id.clone(), now_ns);
            info!(%order_id, "no venue answer within timeout, querying status");
            let resting = self.query_status(&order_id, now_ns, report).await;
            if resting && self.registry.get(&order_id).map_or(false, |o| o.cancel_in_flight) {
                // cancel tidak sampai ke venue: kirim ulang sekali per sweep
                self.send_cancel(&order_id, now_ns, report).await;
            }
        }
    }

    /// Ask the venue what happened to an order and apply the answer.
    /// True when the venue still has it resting and it is not terminal here.
    async fn query_status(&mut self, order_id: &OrderId, ts_ns: i128, report: &mut EventReport) -> bool {
        let Some(r) = self.registry.order_ref(order_id) else { return false };
        let gw = &self.gateway;
        let res = self.cfg.retry.run(|| gw.query_order_status(&r)).await;
        let status = match res {
            Ok(s) => s,
            Err(e) => {
                warn!(%order_id, error = %e, "status query failed");
                self.note_failure(order_id, report);
                return false;
            }
        };
        self.clear_failures(order_id);
        match self.registry.reconcile_status(order_id, &status, ts_ns) {
            Ok(state) => {
                info!(%order_id, state = state.as_str(), ?status, "reconciled with venue");
                if state.is_terminal() {
                    self.last_query.remove(order_id);
                }
                // Filled di venue: fill masih di jalan, cukup tunggu
                matches!(status, VenueOrderStatus::Accepted { .. }) && !state.is_terminal()
            }
            Err(e) => {
                report.stale.push(e);
                false
            }
        }
    }

    fn note_failure(&mut self, order_id: &OrderId, report: &mut EventReport) {
        report.transport_errors += 1;
        let n = self.failures.entry(order_id.clone()).or_insert(0);
        *n += 1;
        if *n >= self.cfg.degrade_after && self.degraded.insert(order_id.clone()) {
            warn!(%order_id, failures = *n, "engine degraded");
        }
    }

    fn clear_failures(&mut self, order_id: &OrderId) {
        self.failures.remove(order_id);
        if self.degraded.remove(order_id) {
            info!(%order_id, degraded = self.is_degraded(), "order recovered");
        }
    }
}

/// Actions turning `live` into `targets` for one instrument.
///
/// Per side: an order whose cancel is in flight no longer counts; a side with
/// a `Pending` order waits for its ack. The first order within `threshold`
/// ticks of the target is kept, the rest are cancelled; with none in
/// tolerance the first order is replaced.
pub fn diff_quotes(targets: &[Quote], live: &[Order], threshold: i64) -> Vec<Action> {
    let mut actions = Vec::new();
    for side in [Side::Buy, Side::Sell] {
        let target = targets.iter().find(|q| q.side == side);
        let orders: Vec<&Order> = live
            .iter()
            .filter(|o| o.side == side && !o.cancel_in_flight && o.state != OrderState::Cancelling)
            .collect();
        if orders.iter().any(|o| o.state == OrderState::Pending) {
            continue;
        }
        let cancel = |o: &Order| Action::Cancel { order_id: o.id.clone() };
        match target {
            None => actions.extend(orders.iter().map(|o| cancel(*o))),
            Some(q) => match orders.iter().position(|o| (o.px - q.px).abs() <= threshold) {
                Some(keep) => actions.extend(
                    orders.iter().enumerate().filter(|(i, _)| *i != keep).map(|(_, o)| cancel(*o)),
                ),
                None => match orders.split_first() {
                    Some((first, rest)) => {
                        actions.push(Action::Replace { order_id: first.id.clone(), quote: q.clone() });
                        actions.extend(rest.iter().map(|o| cancel(*o)));
                    }
                    None => actions.push(Action::Create(q.clone())),
                },
            },
        }
    }
    actions
}
