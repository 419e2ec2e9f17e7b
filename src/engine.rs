// ===============================
// src/engine.rs (run loops)
// ===============================
//
// - Live/mock: satu task memegang Coordinator dan membaca intake queue
//   berurutan. Feed, gateway, dan timer hanya mengirim event ke queue.
// - Backtest : ReplayFeed + SimGateway, queue dikuras habis setelah setiap
//   snapshot, jadi hasilnya deterministik.
//
use std::future::Future;
use std::time::Instant;

use tokio::{
    select,
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{debug, info};

use crate::coordinator::{Coordinator, EventReport};
use crate::domain::{wall_clock_ns, EngineEvent, EngineSnapshot, Event};
use crate::feed::MarketDataFeed;
use crate::gateway::{SimGateway, VenueGateway};
use crate::metrics;
use crate::recorder::{intake_event, record};

/// Single intake queue. Unbounded so a gateway pushing acks never blocks on
/// the coordinator that is awaiting that same gateway.
pub type IntakeTx = mpsc::UnboundedSender<EngineEvent>;
pub type IntakeRx = mpsc::UnboundedReceiver<EngineEvent>;

pub fn intake() -> (IntakeTx, IntakeRx) { mpsc::unbounded_channel() }

/// Where the run loop publishes what it sees.
pub struct Outputs {
    pub snapshots: watch::Sender<EngineSnapshot>,
    pub recorder: Option<mpsc::Sender<Event>>,
    pub heartbeat: Duration,
}

/// Periodic `Timer` events drive the stuck-order sweep when the market is quiet.
pub fn spawn_timer(tx: IntakeTx, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            if tx.send(EngineEvent::Timer { ts_ns: wall_clock_ns() }).is_err() {
                break;
            }
        }
    })
}

async fn step<G: VenueGateway>(coord: &mut Coordinator<G>, ev: EngineEvent, rec: &Option<mpsc::Sender<Event>>) -> EventReport {
    if let Some(line) = intake_event(&ev) {
        record(rec, line);
    }
    let kind = ev.kind();
    let started = Instant::now();
    let report = coord.handle(ev).await;
    metrics::observe_event(kind, &report, started.elapsed());
    for a in &report.submitted {
        record(rec, Event::Act(a.clone()));
    }
    if !report.submitted.is_empty() || !report.violations.is_empty() {
        debug!(kind, submitted = report.submitted.len(), violations = report.violations.len(), "event handled");
    }
    report
}

fn publish(snap: &EngineSnapshot, out: &Outputs) {
    metrics::publish_snapshot(snap);
    record(&out.recorder, Event::Snap(snap.clone()));
    out.snapshots.send_replace(snap.clone());
}

/// Handle intake events one at a time until `shutdown` resolves with the
/// queue empty, or every sender is gone. Returns the final state.
pub async fn run<G, S>(mut coord: Coordinator<G>, mut rx: IntakeRx, out: Outputs, shutdown: S) -> EngineSnapshot
where
    G: VenueGateway,
    S: Future<Output = ()>,
{
    let mut heartbeat = interval(out.heartbeat);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut handled: u64 = 0;
    tokio::pin!(shutdown);

    loop {
        select! {
            biased;
            _ = heartbeat.tick() => {
                let snap = coord.inspect();
                info!(
                    events = handled,
                    live_orders = snap.live_orders.len(),
                    realized = snap.pnl.realized,
                    unrealized = snap.pnl.unrealized,
                    degraded = snap.degraded,
                    "heartbeat"
                );
                handled = 0;
                publish(&snap, &out);
            }
            maybe_ev = rx.recv() => {
                let Some(ev) = maybe_ev else { break };
                step(&mut coord, ev, &out.recorder).await;
                handled += 1;
            },
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
        }
    }

    let snap = coord.inspect();
    publish(&snap, &out);
    info!(events = snap.events_handled, "engine stopped");
    snap
}

/// Result of a replayed run.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResult {
    pub snapshots: u64,
    pub actions: Vec<crate::domain::Action>,
    pub final_state: EngineSnapshot,
}

/// Drive `feed` through the coordinator against a simulated venue. The
/// coordinator must have been built around `sim` (e.g. `Arc<SimGateway>`)
/// with `sim` pushing into `tx`/`rx`.
pub async fn run_backtest<F, G>(
    mut feed: F,
    mut coord: Coordinator<G>,
    sim: &SimGateway,
    mut rx: IntakeRx,
    recorder: Option<mpsc::Sender<Event>>,
) -> BacktestResult
where
    F: MarketDataFeed,
    G: VenueGateway,
{
    let mut result = BacktestResult { snapshots: 0, actions: Vec::new(), final_state: EngineSnapshot::default() };
    if let Err(e) = coord.reconcile_on_start(0).await {
        tracing::warn!(error = %e, "start-up reconciliation failed");
    }
    while let Some(md) = feed.next_snapshot().await {
        sim.on_market(&md);
        let mut report = step(&mut coord, EngineEvent::MarketData(md), &recorder).await;
        result.actions.append(&mut report.submitted);
        // kuras ack/fill yang dihasilkan snapshot ini
        while let Ok(ev) = rx.try_recv() {
            let mut report = step(&mut coord, ev, &recorder).await;
            result.actions.append(&mut report.submitted);
        }
        result.snapshots += 1;
    }
    result.final_state = coord.inspect();
    metrics::publish_snapshot(&result.final_state);
    info!(
        snapshots = result.snapshots,
        actions = result.actions.len(),
        realized = result.final_state.pnl.realized,
        unrealized = result.final_state.pnl.unrealized,
        "backtest finished"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::feed::MockFeed;
    use std::sync::Arc;

    fn cfg() -> EngineConfig {
        EngineConfig { run_id: "bt".into(), symbols: vec!["XYZ".into()], ..EngineConfig::default() }
    }

    #[tokio::test]
    async fn run_loop_drains_queue_then_stops() {
        let (tx, rx) = intake();
        let sim = Arc::new(SimGateway::new(tx.clone()));
        let coord = Coordinator::new(cfg(), sim.clone());
        let (snap_tx, snap_rx) = watch::channel(EngineSnapshot::default());
        let out = Outputs { snapshots: snap_tx, recorder: None, heartbeat: Duration::from_secs(3600) };

        crate::feed::pump(MockFeed::new("XYZ", 3).take(20), tx, Some(sim)).await;
        // sim masih memegang sender, jadi berhenti lewat shutdown
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(run(coord, rx, out, async move {
            let _ = stop_rx.await;
        }));
        let _ = stop_tx.send(());
        let final_state = tokio::time::timeout(Duration::from_secs(5), handle).await;
        match final_state {
            Ok(Ok(snap)) => {
                assert!(snap.events_handled >= 20);
                assert_eq!(snap_rx.borrow().events_handled, snap.events_handled);
            }
            other => panic!("run did not stop: {other:?}"),
        }
    }

    #[tokio::test]
    async fn backtest_is_deterministic() {
        async fn once() -> BacktestResult {
            let (tx, rx) = intake();
            let sim = Arc::new(SimGateway::new(tx));
            let coord = Coordinator::new(cfg(), sim.clone());
            run_backtest(MockFeed::new("XYZ", 42).take(300), coord, &sim, rx, None).await
        }
        let a = once().await;
        let b = once().await;
        assert_eq!(a.snapshots, 300);
        assert!(!a.actions.is_empty());
        assert_eq!(a, b);
    }
}
