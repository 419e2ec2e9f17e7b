// ===============================
// src/main.rs
// ===============================
/*
 # mock (simulated venue), metrics + inspect
 cargo run --release
 curl -s localhost:9898/metrics | egrep '^(orders_total|inventory_qty|pnl_|engine_degraded)'
 curl -s localhost:9898/inspect

 # rekam lalu putar ulang sebagai backtest
 RECORD_FILE=data/run.jsonl cargo run --release
 MODE=backtest REPLAY_FILE=data/run.jsonl cargo run --release
*/
/*
=============================================================================
Project : mm_engine — event-driven market-making engine in Rust
Module  : main.rs
Version : 0.6.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
License : MIT (see LICENSE)

Summary : Quotes two-sided prices with inventory skew, enforces risk limits
          per batch, tracks order lifecycle against venue acks/fills,
          keeps position/PnL, and runs live, mock or backtest through the
          same coordinator.
=============================================================================
*/
use std::sync::Arc;

use tokio::{
    sync::{mpsc, watch},
    time::Duration,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mm_engine::config::{self, MarketMode};
use mm_engine::coordinator::Coordinator;
use mm_engine::domain::{wall_clock_ns, EngineSnapshot, Event};
use mm_engine::engine::{self, IntakeRx, Outputs};
use mm_engine::feed::{self, BinanceFeed, MockFeed, ReplayFeed};
use mm_engine::gateway::{GatewayError, SimGateway, VenueGateway};
use mm_engine::gateway_binance::BinanceGateway;
use mm_engine::{metrics, recorder};

async fn run_live<G: VenueGateway>(
    mut coord: Coordinator<G>,
    rx: IntakeRx,
    out: Outputs,
) -> Result<EngineSnapshot, GatewayError> {
    let n = coord.reconcile_on_start(wall_clock_ns()).await?;
    info!(orders = n, policy = ?coord.config().reconcile, "start-up reconciliation done");
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };
    Ok(engine::run(coord, rx, out, shutdown).await)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ---- Logging ----
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // ---- Load config (fatal only here) ----
    let (args, cfg) = config::load()?;

    // ---- Metrics + inspect ----
    metrics::init();
    metrics::CONFIG_MODE.with_label_values(&[args.mode.as_str()]).set(1);
    for s in &cfg.symbols {
        metrics::CONFIG_SYMBOL.with_label_values(&[s]).set(1);
    }
    let (snap_tx, snap_rx) = watch::channel(EngineSnapshot::default());
    let port = args.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::serve(port, snap_rx).await {
            error!(error = %e, port, "metrics server failed");
        }
    });

    info!(
        mode = args.mode.as_str(),
        run_id = %cfg.run_id,
        symbols = ?cfg.symbols,
        limits = ?cfg.limits,
        risk_policy = ?cfg.risk_policy,
        quoting = ?cfg.quoting,
        requote_threshold_ticks = cfg.requote_threshold_ticks,
        "startup config"
    );

    // ---- Recorder (optional) ----
    let rec_tx = match args.record_file.clone() {
        Some(path) => {
            let (tx, rx) = mpsc::channel::<Event>(8192);
            tokio::spawn(recorder::run(rx, path));
            Some(tx)
        }
        None => None,
    };

    let out = Outputs {
        snapshots: snap_tx,
        recorder: rec_tx.clone(),
        heartbeat: Duration::from_millis(args.snapshot_every_ms.max(1)),
    };
    let timer_every = Duration::from_millis(args.timer_ms);
    let (tx, rx) = engine::intake();

    let final_state = match args.mode {
        MarketMode::Mock => {
            let sim = Arc::new(SimGateway::named(tx.clone(), "sim"));
            for (i, sym) in cfg.symbols.iter().enumerate() {
                let mock = MockFeed::new(sym.clone(), i as u64 + 1).paced(Duration::from_millis(5));
                tokio::spawn(feed::pump(mock, tx.clone(), Some(sim.clone())));
            }
            engine::spawn_timer(tx.clone(), timer_every);
            drop(tx);
            let coord = Coordinator::new(cfg.clone(), sim);
            run_live(coord, rx, out).await?
        }
        MarketMode::Backtest => {
            let path = args.replay_file.clone().unwrap_or_default();
            let replay = ReplayFeed::open(&path).await?;
            let sim = Arc::new(SimGateway::named(tx.clone(), "backtest"));
            let coord = Coordinator::new(cfg.clone(), sim.clone());
            let result = engine::run_backtest(replay, coord, &sim, rx, rec_tx).await;
            let _ = out.snapshots.send_replace(result.final_state.clone());
            result.final_state
        }
        MarketMode::BinanceSandbox | MarketMode::BinanceMainnet => {
            let settings = args.binance_settings()?;
            let gw = Arc::new(BinanceGateway::new(settings.clone(), tx.clone())?);
            let _user_stream = gw.start_user_stream().await?;
            for sym in &cfg.symbols {
                let bf = BinanceFeed::new(sym, &settings.ws_url, settings.px_scale, settings.qty_scale);
                tokio::spawn(feed::pump(bf, tx.clone(), None));
            }
            engine::spawn_timer(tx.clone(), timer_every);
            drop(tx);
            let coord = Coordinator::new(cfg.clone(), gw);
            run_live(coord, rx, out).await?
        }
    };

    match serde_json::to_string(&final_state) {
        Ok(js) => info!(state = %js, "final state"),
        Err(e) => error!(error = %e, "final state not serializable"),
    }
    Ok(())
}
