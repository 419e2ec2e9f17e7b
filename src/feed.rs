// ===============================
// src/feed.rs
// ===============================
//
// Market Data adapters (semua lewat trait `MarketDataFeed`):
// - MockFeed    : random walk, seed tetap -> deterministik
// - ReplayFeed  : putar ulang rekaman JSONL (baris `Md`) atau data in-memory
// - BinanceFeed : Binance WS bookTicker (Sandbox & Mainnet), reconnect dengan
//                 exponential backoff + jitter
//
// `pump` meneruskan snapshot ke intake queue engine.
//
use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt; // for .next()
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader, Lines},
    net::TcpStream,
    time::{sleep, Duration},
};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::binance::{to_scaled, BookTicker};
use crate::domain::{wall_clock_ns, EngineEvent, Event, InstrumentId, MarketSnapshot};
use crate::engine::IntakeTx;
use crate::gateway::{RetryPolicy, SimGateway};
use crate::metrics::TICKS_BY_SYMBOL;

/// Lazy, non-restartable sequence of snapshots.
#[async_trait]
pub trait MarketDataFeed: Send {
    /// `None` once the feed has ended.
    async fn next_snapshot(&mut self) -> Option<MarketSnapshot>;
}

/// Forward every snapshot into the intake queue until the feed ends or the
/// engine goes away. A simulated venue, if given, sees each book first so
/// resting orders the market traded through are filled before the engine
/// requotes.
pub async fn pump<F: MarketDataFeed>(mut feed: F, tx: IntakeTx, sim: Option<Arc<SimGateway>>) -> u64 {
    let mut n: u64 = 0;
    while let Some(md) = feed.next_snapshot().await {
        if let Some(sim) = &sim {
            sim.on_market(&md);
        }
        TICKS_BY_SYMBOL.with_label_values(&[&md.symbol]).inc();
        if tx.send(EngineEvent::MarketData(md)).is_err() {
            break;
        }
        n += 1;
    }
    debug!(snapshots = n, "feed ended");
    n
}

// -----------------------------------------------------------------------------
// Mock
// -----------------------------------------------------------------------------

/// Random-walk book. Paced feeds stamp wall-clock time; unpaced feeds use a
/// synthetic 1 ms clock so runs are reproducible.
pub struct MockFeed {
    symbol: InstrumentId,
    rng: StdRng,
    px_bid: i64,
    pace: Option<Duration>,
    next_ts_ns: i128,
    remaining: Option<u64>,
}

impl MockFeed {
    pub fn new(symbol: impl Into<InstrumentId>, seed: u64) -> Self {
        Self {
            symbol: symbol.into(),
            rng: StdRng::seed_from_u64(seed),
            px_bid: 100_00, // 100.00 (2 desimal)
            pace: None,
            next_ts_ns: 1_000_000_000,
            remaining: None,
        }
    }

    pub fn start_px(mut self, px_bid: i64) -> Self {
        self.px_bid = px_bid.max(1);
        self
    }

    pub fn paced(mut self, every: Duration) -> Self {
        self.pace = Some(every);
        self
    }

    pub fn take(mut self, n: u64) -> Self {
        self.remaining = Some(n);
        self
    }
}

#[async_trait]
impl MarketDataFeed for MockFeed {
    async fn next_snapshot(&mut self) -> Option<MarketSnapshot> {
        if let Some(left) = self.remaining.as_mut() {
            if *left == 0 {
                return None;
            }
            *left -= 1;
        }
        let ts_ns = match self.pace {
            Some(every) => {
                sleep(every).await;
                wall_clock_ns()
            }
            None => {
                self.next_ts_ns += 1_000_000;
                self.next_ts_ns
            }
        };
        let step = self.rng.gen_range(-3..=3);
        self.px_bid = (self.px_bid + step).max(50_00);
        let spread = self.rng.gen_range(1..=3);
        let last_px = self.rng.gen_bool(0.3).then(|| self.px_bid + self.rng.gen_range(0..=spread));
        Some(MarketSnapshot {
            ts_ns,
            symbol: self.symbol.clone(),
            best_bid: self.px_bid,
            bid_size: self.rng.gen_range(1..=50),
            best_ask: self.px_bid + spread,
            ask_size: self.rng.gen_range(1..=50),
            last_px,
        })
    }
}

// -----------------------------------------------------------------------------
// Replay
// -----------------------------------------------------------------------------

enum ReplaySource {
    File { lines: Lines<BufReader<File>>, line_no: u64 },
    Memory(VecDeque<MarketSnapshot>),
}

/// Replays market data from a recorder file (`Md` lines only) or memory.
pub struct ReplayFeed {
    source: ReplaySource,
}

impl ReplayFeed {
    pub async fn open(path: &str) -> std::io::Result<Self> {
        let file = File::open(path).await?;
        info!(%path, "replay: opened");
        Ok(Self { source: ReplaySource::File { lines: BufReader::new(file).lines(), line_no: 0 } })
    }

    pub fn from_snapshots(snaps: impl IntoIterator<Item = MarketSnapshot>) -> Self {
        Self { source: ReplaySource::Memory(snaps.into_iter().collect()) }
    }
}

#[async_trait]
impl MarketDataFeed for ReplayFeed {
    async fn next_snapshot(&mut self) -> Option<MarketSnapshot> {
        match &mut self.source {
            ReplaySource::Memory(q) => q.pop_front(),
            ReplaySource::File { lines, line_no } => loop {
                let line = match lines.next_line().await {
                    Ok(Some(l)) => l,
                    Ok(None) => return None,
                    Err(e) => {
                        error!(error = %e, "replay: read failed, stopping");
                        return None;
                    }
                };
                *line_no += 1;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Event>(&line) {
                    Ok(Event::Md(md)) => return Some(md),
                    Ok(_) => {}
                    Err(e) => warn!(line = *line_no, error = %e, "replay: bad line skipped"),
                }
            },
        }
    }
}

// -----------------------------------------------------------------------------
// Binance bookTicker
// -----------------------------------------------------------------------------

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Best bid/ask from Binance `<symbol>@bookTicker`.
///
/// - `ws_base` dari config:
///     * Sandbox: wss://testnet.binance.vision/ws
///     * Mainnet: wss://stream.binance.com:9443/ws
/// - Harga -> tick dengan `px_scale`, size -> lot dengan `qty_scale`.
pub struct BinanceFeed {
    symbol: InstrumentId,
    ws_url: String,
    px_scale: i64,
    qty_scale: i64,
    backoff: RetryPolicy,
    attempt: u32,
    ws: Option<WsStream>,
}

impl BinanceFeed {
    pub fn new(symbol: &str, ws_base: &str, px_scale: i64, qty_scale: i64) -> Self {
        let topic = format!("{}@bookTicker", symbol.to_lowercase());
        Self {
            symbol: symbol.to_ascii_uppercase(),
            ws_url: format!("{}/{}", ws_base.trim_end_matches('/'), topic),
            px_scale,
            qty_scale,
            // 0.5s..32s + jitter
            backoff: RetryPolicy { max_attempts: u32::MAX, base_delay_ms: 500, max_delay_ms: 32_000 },
            attempt: 0,
            ws: None,
        }
    }

    fn parse(&self, txt: &str) -> Option<MarketSnapshot> {
        let t: BookTicker = serde_json::from_str(txt).ok()?;
        let md = MarketSnapshot {
            ts_ns: wall_clock_ns(),
            symbol: self.symbol.clone(),
            best_bid: to_scaled(&t.bid_px, self.px_scale)?,
            bid_size: to_scaled(&t.bid_qty, self.qty_scale)?,
            best_ask: to_scaled(&t.ask_px, self.px_scale)?,
            ask_size: to_scaled(&t.ask_qty, self.qty_scale)?,
            last_px: None,
        };
        (md.best_bid > 0 && md.best_ask > 0).then_some(md)
    }
}

#[async_trait]
impl MarketDataFeed for BinanceFeed {
    async fn next_snapshot(&mut self) -> Option<MarketSnapshot> {
        loop {
            if self.ws.is_none() {
                if self.attempt > 0 {
                    sleep(self.backoff.delay(self.attempt)).await;
                }
                let url = match Url::parse(&self.ws_url) {
                    Ok(u) => u,
                    Err(e) => {
                        error!(error = %e, ws_url = %self.ws_url, "bad ws url");
                        return None;
                    }
                };
                info!(ws_url = %self.ws_url, "connecting binance bookTicker");
                match connect_async(url).await {
                    Ok((ws, _resp)) => {
                        info!(symbol = %self.symbol, "connected to bookTicker");
                        self.attempt = 0; // reset backoff
                        self.ws = Some(ws);
                    }
                    Err(e) => {
                        error!(error = %e, "connect failed");
                        self.attempt = self.attempt.saturating_add(1);
                    }
                }
                continue;
            }
            let Some(ws) = self.ws.as_mut() else { continue };
            let frame = ws.next().await;
            match frame {
                Some(Ok(m)) if m.is_text() => match m.into_text() {
                    Ok(txt) => {
                        if let Some(md) = self.parse(&txt) {
                            return Some(md);
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to read text frame"),
                },
                Some(Ok(_)) => {} // ignore non-text frames
                Some(Err(e)) => {
                    error!(error = %e, "ws read error");
                    self.ws = None;
                    self.attempt = self.attempt.saturating_add(1);
                }
                None => {
                    info!("bookTicker disconnected, will reconnect");
                    self.ws = None;
                    self.attempt = self.attempt.saturating_add(1);
                }
            }
        }
    }
}
