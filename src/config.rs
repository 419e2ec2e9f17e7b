// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : mm_engine — event-driven market-making engine in Rust
Module  : config.rs
Version : 0.6.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
License : MIT (see LICENSE)

Summary : Quotes two-sided prices with inventory skew, enforces risk limits
          per batch, tracks order lifecycle against venue acks/fills,
          keeps position/PnL, and runs live, mock or backtest through the
          same coordinator.
=============================================================================
*/
use std::str::FromStr;

use clap::Parser;
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coordinator::ReconcilePolicy;
use crate::gateway::RetryPolicy;
use crate::risk::RiskPolicy;
use crate::strategy::{FairValueModel, QuoteConfig, SkewCurve};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("missing required parameter {0}")]
    Missing(&'static str),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field, reason: reason.into() }
}

/// Mode sumber market data / venue trading
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarketMode {
    Mock,
    Backtest,
    BinanceSandbox,
    BinanceMainnet,
}

impl FromStr for MarketMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(MarketMode::Mock),
            "backtest" | "replay" => Ok(MarketMode::Backtest),
            "binance_sandbox" => Ok(MarketMode::BinanceSandbox),
            "binance_mainnet" => Ok(MarketMode::BinanceMainnet),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

impl MarketMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketMode::Mock => "mock",
            MarketMode::Backtest => "backtest",
            MarketMode::BinanceSandbox => "binance_sandbox",
            MarketMode::BinanceMainnet => "binance_mainnet",
        }
    }

    pub fn is_binance(&self) -> bool {
        matches!(self, MarketMode::BinanceSandbox | MarketMode::BinanceMainnet)
    }

    // Endpoint default per mode
    pub fn default_ws_url(&self) -> &'static str {
        match self {
            MarketMode::BinanceMainnet => "wss://stream.binance.com:9443/ws",
            _ => "wss://testnet.binance.vision/ws",
        }
    }

    pub fn default_rest_url(&self) -> &'static str {
        match self {
            MarketMode::BinanceMainnet => "https://api.binance.com",
            _ => "https://testnet.binance.vision",
        }
    }
}

impl FromStr for RiskPolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shrink" => Ok(RiskPolicy::Shrink),
            "reject" => Ok(RiskPolicy::Reject),
            other => Err(format!("unknown risk policy '{other}'")),
        }
    }
}

impl FromStr for ReconcilePolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cancel_all" | "cancel" => Ok(ReconcilePolicy::CancelAll),
            "adopt" => Ok(ReconcilePolicy::Adopt),
            "skip" | "none" => Ok(ReconcilePolicy::Skip),
            other => Err(format!("unknown reconcile policy '{other}'")),
        }
    }
}

/// `mid`, `microprice`, `last_blend:<weight>`
impl FromStr for FairValueModel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.split_once(':') {
            None if s == "mid" => Ok(FairValueModel::Mid),
            None if s == "microprice" || s == "micro" => Ok(FairValueModel::Microprice),
            None if s == "last_blend" => Ok(FairValueModel::LastTradeBlend { weight: 0.5 }),
            Some(("last_blend", w)) => w
                .parse::<f64>()
                .map(|weight| FairValueModel::LastTradeBlend { weight })
                .map_err(|e| format!("bad blend weight '{w}': {e}")),
            _ => Err(format!("unknown fair value model '{s}'")),
        }
    }
}

/// `linear`, `power:<gamma>`
impl FromStr for SkewCurve {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.split_once(':') {
            None if s == "linear" => Ok(SkewCurve::Linear),
            Some(("power", g)) => g
                .parse::<f64>()
                .map(SkewCurve::Power)
                .map_err(|e| format!("bad skew gamma '{g}': {e}")),
            _ => Err(format!("unknown skew curve '{s}'")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Per side, per instrument, in lots.
    pub max_position: i64,
    pub max_order_size: i64,
    pub max_open_orders: usize,
    /// Tick*lot.
    pub max_notional: i64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self { max_position: 100, max_order_size: 50, max_open_orders: 8, max_notional: 2_000_000_000 }
    }
}

/// Everything the coordinator needs, passed by value at construction.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub run_id: String,
    pub symbols: Vec<String>,
    pub limits: RiskLimits,
    pub risk_policy: RiskPolicy,
    pub quoting: QuoteConfig,
    pub requote_threshold_ticks: i64,
    pub ack_timeout_ms: u64,
    pub retry: RetryPolicy,
    pub degrade_after: u32,
    pub reconcile: ReconcilePolicy,
    /// How long a terminal order (and its fill keys) is kept for late acks/fills.
    pub retain_terminal_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run_id: "mm".to_string(),
            symbols: vec!["BTCUSDT".to_string()],
            limits: RiskLimits::default(),
            risk_policy: RiskPolicy::Shrink,
            quoting: QuoteConfig::default(),
            requote_threshold_ticks: 1,
            ack_timeout_ms: 2_000,
            retry: RetryPolicy::default(),
            degrade_after: 3,
            reconcile: ReconcilePolicy::CancelAll,
            retain_terminal_ms: 60_000,
        }
    }
}

impl EngineConfig {
    pub fn ack_timeout_ns(&self) -> i128 { self.ack_timeout_ms as i128 * 1_000_000 }
    pub fn retain_terminal_ns(&self) -> i128 { self.retain_terminal_ms as i128 * 1_000_000 }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let lim = &self.limits;
        if self.run_id.trim().is_empty() {
            return Err(invalid("run_id", "empty"));
        }
        if self.symbols.is_empty() {
            return Err(ConfigError::Missing("symbols"));
        }
        if lim.max_position <= 0 {
            return Err(invalid("max_position", "must be > 0"));
        }
        if lim.max_order_size <= 0 {
            return Err(invalid("max_order_size", "must be > 0"));
        }
        if lim.max_open_orders == 0 {
            return Err(invalid("max_open_orders", "must be > 0"));
        }
        if lim.max_notional <= 0 {
            return Err(invalid("max_notional", "must be > 0"));
        }
        let q = &self.quoting;
        if q.quote_size <= 0 {
            return Err(invalid("quote_size", "must be > 0"));
        }
        if q.half_spread_ticks < 0 || q.max_skew_ticks < 0 {
            return Err(invalid("half_spread_ticks/max_skew_ticks", "must be >= 0"));
        }
        match q.fair_value {
            FairValueModel::LastTradeBlend { weight } if !(0.0..=1.0).contains(&weight) => {
                return Err(invalid("fair_value", format!("blend weight {weight} outside [0, 1]")));
            }
            _ => {}
        }
        if let SkewCurve::Power(g) = q.skew_curve {
            if !(g.is_finite() && g > 0.0) {
                return Err(invalid("skew_curve", format!("gamma {g} must be > 0")));
            }
        }
        if self.requote_threshold_ticks < 0 {
            return Err(invalid("requote_threshold_ticks", "must be >= 0"));
        }
        if self.ack_timeout_ms == 0 {
            return Err(invalid("ack_timeout_ms", "must be > 0"));
        }
        // fill telat masih harus bisa dicocokkan
        if self.retain_terminal_ms < self.ack_timeout_ms {
            return Err(invalid("retain_terminal_ms", "must be >= ack_timeout_ms"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry_max_attempts", "must be >= 1"));
        }
        if self.degrade_after == 0 {
            return Err(invalid("degrade_after", "must be >= 1"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct BinanceSettings {
    pub ws_url: String,
    pub rest_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub recv_window: u64,
    /// Ticks per quote unit (100 = two decimals).
    pub px_scale: i64,
    /// Lots per base unit (1000 = 0.001 step).
    pub qty_scale: i64,
}

#[derive(Parser, Clone, Debug)]
#[command(name = "mm_engine", version, about = "Market-making decision & execution engine")]
pub struct Args {
    /// mock | backtest | binance_sandbox | binance_mainnet
    #[arg(long, env = "MODE", default_value = "mock")]
    pub mode: MarketMode,
    /// SYMBOLS=BTCUSDT,ETHUSDT
    #[arg(long, env = "SYMBOLS", value_delimiter = ',', default_value = "BTCUSDT")]
    pub symbols: Vec<String>,
    #[arg(long, env = "RUN_ID")]
    pub run_id: Option<String>,

    // files/metrics
    #[arg(long, env = "RECORD_FILE")]
    pub record_file: Option<String>,
    #[arg(long, env = "REPLAY_FILE")]
    pub replay_file: Option<String>,
    #[arg(long, env = "METRICS_PORT", default_value_t = 9898)]
    pub metrics_port: u16,
    #[arg(long, env = "SNAPSHOT_EVERY_MS", default_value_t = 1_000)]
    pub snapshot_every_ms: u64,

    // risk
    #[arg(long, env = "MAX_POSITION", default_value_t = 100)]
    pub max_position: i64,
    #[arg(long, env = "MAX_ORDER_SIZE", default_value_t = 50)]
    pub max_order_size: i64,
    #[arg(long, env = "MAX_OPEN_ORDERS", default_value_t = 8)]
    pub max_open_orders: usize,
    #[arg(long, env = "MAX_NOTIONAL", default_value_t = 2_000_000_000)]
    pub max_notional: i64,
    /// shrink | reject
    #[arg(long, env = "RISK_POLICY", default_value = "shrink")]
    pub risk_policy: RiskPolicy,

    // quoting
    /// mid | microprice | last_blend:<w>
    #[arg(long, env = "FAIR_VALUE", default_value = "mid")]
    pub fair_value: FairValueModel,
    #[arg(long, env = "HALF_SPREAD_TICKS", default_value_t = 2)]
    pub half_spread_ticks: i64,
    #[arg(long, env = "QUOTE_SIZE", default_value_t = 10)]
    pub quote_size: i64,
    #[arg(long, env = "MAX_SKEW_TICKS", default_value_t = 4)]
    pub max_skew_ticks: i64,
    /// linear | power:<gamma>
    #[arg(long, env = "SKEW_CURVE", default_value = "linear")]
    pub skew_curve: SkewCurve,
    #[arg(long, env = "REQUOTE_THRESHOLD_TICKS", default_value_t = 1)]
    pub requote_threshold_ticks: i64,

    // execution
    #[arg(long, env = "ACK_TIMEOUT_MS", default_value_t = 2_000)]
    pub ack_timeout_ms: u64,
    #[arg(long, env = "TIMER_MS", default_value_t = 250)]
    pub timer_ms: u64,
    #[arg(long, env = "RETRY_MAX_ATTEMPTS", default_value_t = 3)]
    pub retry_max_attempts: u32,
    #[arg(long, env = "RETRY_BASE_MS", default_value_t = 100)]
    pub retry_base_ms: u64,
    #[arg(long, env = "RETRY_MAX_MS", default_value_t = 2_000)]
    pub retry_max_ms: u64,
    #[arg(long, env = "DEGRADE_AFTER", default_value_t = 3)]
    pub degrade_after: u32,
    /// cancel_all | adopt | skip
    #[arg(long, env = "RECONCILE", default_value = "cancel_all")]
    pub reconcile: ReconcilePolicy,
    #[arg(long, env = "RETAIN_TERMINAL_MS", default_value_t = 60_000)]
    pub retain_terminal_ms: u64,

    // venue
    #[arg(long, env = "BINANCE_WS_URL")]
    pub binance_ws_url: Option<String>,
    #[arg(long, env = "BINANCE_REST_URL")]
    pub binance_rest_url: Option<String>,
    #[arg(long, env = "BINANCE_API_KEY", hide_env_values = true)]
    pub binance_api_key: Option<String>,
    #[arg(long, env = "BINANCE_API_SECRET", hide_env_values = true)]
    pub binance_api_secret: Option<String>,
    #[arg(long, env = "BINANCE_RECV_WINDOW", default_value_t = 5_000)]
    pub binance_recv_window: u64,
    #[arg(long, env = "PX_SCALE", default_value_t = 100)]
    pub px_scale: i64,
    #[arg(long, env = "QTY_SCALE", default_value_t = 1)]
    pub qty_scale: i64,
}

impl Args {
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let symbols: Vec<String> = self
            .symbols
            .iter()
            .map(|x| x.trim())
            .filter(|x| !x.is_empty())
            .map(|x| x.to_ascii_uppercase())
            .collect();
        let run_id = self
            .run_id
            .clone()
            .unwrap_or_else(|| format!("mm{}", chrono::Utc::now().timestamp_millis()));

        let cfg = EngineConfig {
            run_id,
            symbols,
            limits: RiskLimits {
                max_position: self.max_position,
                max_order_size: self.max_order_size,
                max_open_orders: self.max_open_orders,
                max_notional: self.max_notional,
            },
            risk_policy: self.risk_policy,
            quoting: QuoteConfig {
                fair_value: self.fair_value,
                half_spread_ticks: self.half_spread_ticks,
                quote_size: self.quote_size,
                max_skew_ticks: self.max_skew_ticks,
                skew_curve: self.skew_curve,
            },
            requote_threshold_ticks: self.requote_threshold_ticks,
            ack_timeout_ms: self.ack_timeout_ms,
            retry: RetryPolicy {
                max_attempts: self.retry_max_attempts,
                base_delay_ms: self.retry_base_ms,
                max_delay_ms: self.retry_max_ms,
            },
            degrade_after: self.degrade_after,
            reconcile: self.reconcile,
            retain_terminal_ms: self.retain_terminal_ms,
        };
        cfg.validate()?;

        if self.mode == MarketMode::Backtest && self.replay_file.is_none() {
            return Err(ConfigError::Missing("replay_file (REPLAY_FILE) for backtest mode"));
        }
        if self.timer_ms == 0 {
            return Err(invalid("timer_ms", "must be > 0"));
        }
        if self.mode.is_binance() {
            self.binance_settings()?;
        }
        Ok(cfg)
    }

    pub fn binance_settings(&self) -> Result<BinanceSettings, ConfigError> {
        let api_key = self.binance_api_key.clone().ok_or(ConfigError::Missing("BINANCE_API_KEY"))?;
        let api_secret = self.binance_api_secret.clone().ok_or(ConfigError::Missing("BINANCE_API_SECRET"))?;
        if self.px_scale <= 0 || self.qty_scale <= 0 {
            return Err(invalid("px_scale/qty_scale", "must be > 0"));
        }
        Ok(BinanceSettings {
            ws_url: self.binance_ws_url.clone().unwrap_or_else(|| self.mode.default_ws_url().to_string()),
            rest_url: self.binance_rest_url.clone().unwrap_or_else(|| self.mode.default_rest_url().to_string()),
            api_key,
            api_secret,
            recv_window: self.binance_recv_window,
            px_scale: self.px_scale,
            qty_scale: self.qty_scale,
        })
    }
}

/// Read `.env`, parse CLI/env, validate. Errors here are fatal at start-up.
pub fn load() -> Result<(Args, EngineConfig), ConfigError> {
    // Pastikan .env dibaca (agar RECORD_FILE, SYMBOLS, dll ter-load)
    let _ = dotenv();
    let args = Args::parse();
    let cfg = args.engine_config()?;
    Ok((args, cfg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["mm_engine", "--run-id", "t1"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn parses_enums_and_lists() {
        let a = parse(&[
            "--symbols", "btcusdt, ethusdt",
            "--fair-value", "last_blend:0.25",
            "--skew-curve", "power:2",
            "--risk-policy", "reject",
            "--reconcile", "adopt",
        ]);
        let cfg = a.engine_config().unwrap();
        assert_eq!(cfg.symbols, vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
        assert_eq!(cfg.quoting.fair_value, FairValueModel::LastTradeBlend { weight: 0.25 });
        assert_eq!(cfg.quoting.skew_curve, SkewCurve::Power(2.0));
        assert_eq!(cfg.risk_policy, RiskPolicy::Reject);
        assert_eq!(cfg.reconcile, ReconcilePolicy::Adopt);
        assert_eq!(cfg.run_id, "t1");
    }

    #[test]
    fn rejects_malformed_limits() {
        let a = parse(&["--max-position", "0"]);
        assert_eq!(
            a.engine_config(),
            Err(ConfigError::Invalid { field: "max_position", reason: "must be > 0".into() })
        );
        assert!(Args::try_parse_from(["mm_engine", "--fair-value", "vwap"]).is_err());
    }

    #[test]
    fn backtest_needs_replay_file() {
        let a = parse(&["--mode", "backtest"]);
        assert!(matches!(a.engine_config(), Err(ConfigError::Missing(_))));
        let a = parse(&["--mode", "backtest", "--replay-file", "ticks.jsonl"]);
        assert!(a.engine_config().is_ok());
    }

    #[test]
    fn binance_mode_needs_credentials() {
        let a = parse(&["--mode", "binance_sandbox", "--binance-api-key", "k"]);
        if std::env::var("BINANCE_API_SECRET").is_err() {
            assert_eq!(a.engine_config(), Err(ConfigError::Missing("BINANCE_API_SECRET")));
        }
        let a = parse(&["--mode", "binance_sandbox", "--binance-api-key", "k", "--binance-api-secret", "s"]);
        let s = a.binance_settings().unwrap();
        assert_eq!(s.rest_url, "https://testnet.binance.vision");
    }

    #[test]
    fn default_engine_config_is_valid() {
        assert_eq!(EngineConfig::default().validate(), Ok(()));
        let bad = EngineConfig { degrade_after: 0, ..EngineConfig::default() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn retention_must_outlast_the_ack_timeout() {
        let a = parse(&["--ack-timeout-ms", "5000", "--retain-terminal-ms", "1000"]);
        assert_eq!(
            a.engine_config(),
            Err(ConfigError::Invalid { field: "retain_terminal_ms", reason: "must be >= ack_timeout_ms".into() })
        );
        let a = parse(&["--retain-terminal-ms", "30000"]);
        assert_eq!(a.engine_config().unwrap().retain_terminal_ns(), 30_000_000_000);
    }
}
