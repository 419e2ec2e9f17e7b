// ===============================
// src/strategy.rs
// ===============================
//
// Quote generator: snapshot + inventory -> target quotes (bid/ask).
//
// Langkah:
// 1) Fair value dari model yang dipilih (mid / microprice / blend last trade).
// 2) Half-spread simetris di sekitar fair value.
// 3) Inventory skew: posisi long menggeser KEDUA quote ke bawah (jual lebih
//    agresif, beli lebih pasif), short sebaliknya. Besar skew monotonik
//    terhadap posisi / max_position dan jenuh di limit.
//
// Catatan domain harga:
// - best_bid/best_ask dalam tick internal (lihat px_scale di config).
// - Fungsi murni: input sama -> output sama (dipakai juga untuk backtest).
//
use serde::{Deserialize, Serialize};

use crate::domain::{MarketSnapshot, Position, Quote, Side};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FairValueModel {
    Mid,
    /// Mid tilted toward the side with less resting size.
    Microprice,
    /// `(1 - weight) * mid + weight * last_px`.
    LastTradeBlend { weight: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SkewCurve {
    Linear,
    /// `sign(r) * |r|^gamma`
    Power(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteConfig {
    pub fair_value: FairValueModel,
    pub half_spread_ticks: i64,
    pub quote_size: i64,
    pub max_skew_ticks: i64,
    pub skew_curve: SkewCurve,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            fair_value: FairValueModel::Mid,
            half_spread_ticks: 2,
            quote_size: 10,
            max_skew_ticks: 4,
            skew_curve: SkewCurve::Linear,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuoteGenerator {
    cfg: QuoteConfig,
    max_position: i64,
}

impl QuoteGenerator {
    pub fn new(cfg: QuoteConfig, max_position: i64) -> Self { Self { cfg, max_position } }

    pub fn config(&self) -> &QuoteConfig { &self.cfg }

    pub fn fair_value(&self, md: &MarketSnapshot) -> f64 {
        let mid = (md.best_bid + md.best_ask) as f64 / 2.0;
        match self.cfg.fair_value {
            FairValueModel::Mid => mid,
            FairValueModel::Microprice => {
                let depth = md.bid_size + md.ask_size;
                if depth <= 0 {
                    mid
                } else {
                    (md.best_bid as f64 * md.ask_size as f64 + md.best_ask as f64 * md.bid_size as f64)
                        / depth as f64
                }
            }
            FairValueModel::LastTradeBlend { weight } => match md.last_px {
                Some(last) if last > 0 => mid * (1.0 - weight) + last as f64 * weight,
                _ => mid,
            },
        }
    }

    /// Ticks to subtract from both sides; positive when long.
    pub fn skew_ticks(&self, position_qty: i64) -> f64 {
        if self.max_position <= 0 || self.cfg.max_skew_ticks == 0 {
            return 0.0;
        }
        let r = (position_qty as f64 / self.max_position as f64).clamp(-1.0, 1.0);
        let shaped = match self.cfg.skew_curve {
            SkewCurve::Linear => r,
            SkewCurve::Power(gamma) => r.signum() * r.abs().powf(gamma),
        };
        self.cfg.max_skew_ticks as f64 * shaped
    }

    /// Target quotes for one instrument. Empty when the book is unusable.
    pub fn generate(&self, md: &MarketSnapshot, inventory: &Position) -> Vec<Quote> {
        if !md.is_valid() {
            return Vec::new();
        }
        let fair = self.fair_value(md);
        let skew = self.skew_ticks(inventory.qty);
        let half = self.cfg.half_spread_ticks as f64;

        // jangan cross book: tetap pasif
        let mut bid = ((fair - half - skew).floor() as i64).min(md.best_ask - 1).max(1);
        let mut ask = ((fair + half - skew).ceil() as i64).max(md.best_bid + 1);
        if ask <= bid {
            ask = bid + 1;
        }
        if bid >= ask {
            bid = ask - 1;
        }

        let mut out = Vec::with_capacity(2);
        if self.cfg.quote_size > 0 && inventory.qty < self.max_position {
            out.push(Quote { symbol: md.symbol.clone(), side: Side::Buy, px: bid, qty: self.cfg.quote_size });
        }
        if self.cfg.quote_size > 0 && inventory.qty > -self.max_position {
            out.push(Quote { symbol: md.symbol.clone(), side: Side::Sell, px: ask, qty: self.cfg.quote_size });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(bid: i64, ask: i64) -> MarketSnapshot {
        MarketSnapshot {
            ts_ns: 1,
            symbol: "XYZ".into(),
            best_bid: bid,
            bid_size: 10,
            best_ask: ask,
            ask_size: 10,
            last_px: None,
        }
    }

    fn inv(qty: i64) -> Position { Position { symbol: "XYZ".into(), qty, ..Position::default() } }

    fn gen(cfg: QuoteConfig) -> QuoteGenerator { QuoteGenerator::new(cfg, 100) }

    fn px(quotes: &[Quote], side: Side) -> Option<i64> {
        quotes.iter().find(|q| q.side == side).map(|q| q.px)
    }

    #[test]
    fn flat_inventory_quotes_symmetric_around_mid() {
        let g = gen(QuoteConfig { half_spread_ticks: 5, ..QuoteConfig::default() });
        let q = g.generate(&snap(990, 1010), &inv(0));
        assert_eq!(px(&q, Side::Buy), Some(995));
        assert_eq!(px(&q, Side::Sell), Some(1005));
        assert!(q.iter().all(|q| q.qty == 10));
    }

    #[test]
    fn long_inventory_lowers_both_sides() {
        let g = gen(QuoteConfig { half_spread_ticks: 5, max_skew_ticks: 4, ..QuoteConfig::default() });
        let flat = g.generate(&snap(990, 1010), &inv(0));
        let long = g.generate(&snap(990, 1010), &inv(50));
        assert_eq!(px(&long, Side::Buy), Some(993));
        assert_eq!(px(&long, Side::Sell), Some(1003));
        assert!(px(&long, Side::Buy) < px(&flat, Side::Buy));
        assert!(px(&long, Side::Sell) < px(&flat, Side::Sell));

        let short = g.generate(&snap(990, 1010), &inv(-50));
        assert_eq!(px(&short, Side::Buy), Some(997));
        assert_eq!(px(&short, Side::Sell), Some(1007));
    }

    #[test]
    fn skew_is_monotonic_and_saturates() {
        let g = gen(QuoteConfig { max_skew_ticks: 10, skew_curve: SkewCurve::Power(2.0), ..QuoteConfig::default() });
        let mut prev = f64::MIN;
        for qty in (-150..=150).step_by(10) {
            let s = g.skew_ticks(qty);
            assert!(s >= prev);
            prev = s;
        }
        assert_eq!(g.skew_ticks(100), 10.0);
        assert_eq!(g.skew_ticks(500), 10.0);
        assert_eq!(g.skew_ticks(-500), -10.0);
        assert_eq!(g.skew_ticks(50), 2.5);
    }

    #[test]
    fn side_at_limit_is_not_quoted() {
        let g = gen(QuoteConfig::default());
        let q = g.generate(&snap(990, 1010), &inv(100));
        assert_eq!(px(&q, Side::Buy), None);
        assert!(px(&q, Side::Sell).is_some());
        let q = g.generate(&snap(990, 1010), &inv(-100));
        assert_eq!(px(&q, Side::Sell), None);
    }

    #[test]
    fn quotes_never_cross_the_book() {
        let g = gen(QuoteConfig { half_spread_ticks: 0, max_skew_ticks: 50, ..QuoteConfig::default() });
        let q = g.generate(&snap(1000, 1001), &inv(-100 + 1));
        let (b, a) = (px(&q, Side::Buy).unwrap(), px(&q, Side::Sell).unwrap());
        assert!(b <= 1000 && a >= 1001 && b < a);
    }

    #[test]
    fn microprice_leans_toward_thin_side() {
        let g = gen(QuoteConfig { fair_value: FairValueModel::Microprice, ..QuoteConfig::default() });
        let mut md = snap(1000, 1010);
        md.bid_size = 30;
        md.ask_size = 10;
        // banyak bid -> harga cenderung naik
        assert_eq!(g.fair_value(&md), 1007.5);
    }

    #[test]
    fn last_trade_blend_and_invalid_book() {
        let g = gen(QuoteConfig { fair_value: FairValueModel::LastTradeBlend { weight: 0.5 }, ..QuoteConfig::default() });
        let mut md = snap(1000, 1010);
        md.last_px = Some(1025);
        assert_eq!(g.fair_value(&md), 1015.0);
        assert!(g.generate(&snap(1010, 1000), &inv(0)).is_empty());
    }

    #[test]
    fn generation_is_deterministic() {
        let g = gen(QuoteConfig { skew_curve: SkewCurve::Power(1.5), ..QuoteConfig::default() });
        let md = snap(12345, 12360);
        assert_eq!(g.generate(&md, &inv(37)), g.generate(&md, &inv(37)));
    }
}
