// ===============================
// src/positions.rs (PnL & Inventory tracker)
// ===============================

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use tracing::debug;

use crate::domain::{Exposure, Fill, FillKey, InstrumentId, OrderId, PnlSummary, Position, PositionDelta};

/// Signed inventory, average cost and PnL per instrument.
///
/// Mutated only through [`PositionTracker::apply_fill`] (and the mark used for
/// unrealized PnL). Fills are deduplicated on their [`FillKey`], kept per
/// order so the keys leave together with the order ([`PositionTracker::forget`]).
#[derive(Debug, Default, Clone)]
pub struct PositionTracker {
    positions: HashMap<InstrumentId, Position>,
    applied: HashMap<OrderId, HashSet<u64>>,
}

impl PositionTracker {
    pub fn new() -> Self { Self::default() }

    /// Start from a reconciled position instead of flat.
    pub fn seed(&mut self, symbol: &str, qty: i64, avg_cost_px: i64) {
        let pos = self.entry(symbol);
        pos.qty = qty;
        pos.avg_cost_px = if qty == 0 { 0 } else { avg_cost_px };
        Self::revalue(pos);
    }

    fn entry(&mut self, symbol: &str) -> &mut Position {
        self.positions
            .entry(symbol.to_string())
            .or_insert_with(|| Position { symbol: symbol.to_string(), ..Position::default() })
    }

    /// Volume-weighted average cost; realizes PnL on the reducing part.
    /// Duplicate fill keys are a no-op and return `None`.
    pub fn apply_fill(&mut self, fill: &Fill) -> Option<PositionDelta> {
        if !self.applied.entry(fill.order_id.clone()).or_default().insert(fill.seq) {
            let FillKey(order_id, seq) = fill.key();
            debug!(%order_id, seq, "duplicate fill ignored by tracker");
            return None;
        }

        let entry = self.entry(&fill.symbol);
        let signed_qty = fill.side.sign() * fill.qty;
        let prev_qty = entry.qty;
        let new_qty = prev_qty + signed_qty;
        let mut realized = 0_i64;

        if prev_qty == 0 || prev_qty.signum() == signed_qty.signum() {
            // arah sama -> update avg cost
            let held = prev_qty.abs();
            let num = entry.avg_cost_px * held + fill.px * fill.qty;
            let den = held + fill.qty;
            entry.avg_cost_px = if den == 0 { 0 } else { (num + den / 2) / den };
        } else {
            // arah berlawanan -> realize PnL
            let qty_closed = signed_qty.abs().min(prev_qty.abs());
            realized = (fill.px - entry.avg_cost_px) * qty_closed * prev_qty.signum();
            entry.realized_pnl += realized;
            if new_qty == 0 {
                entry.avg_cost_px = 0;
            } else if new_qty.signum() != prev_qty.signum() {
                // flip: sisa posisi dibuka di harga fill
                entry.avg_cost_px = fill.px;
            }
        }
        entry.qty = new_qty;
        Self::revalue(entry);

        Some(PositionDelta {
            symbol: fill.symbol.clone(),
            qty_before: prev_qty,
            qty_after: new_qty,
            realized_pnl: realized,
        })
    }

    /// Drop the dedup keys of orders the registry has evicted.
    pub fn forget(&mut self, ids: &[OrderId]) {
        for id in ids {
            self.applied.remove(id);
        }
    }

    pub fn mark_to_market(&mut self, symbol: &str, mid: i64) {
        let pos = self.entry(symbol);
        pos.last_mid = mid;
        Self::revalue(pos);
    }

    fn revalue(pos: &mut Position) {
        pos.unrealized_pnl = if pos.qty != 0 && pos.last_mid > 0 {
            (pos.last_mid - pos.avg_cost_px) * pos.qty
        } else {
            0
        };
    }

    pub fn position(&self, symbol: &str) -> Position {
        self.positions
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| Position { symbol: symbol.to_string(), ..Position::default() })
    }

    /// Signed quantity and its notional at the last mark (avg cost if unmarked).
    pub fn current_exposure(&self, symbol: &str) -> Exposure {
        match self.positions.get(symbol) {
            Some(p) => {
                let mark = if p.last_mid > 0 { p.last_mid } else { p.avg_cost_px };
                Exposure { qty: p.qty, notional: p.qty.abs().saturating_mul(mark) }
            }
            None => Exposure::default(),
        }
    }

    pub fn positions(&self) -> Vec<Position> {
        let mut out: Vec<Position> = self.positions.values().cloned().collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        out
    }

    pub fn pnl(&self) -> PnlSummary {
        PnlSummary {
            realized: self.positions.values().map(|p| p.realized_pnl).sum(),
            unrealized: self.positions.values().map(|p| p.unrealized_pnl).sum(),
        }
    }
}
