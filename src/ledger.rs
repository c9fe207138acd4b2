//! Leftover bookkeeping for one run.

use std::collections::{BTreeMap, VecDeque};

use crate::error::{OptimizeError, Result};
use crate::types::{EPS, LengthKey, Remnant, RemnantClass, StockItem};

#[derive(Debug, Clone)]
struct Pool {
    length: f64,
    /// Producing assignment of each identical remnant, oldest first.
    producers: VecDeque<usize>,
}

/// Identical reusable remnants, as offered to the welding assembler.
#[derive(Debug, Clone, PartialEq)]
pub struct RemnantPool {
    pub length: f64,
    pub origins: Vec<usize>,
}

/// Reusable remnants keyed by length.
///
/// A remnant is only visible after the assignment that produced it has been
/// recorded, so a consumer always comes later in application order.
#[derive(Debug, Clone)]
pub struct RemnantLedger {
    waste_threshold: f64,
    pools: BTreeMap<LengthKey, Pool>,
}

impl RemnantLedger {
    pub fn new(waste_threshold: f64) -> Self {
        Self {
            waste_threshold,
            pools: BTreeMap::new(),
        }
    }

    /// Classifies a leftover and files it if reusable. Zero-length leftovers
    /// are dropped.
    pub fn record(&mut self, length: f64, produced_by: usize) -> Option<Remnant> {
        if length <= EPS {
            return None;
        }
        let remnant = Remnant {
            length,
            class: RemnantClass::classify(length, self.waste_threshold),
            produced_by,
        };
        if remnant.class == RemnantClass::Reusable {
            self.pools
                .entry(LengthKey::of(length))
                .or_insert_with(|| Pool {
                    length,
                    producers: VecDeque::new(),
                })
                .producers
                .push_back(produced_by);
        }
        Some(remnant)
    }

    /// Reusable remnants at least `min_length` long, shortest first.
    ///
    /// One candidate per distinct length, represented by its oldest piece.
    /// Nothing is removed until [`RemnantLedger::take_piece`].
    pub fn reclaim(&self, min_length: f64) -> Vec<StockItem> {
        self.pools
            .values()
            .filter(|p| p.length + EPS >= min_length)
            .filter_map(|p| p.producers.front().map(|&origin| StockItem::remnant(p.length, origin)))
            .collect()
    }

    /// Removes one remnant of `length`, the one produced by `origin` when given.
    pub fn take_piece(&mut self, length: f64, origin: Option<usize>) -> Result<()> {
        let missing = || OptimizeError::internal(format!("remnant {length}mm is not in the ledger"));
        let key = LengthKey::of(length);
        let pool = self.pools.get_mut(&key).ok_or_else(missing)?;
        let pos = match origin {
            Some(origin) => pool
                .producers
                .iter()
                .position(|&p| p == origin)
                .ok_or_else(missing)?,
            None => 0,
        };
        pool.producers.remove(pos).ok_or_else(missing)?;
        if pool.producers.is_empty() {
            self.pools.remove(&key);
        }
        Ok(())
    }

    /// Every reusable length with its pieces, longest first, oldest piece
    /// first within a length.
    pub fn pools(&self) -> Vec<RemnantPool> {
        self.pools
            .values()
            .rev()
            .map(|p| RemnantPool {
                length: p.length,
                origins: p.producers.iter().copied().collect(),
            })
            .collect()
    }

    pub fn available_count(&self) -> usize {
        self.pools.values().map(|p| p.producers.len()).sum()
    }

    pub fn longest(&self) -> f64 {
        self.pools.values().map(|p| p.length).fold(0.0, f64::max)
    }

    /// Reusable remnants still unconsumed, in production order.
    pub fn unused(&self) -> Vec<Remnant> {
        let mut remnants: Vec<Remnant> = self
            .pools
            .values()
            .flat_map(|p| {
                p.producers.iter().map(|&produced_by| Remnant {
                    length: p.length,
                    class: RemnantClass::Reusable,
                    produced_by,
                })
            })
            .collect();
        remnants.sort_by_key(|r| r.produced_by);
        remnants
    }
}
