//! Cutting pattern enumeration for a single stock length.
//!
//! A bounded depth-first search over counts of each outstanding demand
//! length, longest first. The greedy longest-fit-first pattern seeds the
//! candidate set, so when the node cap is hit the result is still the best
//! of greedy and whatever the partial search reached. The cap is a node
//! count, never a clock, which keeps results reproducible.

use std::cmp::Ordering;

use crate::types::{CuttingPattern, EPS, PatternCut, RemnantClass, approx_cmp};

/// Outstanding demand offered to the generator.
#[derive(Debug, Clone, Copy)]
pub struct DemandSlot<'a> {
    /// Index into the normalized demand list.
    pub demand: usize,
    pub id: &'a str,
    pub length: f64,
    pub remaining: u32,
}

/// Ranking key for patterns, lower is better: leftover first (most length
/// used), then the number of distinct cut lengths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternScore {
    pub leftover: f64,
    pub distinct: usize,
}

impl PatternScore {
    pub fn of(pattern: &CuttingPattern) -> Self {
        Self {
            leftover: pattern.leftover,
            distinct: pattern.distinct_lengths(),
        }
    }

    pub fn compare(&self, other: &Self) -> Ordering {
        approx_cmp(self.leftover, other.leftover).then(self.distinct.cmp(&other.distinct))
    }

    pub fn is_better_than(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Less
    }

    /// No pattern can beat this one.
    fn is_perfect(&self) -> bool {
        self.leftover <= EPS && self.distinct <= 1
    }
}

/// Ranked candidates for one stock length, best first. Patterns with equal
/// scores keep the order in which they were found.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    pub patterns: Vec<CuttingPattern>,
    /// The node cap stopped enumeration early.
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct PatternGenerator {
    max_nodes: usize,
    max_patterns: usize,
}

impl PatternGenerator {
    pub fn new(max_nodes: usize, max_patterns: usize) -> Self {
        Self {
            max_nodes,
            max_patterns: max_patterns.max(1),
        }
    }

    /// Candidate patterns for `stock_length`, best first.
    ///
    /// With an `anchor`, every pattern cuts that demand item at least once;
    /// an empty set means the anchor does not fit.
    pub fn generate(
        &self,
        stock_length: f64,
        slots: &[DemandSlot<'_>],
        anchor: Option<usize>,
        waste_threshold: f64,
    ) -> PatternSet {
        let mut order: Vec<DemandSlot<'_>> = slots
            .iter()
            .filter(|s| s.remaining > 0 && s.length <= stock_length + EPS)
            .copied()
            .collect();
        order.sort_by(|a, b| b.length.total_cmp(&a.length).then(a.demand.cmp(&b.demand)));

        let mut counts = vec![0u32; order.len()];
        let mut capacity = stock_length;
        if let Some(anchor) = anchor {
            let Some(pos) = order.iter().position(|s| s.demand == anchor) else {
                return PatternSet::default();
            };
            counts[pos] = 1;
            capacity -= order[pos].length;
        }
        if order.is_empty() {
            return PatternSet::default();
        }

        let mut search = Search {
            slots: &order,
            stock_length,
            waste_threshold,
            counts,
            best: Vec::new(),
            max_patterns: self.max_patterns,
            nodes: 0,
            max_nodes: self.max_nodes,
            truncated: false,
            perfect: false,
        };

        let greedy = search.greedy(capacity);
        search.offer(&greedy);
        if !search.perfect {
            search.descend(0, capacity);
        }

        if search.truncated {
            tracing::debug!(
                stock_length,
                nodes = search.nodes,
                "pattern enumeration capped, keeping greedy fallback"
            );
        }

        let patterns = search
            .best
            .iter()
            .map(|(_, counts)| build_pattern(&order, counts, stock_length, waste_threshold))
            .collect();

        PatternSet {
            patterns,
            truncated: search.truncated,
        }
    }
}

fn build_pattern(
    order: &[DemandSlot<'_>],
    counts: &[u32],
    stock_length: f64,
    waste_threshold: f64,
) -> CuttingPattern {
    let cuts: Vec<PatternCut> = order
        .iter()
        .zip(counts)
        .filter(|&(_, &count)| count > 0)
        .map(|(slot, &count)| PatternCut {
            demand: slot.demand,
            demand_id: slot.id.to_string(),
            length: slot.length,
            count,
        })
        .collect();
    let used: f64 = cuts.iter().map(|c| c.length * c.count as f64).sum();
    let mut leftover = stock_length - used;
    if leftover.abs() <= EPS {
        leftover = 0.0;
    }
    CuttingPattern {
        stock_length,
        cuts,
        leftover,
        leftover_class: RemnantClass::classify(leftover, waste_threshold),
    }
}

struct Search<'s, 'a> {
    slots: &'s [DemandSlot<'a>],
    stock_length: f64,
    waste_threshold: f64,
    counts: Vec<u32>,
    best: Vec<(PatternScore, Vec<u32>)>,
    max_patterns: usize,
    nodes: usize,
    max_nodes: usize,
    truncated: bool,
    perfect: bool,
}

impl Search<'_, '_> {
    fn max_extra(&self, k: usize, capacity: f64) -> u32 {
        let slot = &self.slots[k];
        let available = slot.remaining - self.counts[k];
        if capacity + EPS < slot.length {
            return 0;
        }
        let fit = ((capacity + EPS) / slot.length).floor();
        if fit >= available as f64 {
            available
        } else {
            fit as u32
        }
    }

    /// Longest-fit-first: take as many of each length as still fit.
    fn greedy(&self, mut capacity: f64) -> Vec<u32> {
        let mut counts = self.counts.clone();
        for k in 0..self.slots.len() {
            let take = {
                let slot = &self.slots[k];
                let available = slot.remaining - counts[k];
                let fit = ((capacity + EPS) / slot.length).floor().max(0.0);
                if fit >= available as f64 {
                    available
                } else {
                    fit as u32
                }
            };
            counts[k] += take;
            capacity -= self.slots[k].length * take as f64;
        }
        counts
    }

    fn descend(&mut self, k: usize, capacity: f64) {
        if self.truncated || self.perfect {
            return;
        }
        self.nodes += 1;
        if self.nodes > self.max_nodes {
            self.truncated = true;
            return;
        }

        let shortest = self.slots[self.slots.len() - 1].length;
        if k == self.slots.len() || capacity + EPS < shortest {
            let counts = self.counts.clone();
            self.offer(&counts);
            return;
        }

        let length = self.slots[k].length;
        for extra in (0..=self.max_extra(k, capacity)).rev() {
            self.counts[k] += extra;
            self.descend(k + 1, capacity - length * extra as f64);
            self.counts[k] -= extra;
            if self.truncated || self.perfect {
                break;
            }
        }
    }

    fn offer(&mut self, counts: &[u32]) {
        if counts.iter().all(|&c| c == 0) {
            return;
        }
        if self.best.iter().any(|(_, c)| c == counts) {
            return;
        }
        let pattern = build_pattern(self.slots, counts, self.stock_length, self.waste_threshold);
        let score = PatternScore::of(&pattern);

        let pos = self
            .best
            .iter()
            .position(|(s, _)| score.is_better_than(s))
            .unwrap_or(self.best.len());
        if pos >= self.max_patterns {
            return;
        }
        self.best.insert(pos, (score, counts.to_vec()));
        self.best.truncate(self.max_patterns);
        if pos == 0 && score.is_perfect() {
            self.perfect = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots<'a>(items: &[(&'a str, f64, u32)]) -> Vec<DemandSlot<'a>> {
        items
            .iter()
            .enumerate()
            .map(|(demand, &(id, length, remaining))| DemandSlot {
                demand,
                id,
                length,
                remaining,
            })
            .collect()
    }

    fn assert_patterns_valid(set: &PatternSet, stock_length: f64, demand: &[DemandSlot<'_>]) {
        for p in &set.patterns {
            assert!(p.leftover >= 0.0, "negative leftover {}", p.leftover);
            assert!(
                (p.used_length() + p.leftover - stock_length).abs() < 1e-6,
                "pattern does not sum to stock: {p:?}"
            );
            for c in &p.cuts {
                assert!(c.count <= demand[c.demand].remaining);
            }
            assert!(p.check(stock_length).is_ok());
        }
    }

    #[test]
    fn test_exact_fit() {
        let demand = slots(&[("A", 5900.0, 1), ("B", 90.0, 1)]);
        let set = PatternGenerator::new(10_000, 4).generate(6000.0, &demand, Some(0), 100.0);
        assert_patterns_valid(&set, 6000.0, &demand);
        let best = &set.patterns[0];
        assert_eq!(best.piece_count(), 2);
        assert!((best.leftover - 10.0).abs() < 1e-9);
        assert_eq!(best.leftover_class, RemnantClass::Waste);
    }

    #[test]
    fn test_anchor_always_cut() {
        let demand = slots(&[("A", 4000.0, 1), ("B", 3000.0, 2)]);
        let set = PatternGenerator::new(10_000, 4).generate(6000.0, &demand, Some(0), 100.0);
        assert_patterns_valid(&set, 6000.0, &demand);
        assert!(!set.patterns.is_empty());
        for p in &set.patterns {
            assert!(p.cuts.iter().any(|c| c.demand == 0));
        }
    }

    #[test]
    fn test_anchor_too_long_yields_nothing() {
        let demand = slots(&[("A", 6100.0, 1)]);
        let set = PatternGenerator::new(10_000, 4).generate(6000.0, &demand, Some(0), 100.0);
        assert!(set.patterns.is_empty());
    }

    #[test]
    fn test_minimizes_leftover() {
        // 2500+3450 leaves 50, 2500+2500 leaves 1000
        let demand = slots(&[("A", 3450.0, 1), ("B", 2500.0, 3)]);
        let set = PatternGenerator::new(10_000, 4).generate(6000.0, &demand, Some(1), 100.0);
        assert_patterns_valid(&set, 6000.0, &demand);
        let best = &set.patterns[0];
        assert!((best.leftover - 50.0).abs() < 1e-9);
        assert_eq!(best.leftover_class, RemnantClass::Waste);
        assert_eq!(best.distinct_lengths(), 2);
        let second = &set.patterns[1];
        assert_eq!(second.leftover_class, RemnantClass::Reusable);
    }

    #[test]
    fn test_tie_breaks_on_fewer_distinct_lengths() {
        let demand = slots(&[("A", 3000.0, 2), ("B", 2000.0, 1), ("C", 1000.0, 1)]);
        let set = PatternGenerator::new(10_000, 4).generate(6000.0, &demand, Some(0), 100.0);
        let best = &set.patterns[0];
        assert_eq!(best.cuts.len(), 1);
        assert_eq!(best.cuts[0].count, 2);
        assert_eq!(best.leftover, 0.0);
    }

    #[test]
    fn test_node_cap_falls_back_to_greedy() {
        let demand = slots(&[
            ("A", 1730.0, 9),
            ("B", 1210.0, 9),
            ("C", 870.0, 9),
            ("D", 530.0, 9),
            ("E", 310.0, 9),
        ]);
        let capped = PatternGenerator::new(3, 4).generate(12000.0, &demand, Some(0), 100.0);
        assert!(capped.truncated);
        assert!(!capped.patterns.is_empty());
        assert_patterns_valid(&capped, 12000.0, &demand);

        let full = PatternGenerator::new(1_000_000, 4).generate(12000.0, &demand, Some(0), 100.0);
        assert!(
            !PatternScore::of(&capped.patterns[0])
                .is_better_than(&PatternScore::of(&full.patterns[0]))
        );
    }

    #[test]
    fn test_deterministic() {
        let demand = slots(&[("A", 2310.0, 4), ("B", 1520.0, 7), ("C", 640.0, 3)]);
        let generator = PatternGenerator::new(50, 4);
        let a = generator.generate(9000.0, &demand, Some(0), 150.0);
        let b = generator.generate(9000.0, &demand, Some(0), 150.0);
        assert_eq!(a.patterns, b.patterns);
        assert_eq!(a.truncated, b.truncated);
    }

    #[test]
    fn test_candidate_set_is_ranked() {
        let demand = slots(&[("A", 2310.0, 4), ("B", 1520.0, 7), ("C", 640.0, 3)]);
        let set = PatternGenerator::new(100_000, 4).generate(9000.0, &demand, None, 150.0);
        assert_patterns_valid(&set, 9000.0, &demand);
        assert!(set.patterns.len() > 1);
        for pair in set.patterns.windows(2) {
            assert!(
                !PatternScore::of(&pair[1]).is_better_than(&PatternScore::of(&pair[0]))
            );
        }
    }
}
