//! Welded composite candidates: two or more bars spliced end-to-end.

use crate::inventory::CatalogueEntry;
use crate::ledger::RemnantPool;
use crate::types::{EPS, StockItem, StockMember};

/// Nodes explored per composite kept before the search gives up.
const NODES_PER_COMPOSITE: usize = 256;

/// A bar length the assembler may splice in.
#[derive(Debug, Clone)]
struct Part<'a> {
    length: f64,
    available: Option<u32>,
    /// Producing assignments for remnant parts; `None` for catalogue bars.
    origins: Option<&'a [usize]>,
}

impl Part<'_> {
    fn member(&self, nth: u32) -> StockMember {
        match self.origins {
            Some(origins) => StockMember::remnant(self.length, origins[nth as usize]),
            None => StockMember::original(self.length),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WeldingAssembler {
    max_weld_segments: u32,
    max_composites: usize,
}

impl WeldingAssembler {
    pub fn new(max_weld_segments: u32, max_composites: usize) -> Self {
        Self {
            max_weld_segments,
            max_composites,
        }
    }

    pub fn enabled(&self) -> bool {
        self.max_weld_segments > 0
    }

    /// Longest composite the live supply and remnants could produce.
    pub fn longest_composite(&self, supply: &[CatalogueEntry], remnants: &[RemnantPool]) -> f64 {
        let parts = parts(supply, remnants);
        let mut slots = self.max_weld_segments as u64 + 1;
        let mut total = 0.0;
        for part in &parts {
            let take = match part.available {
                Some(n) => slots.min(n as u64),
                None => slots,
            };
            total += part.length * take as f64;
            slots -= take;
            if slots == 0 {
                break;
            }
        }
        total
    }

    /// Fewest welds that splice the live supply and remnants up to `target`,
    /// ignoring the configured limit. `None` when everything left together
    /// still falls short.
    pub fn fewest_welds(
        supply: &[CatalogueEntry],
        remnants: &[RemnantPool],
        target: f64,
    ) -> Option<u32> {
        let mut sum = 0.0;
        let mut pieces: u64 = 0;
        for part in &parts(supply, remnants) {
            let needed = ((target - sum - EPS) / part.length).ceil().max(1.0) as u64;
            let take = match part.available {
                Some(n) => needed.min(n as u64),
                None => needed,
            };
            sum += part.length * take as f64;
            pieces += take;
            if sum + EPS >= target {
                return u32::try_from(pieces - 1).ok();
            }
        }
        None
    }

    /// Composites of 2..=W+1 bars whose length covers `target`.
    ///
    /// Catalogue bars and reusable remnants are drawn as multisets respecting
    /// availability; a composite is never extended once it covers the target.
    /// Results are ordered by weld count, then length.
    pub fn build_composites(
        &self,
        supply: &[CatalogueEntry],
        remnants: &[RemnantPool],
        target: f64,
    ) -> Vec<StockItem> {
        if !self.enabled() {
            return Vec::new();
        }
        let parts = parts(supply, remnants);
        if parts.is_empty() {
            return Vec::new();
        }

        let mut search = CompositeSearch {
            parts: &parts,
            max_members: self.max_weld_segments as usize + 1,
            target,
            used: vec![0; parts.len()],
            members: Vec::new(),
            found: Vec::new(),
            nodes: 0,
            max_nodes: self.max_composites.saturating_mul(NODES_PER_COMPOSITE),
        };
        search.extend(0, 0.0);

        let mut found = search.found;
        found.sort_by(|a, b| {
            a.weld_count
                .cmp(&b.weld_count)
                .then(a.length.total_cmp(&b.length))
        });
        found.truncate(self.max_composites);
        found
    }
}

/// Longest first; remnants ahead of catalogue bars of the same length.
fn parts<'a>(supply: &[CatalogueEntry], remnants: &'a [RemnantPool]) -> Vec<Part<'a>> {
    let mut parts: Vec<Part<'a>> = remnants
        .iter()
        .filter(|r| !r.origins.is_empty())
        .map(|r| Part {
            length: r.length,
            available: Some(r.origins.len() as u32),
            origins: Some(&r.origins),
        })
        .chain(supply.iter().filter(|e| e.in_stock()).map(|e| Part {
            length: e.length,
            available: e.available,
            origins: None,
        }))
        .collect();
    parts.sort_by(|a, b| b.length.total_cmp(&a.length));
    parts
}

struct CompositeSearch<'s, 'a> {
    parts: &'s [Part<'a>],
    max_members: usize,
    target: f64,
    used: Vec<u32>,
    members: Vec<StockMember>,
    found: Vec<StockItem>,
    nodes: usize,
    max_nodes: usize,
}

impl CompositeSearch<'_, '_> {
    fn extend(&mut self, start: usize, sum: f64) {
        self.nodes += 1;
        if self.nodes > self.max_nodes {
            return;
        }
        if self.members.len() >= 2 && sum + EPS >= self.target {
            self.found.push(StockItem::welded(self.members.clone()));
            return;
        }
        let slots = self.max_members - self.members.len();
        if slots == 0 || start >= self.parts.len() {
            return;
        }
        // Longest remaining part in every free slot still falls short.
        if sum + self.parts[start].length * slots as f64 + EPS < self.target {
            return;
        }

        for i in start..self.parts.len() {
            if self.parts[i].available.is_some_and(|n| self.used[i] >= n) {
                continue;
            }
            let member = self.parts[i].member(self.used[i]);
            let length = member.length;
            self.members.push(member);
            self.used[i] += 1;
            self.extend(i, sum + length);
            self.used[i] -= 1;
            self.members.pop();
        }
    }
}
