use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{OptimizeError, Result};

/// Tolerance in millimetres for every length comparison in the engine.
pub const EPS: f64 = 1e-6;

/// Compares two lengths, treating values within [`EPS`] as equal.
pub fn approx_cmp(a: f64, b: f64) -> Ordering {
    if (a - b).abs() <= EPS {
        Ordering::Equal
    } else {
        a.total_cmp(&b)
    }
}

/// Integer key for a length, in micrometres. Lengths that round to the
/// same key are treated as the same bar size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LengthKey(i64);

impl LengthKey {
    pub fn of(length: f64) -> Self {
        Self((length * 1000.0).round() as i64)
    }
}

/// A required cut length with the quantity still to be produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemandItem {
    pub id: String,
    pub length: f64,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specification: Option<String>,
    /// Cross-section area in mm².
    pub cross_section: f64,
    /// Ids of every design segment merged into this item.
    #[serde(default)]
    pub sources: Vec<String>,
}

impl DemandItem {
    pub fn total_length(&self) -> f64 {
        self.length * self.quantity as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Provenance {
    Original,
    Remnant,
    Welded,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Provenance::Original => "original",
            Provenance::Remnant => "remnant",
            Provenance::Welded => "welded",
        };
        f.write_str(name)
    }
}

/// A physical bar inside a [`StockItem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockMember {
    pub length: f64,
    /// `Original` or `Remnant`; members are never themselves welded.
    pub provenance: Provenance,
    /// Assignment whose leftover this remnant is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<usize>,
}

impl StockMember {
    pub fn original(length: f64) -> Self {
        Self {
            length,
            provenance: Provenance::Original,
            origin: None,
        }
    }

    pub fn remnant(length: f64, origin: usize) -> Self {
        Self {
            length,
            provenance: Provenance::Remnant,
            origin: Some(origin),
        }
    }
}

/// One physical (or welded) bar that a pattern is cut from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockItem {
    pub length: f64,
    pub provenance: Provenance,
    pub weld_count: u32,
    /// Bars spliced end-to-end, longest first. A single entry unless welded.
    pub members: Vec<StockMember>,
}

impl StockItem {
    pub fn original(length: f64) -> Self {
        Self {
            length,
            provenance: Provenance::Original,
            weld_count: 0,
            members: vec![StockMember::original(length)],
        }
    }

    pub fn remnant(length: f64, origin: usize) -> Self {
        Self {
            length,
            provenance: Provenance::Remnant,
            weld_count: 0,
            members: vec![StockMember::remnant(length, origin)],
        }
    }

    /// Joins `members` end-to-end. Callers pass at least two members.
    pub fn welded(mut members: Vec<StockMember>) -> Self {
        members.sort_by(|a, b| b.length.total_cmp(&a.length));
        Self {
            length: members.iter().map(|m| m.length).sum(),
            provenance: Provenance::Welded,
            weld_count: members.len().saturating_sub(1) as u32,
            members,
        }
    }

    /// Length drawn new from the catalogue; remnant members were paid for
    /// when their parent bar was cut.
    pub fn fresh_length(&self) -> f64 {
        self.members
            .iter()
            .filter(|m| m.provenance == Provenance::Original)
            .map(|m| m.length)
            .sum()
    }

    pub fn remnant_members(&self) -> impl Iterator<Item = &StockMember> {
        self.members
            .iter()
            .filter(|m| m.provenance == Provenance::Remnant)
    }
}

impl std::fmt::Display for StockItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.provenance {
            Provenance::Welded => {
                let parts: Vec<String> = self
                    .members
                    .iter()
                    .map(|m| match m.provenance {
                        Provenance::Remnant => format!("{}r", m.length),
                        _ => format!("{}", m.length),
                    })
                    .collect();
                let plural = if self.weld_count == 1 { "" } else { "s" };
                write!(
                    f,
                    "{} ({}, {} weld{plural})",
                    self.length,
                    parts.join("+"),
                    self.weld_count
                )
            }
            Provenance::Remnant => write!(f, "{} (remnant)", self.length),
            Provenance::Original => write!(f, "{}", self.length),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RemnantClass {
    Waste,
    Reusable,
}

impl RemnantClass {
    /// Leftovers shorter than the threshold are scrap.
    pub fn classify(leftover: f64, waste_threshold: f64) -> Self {
        if leftover + EPS < waste_threshold {
            RemnantClass::Waste
        } else {
            RemnantClass::Reusable
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternCut {
    /// Index into the normalized demand list.
    pub demand: usize,
    pub demand_id: String,
    pub length: f64,
    pub count: u32,
}

/// One way of cutting a single stock unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CuttingPattern {
    pub stock_length: f64,
    pub cuts: Vec<PatternCut>,
    pub leftover: f64,
    pub leftover_class: RemnantClass,
}

impl CuttingPattern {
    pub fn used_length(&self) -> f64 {
        self.cuts.iter().map(|c| c.length * c.count as f64).sum()
    }

    pub fn piece_count(&self) -> u32 {
        self.cuts.iter().map(|c| c.count).sum()
    }

    pub fn distinct_lengths(&self) -> usize {
        self.cuts.iter().filter(|c| c.count > 0).count()
    }

    /// Length lost to scrap by this pattern.
    pub fn waste(&self) -> f64 {
        match self.leftover_class {
            RemnantClass::Waste => self.leftover,
            RemnantClass::Reusable => 0.0,
        }
    }

    /// Verifies the cut arithmetic against the stock it is applied to.
    pub fn check(&self, stock_length: f64) -> Result<()> {
        if approx_cmp(self.stock_length, stock_length) != Ordering::Equal {
            return Err(OptimizeError::internal(format!(
                "pattern built for {}mm applied to {}mm stock",
                self.stock_length, stock_length
            )));
        }
        if self.leftover < -EPS {
            return Err(OptimizeError::internal(format!(
                "negative leftover {} on {}mm stock",
                self.leftover, stock_length
            )));
        }
        let total = self.used_length() + self.leftover;
        if (total - stock_length).abs() > EPS * (1.0 + stock_length) {
            return Err(OptimizeError::internal(format!(
                "pattern sums to {total}mm on {stock_length}mm stock"
            )));
        }
        Ok(())
    }
}

/// A leftover produced by applying a pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Remnant {
    pub length: f64,
    pub class: RemnantClass,
    /// Index of the assignment that produced it.
    pub produced_by: usize,
}

/// A pattern applied to one stock unit, in application order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub index: usize,
    pub stock: StockItem,
    pub pattern: CuttingPattern,
}


/// How many catalogue bars of one length the plan draws.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockUsage {
    pub length: f64,
    pub bars: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationPlan {
    pub assignments: Vec<Assignment>,
    /// Length of fresh stock drawn from the catalogue.
    pub total_consumed: f64,
    pub total_used: f64,
    pub total_waste: f64,
    /// `total_waste / total_consumed`, as a fraction.
    pub loss_rate: f64,
    /// Advisory target, in percent.
    pub target_loss_rate: f64,
    pub meets_target: bool,
    pub weld_count: u32,
    pub remnants_reused: usize,
    pub unused_remnants: Vec<Remnant>,
    pub stock_usage: Vec<StockUsage>,
}

impl OptimizationPlan {
    pub fn new(
        assignments: Vec<Assignment>,
        unused_remnants: Vec<Remnant>,
        target_loss_rate: f64,
    ) -> Self {
        let mut total_consumed = 0.0;
        let mut total_used = 0.0;
        let mut total_waste = 0.0;
        let mut weld_count = 0;
        let mut remnants_reused = 0;
        let mut usage: BTreeMap<LengthKey, StockUsage> = BTreeMap::new();

        for a in &assignments {
            total_used += a.pattern.used_length();
            total_waste += a.pattern.waste();
            weld_count += a.stock.weld_count;
            total_consumed += a.stock.fresh_length();
            for member in &a.stock.members {
                if member.provenance == Provenance::Remnant {
                    remnants_reused += 1;
                    continue;
                }
                usage
                    .entry(LengthKey::of(member.length))
                    .or_insert(StockUsage {
                        length: member.length,
                        bars: 0,
                    })
                    .bars += 1;
            }
        }

        let loss_rate = if total_consumed > 0.0 {
            total_waste / total_consumed
        } else {
            0.0
        };

        Self {
            assignments,
            total_consumed,
            total_used,
            total_waste,
            loss_rate,
            target_loss_rate,
            meets_target: loss_rate * 100.0 <= target_loss_rate + EPS,
            weld_count,
            remnants_reused,
            unused_remnants,
            stock_usage: usage.into_values().rev().collect(),
        }
    }

    pub fn loss_rate_percent(&self) -> f64 {
        self.loss_rate * 100.0
    }

    pub fn unused_remnant_length(&self) -> f64 {
        self.unused_remnants.iter().map(|r| r.length).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Completed,
    TimedOut,
    Infeasible,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunStatus::Completed => "completed",
            RunStatus::TimedOut => "timed out",
            RunStatus::Infeasible => "infeasible",
            RunStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Demand left unplaced at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemainingDemand {
    pub id: String,
    pub length: f64,
    pub quantity: u32,
}

/// Result of a run that produced a plan (completed or partial).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub status: RunStatus,
    /// Percent of required length placed, 0–100.
    pub progress: f64,
    pub plan: OptimizationPlan,
    pub remaining: Vec<RemainingDemand>,
    pub elapsed_ms: u64,
    pub cancelled: bool,
    /// Pattern searches that hit the enumeration cap and fell back to greedy.
    pub truncated_searches: usize,
    pub policy: String,
}

impl RunOutcome {
    pub fn is_partial(&self) -> bool {
        !self.remaining.is_empty()
    }
}

/// Accepts `3` as well as `3.0` for integer counts sent by JSON clients.
pub fn deserialize_u32_from_number<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    number_to_u32(value).map_err(serde::de::Error::custom)
}

pub fn deserialize_opt_u32_from_number<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<f64>::deserialize(deserializer)? {
        Some(value) => number_to_u32(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

fn number_to_u32(value: f64) -> std::result::Result<u32, String> {
    if !value.is_finite() || value.fract() != 0.0 || value < 0.0 || value > u32::MAX as f64 {
        return Err(format!("expected a non-negative integer, got {value}"));
    }
    Ok(value as u32)
}
