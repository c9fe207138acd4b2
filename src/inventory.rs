//! Normalizes design segments and module bars into solver demand and supply.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{OptimizeError, Result};
use crate::types::{
    DemandItem, EPS, LengthKey, deserialize_opt_u32_from_number, deserialize_u32_from_number,
};

/// Area assumed for segments whose cross-section is missing or zero (mm²).
pub const DEFAULT_CROSS_SECTION: f64 = 1000.0;

/// One row of the design steel list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignSegment {
    pub id: String,
    pub length: f64,
    #[serde(deserialize_with = "deserialize_u32_from_number")]
    pub quantity: u32,
    #[serde(default)]
    pub specification: Option<String>,
    /// Cross-section area in mm².
    #[serde(default)]
    pub cross_section: Option<f64>,
}

/// One stock ("module") bar length in the catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleBar {
    pub length: f64,
    #[serde(default, deserialize_with = "deserialize_opt_u32_from_number")]
    pub available: Option<u32>,
}

/// A catalogue length with its remaining availability; `None` is unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogueEntry {
    pub length: f64,
    pub available: Option<u32>,
}

impl CatalogueEntry {
    pub fn in_stock(&self) -> bool {
        self.available != Some(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Inventory {
    pub demand: Vec<DemandItem>,
    /// Sorted longest first.
    pub supply: Vec<CatalogueEntry>,
}

impl Inventory {
    pub fn total_demand_length(&self) -> f64 {
        self.demand.iter().map(DemandItem::total_length).sum()
    }
}

pub(crate) fn longest_in_stock(supply: &[CatalogueEntry]) -> f64 {
    supply
        .iter()
        .filter(|e| e.in_stock())
        .map(|e| e.length)
        .fold(0.0, f64::max)
}

fn check_length(what: &str, length: f64) -> Result<()> {
    if !length.is_finite() || length <= EPS {
        return Err(OptimizeError::invalid(format!(
            "{what} has non-positive length {length}"
        )));
    }
    Ok(())
}

/// Merges duplicate segments and catalogue lengths, rejecting bad rows.
///
/// Segments merge when both length and cross-section match; the merged item
/// keeps the first segment's id. With `bounded_supply` off, `available`
/// counts are ignored and every length is unbounded.
pub fn normalize(
    segments: &[DesignSegment],
    bars: &[ModuleBar],
    bounded_supply: bool,
) -> Result<Inventory> {
    if segments.is_empty() {
        return Err(OptimizeError::invalid("no design segments given"));
    }
    if bars.is_empty() {
        return Err(OptimizeError::invalid("no module bars given"));
    }

    let mut demand: Vec<DemandItem> = Vec::new();
    let mut index: HashMap<(LengthKey, LengthKey), usize> = HashMap::new();

    for seg in segments {
        check_length(&format!("design segment {}", seg.id), seg.length)?;
        if seg.quantity == 0 {
            return Err(OptimizeError::invalid(format!(
                "design segment {} has zero quantity",
                seg.id
            )));
        }
        let cross_section = match seg.cross_section {
            Some(area) if area.is_finite() && area > 0.0 => area,
            _ => {
                tracing::warn!(
                    segment = %seg.id,
                    default = DEFAULT_CROSS_SECTION,
                    "missing cross-section area, using default"
                );
                DEFAULT_CROSS_SECTION
            }
        };

        let key = (LengthKey::of(seg.length), LengthKey::of(cross_section));
        match index.get(&key) {
            Some(&i) => {
                let item = &mut demand[i];
                item.quantity = item.quantity.checked_add(seg.quantity).ok_or_else(|| {
                    OptimizeError::invalid(format!("quantity overflow merging {}", seg.id))
                })?;
                item.sources.push(seg.id.clone());
            }
            None => {
                index.insert(key, demand.len());
                demand.push(DemandItem {
                    id: seg.id.clone(),
                    length: seg.length,
                    quantity: seg.quantity,
                    specification: seg.specification.clone(),
                    cross_section,
                    sources: vec![seg.id.clone()],
                });
            }
        }
    }

    let mut supply: Vec<CatalogueEntry> = Vec::new();
    let mut by_length: HashMap<LengthKey, usize> = HashMap::new();
    for bar in bars {
        check_length("module bar", bar.length)?;
        let available = if bounded_supply { bar.available } else { None };
        match by_length.get(&LengthKey::of(bar.length)) {
            Some(&i) => {
                let entry = &mut supply[i];
                entry.available = match (entry.available, available) {
                    (Some(a), Some(b)) => Some(a.saturating_add(b)),
                    _ => None,
                };
            }
            None => {
                by_length.insert(LengthKey::of(bar.length), supply.len());
                supply.push(CatalogueEntry {
                    length: bar.length,
                    available,
                });
            }
        }
    }
    supply.sort_by(|a, b| b.length.total_cmp(&a.length));

    tracing::debug!(
        demand_items = demand.len(),
        stock_lengths = supply.len(),
        bounded_supply,
        "normalized inventory"
    );

    Ok(Inventory { demand, supply })
}

/// Welds needed to reach `length` by splicing bars of `longest_stock`.
pub fn suggested_welds(length: f64, longest_stock: f64) -> Option<u32> {
    if longest_stock <= EPS {
        return None;
    }
    let bars = ((length - EPS) / longest_stock).ceil().max(1.0);
    Some(bars as u32 - 1)
}

/// Advisory pre-check comparing design lengths to the longest stock bar.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeldingCheck {
    pub feasible: bool,
    /// Ids of items longer than the longest single stock bar.
    pub conflicting: Vec<String>,
    pub longest_stock: f64,
    pub longest_design: f64,
    pub suggested_welds: u32,
}

impl WeldingCheck {
    pub fn message(&self) -> Option<String> {
        if self.feasible {
            return None;
        }
        Some(format!(
            "{} design item(s) exceed the longest stock bar ({}mm); raise the weld limit to at least {}",
            self.conflicting.len(),
            self.longest_stock,
            self.suggested_welds
        ))
    }
}

/// Fast pre-flight version of the solver's infeasibility detection.
///
/// The solver stays authoritative: bounded supply can still make a run
/// infeasible after this check passes.
pub fn check_welding_feasibility(
    demand: &[DemandItem],
    supply: &[CatalogueEntry],
    max_welding_segments: u32,
) -> WeldingCheck {
    let longest_stock = longest_in_stock(supply);
    let conflicts: Vec<&DemandItem> = demand
        .iter()
        .filter(|d| d.length > longest_stock + EPS)
        .collect();
    let longest_design = conflicts.iter().map(|d| d.length).fold(0.0, f64::max);
    let suggested = if conflicts.is_empty() {
        0
    } else {
        suggested_welds(longest_design, longest_stock).unwrap_or(u32::MAX)
    };

    WeldingCheck {
        feasible: suggested <= max_welding_segments,
        conflicting: conflicts.iter().map(|d| d.id.clone()).collect(),
        longest_stock,
        longest_design,
        suggested_welds: suggested,
    }
}
