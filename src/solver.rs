use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::{Constraints, SolverConfig};
use crate::error::{OptimizeError, Result};
use crate::inventory::{
    CatalogueEntry, DesignSegment, Inventory, ModuleBar, longest_in_stock, normalize,
};
use crate::ledger::RemnantLedger;
use crate::pattern::{DemandSlot, PatternGenerator, PatternScore};
use crate::types::{
    Assignment, CuttingPattern, DemandItem, EPS, LengthKey, OptimizationPlan, Provenance,
    RemainingDemand, RunOutcome, RunStatus, StockItem,
};
use crate::welding::WeldingAssembler;

/// Source of elapsed time for deadline checks.
pub trait Clock {
    fn elapsed(&self) -> Duration;
}

pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Cooperative cancellation flag shared with whoever submitted the run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// Percent of required length placed, 0–100, never decreasing.
    pub percent: f64,
    pub placed_length: f64,
    pub total_length: f64,
    pub assignments: usize,
    pub elapsed_ms: u64,
    pub running: bool,
}

pub trait ProgressSink {
    fn report(&mut self, progress: &Progress);
}

impl<F> ProgressSink for F
where
    F: FnMut(&Progress),
{
    fn report(&mut self, progress: &Progress) {
        self(progress)
    }
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _progress: &Progress) {}
}

/// Pushes samples into a bounded channel, dropping them while the consumer
/// lags behind.
pub struct ChannelSink(pub SyncSender<Progress>);

impl ProgressSink for ChannelSink {
    fn report(&mut self, progress: &Progress) {
        let _ = self.0.try_send(progress.clone());
    }
}

/// Chooses which outstanding demand item anchors the next pattern.
pub trait SelectionPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Index of the next anchor, `None` once nothing remains.
    fn select(&self, demand: &[DemandItem], remaining: &[u32]) -> Option<usize>;
}

/// Longest outstanding item first; ties go to the earlier item.
pub struct LongestFirst;

impl SelectionPolicy for LongestFirst {
    fn name(&self) -> &'static str {
        "longest-first"
    }

    fn select(&self, demand: &[DemandItem], remaining: &[u32]) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, item) in demand.iter().enumerate() {
            if remaining[i] == 0 {
                continue;
            }
            if best.is_none_or(|b| item.length > demand[b].length + EPS) {
                best = Some(i);
            }
        }
        best
    }
}

/// Item with the most outstanding total length first.
pub struct MostRemainingLength;

impl SelectionPolicy for MostRemainingLength {
    fn name(&self) -> &'static str {
        "most-remaining-length"
    }

    fn select(&self, demand: &[DemandItem], remaining: &[u32]) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, item) in demand.iter().enumerate() {
            if remaining[i] == 0 {
                continue;
            }
            let total = item.length * remaining[i] as f64;
            if best.is_none_or(|(_, b)| total > b + EPS) {
                best = Some((i, total));
            }
        }
        best.map(|(i, _)| i)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Running,
    Completed,
    TimedOut,
    Infeasible,
    Failed,
}

impl ControllerState {
    fn can_advance_to(self, next: ControllerState) -> bool {
        matches!(
            (self, next),
            (ControllerState::Idle, ControllerState::Running)
                | (ControllerState::Running, ControllerState::Completed)
                | (ControllerState::Running, ControllerState::TimedOut)
                | (ControllerState::Running, ControllerState::Infeasible)
                | (ControllerState::Running, ControllerState::Failed)
        )
    }

    pub fn status(self) -> Option<RunStatus> {
        match self {
            ControllerState::Completed => Some(RunStatus::Completed),
            ControllerState::TimedOut => Some(RunStatus::TimedOut),
            ControllerState::Infeasible => Some(RunStatus::Infeasible),
            ControllerState::Failed => Some(RunStatus::Failed),
            ControllerState::Idle | ControllerState::Running => None,
        }
    }
}

/// One request as submitted by a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub design_segments: Vec<DesignSegment>,
    pub module_bars: Vec<ModuleBar>,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub bounded_supply: bool,
}

impl RunRequest {
    /// Validates constraints, normalizes the inventory and builds a solver.
    pub fn solver(&self, config: SolverConfig) -> Result<Solver> {
        self.constraints.validate()?;
        let config = config.with_bounded_supply(self.bounded_supply);
        let inventory = normalize(&self.design_segments, &self.module_bars, config.bounded_supply)?;
        Solver::new(inventory, self.constraints.clone(), config)
    }
}

/// Runs one request with default tuning.
pub fn optimize(request: &RunRequest) -> Result<RunOutcome> {
    request.solver(SolverConfig::default())?.solve()
}

struct Step {
    stock: StockItem,
    pattern: CuttingPattern,
}

/// Mutable state of one run. Never shared between runs.
struct RunState<'i> {
    state: ControllerState,
    demand: &'i [DemandItem],
    remaining: Vec<u32>,
    supply: Vec<CatalogueEntry>,
    ledger: RemnantLedger,
    assignments: Vec<Assignment>,
    total_length: f64,
    truncated_searches: usize,
    last_percent: f64,
}

impl<'i> RunState<'i> {
    fn new(inventory: &'i Inventory, waste_threshold: f64) -> Self {
        Self {
            state: ControllerState::Idle,
            demand: &inventory.demand,
            remaining: inventory.demand.iter().map(|d| d.quantity).collect(),
            supply: inventory.supply.clone(),
            ledger: RemnantLedger::new(waste_threshold),
            assignments: Vec::new(),
            total_length: inventory.total_demand_length(),
            truncated_searches: 0,
            last_percent: 0.0,
        }
    }

    fn advance(&mut self, next: ControllerState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(OptimizeError::internal(format!(
                "invalid state transition {:?} -> {:?}",
                self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    fn slots(&self) -> Vec<DemandSlot<'i>> {
        self.demand
            .iter()
            .enumerate()
            .filter(|&(i, _)| self.remaining[i] > 0)
            .map(|(i, item)| DemandSlot {
                demand: i,
                id: &item.id,
                length: item.length,
                remaining: self.remaining[i],
            })
            .collect()
    }

    fn remaining_length(&self) -> f64 {
        self.demand
            .iter()
            .zip(&self.remaining)
            .map(|(d, &r)| d.length * r as f64)
            .sum()
    }

    fn percent(&mut self) -> f64 {
        let percent = if self.total_length <= 0.0 {
            100.0
        } else {
            ((self.total_length - self.remaining_length()) / self.total_length * 100.0)
                .clamp(0.0, 100.0)
        };
        self.last_percent = self.last_percent.max(percent);
        self.last_percent
    }

    fn progress(&mut self, elapsed: Duration, running: bool) -> Progress {
        let percent = self.percent();
        Progress {
            percent,
            placed_length: self.total_length - self.remaining_length(),
            total_length: self.total_length,
            assignments: self.assignments.len(),
            elapsed_ms: elapsed.as_millis() as u64,
            running,
        }
    }

    fn draw(&mut self, length: f64) -> Result<()> {
        let key = LengthKey::of(length);
        let entry = self
            .supply
            .iter_mut()
            .find(|e| LengthKey::of(e.length) == key)
            .ok_or_else(|| OptimizeError::internal(format!("{length}mm is not in the catalogue")))?;
        match entry.available {
            None => Ok(()),
            Some(0) => Err(OptimizeError::internal(format!(
                "{length}mm stock drawn after running out"
            ))),
            Some(n) => {
                entry.available = Some(n - 1);
                Ok(())
            }
        }
    }

    /// Applies a pattern: demand, supply and ledger move together.
    fn apply(&mut self, step: Step, max_welds: u32) -> Result<usize> {
        let Step { stock, pattern } = step;
        pattern.check(stock.length)?;
        if stock.weld_count > max_welds {
            return Err(OptimizeError::internal(format!(
                "composite with {} welds exceeds the limit of {max_welds}",
                stock.weld_count
            )));
        }
        for cut in &pattern.cuts {
            let left = self.remaining.get(cut.demand).copied().unwrap_or(0);
            if cut.count > left {
                return Err(OptimizeError::internal(format!(
                    "pattern cuts {} of {} but only {left} remain",
                    cut.count, cut.demand_id
                )));
            }
        }

        let index = self.assignments.len();
        for member in &stock.members {
            match member.provenance {
                Provenance::Remnant => {
                    if member.origin.is_none_or(|o| o >= index) {
                        return Err(OptimizeError::internal(format!(
                            "remnant {}mm consumed before it was produced",
                            member.length
                        )));
                    }
                    self.ledger.take_piece(member.length, member.origin)?;
                }
                _ => self.draw(member.length)?,
            }
        }
        for cut in &pattern.cuts {
            self.remaining[cut.demand] -= cut.count;
        }
        self.ledger.record(pattern.leftover, index);
        self.assignments.push(Assignment {
            index,
            stock,
            pattern,
        });
        Ok(index)
    }

    fn remaining_demand(&self) -> Vec<RemainingDemand> {
        self.demand
            .iter()
            .zip(&self.remaining)
            .filter(|&(_, &r)| r > 0)
            .map(|(d, &r)| RemainingDemand {
                id: d.id.clone(),
                length: d.length,
                quantity: r,
            })
            .collect()
    }
}

/// Rate-limits progress samples.
struct ProgressSampler {
    interval: Duration,
    last: Option<Duration>,
}

impl ProgressSampler {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    fn due(&mut self, now: Duration) -> bool {
        match self.last {
            Some(last) if now.saturating_sub(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Drives pattern selection across all demand for one run.
pub struct Solver {
    inventory: Inventory,
    constraints: Constraints,
    config: SolverConfig,
    policy: Box<dyn SelectionPolicy>,
    cancel: CancelToken,
}

impl Solver {
    pub fn new(inventory: Inventory, constraints: Constraints, config: SolverConfig) -> Result<Self> {
        constraints.validate()?;
        config.validate()?;
        validate_inventory(&inventory)?;
        Ok(Self {
            inventory,
            constraints,
            config,
            policy: Box::new(LongestFirst),
            cancel: CancelToken::new(),
        })
    }

    pub fn with_policy(mut self, policy: impl SelectionPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn solve(&self) -> Result<RunOutcome> {
        self.solve_with(&SystemClock::start(), &mut NoProgress)
    }

    pub fn solve_with_progress(&self, sink: &mut dyn ProgressSink) -> Result<RunOutcome> {
        self.solve_with(&SystemClock::start(), sink)
    }

    /// Runs to a terminal state. `Completed` and `TimedOut` return a plan;
    /// `Infeasible` and `Failed` return the error that stopped the run.
    pub fn solve_with(&self, clock: &dyn Clock, sink: &mut dyn ProgressSink) -> Result<RunOutcome> {
        let mut run = RunState::new(&self.inventory, self.constraints.waste_threshold);
        run.advance(ControllerState::Running)?;

        let generator = PatternGenerator::new(
            self.config.max_enumeration_nodes,
            self.config.max_patterns_per_stock,
        );
        let assembler = WeldingAssembler::new(
            self.constraints.max_welding_segments,
            self.config.max_composites,
        );
        let budget = self.constraints.time_budget();
        let mut sampler = ProgressSampler::new(self.config.progress_interval);
        let mut cancelled = false;

        tracing::info!(
            demand_items = self.inventory.demand.len(),
            stock_lengths = self.inventory.supply.len(),
            total_length = run.total_length,
            policy = self.policy.name(),
            max_welds = self.constraints.max_welding_segments,
            "optimization started"
        );

        loop {
            let Some(anchor) = self.policy.select(run.demand, &run.remaining) else {
                run.advance(ControllerState::Completed)?;
                break;
            };
            if self.cancel.is_cancelled() {
                cancelled = true;
                run.advance(ControllerState::TimedOut)?;
                break;
            }
            if clock.elapsed() > budget {
                run.advance(ControllerState::TimedOut)?;
                break;
            }

            let Some(step) = self.best_step(&mut run, anchor, &generator, &assembler) else {
                run.advance(ControllerState::Infeasible)?;
                let err = self.infeasible(&run, anchor, &assembler);
                tracing::warn!(%err, "optimization infeasible");
                return Err(err);
            };

            tracing::debug!(
                stock = %step.stock,
                pieces = step.pattern.piece_count(),
                leftover = step.pattern.leftover,
                remnants_available = run.ledger.available_count(),
                "pattern selected"
            );
            if let Err(err) = run.apply(step, self.constraints.max_welding_segments) {
                run.advance(ControllerState::Failed)?;
                tracing::error!(%err, assignments = run.assignments.len(), "optimization aborted");
                return Err(err);
            }

            let now = clock.elapsed();
            if sampler.due(now) {
                sink.report(&run.progress(now, true));
            }
        }

        let elapsed = clock.elapsed();
        let progress = run.progress(elapsed, false);
        sink.report(&progress);

        let status = run.state.status().ok_or_else(|| {
            OptimizeError::internal(format!("run stopped in state {:?}", run.state))
        })?;
        let plan = OptimizationPlan::new(
            std::mem::take(&mut run.assignments),
            run.ledger.unused(),
            self.constraints.target_loss_rate,
        );

        tracing::info!(
            %status,
            cancelled,
            assignments = plan.assignments.len(),
            loss_rate = plan.loss_rate_percent(),
            meets_target = plan.meets_target,
            elapsed_ms = progress.elapsed_ms,
            "optimization finished"
        );

        Ok(RunOutcome {
            status,
            progress: progress.percent,
            remaining: run.remaining_demand(),
            plan,
            elapsed_ms: progress.elapsed_ms,
            cancelled,
            truncated_searches: run.truncated_searches,
            policy: self.policy.name().to_string(),
        })
    }

    /// Best pattern anchored on `anchor` across every stock that can hold it:
    /// reusable remnants, then catalogue bars, shortest first. Welded
    /// composites are only assembled when no single bar is long enough.
    ///
    /// Every ranked pattern of every stock competes. Equal scores go to the
    /// pattern that finishes more demand items, then to the earlier one.
    fn best_step(
        &self,
        run: &mut RunState<'_>,
        anchor: usize,
        generator: &PatternGenerator,
        assembler: &WeldingAssembler,
    ) -> Option<Step> {
        let anchor_length = run.demand[anchor].length;
        let mut candidates = run.ledger.reclaim(anchor_length);
        candidates.extend(
            run.supply
                .iter()
                .rev()
                .filter(|e| e.in_stock() && e.length + EPS >= anchor_length)
                .map(|e| StockItem::original(e.length)),
        );
        if candidates.is_empty() {
            candidates = assembler.build_composites(&run.supply, &run.ledger.pools(), anchor_length);
        }

        let slots = run.slots();
        let mut best: Option<(PatternScore, usize, Step)> = None;
        for stock in candidates {
            let set = generator.generate(
                stock.length,
                &slots,
                Some(anchor),
                self.constraints.waste_threshold,
            );
            if set.truncated {
                run.truncated_searches += 1;
            }
            for pattern in set.patterns {
                let score = PatternScore::of(&pattern);
                let finished = finished_items(&pattern, &run.remaining);
                let better = best.as_ref().is_none_or(|(b, f, _)| {
                    score.compare(b).then(f.cmp(&finished)) == std::cmp::Ordering::Less
                });
                if better {
                    let step = Step {
                        stock: stock.clone(),
                        pattern,
                    };
                    best = Some((score, finished, step));
                }
            }
        }
        best.map(|(_, _, step)| step)
    }

    fn infeasible(
        &self,
        run: &RunState<'_>,
        anchor: usize,
        assembler: &WeldingAssembler,
    ) -> OptimizeError {
        let item = &run.demand[anchor];
        let pools = run.ledger.pools();
        let mut longest_available = longest_in_stock(&run.supply).max(run.ledger.longest());
        if assembler.enabled() {
            longest_available =
                longest_available.max(assembler.longest_composite(&run.supply, &pools));
        }
        // Only worth suggesting when more welds than allowed would help.
        let suggested_welds = WeldingAssembler::fewest_welds(&run.supply, &pools, item.length)
            .filter(|&welds| welds > self.constraints.max_welding_segments);
        OptimizeError::Infeasible {
            demand_id: item.id.clone(),
            length: item.length,
            longest_available,
            suggested_welds,
        }
    }
}

/// Demand items whose last outstanding pieces this pattern cuts.
fn finished_items(pattern: &CuttingPattern, remaining: &[u32]) -> usize {
    pattern
        .cuts
        .iter()
        .filter(|c| remaining.get(c.demand) == Some(&c.count))
        .count()
}

fn validate_inventory(inventory: &Inventory) -> Result<()> {
    if inventory.demand.is_empty() {
        return Err(OptimizeError::invalid("no demand items"));
    }
    if inventory.supply.is_empty() {
        return Err(OptimizeError::invalid("no stock lengths"));
    }
    for d in &inventory.demand {
        if !d.length.is_finite() || d.length <= EPS || d.quantity == 0 {
            return Err(OptimizeError::invalid(format!(
                "demand item {} needs a positive length and quantity",
                d.id
            )));
        }
    }
    if let Some(e) = inventory
        .supply
        .iter()
        .find(|e| !e.length.is_finite() || e.length <= EPS)
    {
        return Err(OptimizeError::invalid(format!(
            "stock length {} is not positive",
            e.length
        )));
    }
    if inventory
        .supply
        .windows(2)
        .any(|w| w[0].length < w[1].length)
    {
        return Err(OptimizeError::invalid("stock lengths must be sorted longest first"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RemnantClass, StockMember};
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::sync::mpsc;

    /// Advances by a fixed step every time it is read.
    struct SteppingClock {
        now: Cell<Duration>,
        step: Duration,
    }

    impl SteppingClock {
        fn new(step: Duration) -> Self {
            Self {
                now: Cell::new(Duration::ZERO),
                step,
            }
        }
    }

    impl Clock for SteppingClock {
        fn elapsed(&self) -> Duration {
            let now = self.now.get() + self.step;
            self.now.set(now);
            now
        }
    }

    fn seg(id: &str, length: f64, quantity: u32) -> DesignSegment {
        DesignSegment {
            id: id.to_string(),
            length,
            quantity,
            specification: None,
            cross_section: Some(1200.0),
        }
    }

    fn request(demand: &[(&str, f64, u32)], stock: &[f64], threshold: f64, welds: u32) -> RunRequest {
        RunRequest {
            design_segments: demand.iter().map(|&(id, l, q)| seg(id, l, q)).collect(),
            module_bars: stock
                .iter()
                .map(|&length| ModuleBar {
                    length,
                    available: None,
                })
                .collect(),
            constraints: Constraints {
                waste_threshold: threshold,
                target_loss_rate: 5.0,
                time_limit: 30,
                max_welding_segments: welds,
            },
            bounded_supply: false,
        }
    }

    /// Validates a complete outcome:
    /// 1. Every pattern sums to its stock length with a non-negative leftover
    /// 2. Reported metrics match values recomputed from the pattern list
    /// 3. No composite exceeds the weld limit
    /// 4. Remnants are only consumed after the assignment that produced them
    /// 5. Placed pieces never exceed demand, and completed runs place all of it
    fn assert_plan_valid(outcome: &RunOutcome, request: &RunRequest) {
        let plan = &outcome.plan;
        let max_welds = request.constraints.max_welding_segments;
        let mut consumed = 0.0;
        let mut waste = 0.0;
        let mut used = 0.0;
        let mut placed: HashMap<String, u32> = HashMap::new();
        let mut leftovers: HashMap<usize, f64> = HashMap::new();

        for (k, a) in plan.assignments.iter().enumerate() {
            assert_eq!(a.index, k);
            let p = &a.pattern;
            assert!(p.leftover >= 0.0, "assignment {k}: negative leftover {}", p.leftover);
            assert!(
                (p.used_length() + p.leftover - a.stock.length).abs() < 1e-6,
                "assignment {k}: pattern does not sum to stock {}",
                a.stock
            );
            assert!(a.stock.weld_count <= max_welds, "assignment {k}: too many welds");
            if max_welds == 0 {
                assert_ne!(a.stock.provenance, Provenance::Welded);
            }
            for m in a.stock.members.iter().filter(|m| m.provenance == Provenance::Remnant) {
                let origin = m.origin.expect("remnant without origin");
                assert!(origin < k, "assignment {k} consumes remnant from {origin}");
                let produced = leftovers.remove(&origin).expect("remnant consumed twice");
                assert!((produced - m.length).abs() < 1e-6);
            }
            if p.leftover_class == RemnantClass::Reusable && p.leftover > 0.0 {
                leftovers.insert(k, p.leftover);
            }

            consumed += a.stock.fresh_length();
            used += p.used_length();
            if p.leftover_class == RemnantClass::Waste {
                waste += p.leftover;
            }
            for c in &p.cuts {
                *placed.entry(c.demand_id.clone()).or_default() += c.count;
            }
        }

        assert!((plan.total_consumed - consumed).abs() < 1e-6);
        assert!((plan.total_waste - waste).abs() < 1e-6);
        let loss = if consumed > 0.0 { waste / consumed } else { 0.0 };
        assert!((plan.loss_rate - loss).abs() < 1e-12);

        let unused: f64 = plan.unused_remnants.iter().map(|r| r.length).sum();
        assert!(
            (consumed - used - waste - unused).abs() < 1e-6,
            "consumed {consumed} != used {used} + waste {waste} + unused {unused}"
        );
        assert_eq!(plan.unused_remnants.len(), leftovers.len());

        let mut required: HashMap<String, u32> = HashMap::new();
        for s in &request.design_segments {
            *required.entry(s.id.clone()).or_default() += s.quantity;
        }
        for (id, count) in &placed {
            let left: u32 = outcome
                .remaining
                .iter()
                .filter(|r| &r.id == id)
                .map(|r| r.quantity)
                .sum();
            assert_eq!(count + left, required[id], "{id}: placed and remaining disagree");
        }
        match outcome.status {
            RunStatus::Completed => {
                assert!(outcome.remaining.is_empty());
                assert_eq!(outcome.progress, 100.0);
                assert_eq!(placed, required);
            }
            RunStatus::TimedOut => {
                assert!(outcome.remaining.iter().any(|r| r.quantity > 0));
                assert!(outcome.progress < 100.0);
            }
            _ => panic!("outcome carries terminal status {}", outcome.status),
        }
    }

    #[test]
    fn test_scenario_a_exact_bars() {
        let req = request(&[("A", 6000.0, 3)], &[6000.0], 100.0, 0);
        let outcome = optimize(&req).unwrap();
        assert_plan_valid(&outcome, &req);
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.plan.assignments.len(), 3);
        assert!(outcome.plan.assignments.iter().all(|a| a.pattern.leftover == 0.0));
        assert_eq!(outcome.plan.loss_rate, 0.0);
        assert!(!outcome.is_partial());
    }

    #[test]
    fn test_scenario_b_too_long_without_welding() {
        let req = request(&[("B", 6100.0, 1)], &[6000.0], 100.0, 0);
        match optimize(&req) {
            Err(OptimizeError::Infeasible {
                demand_id,
                length,
                longest_available,
                suggested_welds,
            }) => {
                assert_eq!(demand_id, "B");
                assert_eq!(length, 6100.0);
                assert_eq!(longest_available, 6000.0);
                assert_eq!(suggested_welds, Some(1));
            }
            other => panic!("expected infeasible, got {other:?}"),
        }
    }

    #[test]
    fn test_scenario_c_single_weld() {
        let req = request(&[("C", 6100.0, 1)], &[6000.0], 100.0, 1);
        let outcome = optimize(&req).unwrap();
        assert_plan_valid(&outcome, &req);
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.plan.assignments.len(), 1);
        let stock = &outcome.plan.assignments[0].stock;
        assert_eq!(stock.provenance, Provenance::Welded);
        assert_eq!(stock.weld_count, 1);
        assert_eq!(stock.members.len(), 2);
        assert!(stock.length >= 6100.0);
        assert_eq!(outcome.plan.weld_count, 1);
    }

    #[test]
    fn test_scenario_d_small_scrap() {
        let req = request(&[("D1", 5900.0, 1), ("D2", 90.0, 1)], &[6000.0], 100.0, 0);
        let outcome = optimize(&req).unwrap();
        assert_plan_valid(&outcome, &req);
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.plan.assignments.len(), 1);
        let pattern = &outcome.plan.assignments[0].pattern;
        assert_eq!(pattern.piece_count(), 2);
        assert!((pattern.leftover - 10.0).abs() < 1e-9);
        assert_eq!(pattern.leftover_class, RemnantClass::Waste);
        assert!((outcome.plan.loss_rate - 10.0 / 6000.0).abs() < 1e-12);
        assert!(outcome.plan.unused_remnants.is_empty());
    }

    #[test]
    fn test_scenario_e_time_limit() {
        let mut req = request(&[("E", 5000.0, 20)], &[6000.0], 100.0, 0);
        req.constraints.time_limit = 1;
        let solver = req.solver(SolverConfig::default()).unwrap();
        let clock = SteppingClock::new(Duration::from_millis(250));

        let outcome = solver.solve_with(&clock, &mut NoProgress).unwrap();
        assert_plan_valid(&outcome, &req);
        assert_eq!(outcome.status, RunStatus::TimedOut);
        assert!(outcome.is_partial());
        assert_eq!(outcome.plan.assignments.len(), 2);
        assert!((outcome.plan.unused_remnant_length() - 2000.0).abs() < 1e-6);
        assert!(outcome.progress < 100.0);
        assert!(!outcome.cancelled);
    }

    #[test]
    fn test_remnant_welded_back_into_supply() {
        let req = request(&[("W", 6100.0, 2)], &[6000.0], 100.0, 1);
        let outcome = optimize(&req).unwrap();
        assert_plan_valid(&outcome, &req);
        assert_eq!(outcome.plan.assignments.len(), 2);

        let second = &outcome.plan.assignments[1].stock;
        assert!((second.length - 11900.0).abs() < 1e-6);
        let reused: Vec<&StockMember> = second.remnant_members().collect();
        assert_eq!(reused.len(), 1);
        assert_eq!(reused[0].origin, Some(0));
        assert_eq!(outcome.plan.remnants_reused, 1);
        assert!((outcome.plan.total_consumed - 18000.0).abs() < 1e-6);
    }

    #[test]
    fn test_welding_ceiling_mixed_lengths() {
        let demand = [("L1", 13000.0, 2), ("L2", 7000.0, 3), ("S", 1200.0, 5)];
        for welds in [2, 3] {
            let req = request(&demand, &[6000.0, 4500.0], 150.0, welds);
            let outcome = optimize(&req).unwrap();
            assert_plan_valid(&outcome, &req);
            assert_eq!(outcome.status, RunStatus::Completed);
        }
        let req = request(&demand, &[6000.0, 4500.0], 150.0, 1);
        assert!(matches!(
            optimize(&req),
            Err(OptimizeError::Infeasible { suggested_welds: Some(2), .. })
        ));
    }

    #[test]
    fn test_no_composites_when_welding_disabled() {
        let req = request(
            &[("A", 5200.0, 3), ("B", 2400.0, 4), ("C", 700.0, 6)],
            &[6000.0, 9000.0],
            100.0,
            0,
        );
        let outcome = optimize(&req).unwrap();
        assert_plan_valid(&outcome, &req);
        assert!(outcome.plan.assignments.iter().all(|a| a.stock.weld_count == 0));
    }

    #[test]
    fn test_deterministic_plans() {
        let req = request(
            &[
                ("A", 2870.0, 7),
                ("B", 1930.0, 11),
                ("C", 1415.5, 9),
                ("D", 760.0, 14),
                ("E", 6400.0, 2),
            ],
            &[6000.0, 9000.0, 12000.0],
            200.0,
            1,
        );
        let config = SolverConfig::default().with_max_enumeration_nodes(500);
        let first = req.solver(config.clone()).unwrap().solve().unwrap();
        let second = req.solver(config).unwrap().solve().unwrap();
        assert_plan_valid(&first, &req);
        assert_eq!(first.plan, second.plan);
        assert_eq!(first.truncated_searches, second.truncated_searches);
    }

    #[test]
    fn test_bounded_supply_runs_out() {
        let mut req = request(&[("A", 5000.0, 3)], &[6000.0], 100.0, 0);
        req.module_bars[0].available = Some(2);
        req.bounded_supply = true;
        match optimize(&req) {
            Err(OptimizeError::Infeasible {
                demand_id,
                longest_available,
                ..
            }) => {
                assert_eq!(demand_id, "A");
                assert!(longest_available < 5000.0);
            }
            other => panic!("expected infeasible, got {other:?}"),
        }

        req.module_bars[0].available = Some(3);
        let outcome = optimize(&req).unwrap();
        assert_plan_valid(&outcome, &req);
        assert_eq!(outcome.plan.stock_usage[0].bars, 3);
    }

    #[test]
    fn test_infeasible_suggests_welds_only_when_they_help() {
        // The single bar is already used up by the allowed weld.
        let mut req = request(&[("A", 6100.0, 1)], &[6000.0], 100.0, 1);
        req.module_bars[0].available = Some(1);
        req.bounded_supply = true;
        match optimize(&req) {
            Err(OptimizeError::Infeasible {
                demand_id,
                longest_available,
                suggested_welds,
                ..
            }) => {
                assert_eq!(demand_id, "A");
                assert_eq!(longest_available, 6000.0);
                assert_eq!(suggested_welds, None);
            }
            other => panic!("expected infeasible, got {other:?}"),
        }

        // Two welds over the bounded bars would reach 14000.
        let mut req = request(&[("L", 14000.0, 1)], &[6000.0, 3000.0], 100.0, 1);
        req.module_bars[0].available = Some(2);
        req.module_bars[1].available = Some(1);
        req.bounded_supply = true;
        assert!(matches!(
            optimize(&req),
            Err(OptimizeError::Infeasible { suggested_welds: Some(2), .. })
        ));
    }

    #[test]
    fn test_equal_patterns_prefer_finishing_items() {
        // 4000+2000 and 4000+1000+1000 both use the whole bar with two cut
        // lengths; the second one also finishes item B.
        let req = request(&[("A", 4000.0, 1), ("C", 2000.0, 5), ("B", 1000.0, 2)], &[6000.0], 100.0, 0);
        let outcome = optimize(&req).unwrap();
        assert_plan_valid(&outcome, &req);
        let first = &outcome.plan.assignments[0].pattern;
        assert_eq!(first.leftover, 0.0);
        let ids: Vec<(&str, u32)> = first.cuts.iter().map(|c| (c.demand_id.as_str(), c.count)).collect();
        assert_eq!(ids, vec![("A", 1), ("B", 2)]);
    }

    #[test]
    fn test_progress_samples_respect_interval() {
        let interval = Duration::from_millis(100);
        let req = request(&[("A", 1500.0, 40)], &[6000.0], 100.0, 0);
        let solver = req
            .solver(SolverConfig::default().with_progress_interval(interval))
            .unwrap();
        let clock = SteppingClock::new(Duration::from_millis(40));
        let mut samples: Vec<Progress> = Vec::new();
        let mut sink = |p: &Progress| samples.push(p.clone());
        let outcome = solver.solve_with(&clock, &mut sink).unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);

        let (last, running) = samples.split_last().unwrap();
        assert!(!last.running);
        assert_eq!(last.percent, 100.0);
        assert!(running.iter().all(|p| p.running));
        assert!(running.len() > 1);
        assert!(running.len() < outcome.plan.assignments.len());
        for pair in running.windows(2) {
            assert!(pair[1].elapsed_ms - pair[0].elapsed_ms >= interval.as_millis() as u64);
        }
    }

    #[test]
    fn test_progress_is_monotonic_and_finishes() {
        let req = request(&[("A", 1500.0, 40), ("B", 800.0, 25)], &[6000.0], 100.0, 0);
        let solver = req
            .solver(SolverConfig::default().with_progress_interval(Duration::ZERO))
            .unwrap();
        let mut samples: Vec<Progress> = Vec::new();
        let mut sink = |p: &Progress| samples.push(p.clone());
        let outcome = solver.solve_with_progress(&mut sink).unwrap();

        assert!(samples.len() > 2);
        for pair in samples.windows(2) {
            assert!(pair[1].percent >= pair[0].percent);
        }
        let last = samples.last().unwrap();
        assert!(!last.running);
        assert_eq!(last.percent, 100.0);
        assert_eq!(outcome.progress, 100.0);
    }

    #[test]
    fn test_progress_through_bounded_channel() {
        let req = request(&[("A", 1500.0, 40)], &[6000.0], 100.0, 0);
        let solver = req
            .solver(SolverConfig::default().with_progress_interval(Duration::ZERO))
            .unwrap();
        let (tx, rx) = mpsc::sync_channel(2);
        let mut sink = ChannelSink(tx);
        solver.solve_with_progress(&mut sink).unwrap();
        drop(sink);
        let received: Vec<Progress> = rx.iter().collect();
        assert!(!received.is_empty());
        assert!(received.len() <= 2);
    }

    #[test]
    fn test_cancel_mid_run_keeps_partial_plan() {
        let req = request(&[("A", 5000.0, 10)], &[6000.0], 100.0, 0);
        let solver = req
            .solver(SolverConfig::default().with_progress_interval(Duration::ZERO))
            .unwrap();
        let token = solver.cancel_token();
        let mut sink = |p: &Progress| {
            if p.assignments >= 3 {
                token.cancel();
            }
        };
        let outcome = solver.solve_with_progress(&mut sink).unwrap();
        assert_plan_valid(&outcome, &req);
        assert!(outcome.cancelled);
        assert_eq!(outcome.status, RunStatus::TimedOut);
        assert_eq!(outcome.plan.assignments.len(), 3);
    }

    #[test]
    fn test_most_remaining_length_policy() {
        let req = request(&[("A", 5000.0, 1), ("B", 1000.0, 10)], &[6000.0], 100.0, 0);
        let outcome = req
            .solver(SolverConfig::default())
            .unwrap()
            .with_policy(MostRemainingLength)
            .solve()
            .unwrap();
        assert_plan_valid(&outcome, &req);
        assert_eq!(outcome.policy, "most-remaining-length");
        let first = &outcome.plan.assignments[0].pattern;
        assert_eq!(first.cuts.len(), 1);
        assert_eq!(first.cuts[0].demand_id, "B");
        assert_eq!(first.cuts[0].count, 6);
    }

    #[test]
    fn test_longest_first_selection() {
        let item = |id: &str, length: f64| DemandItem {
            id: id.to_string(),
            length,
            quantity: 1,
            specification: None,
            cross_section: 1000.0,
            sources: vec![id.to_string()],
        };
        let demand = [item("A", 3000.0), item("B", 4000.0), item("C", 4000.0)];
        assert_eq!(LongestFirst.select(&demand, &[1, 1, 1]), Some(1));
        assert_eq!(LongestFirst.select(&demand, &[1, 0, 1]), Some(2));
        assert_eq!(LongestFirst.select(&demand, &[1, 0, 0]), Some(0));
        assert_eq!(LongestFirst.select(&demand, &[0, 0, 0]), None);
        assert_eq!(MostRemainingLength.select(&demand, &[3, 1, 1]), Some(0));
    }

    #[test]
    fn test_invalid_constraints_rejected_before_search() {
        let mut req = request(&[("A", 1000.0, 1)], &[6000.0], 100.0, 0);
        req.constraints.time_limit = 301;
        assert!(matches!(
            optimize(&req),
            Err(OptimizeError::InvalidInput { .. })
        ));
        req.constraints.time_limit = 10;
        req.design_segments[0].quantity = 0;
        assert!(matches!(
            optimize(&req),
            Err(OptimizeError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_state_machine_transitions() {
        use ControllerState::*;
        assert!(Idle.can_advance_to(Running));
        assert!(!Idle.can_advance_to(Completed));
        for terminal in [Completed, TimedOut, Infeasible, Failed] {
            assert!(Running.can_advance_to(terminal));
            assert!(!terminal.can_advance_to(Running));
            assert!(terminal.status().is_some());
        }
        assert!(Running.status().is_none());
    }

    #[test]
    fn test_apply_rejects_broken_pattern() {
        let req = request(&[("A", 1000.0, 2)], &[6000.0], 100.0, 0);
        let solver = req.solver(SolverConfig::default()).unwrap();
        let mut run = RunState::new(solver.inventory(), 100.0);
        run.advance(ControllerState::Running).unwrap();
        let step = Step {
            stock: StockItem::original(6000.0),
            pattern: CuttingPattern {
                stock_length: 6000.0,
                cuts: vec![crate::types::PatternCut {
                    demand: 0,
                    demand_id: "A".to_string(),
                    length: 1000.0,
                    count: 3,
                }],
                leftover: 3000.0,
                leftover_class: RemnantClass::Reusable,
            },
        };
        assert!(matches!(
            run.apply(step, 0),
            Err(OptimizeError::Internal { .. })
        ));
        assert!(run.assignments.is_empty());
    }
}
