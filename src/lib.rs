//! One-dimensional steel cutting-stock optimization.
//!
//! Design segments are cut from catalogue bars, reusable remnants and, when
//! allowed, welded composites, minimizing scrap against a time budget.

pub mod config;
pub mod error;
pub mod inventory;
pub mod ledger;
pub mod pattern;
pub mod render;
pub mod solver;
pub mod types;
pub mod welding;

pub use config::{Constraints, SolverConfig};
pub use error::{OptimizeError, Result};
pub use inventory::{
    DesignSegment, Inventory, ModuleBar, WeldingCheck, check_welding_feasibility, normalize,
};
pub use solver::{
    CancelToken, Clock, LongestFirst, MostRemainingLength, Progress, ProgressSink, RunRequest,
    SelectionPolicy, Solver, optimize,
};
pub use types::{OptimizationPlan, RunOutcome, RunStatus};
