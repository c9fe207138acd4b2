use clap::Parser;
use steel_cut_optimizer::config::{Constraints, SolverConfig};
use steel_cut_optimizer::inventory::{DesignSegment, ModuleBar};
use steel_cut_optimizer::render;
use steel_cut_optimizer::solver::{MostRemainingLength, RunRequest};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "steel_cut_optimizer",
    about = "1D steel bar cutting stock optimizer with remnant reuse and welding"
)]
struct Cli {
    /// Stock bar lengths as LEN or LEN:COUNT (e.g. 6000 9000:4)
    #[arg(long, num_args = 1.., required = true)]
    stock: Vec<String>,

    /// Design segments as LEN:QTY or LEN:QTY:ID (e.g. 2400:6 6100:2:GL-3)
    #[arg(long, num_args = 1.., required = true)]
    demand: Vec<String>,

    /// Leftovers shorter than this (mm) are scrap
    #[arg(long, default_value_t = 100.0)]
    waste_threshold: f64,

    /// Loss rate goal in percent (advisory)
    #[arg(long, default_value_t = 5.0)]
    target_loss_rate: f64,

    /// Time budget in seconds
    #[arg(long, default_value_t = 30)]
    time_limit: u64,

    /// Maximum welds per produced piece; 0 disables welding
    #[arg(long, default_value_t = 1)]
    max_welds: u32,

    /// Honour stock counts given as LEN:COUNT
    #[arg(long)]
    bounded_supply: bool,

    /// Anchor selection: longest-first or most-remaining-length
    #[arg(long, default_value = "longest-first", value_parser = parse_policy)]
    policy: Policy,

    /// Node cap for one pattern enumeration
    #[arg(long, default_value_t = 20_000)]
    max_nodes: usize,

    /// Show ASCII layout of each bar
    #[arg(long)]
    layout: bool,

    /// Print the full outcome as JSON
    #[arg(long)]
    json: bool,

    /// Debug logging on stderr
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy)]
enum Policy {
    LongestFirst,
    MostRemainingLength,
}

fn parse_policy(s: &str) -> Result<Policy, String> {
    match s {
        "longest-first" => Ok(Policy::LongestFirst),
        "most-remaining-length" => Ok(Policy::MostRemainingLength),
        _ => Err(format!(
            "invalid policy '{}', expected: longest-first or most-remaining-length",
            s
        )),
    }
}

fn parse_length(s: &str, whole: &str) -> Result<f64, String> {
    let length = s
        .parse::<f64>()
        .map_err(|_| format!("invalid length in '{}'", whole))?;
    if !length.is_finite() || length <= 0.0 {
        return Err(format!("length must be positive in '{}'", whole));
    }
    Ok(length)
}

fn parse_stock(s: &str) -> Result<ModuleBar, String> {
    let parts: Vec<&str> = s.split(':').collect();
    let available = match parts.as_slice() {
        [_] => None,
        [_, count] => Some(
            count
                .parse::<u32>()
                .map_err(|_| format!("invalid count in '{}'", s))?,
        ),
        _ => return Err(format!("invalid stock '{}', expected LEN or LEN:COUNT", s)),
    };
    Ok(ModuleBar {
        length: parse_length(parts[0], s)?,
        available,
    })
}

fn parse_demand(s: &str, n: usize) -> Result<DesignSegment, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(format!("invalid demand '{}', expected LEN:QTY[:ID]", s));
    }
    let quantity = parts[1]
        .parse::<u32>()
        .map_err(|_| format!("invalid quantity in '{}'", s))?;
    if quantity == 0 {
        return Err(format!("quantity must be non-zero in '{}'", s));
    }
    Ok(DesignSegment {
        id: parts
            .get(2)
            .map(|id| id.to_string())
            .unwrap_or_else(|| format!("S{}", n + 1)),
        length: parse_length(parts[0], s)?,
        quantity,
        specification: None,
        cross_section: None,
    })
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let module_bars: Vec<ModuleBar> = cli
        .stock
        .iter()
        .map(|s| parse_stock(s))
        .collect::<Result<Vec<_>, _>>()
        .unwrap_or_else(|e| fail(e));

    let design_segments: Vec<DesignSegment> = cli
        .demand
        .iter()
        .enumerate()
        .map(|(n, s)| parse_demand(s, n))
        .collect::<Result<Vec<_>, _>>()
        .unwrap_or_else(|e| fail(e));

    let request = RunRequest {
        design_segments,
        module_bars,
        constraints: Constraints {
            waste_threshold: cli.waste_threshold,
            target_loss_rate: cli.target_loss_rate,
            time_limit: cli.time_limit,
            max_welding_segments: cli.max_welds,
        },
        bounded_supply: cli.bounded_supply,
    };

    let config = SolverConfig::new().with_max_enumeration_nodes(cli.max_nodes);
    let solver = request.solver(config).unwrap_or_else(|e| fail(e));
    let solver = match cli.policy {
        Policy::LongestFirst => solver,
        Policy::MostRemainingLength => solver.with_policy(MostRemainingLength),
    };
    let outcome = solver.solve().unwrap_or_else(|e| fail(e));

    if cli.json {
        match serde_json::to_string_pretty(&outcome) {
            Ok(json) => println!("{json}"),
            Err(e) => fail(e),
        }
        return;
    }

    let plan = &outcome.plan;
    for a in &plan.assignments {
        println!("Bar {}: {}", a.index + 1, a.stock);
        for c in &a.pattern.cuts {
            println!("  {} x {} ({})", c.length, c.count, c.demand_id);
        }
        if a.pattern.leftover > 0.0 {
            println!("  leftover {} [{:?}]", a.pattern.leftover, a.pattern.leftover_class);
        }
        if cli.layout {
            print!("{}", render::render_bar(a));
        }
        println!();
    }

    if outcome.is_partial() {
        println!(
            "Run {}{}: {:.1}% of demand placed",
            outcome.status,
            if outcome.cancelled { " (cancelled)" } else { "" },
            outcome.progress
        );
        for r in &outcome.remaining {
            println!("  unplaced {} x {} ({})", r.length, r.quantity, r.id);
        }
    }

    for usage in &plan.stock_usage {
        println!("Stock {}: {} bar{}", usage.length, usage.bars, if usage.bars == 1 { "" } else { "s" });
    }
    if !plan.unused_remnants.is_empty() {
        println!(
            "Remnants kept: {} totalling {}mm",
            plan.unused_remnants.len(),
            plan.unused_remnant_length()
        );
    }
    println!(
        "Summary: {} bar{} cut, {} weld{}, {} remnant{} reused, {:.2}% loss ({} target {}%)",
        plan.assignments.len(),
        if plan.assignments.len() == 1 { "" } else { "s" },
        plan.weld_count,
        if plan.weld_count == 1 { "" } else { "s" },
        plan.remnants_reused,
        if plan.remnants_reused == 1 { "" } else { "s" },
        plan.loss_rate_percent(),
        if plan.meets_target { "meets" } else { "misses" },
        plan.target_loss_rate,
    );
}
