//! Scenario runner.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, ContentArrangement, Table};
use dynamo_config::DynamoConfig;
use dynamo_sim::{Scenario, ScenarioRun};

pub struct RunArgs {
    pub scenario: String,
    pub seed: Option<u64>,
    pub json: bool,
    pub clocks: bool,
    pub full: bool,
    pub config: Option<PathBuf>,
    pub save: Option<PathBuf>,
}

/// Runs one scenario and prints its history and the final store contents.
pub fn run(args: &RunArgs) -> Result<()> {
    let scenario: Scenario = args.scenario.parse()?;

    let mut config = match &args.config {
        Some(path) => DynamoConfig::load_from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => DynamoConfig::load().context("Failed to load configuration")?,
    };
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }

    tracing::info!(%scenario, seed = config.seed, "run");
    let run = scenario
        .run(config)
        .with_context(|| format!("Scenario {scenario} failed"))?;

    if let Some(path) = &args.save {
        run.sim
            .events()
            .save_to_file(path)
            .with_context(|| format!("Failed to save history to {}", path.display()))?;
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if args.json {
        run.sim.events().write_json_lines(&mut out)?;
        return Ok(());
    }

    print_history(&mut out, &run, args)?;
    writeln!(out)?;
    writeln!(out, "{}", contents_table(&run))?;
    Ok(())
}

fn print_history(out: &mut impl Write, run: &ScenarioRun, args: &RunArgs) -> io::Result<()> {
    let from = if args.full { 0 } else { run.focus_seq };
    for logged in run.sim.events().since(from) {
        if args.clocks {
            writeln!(out, "{:>6} {:#}", logged.seq, logged.event)?;
        } else {
            writeln!(out, "{:>6} {}", logged.seq, logged.event)?;
        }
    }
    Ok(())
}

fn contents_table(run: &ScenarioRun) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Node").add_attribute(Attribute::Bold),
            Cell::new("State").add_attribute(Attribute::Bold),
            Cell::new("Contents").add_attribute(Attribute::Bold),
        ]);

    for node in run.sim.nodes() {
        let state = if run.sim.is_failed(&node) { "failed" } else { "up" };
        let contents = run
            .sim
            .node(&node)
            .map(|n| n.content().join(" "))
            .unwrap_or_default();
        table.add_row(vec![node.to_string(), state.to_string(), contents]);
    }
    table
}
