//! Racelab CLI: explore event schedules, run WAVE batches, preprocess
//! traces.
//!
//! ```bash
//! racelab explore --site page.html --in-schedule-file /tmp/schedule.data
//! racelab wave --site page.html --in-dir /tmp/base --in-schedule-file /tmp/schedule.data
//! racelab preprocess --input trace.json --output trace.clean.json
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{ArgAction, Args, Parser, Subcommand};

use racelab::detect::{CommandRaceSource, RaceSource};
use racelab::explore::{ExploreConfig, Explorer};
use racelab::preprocess::{PreprocessOptions, TraceFile, TracePreprocessor};
use racelab::replay::{CommandReplayer, ReplayPaths};
use racelab::schedule::ScheduleStore;
use racelab::wave::{self, WaveConfig};

#[derive(Parser, Debug)]
#[command(
    name = "racelab",
    version,
    about = "Stateless model checker for event-driven programs",
    long_about = "Racelab re-executes an event-driven application under\n\
        controlled schedules, reversing racing event pairs reported by an\n\
        external detector, and explores the schedule space for behaviors\n\
        that depend on dispatch order."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Output reports as JSON instead of human-readable text
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Depth-first exploration with race reversal
    Explore(ExploreArgs),

    /// Coverage-oriented batch of random pairwise reversals
    Wave(WaveArgs),

    /// Run the trace cleanup passes over a JSON trace rendition
    Preprocess(PreprocessArgs),
}

#[derive(Args, Debug)]
struct ExploreArgs {
    /// Directory with the recorded logs the replay runtime needs
    #[arg(long, default_value = "/tmp/indir")]
    in_dir: PathBuf,

    /// The recorded schedule to explore from
    #[arg(long, default_value = "/tmp/schedule.data")]
    in_schedule_file: PathBuf,

    /// The site to replay (mandatory)
    #[arg(long, default_value = "")]
    site: String,

    /// Replay command; %s placeholders take base dir, site, schedule
    #[arg(long, default_value = "replay %s %s %s")]
    replay_command: String,

    /// Outcome-query command; %s placeholders take out dir and run name
    #[arg(long)]
    query_command: Option<String>,

    /// Race detector command; the %s placeholder takes the action log
    #[arg(long, default_value = "racedetector %s")]
    races_command: String,

    /// Root of the per-run output directories
    #[arg(long, default_value = "/tmp/outdir")]
    out_dir: PathBuf,

    /// Maximum nesting of race reversals along one branch
    #[arg(long, default_value_t = 1)]
    conflict_reversal_bound: usize,

    /// Bound path-segment depth instead of reversal depth
    #[arg(long)]
    conflict_reversal_bound_oldstyle: bool,

    /// Maximum replay invocations; -1 means unlimited
    #[arg(long, default_value_t = -1)]
    iteration_bound: i64,

    /// Reuse per-run directories populated by an earlier session
    #[arg(long)]
    fast_forward: bool,

    /// Skip races of benign runs away from the reversed pair
    #[arg(long)]
    same_state_reversal_opt: bool,

    /// Where prepared schedules are written before each replay
    #[arg(long, default_value = "/tmp/new_schedule.data")]
    schedule_file: PathBuf,
}

#[derive(Args, Debug)]
struct WaveArgs {
    /// Directory with the recorded logs, including ER_actionlog
    #[arg(long, default_value = "")]
    in_dir: PathBuf,

    /// The recorded schedule to mutate
    #[arg(long, default_value = "")]
    in_schedule_file: PathBuf,

    /// The site to replay (mandatory)
    #[arg(long, default_value = "")]
    site: String,

    /// Replay command; %s placeholders take base dir, site, schedule
    #[arg(long, default_value = "replay %s %s %s")]
    replay_command: String,

    /// Race detector command; the %s placeholder takes the action log
    #[arg(long, default_value = "racedetector %s")]
    races_command: String,

    /// Root of the per-run output directories
    #[arg(long, default_value = "/tmp/outdir")]
    out_dir: PathBuf,

    /// Number of schedules to generate and execute
    #[arg(long, default_value_t = 1)]
    iteration_bound: usize,

    /// Shuffle seed; random when omitted
    #[arg(long)]
    seed: Option<u64>,

    /// Where prepared schedules are written before each replay
    #[arg(long, default_value = "/tmp/new_wave_schedule.data")]
    schedule_file: PathBuf,
}

#[derive(Args, Debug)]
struct PreprocessArgs {
    /// JSON trace to clean up
    #[arg(long)]
    input: PathBuf,

    /// Where to write the cleaned trace
    #[arg(long)]
    output: PathBuf,

    /// Memory locations to drop wholesale (repeatable)
    #[arg(long = "ignore-location")]
    ignore_locations: Vec<String>,

    /// Also remove object/array locations that never leak between
    /// event actions
    #[arg(long)]
    global_locals: bool,

    /// Also remove pure-increment locations
    #[arg(long)]
    pure_increments: bool,

    /// Gate increment removal on the values actually incrementing
    #[arg(long)]
    require_increment: bool,
}

fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let filter =
        EnvFilter::try_from_env("RACELAB_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// The original tool exits with -1 when a mandatory flag is missing;
/// keep that contract.
fn require_flag(value: bool, flag: &str) {
    if !value {
        eprintln!("  --{flag} is a mandatory parameter.");
        std::process::exit(-1);
    }
}

fn cmd_explore(args: ExploreArgs, json: bool) -> Result<(), String> {
    require_flag(!args.site.is_empty(), "site");

    let seed = ScheduleStore::load(&args.in_schedule_file)
        .map_err(|e| format!("cannot load schedule {}: {e}", args.in_schedule_file.display()))?;

    let replayer = CommandReplayer {
        replay_command: args.replay_command,
        query_command: args.query_command,
        site: args.site,
        out_dir: args.out_dir,
        paths: ReplayPaths::default(),
        fast_forward: args.fast_forward,
    };
    let source = CommandRaceSource::new(args.races_command);
    let config = ExploreConfig {
        conflict_reversal_bound: args.conflict_reversal_bound,
        old_style_bound: args.conflict_reversal_bound_oldstyle,
        iteration_bound: args.iteration_bound,
        same_state_reversal_opt: args.same_state_reversal_opt,
        schedule_file: args.schedule_file,
        base_dir: args.in_dir,
        ..ExploreConfig::default()
    };

    let mut explorer = Explorer::new(config, replayer, source);
    let report = explorer
        .run(&Arc::new(seed))
        .map_err(|e| format!("exploration failed: {e}"))?;

    if json {
        let text = serde_json::to_string_pretty(&report).unwrap_or_default();
        println!("{text}");
    } else {
        println!("{}", report.to_text());
    }
    Ok(())
}

fn cmd_wave(args: WaveArgs, json: bool) -> Result<(), String> {
    require_flag(!args.site.is_empty(), "site");
    require_flag(!args.in_schedule_file.as_os_str().is_empty(), "in_schedule_file");
    require_flag(!args.in_dir.as_os_str().is_empty(), "in_dir");

    let store = ScheduleStore::load(&args.in_schedule_file)
        .map_err(|e| format!("cannot load schedule {}: {e}", args.in_schedule_file.display()))?;

    let action_log = args.in_dir.join("ER_actionlog");
    let source = CommandRaceSource::new(args.races_command);
    let analysis = source
        .analyze(&action_log)
        .map_err(|e| format!("cannot analyze {}: {e}", action_log.display()))?;

    let mut replayer = CommandReplayer {
        replay_command: args.replay_command,
        query_command: None,
        site: args.site,
        out_dir: args.out_dir,
        paths: ReplayPaths::default(),
        fast_forward: false,
    };
    let config = WaveConfig {
        iteration_bound: args.iteration_bound,
        seed: args.seed,
        base_dir: args.in_dir,
        schedule_file: args.schedule_file,
    };

    let report = wave::run(&store, analysis.graph(), &config, &mut replayer)
        .map_err(|e| format!("wave batch failed: {e}"))?;

    if json {
        let text = serde_json::to_string_pretty(&report).unwrap_or_default();
        println!("{text}");
    } else {
        println!(
            "Possible reversals: {}. Reversed: {}. Tried {} schedules, {} successful (seed {})",
            report.possible,
            report.reversed,
            report.all_schedules,
            report.successful_schedules,
            report.seed
        );
    }
    Ok(())
}

fn command_count(trace: &TraceFile) -> usize {
    trace.log.actions.iter().map(|a| a.commands.len()).sum()
}

fn cmd_preprocess(args: PreprocessArgs, json: bool) -> Result<(), String> {
    let mut trace = TraceFile::load(&args.input)
        .map_err(|e| format!("cannot load trace {}: {e}", args.input.display()))?;
    let before = command_count(&trace);

    let options = PreprocessOptions {
        require_increment: args.require_increment,
    };
    {
        let TraceFile { vars, values, log } = &mut trace;
        let mut pre = TracePreprocessor::with_options(log, vars, values, options);
        for location in &args.ignore_locations {
            pre.ignore_location(location);
        }
        pre.remove_empty_read_writes();
        pre.remove_nop_writes();
        pre.remove_updates_in_same_method();
        if args.global_locals {
            pre.remove_global_locals();
        }
        if args.pure_increments {
            pre.remove_pure_incrementation();
        }
    }

    let after = command_count(&trace);
    trace
        .save(&args.output)
        .map_err(|e| format!("cannot write trace {}: {e}", args.output.display()))?;

    if json {
        let report = serde_json::json!({
            "input": args.input.display().to_string(),
            "output": args.output.display().to_string(),
            "commands_before": before,
            "commands_after": after,
        });
        println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
    } else {
        println!("Commands: {before} before, {after} after");
    }
    Ok(())
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Explore(args) => cmd_explore(args, cli.json),
        Command::Wave(args) => cmd_wave(args, cli.json),
        Command::Preprocess(args) => cmd_preprocess(args, cli.json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}
