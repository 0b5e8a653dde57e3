//! terrapatch CLI - batch builds of Gaea terrain files

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};

use terrapatch::bindings::{self, NODES_KEY};
use terrapatch::config::Config;
use terrapatch::document;
use terrapatch::driver::{create_tool, DriverSettings, RunDriver};
use terrapatch::error::{FixSuggestion, PatchError};
use terrapatch::output_dir::absolutize;
use terrapatch::patch::{PatchReport, Patcher, RunSpec, VARIABLES_KEY};
use terrapatch::runner::{BatchOptions, BatchRunner};
use terrapatch::walker::{count_key, for_each_key};

const VAR_HELP: &str = "Variable assignment NAME=EXPR, repeatable. EXPR is an integer \
literal or 'lambda: <expression>' re-evaluated every run, e.g. 'lambda: randint(0, 1000)'. \
Expressions use a small arithmetic language with random and numeric helpers; no host code runs.";

#[derive(Parser)]
#[command(name = "terrapatch")]
#[command(about = "terrapatch - patch and batch-build Gaea terrain files")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Patch and build a terrain file RUNS times
    Run {
        /// Path to the .terrain file
        terrain: PathBuf,

        /// Output directory for the builds
        output: PathBuf,

        /// Number of builds
        runs: usize,

        /// Build each run into the next numbered subdirectory (001, 002, ...)
        #[arg(long)]
        increment: bool,

        #[arg(long = "var", value_name = "NAME=EXPR", help = VAR_HELP)]
        vars: Vec<String>,

        /// Override the Gaea Swarm executable
        #[arg(long)]
        swarm_exe: Option<PathBuf>,

        /// Build tool (swarm, mock)
        #[arg(long, default_value = "swarm")]
        tool: String,

        /// Give up on a build after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Config file (default: ./terrapatch.toml if present)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Patch a terrain file once and write the result (no build)
    Patch {
        /// Path to the .terrain file
        terrain: PathBuf,

        /// Output directory stamped into the document
        output: PathBuf,

        #[arg(long = "var", value_name = "NAME=EXPR", help = VAR_HELP)]
        vars: Vec<String>,

        /// Write the patched document here instead of stdout
        #[arg(short = 'o', long = "out")]
        out: Option<PathBuf>,

        /// Config file (default: ./terrapatch.toml if present)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show variables, bindings and nodes of a terrain file
    Inspect {
        /// Path to the .terrain file
        terrain: PathBuf,
    },
}

fn main() {
    // Logs go to stderr so `patch` can stream JSON on stdout
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            terrain,
            output,
            runs,
            increment,
            vars,
            swarm_exe,
            tool,
            timeout,
            config,
        } => {
            let overrides = Overrides { swarm_exe, timeout };
            run_batch(&terrain, &output, runs, increment, vars, &tool, overrides, config.as_deref())
        }
        Commands::Patch {
            terrain,
            output,
            vars,
            out,
            config,
        } => patch_once(&terrain, &output, vars, out.as_deref(), config.as_deref()),
        Commands::Inspect { terrain } => inspect(&terrain),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

/// CLI flags that win over config file and environment
struct Overrides {
    swarm_exe: Option<PathBuf>,
    timeout: Option<u64>,
}

fn load_config(path: Option<&Path>) -> Result<Config, PatchError> {
    Config::load(path).map(Config::with_env)
}

fn check_terrain(terrain: &Path) -> Result<String, PatchError> {
    if !terrain.is_file() {
        return Err(PatchError::InvalidArgs {
            reason: format!("terrain file '{}' does not exist", terrain.display()),
        });
    }
    terrain
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| PatchError::InvalidArgs {
            reason: format!("'{}' has no file name", terrain.display()),
        })
}

#[allow(clippy::too_many_arguments)]
fn run_batch(
    terrain: &Path,
    output: &Path,
    runs: usize,
    increment: bool,
    vars: Vec<String>,
    tool_name: &str,
    overrides: Overrides,
    config_path: Option<&Path>,
) -> Result<(), PatchError> {
    let terrain_name = check_terrain(terrain)?;
    if runs == 0 {
        return Err(PatchError::InvalidArgs {
            reason: "number of runs must be greater than 0".to_string(),
        });
    }

    let mut config = load_config(config_path)?;
    if let Some(exe) = overrides.swarm_exe {
        config.swarm_exe = exe;
    }
    if let Some(secs) = overrides.timeout {
        config.timeout_secs = Some(secs);
    }

    let tool = create_tool(tool_name, &config)?;
    if !tool.is_available() {
        return Err(PatchError::ToolLaunch {
            tool: config.swarm_exe.display().to_string(),
            details: "executable not found".to_string(),
        });
    }

    let original = document::load(terrain)?;
    let options = BatchOptions {
        terrain_name,
        output: absolutize(output)?,
        runs,
        increment,
        variable_assignments: vars,
    };

    println!(
        "{} {} run(s) of {} with {}",
        "→".cyan(),
        runs,
        terrain.display().to_string().cyan().bold(),
        tool.name().cyan()
    );

    let driver = RunDriver::new(tool, DriverSettings::from(&config));
    let mut runner = BatchRunner::new(Patcher::new(config.patch_settings()), driver);
    let records = runner.run(&original, &options)?;

    for record in &records {
        println!(
            "{} run {} → {} ({:.1}s)",
            "✓".green(),
            record.index,
            record.output_dir.display(),
            record.summary.elapsed.as_secs_f64()
        );
        print_warnings(&record.report);
    }
    Ok(())
}

fn patch_once(
    terrain: &Path,
    output: &Path,
    vars: Vec<String>,
    out: Option<&Path>,
    config_path: Option<&Path>,
) -> Result<(), PatchError> {
    check_terrain(terrain)?;
    let config = load_config(config_path)?;
    let original = document::load(terrain)?;

    let spec = RunSpec {
        output_directory: absolutize(output)?.display().to_string(),
        variable_assignments: vars,
    };
    let outcome = Patcher::new(config.patch_settings()).patch(&original, &spec)?;

    match out {
        Some(path) => {
            document::save(&outcome.document, path)?;
            eprintln!("{} Patched document written to {}", "✓".green(), path.display());
        }
        None => println!("{}", document::to_pretty_string(&outcome.document)?),
    }
    for (name, value) in &outcome.variables {
        eprintln!("  {} = {}", name, value);
    }
    print_warnings(&outcome.report);
    Ok(())
}

fn inspect(terrain: &Path) -> Result<(), PatchError> {
    check_terrain(terrain)?;
    let doc = document::load(terrain)?;

    println!("{} {}", "Terrain:".cyan().bold(), terrain.display());

    println!("{}", "Variables:".cyan().bold());
    for_each_key(&doc, VARIABLES_KEY, |map, key, path| match &map[key] {
        serde_json::Value::Object(vars) => {
            for (name, value) in vars {
                println!("  {} = {}", name, value);
            }
        }
        other => println!("  {} (not an object: {})", path, other),
    });

    let set = bindings::collect_bindings(&doc);
    println!("{} {}", "Bindings:".cyan().bold(), set.bindings.len());
    for binding in &set.bindings {
        println!(
            "  {} → node {}.{}",
            binding.variable, binding.node, binding.property
        );
    }
    for err in &set.errors {
        println!("  {} {}", "!".yellow(), err);
    }

    println!(
        "{} {} collection(s), {} node(s)",
        "Nodes:".cyan().bold(),
        count_key(&doc, NODES_KEY),
        bindings::node_records(&doc).len()
    );
    println!(
        "{} {} occurrence(s)",
        "Destination:".cyan().bold(),
        count_key(&doc, terrapatch::patch::DESTINATION_KEY)
    );
    Ok(())
}

fn print_warnings(report: &PatchReport) {
    for warning in &report.warnings {
        eprintln!("  {} {}", "⚠".yellow(), warning);
        if let Some(suggestion) = warning.fix_suggestion() {
            eprintln!("    {} {}", "Fix:".yellow(), suggestion);
        }
    }
}
