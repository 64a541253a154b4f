use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use suitecheck::cli::commands::{self, PlanOptions, RunOptions, SelectOptions};
use suitecheck::config::Settings;

#[derive(Parser)]
#[command(
    name = "suitecheck",
    about = "Dependency-aware test suite orchestrator",
    version
)]
struct Cli {
    /// Debug logging (also SUITECHECK_VERBOSE)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct SelectArgs {
    /// Run only these units (plus their dependencies)
    #[arg(long, value_delimiter = ',')]
    only: Vec<String>,

    /// Leave these units out; fails if a remaining unit needs one
    #[arg(long, value_delimiter = ',')]
    skip: Vec<String>,

    /// Run only the units that failed in the previous run
    #[arg(long)]
    only_failing: bool,

    /// Directory holding previous result documents and logs
    #[arg(long)]
    history_dir: Option<PathBuf>,
}

impl SelectArgs {
    fn into_options(self) -> (SelectOptions, Option<PathBuf>) {
        (
            SelectOptions {
                only: self.only,
                skip: self.skip,
                only_failing: self.only_failing,
            },
            self.history_dir,
        )
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the suite described by a manifest
    Run {
        /// Suite manifest (YAML)
        manifest: PathBuf,

        #[command(flatten)]
        select: SelectArgs,

        /// Stop after the first unit that fails
        #[arg(long)]
        stop_on_first_failure: bool,

        /// Abort once more than this percentage of checks has failed
        #[arg(long)]
        max_failure_rate: Option<f64>,

        /// Base URL for HTTP checks (overrides the manifest)
        #[arg(long)]
        base_url: Option<String>,

        /// Only print failed checks
        #[arg(long)]
        hide_passed: bool,
    },

    /// Print the resolved execution plan without running it
    Plan {
        /// Suite manifest (YAML)
        manifest: PathBuf,

        #[command(flatten)]
        select: SelectArgs,

        /// Output format: yaml, json
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// List the units in a manifest
    List {
        /// Suite manifest (YAML)
        manifest: PathBuf,
    },

    /// Check a manifest for unknown dependencies and cycles
    Validate {
        /// Suite manifest (YAML)
        manifest: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "suitecheck=debug" } else { "suitecheck=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    // Logging goes up first so invalid SUITECHECK_* values get reported.
    init_logging(cli.verbose || Settings::verbose_from_env());
    let settings = Settings::from_env();

    match cli.command {
        Some(Commands::Run {
            manifest,
            select,
            stop_on_first_failure,
            max_failure_rate,
            base_url,
            hide_passed,
        }) => {
            let (select, history_dir) = select.into_options();
            let options = RunOptions {
                manifest,
                select,
                stop_on_first_failure,
                max_failure_rate,
                history_dir,
                base_url,
                hide_passed,
            };
            match commands::run_run(&options, &settings) {
                Ok(report) => {
                    print!("{}", report.output);
                    if !report.outcome.success() {
                        std::process::exit(1);
                    }
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::Plan {
            manifest,
            select,
            format,
        }) => {
            let (select, history_dir) = select.into_options();
            let options = PlanOptions {
                manifest,
                select,
                history_dir,
                format,
            };
            match commands::run_plan(&options) {
                Ok(result) => print!("{result}"),
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::List { manifest }) => match commands::run_list(&manifest) {
            Ok(result) => println!("{result}"),
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        },
        Some(Commands::Validate { manifest }) => match commands::run_validate(&manifest) {
            Ok(result) => println!("{result}"),
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        },
        None => {
            // Bare invocation prints help.
            Cli::parse_from(["suitecheck", "--help"]);
        }
    }
}
