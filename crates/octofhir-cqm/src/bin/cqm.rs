//! cqm command-line interface

use clap::{Args, Parser, Subcommand};
use octofhir_cqm::cli::evaluate::{self, EvaluateConfig};
use octofhir_cqm::cli::measure::{self, MeasureConfig};
use octofhir_cqm::cli::{InputPaths, init_logging, output};
use std::path::PathBuf;

/// Clinical expression and measure evaluation
#[derive(Parser)]
#[command(name = "cqm")]
#[command(author, version, about = "Clinical expression and measure evaluation", long_about = None)]
struct Cli {
    /// Verbose output (repeat for more)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output file (default: stdout)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(short, long, global = true)]
    pretty: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    color: String,

    #[command(subcommand)]
    command: Commands,
}

/// Input documents
#[derive(Args)]
struct Inputs {
    /// Library documents or directories of them (ELM JSON, Library resources, bundles)
    #[arg(short = 'l', long = "library", required = true)]
    libraries: Vec<PathBuf>,

    /// Bundle of ValueSet resources
    #[arg(long)]
    value_sets: Option<PathBuf>,

    /// Bundle of patient data
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Parameter overrides (name=value)
    #[arg(long = "param")]
    params: Vec<String>,

    /// Fixed evaluation timestamp (ISO 8601 date-time)
    #[arg(long)]
    now: Option<String>,
}

impl Inputs {
    fn paths(&self) -> InputPaths {
        InputPaths {
            libraries: self.libraries.clone(),
            value_sets: self.value_sets.clone(),
            data: self.data.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate expressions of a library and print a Parameters resource
    Evaluate {
        #[command(flatten)]
        inputs: Inputs,

        /// Primary library name
        #[arg(long)]
        primary: String,

        /// Minimum version of the primary library
        #[arg(long)]
        min_version: Option<String>,

        /// Expressions to evaluate (default: every public definition)
        #[arg(short, long = "expression")]
        expressions: Vec<String>,

        /// Evaluation context (Type=value, e.g. Patient=123)
        #[arg(short, long)]
        context: Option<String>,

        /// Label echoed as the leading context parameter
        #[arg(long)]
        label: Option<String>,

        /// Expand value sets on first use instead of up front
        #[arg(long)]
        lazy_value_sets: bool,
    },

    /// Evaluate a Measure and print a MeasureReport
    Measure {
        #[command(flatten)]
        inputs: Inputs,

        /// Measure resource
        #[arg(short, long)]
        measure: PathBuf,

        /// Measurement period start (date or date-time)
        #[arg(long)]
        period_start: String,

        /// Measurement period end (date or date-time)
        #[arg(long)]
        period_end: String,

        /// Report type (individual, subject-list, population)
        #[arg(short = 't', long, default_value = "population")]
        report_type: String,

        /// Subjects to score (default: every patient in the data)
        #[arg(short, long = "subject")]
        subjects: Vec<String>,

        /// Worker count for population reports
        #[arg(long, default_value_t = 1)]
        shards: usize,

        /// Evaluate every criterion even when a prerequisite population is false
        #[arg(long)]
        no_short_circuit: bool,
    },
}

#[tokio::main]
async fn main() {
    human_panic::setup_panic!();

    let cli = Cli::parse();
    output::setup_colors(&cli.color);
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Evaluate {
            inputs,
            primary,
            min_version,
            expressions,
            context,
            label,
            lazy_value_sets,
        } => {
            let config = EvaluateConfig {
                inputs: inputs.paths(),
                primary,
                min_version,
                expressions,
                context,
                label,
                params: inputs.params,
                timestamp: inputs.now,
                lazy_value_sets,
                pretty: cli.pretty,
                output_file: cli.output,
            };
            evaluate::execute(config).await
        }

        Commands::Measure {
            inputs,
            measure,
            period_start,
            period_end,
            report_type,
            subjects,
            shards,
            no_short_circuit,
        } => {
            let config = MeasureConfig {
                inputs: inputs.paths(),
                measure,
                period_start,
                period_end,
                report_type,
                subjects,
                params: inputs.params,
                timestamp: inputs.now,
                shards,
                no_short_circuit,
                pretty: cli.pretty,
                output_file: cli.output,
            };
            measure::execute(config).await
        }
    };

    if let Err(e) = result {
        eprintln!("{}", output::format_error(&e));
        std::process::exit(1);
    }
}
