//! Measure command implementation

use super::{InputPaths, output, parse_parameters, parse_timestamp};
use anyhow::{Context, Result, anyhow};
use octofhir_cqm_eval::EvaluatorOptions;
use octofhir_cqm_measure::{
    MeasureDefinition, MeasureEvaluator, MeasureEvaluatorOptions, MeasurePeriod, MeasureReport, MeasureReportType,
    MeasureRequest,
};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for the measure command
#[derive(Debug, Clone, Default)]
pub struct MeasureConfig {
    pub inputs: InputPaths,
    pub measure: PathBuf,
    pub period_start: String,
    pub period_end: String,
    /// `individual`, `subject-list` or `population`
    pub report_type: String,
    pub subjects: Vec<String>,
    pub params: Vec<String>,
    pub timestamp: Option<String>,
    /// Worker count; one scores every subject on the calling task
    pub shards: usize,
    pub no_short_circuit: bool,
    pub pretty: bool,
    pub output_file: Option<PathBuf>,
}

/// Score the measure and return its report
pub async fn run(config: &MeasureConfig) -> Result<MeasureReport> {
    let text = fs::read_to_string(&config.measure)
        .with_context(|| format!("failed to read measure file: {}", config.measure.display()))?;
    let definition = MeasureDefinition::parse(&text).map_err(|e| anyhow!("{}: {}", e.kind_name(), e))?;
    let report_type: MeasureReportType = config.report_type.parse().map_err(|e| anyhow!("{}", e))?;
    let period = MeasurePeriod::parse(&config.period_start, &config.period_end).map_err(|e| anyhow!("{}", e))?;

    let mut request = MeasureRequest::new(period, report_type).subjects(config.subjects.iter().cloned());
    for (name, value) in parse_parameters(&config.params)? {
        request = request.parameter(name, value);
    }

    let mut evaluator_options = EvaluatorOptions::default();
    if let Some(timestamp) = parse_timestamp(config.timestamp.as_deref())? {
        evaluator_options = evaluator_options.evaluation_timestamp(timestamp);
    }
    let options = MeasureEvaluatorOptions::default()
        .short_circuit(!config.no_short_circuit)
        .shard_count(config.shards)
        .evaluator(evaluator_options);

    let (assets, resolver) = config.inputs.load()?;
    let evaluator = Arc::new(MeasureEvaluator::from_assets(&assets, resolver, options));
    log::info!("evaluating measure {} as a {} report", definition.reference(), report_type);

    let report = if config.shards > 1 {
        evaluator.evaluate_sharded(Arc::new(definition), request).await
    } else {
        tokio::task::spawn_blocking(move || evaluator.evaluate(&definition, &request))
            .await
            .context("measure evaluation task failed")?
    };
    report.map_err(|e| anyhow!("{}: {}", e.kind_name(), e))
}

/// Run the measure command and print the `MeasureReport`
pub async fn execute(config: MeasureConfig) -> Result<()> {
    let report = run(&config).await?;
    if !report.failures.is_empty() {
        eprintln!(
            "{}",
            output::format_warning(&format!(
                "{} subject(s) failed and were excluded from every population",
                report.failures.len()
            ))
        );
    }
    output::print_json(&report.to_json(), config.pretty, config.output_file.as_deref())
}
