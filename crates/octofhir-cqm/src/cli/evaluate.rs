//! Evaluate command implementation

use super::{InputPaths, output, parse_parameters, parse_timestamp};
use anyhow::{Context, Result, anyhow};
use octofhir_cqm_eval::{ContextBinding, EvaluationRequest, EvaluatorOptions};
use serde_json::Value;
use std::path::PathBuf;

/// Configuration for the evaluate command
#[derive(Debug, Clone, Default)]
pub struct EvaluateConfig {
    pub inputs: InputPaths,
    /// Primary library name
    pub primary: String,
    pub min_version: Option<String>,
    /// Expressions to evaluate; empty means every public definition
    pub expressions: Vec<String>,
    /// `Type=value`, e.g. `Patient=123`
    pub context: Option<String>,
    pub label: Option<String>,
    pub params: Vec<String>,
    pub timestamp: Option<String>,
    pub lazy_value_sets: bool,
    pub pretty: bool,
    pub output_file: Option<PathBuf>,
}

/// Evaluate the requested expressions and return the `Parameters` document
pub fn run(config: &EvaluateConfig) -> Result<Value> {
    let (assets, resolver) = config.inputs.load()?;

    let mut options = EvaluatorOptions::default().expand_value_sets(!config.lazy_value_sets);
    if let Some(timestamp) = parse_timestamp(config.timestamp.as_deref())? {
        options = options.evaluation_timestamp(timestamp);
    }
    let evaluator = assets.evaluator(resolver, options)?;

    let mut context = config
        .context
        .as_deref()
        .map(ContextBinding::parse)
        .unwrap_or_default();
    if let Some(label) = &config.label {
        context = context.with_label(label.as_str());
    }

    let mut request = EvaluationRequest::new(config.primary.as_str())
        .expressions(config.expressions.iter().cloned())
        .context(context);
    if let Some(version) = &config.min_version {
        request = request.min_version(version.as_str());
    }
    for (name, value) in parse_parameters(&config.params)? {
        request = request.parameter(name, value);
    }

    log::info!("evaluating library {}", config.primary);
    let result = evaluator
        .evaluate(&request)
        .map_err(|e| anyhow!("{}: {}", e.kind().as_str(), e))
        .with_context(|| format!("evaluation of {} failed", config.primary))?;
    Ok(result.to_parameters())
}

/// Run the evaluate command and print its output
pub async fn execute(config: EvaluateConfig) -> Result<()> {
    let parameters = tokio::task::spawn_blocking({
        let config = config.clone();
        move || run(&config)
    })
    .await
    .context("evaluation task failed")??;
    output::print_json(&parameters, config.pretty, config.output_file.as_deref())
}
