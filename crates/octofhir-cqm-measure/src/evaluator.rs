//! Measure evaluation
//!
//! [`MeasureEvaluator`] resolves a measure's primary library once, scores
//! every subject in scope against each group and aggregates the counts into
//! a [`MeasureReport`]. Subjects are scored with their own evaluation context,
//! so expression results never leak between subjects.
//!
//! [`MeasureEvaluator::evaluate_sharded`] spreads the subjects over blocking
//! tokio tasks. Every worker builds its own terminology and data providers
//! over the same immutable bundles and the merged result equals the
//! sequential one.

use crate::definition::{MeasureDefinition, PopulationType};
use crate::error::{MeasureError, MeasureResult};
use crate::report::{GroupReport, MeasurePeriod, MeasureReport, MeasureReportType, PopulationReport, SubjectFailure};
use crate::scoring::{GroupMembership, GroupTally, is_member, score_group};
use indexmap::IndexMap;
use octofhir_cqm_eval::{
    Assets, ContentResolver, ContextBinding, EvalError, EvalResult, EvaluatorOptions, ExpressionEvaluator, LibrarySet,
};
use octofhir_cqm_model::{ResourceBundle, TypeResolver, fhir_r4_resolver};
use octofhir_cqm_types::{CqlDateTime, CqlValue};
use std::sync::Arc;

/// Library parameter the measurement period is bound to
pub const MEASUREMENT_PERIOD: &str = "Measurement Period";

#[derive(Debug, Clone)]
pub struct MeasureEvaluatorOptions {
    /// Skip criteria whose prerequisite population is already false
    pub short_circuit: bool,
    /// Worker count for sharded evaluation
    pub shard_count: usize,
    pub evaluator: EvaluatorOptions,
}

impl Default for MeasureEvaluatorOptions {
    fn default() -> Self {
        Self {
            short_circuit: true,
            shard_count: 4,
            evaluator: EvaluatorOptions::default(),
        }
    }
}

impl MeasureEvaluatorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn short_circuit(mut self, enabled: bool) -> Self {
        self.short_circuit = enabled;
        self
    }

    pub fn shard_count(mut self, count: usize) -> Self {
        self.shard_count = count.max(1);
        self
    }

    pub fn evaluator(mut self, options: EvaluatorOptions) -> Self {
        self.evaluator = options;
        self
    }
}

/// Period and subject scope of one measure evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct MeasureRequest {
    pub period: MeasurePeriod,
    pub report_type: MeasureReportType,
    /// Explicit subjects; empty means every patient in the data bundle
    pub subjects: Vec<String>,
    /// Additional parameters for the primary library
    pub parameters: IndexMap<String, CqlValue>,
}

impl MeasureRequest {
    pub fn new(period: MeasurePeriod, report_type: MeasureReportType) -> Self {
        Self {
            period,
            report_type,
            subjects: Vec::new(),
            parameters: IndexMap::new(),
        }
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subjects.push(subject.into());
        self
    }

    pub fn subjects<I, S>(mut self, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subjects.extend(subjects.into_iter().map(Into::into));
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, value: CqlValue) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }
}

/// Per-subject outcome, in subject order
type SubjectOutcome = (String, EvalResult<Vec<GroupMembership>>);

/// Everything fixed once the library is resolved
struct ScoringPlan {
    libraries: Arc<LibrarySet>,
    parameters: IndexMap<String, CqlValue>,
    timestamp: CqlDateTime,
    subjects: Vec<String>,
}

/// Evaluates measures over one set of libraries, value sets and data
pub struct MeasureEvaluator {
    content: Arc<dyn ContentResolver>,
    value_sets: Arc<ResourceBundle>,
    data: Arc<ResourceBundle>,
    resolver: Arc<dyn TypeResolver>,
    options: MeasureEvaluatorOptions,
}

impl MeasureEvaluator {
    pub fn new(
        content: Arc<dyn ContentResolver>,
        value_sets: Arc<ResourceBundle>,
        data: Arc<ResourceBundle>,
        options: MeasureEvaluatorOptions,
    ) -> MeasureResult<Self> {
        let resolver: Arc<dyn TypeResolver> = Arc::new(fhir_r4_resolver().map_err(EvalError::from)?);
        Ok(Self::with_resolver(content, value_sets, data, resolver, options))
    }

    pub fn with_resolver(
        content: Arc<dyn ContentResolver>,
        value_sets: Arc<ResourceBundle>,
        data: Arc<ResourceBundle>,
        resolver: Arc<dyn TypeResolver>,
        options: MeasureEvaluatorOptions,
    ) -> Self {
        Self {
            content,
            value_sets,
            data,
            resolver,
            options,
        }
    }

    /// Evaluator over cached assets
    pub fn from_assets(assets: &Assets, resolver: Arc<dyn TypeResolver>, options: MeasureEvaluatorOptions) -> Self {
        Self::with_resolver(
            Arc::clone(&assets.libraries) as Arc<dyn ContentResolver>,
            Arc::clone(&assets.value_sets),
            Arc::clone(&assets.data),
            resolver,
            options,
        )
    }

    pub fn options(&self) -> &MeasureEvaluatorOptions {
        &self.options
    }

    /// Evaluate a measure on the calling thread
    pub fn evaluate(&self, definition: &MeasureDefinition, request: &MeasureRequest) -> MeasureResult<MeasureReport> {
        let session = self.session()?;
        let plan = self.plan(&session, definition, request)?;
        let outcomes = score_subjects(&session, &plan, definition, self.options.short_circuit, &plan.subjects);
        aggregate(definition, request, &plan, outcomes)
    }

    /// Evaluate a measure with subjects split across blocking tasks
    pub async fn evaluate_sharded(
        self: Arc<Self>,
        definition: Arc<MeasureDefinition>,
        request: MeasureRequest,
    ) -> MeasureResult<MeasureReport> {
        let plan = {
            let session = self.session()?;
            Arc::new(self.plan(&session, &definition, &request)?)
        };

        let shard_size = plan.subjects.len().div_ceil(self.options.shard_count.max(1)).max(1);
        let shards: Vec<Vec<String>> = plan.subjects.chunks(shard_size).map(<[String]>::to_vec).collect();
        log::debug!(
            "scoring {} subjects in {} shards of up to {}",
            plan.subjects.len(),
            shards.len(),
            shard_size
        );

        let tasks = shards.into_iter().map(|shard| {
            let this = Arc::clone(&self);
            let plan = Arc::clone(&plan);
            let definition = Arc::clone(&definition);
            tokio::task::spawn_blocking(move || -> MeasureResult<Vec<SubjectOutcome>> {
                let session = this.session()?;
                Ok(score_subjects(&session, &plan, &definition, this.options.short_circuit, &shard))
            })
        });

        let mut outcomes = Vec::with_capacity(plan.subjects.len());
        for joined in futures::future::join_all(tasks).await {
            let shard = joined.map_err(|e| MeasureError::Worker(e.to_string()))??;
            outcomes.extend(shard);
        }
        aggregate(&definition, &request, &plan, outcomes)
    }

    /// Fresh terminology and data providers over the shared bundles
    fn session(&self) -> MeasureResult<ExpressionEvaluator> {
        Ok(ExpressionEvaluator::with_resolver(
            Arc::clone(&self.content),
            &self.value_sets,
            Arc::clone(&self.data),
            Arc::clone(&self.resolver),
            self.options.evaluator.clone(),
        )?)
    }

    /// Resolve the library and fix the subject scope; every failure here is fatal
    fn plan(
        &self,
        session: &ExpressionEvaluator,
        definition: &MeasureDefinition,
        request: &MeasureRequest,
    ) -> MeasureResult<ScoringPlan> {
        log::debug!("resolving library {} for {}", definition.library.name, definition.reference());
        let libraries = session.load(&definition.library.name, definition.library.version.as_deref())?;
        for expression in definition.criteria_expressions() {
            if libraries.main().expression(expression).is_none() {
                return Err(EvalError::expression_not_found(libraries.main_name(), expression).into());
            }
        }

        let subjects = self.subjects(request)?;
        let mut parameters = IndexMap::new();
        parameters.insert(MEASUREMENT_PERIOD.to_string(), request.period.to_interval());
        for (name, value) in &request.parameters {
            parameters.insert(name.clone(), value.clone());
        }
        let timestamp = self
            .options
            .evaluator
            .evaluation_timestamp
            .clone()
            .unwrap_or_else(|| CqlDateTime::from_chrono(&chrono::Utc::now()));

        log::debug!("library resolved, scoring {} subjects", subjects.len());
        Ok(ScoringPlan {
            libraries,
            parameters,
            timestamp,
            subjects,
        })
    }

    fn subjects(&self, request: &MeasureRequest) -> MeasureResult<Vec<String>> {
        let mut subjects: Vec<String> = if request.subjects.is_empty() {
            self.data.patient_ids()
        } else {
            request
                .subjects
                .iter()
                .map(|s| s.strip_prefix("Patient/").unwrap_or(s).to_string())
                .collect()
        };
        let mut seen = std::collections::HashSet::new();
        subjects.retain(|s| seen.insert(s.clone()));

        if request.report_type == MeasureReportType::Individual && subjects.len() != 1 {
            return Err(MeasureError::SubjectScope(format!(
                "an individual report needs exactly one subject, found {}",
                subjects.len()
            )));
        }
        Ok(subjects)
    }
}

/// Score each subject against every group
fn score_subjects(
    session: &ExpressionEvaluator,
    plan: &ScoringPlan,
    definition: &MeasureDefinition,
    short_circuit: bool,
    subjects: &[String],
) -> Vec<SubjectOutcome> {
    subjects
        .iter()
        .map(|subject| {
            let outcome = score_subject(session, plan, definition, short_circuit, subject);
            (subject.clone(), outcome)
        })
        .collect()
}

fn score_subject(
    session: &ExpressionEvaluator,
    plan: &ScoringPlan,
    definition: &MeasureDefinition,
    short_circuit: bool,
    subject: &str,
) -> EvalResult<Vec<GroupMembership>> {
    let mut ctx = session.context_for(
        &plan.libraries,
        ContextBinding::patient(subject),
        &plan.parameters,
        Some(plan.timestamp.clone()),
    );
    let library = plan.libraries.main_name().to_string();
    let engine = session.engine();
    definition
        .groups
        .iter()
        .map(|group| {
            score_group(group, definition.scoring, short_circuit, |expression| {
                let value = engine.evaluate_definition(&library, expression, &mut ctx)?;
                Ok(is_member(&value))
            })
        })
        .collect()
}

/// Fold subject outcomes into a report
fn aggregate(
    definition: &MeasureDefinition,
    request: &MeasureRequest,
    plan: &ScoringPlan,
    outcomes: Vec<SubjectOutcome>,
) -> MeasureResult<MeasureReport> {
    let mut tallies: Vec<GroupTally> = definition.groups.iter().map(GroupTally::new).collect();
    let mut failures = Vec::new();

    for (subject, outcome) in outcomes {
        match outcome {
            Ok(memberships) => {
                for (tally, membership) in tallies.iter_mut().zip(&memberships) {
                    tally.add(&subject, membership);
                }
            }
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) if request.report_type == MeasureReportType::Individual => {
                return Err(MeasureError::subject(subject, err));
            }
            Err(err) => {
                log::warn!("excluding subject {} from all populations: {}", subject, err);
                failures.push(SubjectFailure {
                    kind: "SubjectEvaluationError",
                    message: err.to_string(),
                    subject,
                });
            }
        }
    }
    log::debug!("aggregated {} groups, {} failed subjects", tallies.len(), failures.len());

    let with_subjects = request.report_type == MeasureReportType::SubjectList;
    let groups = definition
        .groups
        .iter()
        .zip(&tallies)
        .map(|(group, tally)| GroupReport {
            id: group.id.clone(),
            populations: PopulationType::ALL
                .into_iter()
                .filter(|p| group.criteria(*p).is_some())
                .map(|population| PopulationReport {
                    population,
                    count: tally.count(population),
                    subjects: if with_subjects {
                        tally.subjects(population).to_vec()
                    } else {
                        Vec::new()
                    },
                })
                .collect(),
            score: tally.score(definition.scoring),
        })
        .collect();

    Ok(MeasureReport {
        measure: definition.reference(),
        report_type: request.report_type,
        subject: (request.report_type == MeasureReportType::Individual)
            .then(|| plan.subjects.first().cloned())
            .flatten(),
        date: plan.timestamp.clone(),
        period: request.period.clone(),
        groups,
        failures,
    })
}
