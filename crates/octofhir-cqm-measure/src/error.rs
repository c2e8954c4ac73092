//! Measure evaluation errors

use octofhir_cqm_eval::EvalError;
use thiserror::Error;

pub type MeasureResult<T> = Result<T, MeasureError>;

#[derive(Debug, Error)]
pub enum MeasureError {
    /// Library resolution or another whole-evaluation failure
    #[error(transparent)]
    Eval(#[from] EvalError),

    /// One subject's criteria evaluation failed
    #[error("evaluation failed for subject {subject}: {source}")]
    SubjectEvaluation {
        subject: String,
        #[source]
        source: EvalError,
    },

    /// The `Measure` resource is unusable
    #[error("malformed measure: {0}")]
    MalformedMeasure(String),

    /// The requested subjects do not fit the report type
    #[error("invalid subject scope: {0}")]
    SubjectScope(String),

    /// A sharded evaluation worker panicked or was cancelled
    #[error("evaluation worker failed: {0}")]
    Worker(String),
}

impl MeasureError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedMeasure(message.into())
    }

    pub fn subject(subject: impl Into<String>, source: EvalError) -> Self {
        Self::SubjectEvaluation {
            subject: subject.into(),
            source,
        }
    }

    /// Taxonomy name reported to callers
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Eval(err) => err.kind().as_str(),
            Self::SubjectEvaluation { .. } => "SubjectEvaluationError",
            Self::MalformedMeasure(_) | Self::SubjectScope(_) => "MalformedInputError",
            Self::Worker(_) => "EvaluationError",
        }
    }
}
