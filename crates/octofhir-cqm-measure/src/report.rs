//! Measure reports
//!
//! [`MeasureReport`] is built once per evaluation and serialized as a FHIR
//! `MeasureReport` resource. Subject lists are emitted as contained `List`
//! resources and failed subjects as a contained `OperationOutcome`.

use crate::definition::{MEASURE_POPULATION_SYSTEM, PopulationType};
use crate::error::{MeasureError, MeasureResult};
use octofhir_cqm_eval::EvalError;
use octofhir_cqm_eval::parameters::decimal_json;
use octofhir_cqm_types::{CqlDate, CqlDateTime, CqlInterval, CqlValue};
use rust_decimal::Decimal;
use serde_json::{Map, Value as JsonValue, json};
use std::fmt;
use std::str::FromStr;

const FAILURES_ID: &str = "subject-errors";

/// Subject scope of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MeasureReportType {
    /// Exactly one subject; a subject failure is fatal
    Individual,
    /// Population counts plus the member subjects of each population
    SubjectList,
    /// Population counts only
    #[default]
    Population,
}

impl MeasureReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::SubjectList => "subject-list",
            Self::Population => "population",
        }
    }

    /// `MeasureReport.type` code
    pub fn fhir_code(&self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::SubjectList => "subject-list",
            Self::Population => "summary",
        }
    }
}

impl FromStr for MeasureReportType {
    type Err = MeasureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "individual" | "subject" => Ok(Self::Individual),
            "subject-list" | "subjectlist" => Ok(Self::SubjectList),
            "population" | "summary" => Ok(Self::Population),
            other => Err(EvalError::malformed(format!("unknown report type '{}'", other)).into()),
        }
    }
}

impl fmt::Display for MeasureReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Measurement period, both bounds inclusive
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurePeriod {
    pub start: CqlDateTime,
    pub end: CqlDateTime,
}

impl MeasurePeriod {
    pub fn new(start: CqlDateTime, end: CqlDateTime) -> Self {
        Self { start, end }
    }

    /// Whole days from the start of `start` to the end of `end`, in UTC.
    /// Both dates are expected at day precision.
    pub fn from_dates(start: &CqlDate, end: &CqlDate) -> Self {
        let mut low = CqlDateTime::from_date(start);
        (low.hour, low.minute, low.second, low.millisecond) = (Some(0), Some(0), Some(0), Some(0));
        low.offset_minutes = Some(0);
        let mut high = CqlDateTime::from_date(end);
        (high.hour, high.minute, high.second, high.millisecond) = (Some(23), Some(59), Some(59), Some(999));
        high.offset_minutes = Some(0);
        Self::new(low, high)
    }

    /// Parse bounds given as dates or date-times
    pub fn parse(start: &str, end: &str) -> MeasureResult<Self> {
        let invalid = |text: &str| MeasureError::from(EvalError::malformed(format!("invalid period bound '{}'", text)));
        if !start.contains('T') && !end.contains('T') {
            let full_date = |text: &str| CqlDate::parse(text).filter(|d| d.day.is_some()).ok_or_else(|| invalid(text));
            let start_date = full_date(start)?;
            let end_date = full_date(end)?;
            return Ok(Self::from_dates(&start_date, &end_date));
        }
        Ok(Self::new(
            CqlDateTime::parse(start).ok_or_else(|| invalid(start))?,
            CqlDateTime::parse(end).ok_or_else(|| invalid(end))?,
        ))
    }

    /// Closed interval bound to the `Measurement Period` parameter
    pub fn to_interval(&self) -> CqlValue {
        CqlValue::Interval(CqlInterval::closed(
            CqlValue::DateTime(self.start.clone()),
            CqlValue::DateTime(self.end.clone()),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulationReport {
    pub population: PopulationType,
    pub count: usize,
    /// Member subjects; only filled for subject-list reports
    pub subjects: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupReport {
    pub id: Option<String>,
    pub populations: Vec<PopulationReport>,
    pub score: Option<Decimal>,
}

impl GroupReport {
    pub fn count(&self, population: PopulationType) -> Option<usize> {
        self.populations
            .iter()
            .find(|p| p.population == population)
            .map(|p| p.count)
    }
}

/// A subject left out of every population because its evaluation failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectFailure {
    pub subject: String,
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeasureReport {
    pub measure: String,
    pub report_type: MeasureReportType,
    /// The subject of an individual report
    pub subject: Option<String>,
    pub date: CqlDateTime,
    pub period: MeasurePeriod,
    pub groups: Vec<GroupReport>,
    pub failures: Vec<SubjectFailure>,
}

impl MeasureReport {
    /// Serialize as a FHIR `MeasureReport` resource
    pub fn to_json(&self) -> JsonValue {
        let mut contained = Vec::new();
        let mut report = Map::new();
        report.insert("resourceType".to_string(), json!("MeasureReport"));
        report.insert("status".to_string(), json!("complete"));
        report.insert("type".to_string(), json!(self.report_type.fhir_code()));
        report.insert("measure".to_string(), json!(self.measure));
        if let Some(subject) = &self.subject {
            report.insert("subject".to_string(), json!({ "reference": patient_reference(subject) }));
        }
        report.insert("date".to_string(), json!(self.date.to_string()));
        report.insert(
            "period".to_string(),
            json!({ "start": self.period.start.to_string(), "end": self.period.end.to_string() }),
        );

        let groups: Vec<JsonValue> = self
            .groups
            .iter()
            .enumerate()
            .map(|(index, group)| self.group_json(index, group, &mut contained))
            .collect();
        report.insert("group".to_string(), JsonValue::Array(groups));

        if !self.failures.is_empty() {
            contained.push(self.failures_json());
            report.insert(
                "evaluatedResource".to_string(),
                json!([{ "reference": format!("#{}", FAILURES_ID) }]),
            );
        }
        if !contained.is_empty() {
            report.insert("contained".to_string(), JsonValue::Array(contained));
        }
        JsonValue::Object(report)
    }

    fn group_json(&self, index: usize, group: &GroupReport, contained: &mut Vec<JsonValue>) -> JsonValue {
        let mut json = Map::new();
        if let Some(id) = &group.id {
            json.insert("id".to_string(), json!(id));
        }
        let group_key = group.id.clone().unwrap_or_else(|| format!("group-{}", index + 1));

        let populations: Vec<JsonValue> = group
            .populations
            .iter()
            .map(|population| {
                let mut entry = Map::new();
                entry.insert(
                    "code".to_string(),
                    json!({ "coding": [{
                        "system": MEASURE_POPULATION_SYSTEM,
                        "code": population.population.code()
                    }]}),
                );
                entry.insert("count".to_string(), json!(population.count));
                if self.report_type == MeasureReportType::SubjectList {
                    let list_id = format!("{}-{}", group_key, population.population.code());
                    contained.push(subject_list_json(&list_id, &population.subjects));
                    entry.insert("subjectResults".to_string(), json!({ "reference": format!("#{}", list_id) }));
                }
                JsonValue::Object(entry)
            })
            .collect();
        json.insert("population".to_string(), JsonValue::Array(populations));

        if let Some(score) = group.score {
            json.insert("measureScore".to_string(), json!({ "value": decimal_json(score) }));
        }
        JsonValue::Object(json)
    }

    fn failures_json(&self) -> JsonValue {
        let issues: Vec<JsonValue> = self
            .failures
            .iter()
            .map(|failure| {
                json!({
                    "severity": "error",
                    "code": "exception",
                    "details": { "text": failure.kind },
                    "diagnostics": format!("{}: {}", patient_reference(&failure.subject), failure.message),
                    "expression": [patient_reference(&failure.subject)]
                })
            })
            .collect();
        json!({ "resourceType": "OperationOutcome", "id": FAILURES_ID, "issue": issues })
    }
}

fn subject_list_json(id: &str, subjects: &[String]) -> JsonValue {
    let entries: Vec<JsonValue> = subjects
        .iter()
        .map(|s| json!({ "item": { "reference": patient_reference(s) } }))
        .collect();
    json!({ "resourceType": "List", "id": id, "status": "current", "mode": "snapshot", "entry": entries })
}

/// `Patient/id` for a bare subject id
pub fn patient_reference(subject: &str) -> String {
    if subject.contains('/') {
        subject.to_string()
    } else {
        format!("Patient/{}", subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn report(report_type: MeasureReportType) -> MeasureReport {
        MeasureReport {
            measure: "http://example.org/Measure/m|1".to_string(),
            report_type,
            subject: None,
            date: CqlDateTime::new(2024, 6, 1, 0, 0, 0, 0, Some(0)),
            period: MeasurePeriod::parse("2024-01-01", "2024-12-31").unwrap(),
            groups: vec![GroupReport {
                id: Some("g1".to_string()),
                populations: vec![
                    PopulationReport {
                        population: PopulationType::InitialPopulation,
                        count: 2,
                        subjects: vec!["a".to_string(), "b".to_string()],
                    },
                    PopulationReport {
                        population: PopulationType::Denominator,
                        count: 2,
                        subjects: vec!["a".to_string(), "b".to_string()],
                    },
                    PopulationReport {
                        population: PopulationType::Numerator,
                        count: 1,
                        subjects: vec!["a".to_string()],
                    },
                ],
                score: Some(Decimal::new(5, 1)),
            }],
            failures: Vec::new(),
        }
    }

    #[rstest]
    #[case("individual", MeasureReportType::Individual)]
    #[case("subject-list", MeasureReportType::SubjectList)]
    #[case("population", MeasureReportType::Population)]
    #[case("summary", MeasureReportType::Population)]
    fn test_report_type_parse(#[case] text: &str, #[case] expected: MeasureReportType) {
        assert_eq!(text.parse::<MeasureReportType>().unwrap(), expected);
    }

    #[test]
    fn test_period_from_dates() {
        let period = MeasurePeriod::parse("2024-01-01", "2024-12-31").unwrap();
        assert_eq!(period.start.to_string(), "2024-01-01T00:00:00.000Z");
        assert_eq!(period.end.to_string(), "2024-12-31T23:59:59.999Z");
        assert!(MeasurePeriod::parse("2024-13-01", "2024-12-31").is_err());
    }

    #[rstest]
    #[case("2024-13-01", "2024-12-31")]
    #[case("2024-01", "2024-12-31")]
    #[case("2024-01-01T00:00:00Z", "yesterday")]
    fn test_invalid_period_is_malformed_input(#[case] start: &str, #[case] end: &str) {
        let err = MeasurePeriod::parse(start, end).unwrap_err();
        assert_eq!(err.kind_name(), "MalformedInputError");
        assert!(matches!(err, MeasureError::Eval(ref e) if e.is_fatal()));
    }

    #[test]
    fn test_unknown_report_type_is_malformed_input() {
        let err = "everything".parse::<MeasureReportType>().unwrap_err();
        assert_eq!(err.kind_name(), "MalformedInputError");
    }

    #[test]
    fn test_summary_json() {
        let json = report(MeasureReportType::Population).to_json();
        assert_eq!(
            json,
            json!({
                "resourceType": "MeasureReport",
                "status": "complete",
                "type": "summary",
                "measure": "http://example.org/Measure/m|1",
                "date": "2024-06-01T00:00:00.000Z",
                "period": {"start": "2024-01-01T00:00:00.000Z", "end": "2024-12-31T23:59:59.999Z"},
                "group": [{
                    "id": "g1",
                    "population": [
                        {"code": {"coding": [{"system": MEASURE_POPULATION_SYSTEM, "code": "initial-population"}]}, "count": 2},
                        {"code": {"coding": [{"system": MEASURE_POPULATION_SYSTEM, "code": "denominator"}]}, "count": 2},
                        {"code": {"coding": [{"system": MEASURE_POPULATION_SYSTEM, "code": "numerator"}]}, "count": 1}
                    ],
                    "measureScore": {"value": 0.5}
                }]
            })
        );
    }

    #[test]
    fn test_subject_list_json() {
        let json = report(MeasureReportType::SubjectList).to_json();
        assert_eq!(json["type"], json!("subject-list"));
        assert_eq!(
            json["group"][0]["population"][2]["subjectResults"],
            json!({"reference": "#g1-numerator"})
        );
        assert_eq!(
            json["contained"][2],
            json!({"resourceType": "List", "id": "g1-numerator", "status": "current", "mode": "snapshot",
                   "entry": [{"item": {"reference": "Patient/a"}}]})
        );
    }

    #[test]
    fn test_failures_are_contained() {
        let mut report = report(MeasureReportType::Population);
        report.failures.push(SubjectFailure {
            subject: "c".to_string(),
            kind: "SubjectEvaluationError",
            message: "boom".to_string(),
        });
        let json = report.to_json();
        assert_eq!(json["evaluatedResource"], json!([{"reference": "#subject-errors"}]));
        assert_eq!(json["contained"][0]["resourceType"], json!("OperationOutcome"));
        assert_eq!(json["contained"][0]["issue"][0]["diagnostics"], json!("Patient/c: boom"));
    }
}
