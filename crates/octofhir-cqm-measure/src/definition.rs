//! Measure definitions
//!
//! A [`MeasureDefinition`] is read from a FHIR `Measure` resource. Only the
//! parts needed for scoring are kept: the primary library reference, the
//! scoring type and the population criteria of each group.

use crate::error::{MeasureError, MeasureResult};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// Code system of population codes
pub const MEASURE_POPULATION_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/measure-population";

/// How group results are scored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasureScoring {
    Proportion,
    Ratio,
    Cohort,
}

impl MeasureScoring {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proportion => "proportion",
            Self::Ratio => "ratio",
            Self::Cohort => "cohort",
        }
    }

    /// Populations a group must define for this scoring
    pub fn required_populations(&self) -> &'static [PopulationType] {
        match self {
            Self::Proportion | Self::Ratio => &[
                PopulationType::InitialPopulation,
                PopulationType::Denominator,
                PopulationType::Numerator,
            ],
            Self::Cohort => &[PopulationType::InitialPopulation],
        }
    }
}

impl FromStr for MeasureScoring {
    type Err = MeasureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proportion" => Ok(Self::Proportion),
            "ratio" => Ok(Self::Ratio),
            "cohort" => Ok(Self::Cohort),
            other => Err(MeasureError::malformed(format!("unsupported scoring type '{}'", other))),
        }
    }
}

impl fmt::Display for MeasureScoring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Population kinds, in scoring order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PopulationType {
    InitialPopulation,
    Denominator,
    DenominatorExclusion,
    Numerator,
    NumeratorExclusion,
    DenominatorException,
}

impl PopulationType {
    pub const ALL: [PopulationType; 6] = [
        Self::InitialPopulation,
        Self::Denominator,
        Self::DenominatorExclusion,
        Self::Numerator,
        Self::NumeratorExclusion,
        Self::DenominatorException,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Self::InitialPopulation => "initial-population",
            Self::Denominator => "denominator",
            Self::DenominatorExclusion => "denominator-exclusion",
            Self::Numerator => "numerator",
            Self::NumeratorExclusion => "numerator-exclusion",
            Self::DenominatorException => "denominator-exception",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.code() == code)
    }
}

impl fmt::Display for PopulationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One population of a group and the expression selecting its members
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulationCriteria {
    pub id: Option<String>,
    pub population: PopulationType,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasureGroup {
    pub id: Option<String>,
    pub populations: Vec<PopulationCriteria>,
}

impl MeasureGroup {
    pub fn criteria(&self, population: PopulationType) -> Option<&PopulationCriteria> {
        self.populations.iter().find(|p| p.population == population)
    }

    /// Criteria expression names, in scoring order
    pub fn expressions(&self) -> impl Iterator<Item = &str> {
        PopulationType::ALL
            .into_iter()
            .filter_map(|p| self.criteria(p))
            .map(|c| c.expression.as_str())
    }
}

/// Library named by a measure: `.../Library/Name|version` or a bare name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryReference {
    pub name: String,
    pub version: Option<String>,
}

impl LibraryReference {
    pub fn parse(canonical: &str) -> MeasureResult<Self> {
        let (url, version) = match canonical.split_once('|') {
            Some((url, version)) => (url, Some(version.to_string())),
            None => (canonical, None),
        };
        let name = url.rsplit('/').next().unwrap_or(url).trim();
        if name.is_empty() {
            return Err(MeasureError::malformed(format!("invalid library reference '{}'", canonical)));
        }
        Ok(Self {
            name: name.to_string(),
            version: version.filter(|v| !v.is_empty()),
        })
    }
}

/// Scoring-relevant content of a `Measure` resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasureDefinition {
    pub url: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub library: LibraryReference,
    pub scoring: MeasureScoring,
    pub groups: Vec<MeasureGroup>,
}

impl MeasureDefinition {
    /// Parse `Measure` JSON text
    pub fn parse(text: &str) -> MeasureResult<Self> {
        let json: JsonValue =
            serde_json::from_str(text).map_err(|e| MeasureError::malformed(format!("invalid Measure JSON: {}", e)))?;
        Self::from_value(&json)
    }

    pub fn from_value(json: &JsonValue) -> MeasureResult<Self> {
        if json.get("resourceType").and_then(JsonValue::as_str) != Some("Measure") {
            return Err(MeasureError::malformed("document is not a Measure resource"));
        }

        let library = json
            .pointer("/library/0")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| MeasureError::malformed("Measure.library is missing"))?;
        let scoring = json
            .pointer("/scoring/coding/0/code")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| MeasureError::malformed("Measure.scoring is missing"))?
            .parse::<MeasureScoring>()?;

        let groups = json
            .get("group")
            .and_then(JsonValue::as_array)
            .into_iter()
            .flatten()
            .enumerate()
            .map(|(index, group)| parse_group(index, group))
            .collect::<MeasureResult<Vec<_>>>()?;
        if groups.is_empty() {
            return Err(MeasureError::malformed("Measure has no groups"));
        }
        for group in &groups {
            for required in scoring.required_populations() {
                if group.criteria(*required).is_none() {
                    return Err(MeasureError::malformed(format!(
                        "{} measure group {} lacks a {} population",
                        scoring,
                        group.id.as_deref().unwrap_or("<unnamed>"),
                        required
                    )));
                }
            }
        }

        Ok(Self {
            url: string_field(json, "url"),
            name: string_field(json, "name"),
            version: string_field(json, "version"),
            library: LibraryReference::parse(library)?,
            scoring,
            groups,
        })
    }

    /// Canonical reference used in reports
    pub fn reference(&self) -> String {
        let base = self
            .url
            .clone()
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| "Measure".to_string());
        match &self.version {
            Some(version) => format!("{}|{}", base, version),
            None => base,
        }
    }

    /// Every criteria expression across groups, without duplicates
    pub fn criteria_expressions(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for name in self.groups.iter().flat_map(MeasureGroup::expressions) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

fn parse_group(index: usize, group: &JsonValue) -> MeasureResult<MeasureGroup> {
    let mut populations = Vec::new();
    for population in group
        .get("population")
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
    {
        let code = population
            .pointer("/code/coding/0/code")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| MeasureError::malformed(format!("group {} has a population without a code", index)))?;
        let Some(kind) = PopulationType::from_code(code) else {
            log::warn!("ignoring unsupported population '{}' in group {}", code, index);
            continue;
        };
        let expression = population
            .pointer("/criteria/expression")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| MeasureError::malformed(format!("population {} has no criteria expression", code)))?;
        if populations.iter().any(|p: &PopulationCriteria| p.population == kind) {
            return Err(MeasureError::malformed(format!("group {} repeats population {}", index, code)));
        }
        populations.push(PopulationCriteria {
            id: string_field(population, "id"),
            population: kind,
            expression: expression.to_string(),
        });
    }
    Ok(MeasureGroup {
        id: string_field(group, "id"),
        populations,
    })
}

fn string_field(json: &JsonValue, key: &str) -> Option<String> {
    json.get(key).and_then(JsonValue::as_str).map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    fn population(code: &str, expression: &str) -> JsonValue {
        json!({
            "code": {"coding": [{"system": MEASURE_POPULATION_SYSTEM, "code": code}]},
            "criteria": {"language": "text/cql-identifier", "expression": expression}
        })
    }

    fn measure(scoring: &str, populations: Vec<JsonValue>) -> JsonValue {
        json!({
            "resourceType": "Measure",
            "url": "http://example.org/Measure/screening",
            "version": "1.0.0",
            "library": ["http://example.org/Library/Screening|1.0.0"],
            "scoring": {"coding": [{"code": scoring}]},
            "group": [{"id": "g1", "population": populations}]
        })
    }

    #[test]
    fn test_parse_proportion_measure() {
        let definition = MeasureDefinition::from_value(&measure(
            "proportion",
            vec![
                population("initial-population", "Initial Population"),
                population("denominator", "Denominator"),
                population("numerator", "Numerator"),
                population("denominator-exclusion", "Denominator Exclusion"),
            ],
        ))
        .unwrap();

        assert_eq!(definition.scoring, MeasureScoring::Proportion);
        assert_eq!(
            definition.library,
            LibraryReference {
                name: "Screening".to_string(),
                version: Some("1.0.0".to_string())
            }
        );
        assert_eq!(definition.reference(), "http://example.org/Measure/screening|1.0.0");
        assert_eq!(
            definition.groups[0].expressions().collect::<Vec<_>>(),
            vec!["Initial Population", "Denominator", "Denominator Exclusion", "Numerator"]
        );
    }

    #[rstest]
    #[case("continuous-variable")]
    #[case("composite")]
    fn test_unsupported_scoring(#[case] scoring: &str) {
        let err = MeasureDefinition::from_value(&measure(scoring, vec![])).unwrap_err();
        assert!(matches!(err, MeasureError::MalformedMeasure(_)));
    }

    #[test]
    fn test_proportion_requires_numerator() {
        let json = measure(
            "proportion",
            vec![
                population("initial-population", "IP"),
                population("denominator", "D"),
            ],
        );
        assert!(MeasureDefinition::from_value(&json).is_err());
    }

    #[rstest]
    #[case("http://example.org/fhir/Library/Common|2.1", "Common", Some("2.1"))]
    #[case("Library/Common", "Common", None)]
    #[case("Common", "Common", None)]
    fn test_library_reference(#[case] canonical: &str, #[case] name: &str, #[case] version: Option<&str>) {
        let reference = LibraryReference::parse(canonical).unwrap();
        assert_eq!(reference.name, name);
        assert_eq!(reference.version.as_deref(), version);
    }
}
