//! Population algebra and group scoring
//!
//! Criteria are evaluated in population order. A subject only reaches a
//! population when it is already in every population the algebra puts before
//! it, so membership is monotone whatever the criteria expressions return.

use crate::definition::{MeasureGroup, MeasureScoring, PopulationType};
use octofhir_cqm_eval::EvalResult;
use octofhir_cqm_types::CqlValue;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Decimal places kept in a measure score
pub const SCORE_SCALE: u32 = 8;

/// Whether a criteria result makes the subject a member.
///
/// `true` and lists with a non-null element are members; null, `false` and
/// empty lists are not. Any other non-null value counts as a member.
pub fn is_member(value: &CqlValue) -> bool {
    match value {
        CqlValue::Null => false,
        CqlValue::Boolean(b) => *b,
        CqlValue::List(list) => list.iter().any(|v| !v.is_null()),
        _ => true,
    }
}

/// One subject's membership in the populations a group defines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupMembership {
    members: BTreeMap<PopulationType, bool>,
}

impl GroupMembership {
    pub fn contains(&self, population: PopulationType) -> bool {
        self.members.get(&population).copied().unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PopulationType, bool)> + '_ {
        self.members.iter().map(|(p, m)| (*p, *m))
    }
}

/// Score one subject against one group.
///
/// `criterion` evaluates a criteria expression for the subject. With
/// `short_circuit` a criterion is skipped once its prerequisite is false.
pub fn score_group<F>(
    group: &MeasureGroup,
    scoring: MeasureScoring,
    short_circuit: bool,
    mut criterion: F,
) -> EvalResult<GroupMembership>
where
    F: FnMut(&str) -> EvalResult<bool>,
{
    let mut membership = GroupMembership::default();
    let mut evaluate = |population: PopulationType, prerequisite: bool| -> EvalResult<bool> {
        let Some(criteria) = group.criteria(population) else {
            return Ok(false);
        };
        let member = if prerequisite || !short_circuit {
            // Without short-circuiting every defined criterion runs
            let matched = criterion(&criteria.expression)?;
            prerequisite && matched
        } else {
            false
        };
        membership.members.insert(population, member);
        Ok(member)
    };

    let initial = evaluate(PopulationType::InitialPopulation, true)?;
    if scoring == MeasureScoring::Cohort {
        return Ok(membership);
    }

    let denominator = evaluate(PopulationType::Denominator, initial)?;
    let excluded = evaluate(PopulationType::DenominatorExclusion, denominator)?;
    let numerator_prerequisite = match scoring {
        MeasureScoring::Ratio => initial,
        _ => denominator && !excluded,
    };
    let numerator = evaluate(PopulationType::Numerator, numerator_prerequisite)?;
    evaluate(PopulationType::NumeratorExclusion, numerator)?;
    if scoring == MeasureScoring::Proportion {
        evaluate(PopulationType::DenominatorException, denominator && !excluded && !numerator)?;
    }
    Ok(membership)
}

/// Aggregated counts of one group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupTally {
    counts: BTreeMap<PopulationType, usize>,
    subjects: BTreeMap<PopulationType, Vec<String>>,
}

impl GroupTally {
    /// Zero counts for every population the group defines
    pub fn new(group: &MeasureGroup) -> Self {
        let counts = group.populations.iter().map(|c| (c.population, 0)).collect();
        Self {
            counts,
            subjects: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, subject: &str, membership: &GroupMembership) {
        for (population, member) in membership.iter() {
            if !member {
                continue;
            }
            *self.counts.entry(population).or_insert(0) += 1;
            self.subjects
                .entry(population)
                .or_default()
                .push(subject.to_string());
        }
    }

    pub fn count(&self, population: PopulationType) -> usize {
        self.counts.get(&population).copied().unwrap_or(0)
    }

    /// Populations with their counts, in population order
    pub fn counts(&self) -> impl Iterator<Item = (PopulationType, usize)> + '_ {
        self.counts.iter().map(|(p, c)| (*p, *c))
    }

    /// Member subjects of a population, in evaluation order
    pub fn subjects(&self, population: PopulationType) -> &[String] {
        self.subjects.get(&population).map(Vec::as_slice).unwrap_or_default()
    }

    /// Measure score; `None` for cohort measures or an empty divisor
    pub fn score(&self, scoring: MeasureScoring) -> Option<Decimal> {
        let count = |p| self.count(p) as i64;
        let numerator = count(PopulationType::Numerator) - count(PopulationType::NumeratorExclusion);
        let denominator = count(PopulationType::Denominator) - count(PopulationType::DenominatorExclusion);
        let divisor = match scoring {
            MeasureScoring::Cohort => return None,
            MeasureScoring::Proportion => denominator - count(PopulationType::DenominatorException),
            MeasureScoring::Ratio => denominator,
        };
        if divisor <= 0 {
            return None;
        }
        Decimal::from(numerator)
            .checked_div(Decimal::from(divisor))
            .map(|score| score.round_dp(SCORE_SCALE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::PopulationCriteria;
    use octofhir_cqm_eval::EvalError;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn group(populations: &[PopulationType]) -> MeasureGroup {
        MeasureGroup {
            id: Some("g".to_string()),
            populations: populations
                .iter()
                .map(|p| PopulationCriteria {
                    id: None,
                    population: *p,
                    expression: p.code().to_string(),
                })
                .collect(),
        }
    }

    fn full_group() -> MeasureGroup {
        group(&PopulationType::ALL)
    }

    fn score(
        group: &MeasureGroup,
        scoring: MeasureScoring,
        short_circuit: bool,
        results: &HashMap<&str, bool>,
    ) -> GroupMembership {
        score_group(group, scoring, short_circuit, |name| {
            Ok(results.get(name).copied().unwrap_or(false))
        })
        .unwrap()
    }

    #[rstest]
    #[case(CqlValue::Boolean(true), true)]
    #[case(CqlValue::Boolean(false), false)]
    #[case(CqlValue::Null, false)]
    #[case(CqlValue::list([]), false)]
    #[case(CqlValue::list([CqlValue::Null]), false)]
    #[case(CqlValue::list([CqlValue::Integer(1)]), true)]
    #[case(CqlValue::Integer(0), true)]
    fn test_is_member(#[case] value: CqlValue, #[case] expected: bool) {
        assert_eq!(is_member(&value), expected);
    }

    #[test]
    fn test_numerator_requires_denominator() {
        let results: HashMap<&str, bool> = [("initial-population", true), ("denominator", false), ("numerator", true)]
            .into_iter()
            .collect();
        let membership = score(&full_group(), MeasureScoring::Proportion, true, &results);
        assert!(membership.contains(PopulationType::InitialPopulation));
        assert!(!membership.contains(PopulationType::Denominator));
        assert!(!membership.contains(PopulationType::Numerator));
    }

    #[test]
    fn test_ratio_numerator_only_needs_initial_population() {
        let results: HashMap<&str, bool> = [("initial-population", true), ("denominator", false), ("numerator", true)]
            .into_iter()
            .collect();
        let membership = score(&full_group(), MeasureScoring::Ratio, true, &results);
        assert!(membership.contains(PopulationType::Numerator));
        assert!(!membership.contains(PopulationType::DenominatorException));
    }

    #[test]
    fn test_excluded_subject_is_not_in_numerator() {
        let results: HashMap<&str, bool> = PopulationType::ALL.iter().map(|p| (p.code(), true)).collect();
        let membership = score(&full_group(), MeasureScoring::Proportion, true, &results);
        assert!(membership.contains(PopulationType::DenominatorExclusion));
        assert!(!membership.contains(PopulationType::Numerator));
        assert!(!membership.contains(PopulationType::DenominatorException));
    }

    #[test]
    fn test_short_circuit_skips_criteria() {
        let mut calls = Vec::new();
        score_group(&full_group(), MeasureScoring::Proportion, true, |name| {
            calls.push(name.to_string());
            Ok(false)
        })
        .unwrap();
        assert_eq!(calls, vec!["initial-population".to_string()]);

        calls.clear();
        score_group(&full_group(), MeasureScoring::Proportion, false, |name| {
            calls.push(name.to_string());
            Ok(false)
        })
        .unwrap();
        assert_eq!(calls.len(), 6);
    }

    #[test]
    fn test_criterion_failure_propagates() {
        let result = score_group(&full_group(), MeasureScoring::Cohort, true, |_| {
            Err(EvalError::internal("boom"))
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_tally_and_score() {
        let group = full_group();
        let mut tally = GroupTally::new(&group);
        let outcomes = [
            ("a", [true, true, false, true, false, false]),
            ("b", [true, true, false, false, false, true]),
            ("c", [true, true, false, false, false, false]),
            ("d", [true, true, true, false, false, false]),
            ("e", [false, false, false, false, false, false]),
        ];
        for (subject, flags) in outcomes {
            let results: HashMap<&str, bool> = PopulationType::ALL
                .iter()
                .zip(flags)
                .map(|(p, f)| (p.code(), f))
                .collect();
            tally.add(subject, &score(&group, MeasureScoring::Proportion, true, &results));
        }

        assert_eq!(tally.count(PopulationType::InitialPopulation), 4);
        assert_eq!(tally.count(PopulationType::Denominator), 4);
        assert_eq!(tally.count(PopulationType::DenominatorExclusion), 1);
        assert_eq!(tally.count(PopulationType::Numerator), 1);
        assert_eq!(tally.count(PopulationType::DenominatorException), 1);
        assert_eq!(tally.subjects(PopulationType::Numerator), ["a".to_string()]);
        // 1 / (4 - 1 - 1)
        assert_eq!(tally.score(MeasureScoring::Proportion), Some(Decimal::new(5, 1)));
        // 1 / (4 - 1)
        assert_eq!(tally.score(MeasureScoring::Ratio), Some(Decimal::new(33333333, 8)));
        assert_eq!(tally.score(MeasureScoring::Cohort), None);
    }

    #[test]
    fn test_empty_divisor_has_no_score() {
        let tally = GroupTally::new(&full_group());
        assert_eq!(tally.score(MeasureScoring::Proportion), None);
    }

    proptest! {
        #[test]
        fn prop_membership_is_monotone(flags in prop::array::uniform6(any::<bool>()), ratio in any::<bool>()) {
            let scoring = if ratio { MeasureScoring::Ratio } else { MeasureScoring::Proportion };
            let results: HashMap<&str, bool> = PopulationType::ALL
                .iter()
                .zip(flags)
                .map(|(p, f)| (p.code(), f))
                .collect();
            let group = full_group();
            let membership = score(&group, scoring, true, &results);
            let has = |p| membership.contains(p);

            if has(PopulationType::Numerator) {
                prop_assert!(has(PopulationType::InitialPopulation));
                if scoring == MeasureScoring::Proportion {
                    prop_assert!(has(PopulationType::Denominator));
                }
            }
            if has(PopulationType::Denominator) {
                prop_assert!(has(PopulationType::InitialPopulation));
            }
            if has(PopulationType::NumeratorExclusion) {
                prop_assert!(has(PopulationType::Numerator));
            }
            if has(PopulationType::DenominatorExclusion) {
                prop_assert!(has(PopulationType::Denominator));
            }

            // Short-circuiting never changes membership
            prop_assert_eq!(membership, score(&group, scoring, false, &results));
        }
    }
}
