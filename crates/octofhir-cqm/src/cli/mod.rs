//! CLI functionality for the cqm tool
//!
//! This module contains all CLI-related functionality including:
//! - Expression evaluation
//! - Measure evaluation
//! - Output formatting

pub mod evaluate;
pub mod measure;
pub mod output;

use crate::source::FileResourceSource;
use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use octofhir_cqm_eval::{AssetCache, Assets};
use octofhir_cqm_model::{TypeResolver, fhir_r4_resolver};
use octofhir_cqm_types::{CqlDate, CqlDateTime, CqlValue};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Input documents shared by both commands
#[derive(Debug, Clone, Default)]
pub struct InputPaths {
    pub libraries: Vec<PathBuf>,
    pub value_sets: Option<PathBuf>,
    pub data: Option<PathBuf>,
}

impl InputPaths {
    /// Parse every input once and return the shared assets
    pub fn load(&self) -> Result<(Arc<Assets>, Arc<dyn TypeResolver>)> {
        if self.libraries.is_empty() {
            bail!("at least one --library is required");
        }
        let resolver: Arc<dyn TypeResolver> = Arc::new(fhir_r4_resolver()?);
        let source = FileResourceSource::new(self.libraries.iter().cloned())
            .with_value_sets(self.value_sets.clone())
            .with_data(self.data.clone());
        let cache = AssetCache::new(Arc::new(source), Arc::clone(&resolver));
        let assets = cache.get().context("failed to load input documents")?;
        Ok((assets, resolver))
    }
}

/// Install the logger; `-v` raises the level, `RUST_LOG` overrides it
pub fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

/// Parse `name=value` parameter overrides
///
/// Values are read as booleans, integers, decimals, `@`-prefixed dates and
/// date-times, or strings.
pub fn parse_parameters(params: &[String]) -> Result<IndexMap<String, CqlValue>> {
    let mut result = IndexMap::new();
    for param in params {
        let Some((name, value)) = param.split_once('=') else {
            bail!("invalid parameter format: '{}'. Expected 'name=value'", param);
        };
        result.insert(name.trim().to_string(), parse_value(value.trim())?);
    }
    Ok(result)
}

fn parse_value(text: &str) -> Result<CqlValue> {
    if let Some(temporal) = text.strip_prefix('@') {
        if temporal.contains('T') {
            return CqlDateTime::parse(temporal)
                .map(CqlValue::DateTime)
                .with_context(|| format!("invalid date-time '{}'", text));
        }
        return CqlDate::parse(temporal)
            .map(CqlValue::Date)
            .with_context(|| format!("invalid date '{}'", text));
    }
    Ok(match text {
        "true" => CqlValue::Boolean(true),
        "false" => CqlValue::Boolean(false),
        "null" => CqlValue::Null,
        _ => {
            if let Ok(integer) = text.parse::<i32>() {
                CqlValue::Integer(integer)
            } else if let Ok(decimal) = Decimal::from_str(text) {
                CqlValue::Decimal(decimal)
            } else {
                CqlValue::String(text.to_string())
            }
        }
    })
}

/// Parse an optional fixed evaluation timestamp
pub fn parse_timestamp(text: Option<&str>) -> Result<Option<CqlDateTime>> {
    text.map(|t| CqlDateTime::parse(t).with_context(|| format!("invalid timestamp '{}'", t)))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("flag=true", CqlValue::Boolean(true))]
    #[case("count=30", CqlValue::Integer(30))]
    #[case("ratio=0.25", CqlValue::Decimal(Decimal::new(25, 2)))]
    #[case("start=@2024-01-01", CqlValue::Date(CqlDate::new(2024, 1, 1)))]
    #[case("name=John", CqlValue::String("John".to_string()))]
    #[case("missing=null", CqlValue::Null)]
    fn test_parse_parameter(#[case] param: &str, #[case] expected: CqlValue) {
        let params = parse_parameters(&[param.to_string()]).unwrap();
        assert_eq!(params.values().next(), Some(&expected));
    }

    #[test]
    fn test_parse_parameters_invalid() {
        assert!(parse_parameters(&["invalid".to_string()]).is_err());
        assert!(parse_parameters(&["when=@not-a-date".to_string()]).is_err());
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp(None).unwrap(), None);
        assert!(parse_timestamp(Some("2024-06-01T12:00:00Z")).unwrap().is_some());
        assert!(parse_timestamp(Some("yesterday")).is_err());
    }
}
