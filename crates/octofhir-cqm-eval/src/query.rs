//! Query Evaluation
//!
//! This module implements query evaluation including:
//! - Single-source and multi-source queries (cartesian product)
//! - Let clauses
//! - With/Without relationship clauses
//! - Where filtering
//! - Return projection (distinct unless `return all`)
//! - Sort by direction, column or expression
//!
//! and the `Retrieve` expression that feeds most query sources.

use crate::context::{ContextBinding, EvaluationContext};
use crate::engine::{CqlEngine, property_path};
use crate::error::{EvalError, EvalResult};
use crate::operators::{distinct, sort_compare};
use crate::retrieve::{CodeFilter, RetrieveRequest, codes_of};
use octofhir_cqm_elm::{Expression, Query, RelationshipBody, RelationshipClause, Retrieve, SortClause, SortDirection};
use octofhir_cqm_types::{CqlList, CqlTuple, CqlValue};

/// Alias bound to the element being sorted while a sort expression is evaluated
pub const SORT_ELEMENT_ALIAS: &str = "$this";

/// One row of the source cartesian product: alias to value
type Row = Vec<(String, CqlValue)>;

impl CqlEngine {
    /// Evaluate a Query expression
    ///
    /// Each row of the source product is bound in its own scope; let
    /// clauses, relationships, the where clause and the return clause are
    /// evaluated against that scope. A query over a single non-list source
    /// yields a single value rather than a list.
    pub fn eval_query(&self, query: &Query, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let mut singleton = query.source.len() == 1;
        let mut sources = Vec::with_capacity(query.source.len());
        for source in &query.source {
            let values = match self.evaluate(&source.expression, ctx)? {
                CqlValue::List(list) => {
                    singleton = false;
                    list.elements
                }
                CqlValue::Null => Vec::new(),
                other => vec![other],
            };
            sources.push((source.alias.clone(), values));
        }

        let mut results = Vec::new();
        for row in source_rows(&sources) {
            ctx.push_scope();
            let projected = self.evaluate_row(query, &row, ctx);
            ctx.pop_scope();
            if let Some(value) = projected? {
                results.push(value);
            }
        }

        if query.return_clause.as_ref().is_some_and(|r| r.distinct.unwrap_or(true)) {
            results = distinct(results)?;
        }
        if let Some(sort) = &query.sort {
            results = self.apply_sort_clause(results, sort, ctx)?;
        }

        if singleton {
            return Ok(results.into_iter().next().unwrap_or(CqlValue::Null));
        }
        Ok(CqlValue::List(CqlList::from_elements(results)))
    }

    /// Bind a row and evaluate it; `None` when the row is filtered out
    fn evaluate_row(&self, query: &Query, row: &Row, ctx: &mut EvaluationContext) -> EvalResult<Option<CqlValue>> {
        for (alias, value) in row {
            ctx.set_alias(alias.clone(), value.clone());
        }
        for let_clause in &query.let_clause {
            let value = self.evaluate(&let_clause.expression, ctx)?;
            ctx.set_let(let_clause.identifier.clone(), value);
        }

        for relationship in &query.relationship {
            let (body, wanted) = match relationship {
                RelationshipClause::With(body) => (body, true),
                RelationshipClause::Without(body) => (body, false),
            };
            if self.has_related(body, ctx)? != wanted {
                return Ok(None);
            }
        }

        if let Some(condition) = &query.where_clause {
            // Null is not true
            if !self.evaluate(condition, ctx)?.is_true() {
                return Ok(None);
            }
        }

        let value = match &query.return_clause {
            Some(return_clause) => self.evaluate(&return_clause.expression, ctx)?,
            None if row.len() == 1 => row[0].1.clone(),
            None => CqlValue::Tuple(CqlTuple::from_elements(row.iter().cloned())),
        };
        Ok(Some(value))
    }

    /// Whether any related element satisfies the such-that condition
    fn has_related(&self, body: &RelationshipBody, ctx: &mut EvaluationContext) -> EvalResult<bool> {
        let related = match self.evaluate(&body.expression, ctx)? {
            CqlValue::List(list) => list.elements,
            CqlValue::Null => Vec::new(),
            other => vec![other],
        };
        for element in related {
            ctx.set_alias(body.alias.clone(), element);
            if self.evaluate(&body.such_that, ctx)?.is_true() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Stable sort by each item in turn, first item most significant
    fn apply_sort_clause(
        &self,
        values: Vec<CqlValue>,
        sort: &SortClause,
        ctx: &mut EvaluationContext,
    ) -> EvalResult<Vec<CqlValue>> {
        let mut keyed = Vec::with_capacity(values.len());
        for value in values {
            let mut keys = Vec::with_capacity(sort.by.len());
            for item in &sort.by {
                let key = match (&item.expression, &item.path) {
                    (Some(expression), _) => self.sort_key(expression, &value, ctx)?,
                    (None, Some(path)) => property_path(&value, path),
                    (None, None) => value.clone(),
                };
                keys.push(key);
            }
            keyed.push((keys, value));
        }

        keyed.sort_by(|(a, _), (b, _)| {
            sort.by
                .iter()
                .zip(a.iter().zip(b))
                .map(|(item, (ka, kb))| match item.direction {
                    SortDirection::Asc => sort_compare(ka, kb),
                    SortDirection::Desc => sort_compare(ka, kb).reverse(),
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(keyed.into_iter().map(|(_, value)| value).collect())
    }

    fn sort_key(&self, expression: &Expression, element: &CqlValue, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        ctx.push_scope();
        ctx.set_alias(SORT_ELEMENT_ALIAS, element.clone());
        let key = self.evaluate(expression, ctx);
        ctx.pop_scope();
        key
    }

    /// Evaluate a Retrieve expression
    ///
    /// A value-set reference in `codes` is passed to the data layer as a
    /// value-set filter so membership is answered by the terminology
    /// provider; any other code expression is evaluated to its codes.
    ///
    /// An explicit `context` expression rebinds the retrieve to the subject it
    /// evaluates to; a null subject retrieves nothing.
    pub fn eval_retrieve(&self, retrieve: &Retrieve, ctx: &mut EvaluationContext) -> EvalResult<CqlValue> {
        let binding = match &retrieve.context {
            Some(context) => {
                let subject = self.evaluate(context, ctx)?;
                match subject_binding(&subject, &ctx.binding().context_type)? {
                    Some(binding) => binding,
                    None => return Ok(CqlValue::List(CqlList::new())),
                }
            }
            None => ctx.binding().clone(),
        };

        let providers = ctx
            .data_providers()
            .cloned()
            .ok_or_else(|| EvalError::internal("no data provider configured for retrieve"))?;
        let (provider, data_type) = providers.for_data_type(&retrieve.data_type)?;

        let mut request = RetrieveRequest::new(data_type);
        request.template_id = retrieve.template_id.clone();

        if let Some(codes) = &retrieve.codes {
            let filter = match codes.as_ref() {
                Expression::ValueSetRef(r) => CodeFilter::ValueSet(self.value_set_id(r, ctx)?),
                other => match self.evaluate(other, ctx)? {
                    // Unknown codes match nothing
                    CqlValue::Null => return Ok(CqlValue::List(CqlList::new())),
                    value => CodeFilter::Codes(codes_of(&value)),
                },
            };
            request = request.with_codes(retrieve.code_property.clone(), filter);
        }

        if let Some(range) = &retrieve.date_range {
            match self.evaluate(range, ctx)? {
                CqlValue::Interval(interval) => {
                    request = request.with_date_range(retrieve.date_property.clone(), interval);
                }
                CqlValue::Null => {}
                other => return Err(EvalError::type_mismatch("Interval", other.type_name())),
            }
        }

        let results = provider.retrieve(&request, &binding)?;
        Ok(CqlValue::List(CqlList::from_elements(results)))
    }
}

/// Context binding for a retrieve subject: a resource, a reference, or an id
/// of the current context type
fn subject_binding(subject: &CqlValue, context_type: &str) -> EvalResult<Option<ContextBinding>> {
    let reference = match subject {
        CqlValue::Null => return Ok(None),
        CqlValue::Resource(resource) => {
            return Ok(resource
                .id
                .as_ref()
                .map(|id| ContextBinding::new(resource.resource_type.as_str(), Some(id.as_str()))));
        }
        CqlValue::String(text) => text.as_str(),
        CqlValue::Tuple(tuple) => match tuple.get("reference") {
            Some(CqlValue::String(text)) => text.as_str(),
            Some(CqlValue::Null) | None => return Ok(None),
            Some(other) => return Err(EvalError::type_mismatch("String", other.type_name())),
        },
        other => return Err(EvalError::type_mismatch("Resource", other.type_name())),
    };
    Ok(Some(match reference.rsplit_once('/') {
        Some((path, id)) => {
            let subject_type = path.rsplit('/').next().unwrap_or(path);
            ContextBinding::new(subject_type, Some(id))
        }
        None => ContextBinding::new(context_type, Some(reference)),
    }))
}

/// Cartesian product of the query sources, in source order
fn source_rows(sources: &[(String, Vec<CqlValue>)]) -> Vec<Row> {
    let mut rows: Vec<Row> = vec![Vec::new()];
    for (alias, values) in sources {
        let mut next = Vec::with_capacity(rows.len() * values.len());
        for row in &rows {
            for value in values {
                let mut extended = row.clone();
                extended.push((alias.clone(), value.clone()));
                next.push(extended);
            }
        }
        rows = next;
    }
    if sources.is_empty() {
        rows.clear();
    }
    rows
}
