//! Query engine over one task's completed instances (spec §4.5).
//!
//! A [`Query`] is the JSON-shaped language spec §4.5 describes: AND-combined
//! `filters`, an `item_ids` restriction, `limit`/`offset`/`order_by`/`desc`,
//! and an optional `aggregate`. Filter values are coerced through the
//! declared output-schema type of the target field before comparing, the
//! same coercion `OutputSchema::validate` uses for OUTPUT blocks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use missionctl_types::{FieldType, OutputSchema};

use crate::error::KnowledgeError;
use crate::record::KnowledgeRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    Contains,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Aggregate {
    Count,
    Sum { field: String },
    Avg { field: String },
    Min { field: String },
    Max { field: String },
    Distinct { field: String },
    GroupBy {
        group_field: String,
        /// The per-group aggregate applied to `field`, e.g. `"sum"` / `"count"`.
        group_op: String,
        field: Option<String>,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub item_ids: Option<Vec<u32>>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub order_by: Option<String>,
    #[serde(default)]
    pub desc: bool,
    #[serde(default)]
    pub aggregate: Option<Aggregate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryResult {
    Items(Vec<Value>),
    Count(u64),
    Number(Option<f64>),
    Distinct(Vec<Value>),
    /// `min`/`max` return the entire item carrying the extremum, or `null`
    /// over an empty filter set (spec §8 "Boundary behaviors").
    Item(Option<Value>),
    Group(BTreeMap<String, Value>),
}

fn field_type<'a>(schema: Option<&'a OutputSchema>, field: &str) -> Result<Option<&'a FieldType>, KnowledgeError> {
    match schema {
        None => Ok(None),
        Some(schema) => schema
            .field(field)
            .map(|f| Some(&f.field_type))
            .ok_or_else(|| KnowledgeError::UnknownField(field.to_string())),
    }
}

fn coerce_numeric(schema: Option<&OutputSchema>, field: &str, value: &Value) -> Result<f64, KnowledgeError> {
    let ty = field_type(schema, field)?;
    let coerced = match ty {
        Some(ty) => ty.coerce(value).unwrap_or_else(|| value.clone()),
        None => value.clone(),
    };
    coerced
        .as_f64()
        .or_else(|| coerced.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
        .ok_or_else(|| KnowledgeError::UnknownField(field.to_string()))
}

fn lookup_field(item: &Value, field: &str) -> Option<Value> {
    item.get(field).cloned()
}

fn apply_filter(item: &Value, schema: Option<&OutputSchema>, filter: &Filter) -> Result<bool, KnowledgeError> {
    // Validate the field is declared whenever a schema is present, even if
    // the item happens not to carry it (spec §4.5 "unknown_field").
    field_type(schema, &filter.field)?;
    let Some(actual) = lookup_field(item, &filter.field) else {
        return Ok(false);
    };

    match filter.op {
        FilterOp::Eq => Ok(values_equal(&actual, &filter.value)),
        FilterOp::Ne => Ok(!values_equal(&actual, &filter.value)),
        FilterOp::Contains => Ok(contains(&actual, &filter.value)),
        FilterOp::Gt | FilterOp::Lt | FilterOp::Gte | FilterOp::Lte => {
            let a = coerce_numeric(schema, &filter.field, &actual)?;
            let b = coerce_numeric(schema, &filter.field, &filter.value)?;
            Ok(match filter.op {
                FilterOp::Gt => a > b,
                FilterOp::Lt => a < b,
                FilterOp::Gte => a >= b,
                FilterOp::Lte => a <= b,
                _ => unreachable!(),
            })
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    // Loose cross-type comparison ("7" == 7) since schema types get
    // coerced on the way in but the caller's filter literal may not be.
    a.to_string().trim_matches('"') == b.to_string().trim_matches('"')
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => needle.as_str().map(|n| s.contains(n)).unwrap_or(false),
        Value::Array(items) => items.iter().any(|v| v == needle),
        _ => false,
    }
}

/// Runs `query` against `records`, all belonging to the same task.
pub fn execute(
    records: &[KnowledgeRecord],
    schema: Option<&OutputSchema>,
    query: &Query,
) -> Result<QueryResult, KnowledgeError> {
    let mut rows: Vec<&KnowledgeRecord> = records
        .iter()
        .filter(|r| match (&query.item_ids, r.index) {
            (Some(ids), Some(idx)) => ids.contains(&idx),
            (Some(_), None) => false,
            (None, _) => true,
        })
        .collect();

    for filter in &query.filters {
        let mut keep = Vec::with_capacity(rows.len());
        for row in rows {
            if apply_filter(&row.output, schema, filter)? {
                keep.push(row);
            }
        }
        rows = keep;
    }

    if let Some(agg) = &query.aggregate {
        return run_aggregate(&rows, schema, agg);
    }

    if let Some(order_field) = &query.order_by {
        field_type(schema, order_field)?;
        rows.sort_by(|a, b| {
            let av = lookup_field(&a.output, order_field);
            let bv = lookup_field(&b.output, order_field);
            compare_values(&av, &bv)
        });
        if query.desc {
            rows.reverse();
        }
    }

    let offset = query.offset.unwrap_or(0);
    let mut items: Vec<Value> = rows.into_iter().skip(offset).map(|r| r.output.clone()).collect();
    if let Some(limit) = query.limit {
        items.truncate(limit);
    }
    Ok(QueryResult::Items(items))
}

fn compare_values(a: &Option<Value>, b: &Option<Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a.as_ref().and_then(|v| v.as_f64()), b.as_ref().and_then(|v| v.as_f64())) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => {
            let sa = a.as_ref().map(|v| v.to_string()).unwrap_or_default();
            let sb = b.as_ref().map(|v| v.to_string()).unwrap_or_default();
            sa.cmp(&sb)
        }
    }
}

fn run_aggregate(
    rows: &[&KnowledgeRecord],
    schema: Option<&OutputSchema>,
    agg: &Aggregate,
) -> Result<QueryResult, KnowledgeError> {
    match agg {
        Aggregate::Count => Ok(QueryResult::Count(rows.len() as u64)),
        Aggregate::Sum { field } => {
            field_type(schema, field)?;
            let sum: f64 = rows
                .iter()
                .filter_map(|r| lookup_field(&r.output, field))
                .filter_map(|v| coerce_numeric(schema, field, &v).ok())
                .sum();
            Ok(QueryResult::Number(Some(sum)))
        }
        Aggregate::Avg { field } => {
            field_type(schema, field)?;
            let values: Vec<f64> = rows
                .iter()
                .filter_map(|r| lookup_field(&r.output, field))
                .filter_map(|v| coerce_numeric(schema, field, &v).ok())
                .collect();
            if values.is_empty() {
                Ok(QueryResult::Number(None))
            } else {
                Ok(QueryResult::Number(Some(values.iter().sum::<f64>() / values.len() as f64)))
            }
        }
        Aggregate::Min { field } => extremum(rows, schema, field, false),
        Aggregate::Max { field } => extremum(rows, schema, field, true),
        Aggregate::Distinct { field } => {
            field_type(schema, field)?;
            let mut seen: Vec<Value> = Vec::new();
            for row in rows {
                if let Some(v) = lookup_field(&row.output, field) {
                    if !seen.contains(&v) {
                        seen.push(v);
                    }
                }
            }
            Ok(QueryResult::Distinct(seen))
        }
        Aggregate::GroupBy {
            group_field,
            group_op,
            field,
        } => {
            field_type(schema, group_field)?;
            let mut groups: BTreeMap<String, Vec<&KnowledgeRecord>> = BTreeMap::new();
            for row in rows {
                let key = lookup_field(&row.output, group_field)
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                    .unwrap_or_default();
                groups.entry(key).or_default().push(row);
            }
            let mut out = BTreeMap::new();
            for (key, members) in groups {
                let inner_agg = match (group_op.as_str(), field) {
                    ("count", _) => Aggregate::Count,
                    ("sum", Some(f)) => Aggregate::Sum { field: f.clone() },
                    ("avg", Some(f)) => Aggregate::Avg { field: f.clone() },
                    ("min", Some(f)) => Aggregate::Min { field: f.clone() },
                    ("max", Some(f)) => Aggregate::Max { field: f.clone() },
                    (other, _) => return Err(KnowledgeError::UnsupportedAggregate(other.to_string())),
                };
                let result = run_aggregate(&members, schema, &inner_agg)?;
                out.insert(key, query_result_to_value(result));
            }
            Ok(QueryResult::Group(out))
        }
    }
}

fn extremum(
    rows: &[&KnowledgeRecord],
    schema: Option<&OutputSchema>,
    field: &str,
    want_max: bool,
) -> Result<QueryResult, KnowledgeError> {
    field_type(schema, field)?;
    let mut best: Option<(f64, &KnowledgeRecord)> = None;
    for row in rows {
        let Some(raw) = lookup_field(&row.output, field) else {
            continue;
        };
        let Ok(value) = coerce_numeric(schema, field, &raw) else {
            continue;
        };
        let idx = row.index.unwrap_or(u32::MAX);
        let better = match best {
            None => true,
            Some((current, current_row)) => {
                if want_max {
                    value > current || (value == current && idx < current_row.index.unwrap_or(u32::MAX))
                } else {
                    value < current || (value == current && idx < current_row.index.unwrap_or(u32::MAX))
                }
            }
        };
        if better {
            best = Some((value, row));
        }
    }
    Ok(QueryResult::Item(best.map(|(_, row)| row.output.clone())))
}

fn query_result_to_value(result: QueryResult) -> Value {
    match result {
        QueryResult::Count(n) => Value::from(n),
        QueryResult::Number(n) => n.map(Value::from).unwrap_or(Value::Null),
        QueryResult::Item(v) => v.unwrap_or(Value::Null),
        QueryResult::Items(items) => Value::Array(items),
        QueryResult::Distinct(items) => Value::Array(items),
        QueryResult::Group(map) => {
            serde_json::to_value(map).unwrap_or(Value::Null)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use missionctl_types::{FieldType, OutputField};

    fn schema() -> OutputSchema {
        OutputSchema {
            fields: vec![
                OutputField { name: "r".into(), field_type: FieldType::Integer, description: None, required: true },
            ],
        }
    }

    fn record(index: u32, r: i64) -> KnowledgeRecord {
        KnowledgeRecord {
            mission_id: "m1".into(),
            task_name: "sq".into(),
            index: Some(index),
            schema: None,
            output: serde_json::json!({"r": r}),
            summary: String::new(),
        }
    }

    #[test]
    fn min_and_max_return_whole_item() {
        let records = vec![record(0, 1), record(1, 4), record(2, 9)];
        let schema = schema();
        let q = Query {
            aggregate: Some(Aggregate::Max { field: "r".into() }),
            ..Default::default()
        };
        let result = execute(&records, Some(&schema), &q).unwrap();
        match result {
            QueryResult::Item(Some(v)) => assert_eq!(v["r"], 9),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn min_over_empty_filter_set_is_null() {
        let records: Vec<KnowledgeRecord> = Vec::new();
        let schema = schema();
        let q = Query {
            aggregate: Some(Aggregate::Min { field: "r".into() }),
            ..Default::default()
        };
        let result = execute(&records, Some(&schema), &q).unwrap();
        match result {
            QueryResult::Item(None) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_field_is_rejected() {
        let records = vec![record(0, 1)];
        let schema = schema();
        let q = Query {
            filters: vec![Filter { field: "missing".into(), op: FilterOp::Eq, value: serde_json::json!(1) }],
            ..Default::default()
        };
        let err = execute(&records, Some(&schema), &q).unwrap_err();
        assert_eq!(err, KnowledgeError::UnknownField("missing".into()));
    }

    #[test]
    fn group_by_is_lexically_ordered() {
        let mut records = vec![record(0, 1), record(1, 2)];
        records[0].output = serde_json::json!({"r": 1, "g": "b"});
        records[1].output = serde_json::json!({"r": 2, "g": "a"});
        let mut schema = schema();
        schema.fields.push(OutputField { name: "g".into(), field_type: FieldType::String, description: None, required: true });
        let q = Query {
            aggregate: Some(Aggregate::GroupBy {
                group_field: "g".into(),
                group_op: "count".into(),
                field: None,
            }),
            ..Default::default()
        };
        let result = execute(&records, Some(&schema), &q).unwrap();
        match result {
            QueryResult::Group(map) => {
                let keys: Vec<_> = map.keys().collect();
                assert_eq!(keys, vec!["a", "b"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
