//! In-memory evaluation of aggregation plans.

use super::{Accumulator, AggregationPlan, Expr, SortKey, SortOrder, Stage};
use crate::config::DatePolicy;
use crate::error::{EtlError, EtlResult};
use crate::record::{compare_values, Numeric, Record, ID_FIELD};
use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use serde_json::Value;
use std::cmp::Ordering;

/// Run every stage of `plan` over `input`, returning the output records.
pub fn execute(plan: &AggregationPlan, input: &[Record]) -> EtlResult<Vec<Record>> {
    let mut records = input.to_vec();

    for stage in &plan.stages {
        records = match stage {
            Stage::Match { not_null } => records
                .into_iter()
                .filter(|r| not_null.iter().all(|f| !r.get(f).unwrap_or(&Value::Null).is_null()))
                .collect(),
            Stage::AddFields(fields) => add_fields(records, fields)?,
            Stage::Group { key, accumulators } => group(&records, key, accumulators)?,
            Stage::Sort(keys) => {
                sort_records(&mut records, keys);
                records
            }
            Stage::Limit(n) => {
                records.truncate(*n);
                records
            }
        };
    }

    tracing::debug!(
        "Plan {} produced {} records from {} inputs",
        plan.name,
        records.len(),
        input.len()
    );
    Ok(records)
}

fn add_fields(mut records: Vec<Record>, fields: &[(String, Expr)]) -> EtlResult<Vec<Record>> {
    for record in &mut records {
        for (name, expr) in fields {
            let value = evaluate(expr, record)?;
            record.insert(name.clone(), value);
        }
    }
    Ok(records)
}

fn group(records: &[Record], key: &Expr, accumulators: &[(String, Accumulator)]) -> EtlResult<Vec<Record>> {
    // Serialized key -> (key value, one running sum per accumulator).
    // IndexMap keeps groups in first-seen order before any sort stage.
    let mut groups: IndexMap<String, (Value, Vec<Numeric>)> = IndexMap::new();

    for record in records {
        let key_value = evaluate(key, record)?;
        let key_hash = key_value.to_string();
        let entry = groups
            .entry(key_hash)
            .or_insert_with(|| (key_value, vec![Numeric::Int(0); accumulators.len()]));

        for (slot, (_, acc)) in entry.1.iter_mut().zip(accumulators) {
            match acc {
                Accumulator::Sum(expr) => {
                    // Non-numeric values are ignored, as `$sum` does
                    if let Some(n) = Numeric::from_value(&evaluate(expr, record)?) {
                        *slot = slot.add(n);
                    }
                }
            }
        }
    }

    Ok(groups
        .into_values()
        .map(|(key_value, sums)| {
            let mut out = Record::new();
            out.insert(ID_FIELD.to_string(), key_value);
            for ((name, _), sum) in accumulators.iter().zip(sums) {
                out.insert(name.clone(), sum.into_value());
            }
            out
        })
        .collect())
}

/// Stable sort by `keys`, first key most significant.
pub(crate) fn sort_records(records: &mut [Record], keys: &[SortKey]) {
    records.sort_by(|a, b| compare_records(a, b, keys));
}

fn compare_records(a: &Record, b: &Record, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let left = a.get(&key.field).unwrap_or(&Value::Null);
        let right = b.get(&key.field).unwrap_or(&Value::Null);
        let ord = match key.order {
            SortOrder::Ascending => compare_values(left, right),
            SortOrder::Descending => compare_values(right, left),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn evaluate(expr: &Expr, record: &Record) -> EtlResult<Value> {
    match expr {
        Expr::Field(name) => Ok(record.get(name).cloned().unwrap_or(Value::Null)),

        Expr::Multiply(operands) => {
            let mut product = Numeric::Int(1);
            for operand in operands {
                let value = evaluate(operand, record)?;
                if value.is_null() {
                    return Ok(Value::Null);
                }
                let n = Numeric::from_value(&value).ok_or_else(|| EtlError::Evaluation {
                    expr: expr.to_string(),
                    reason: format!("{} is not a number ({})", operand, value),
                })?;
                product = product.mul(n);
            }
            Ok(product.into_value())
        }

        Expr::YearMonth { input, format, on_error } => {
            let value = evaluate(input, record)?;
            if value.is_null() {
                return Ok(Value::Null);
            }
            let text = match &value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            match parse_date(&text, format) {
                Some(date) => Ok(Value::String(date.format("%Y-%m").to_string())),
                None => match on_error {
                    DatePolicy::Skip => {
                        tracing::debug!("Skipping record with unparseable date '{}'", text);
                        Ok(Value::Null)
                    }
                    DatePolicy::Fail => Err(EtlError::DateParse {
                        value: text,
                        format: format.clone(),
                    }),
                },
            }
        }
    }
}

/// Parse with `format`, accepting date-only formats too.
fn parse_date(text: &str, format: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, format)
        .map(|dt| dt.date())
        .or_else(|_| NaiveDate::parse_from_str(text, format))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldConfig;
    use crate::plan::{clean_plan, sales_by_month_plan, top_countries_plan, top_products_plan};
    use serde_json::json;

    fn rec(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn sale(country: &str, price: Value, qty: Value) -> Record {
        rec(json!({"Country": country, "UnitPrice": price, "Quantity": qty}))
    }

    #[test]
    fn test_top_countries_example() {
        let clean = vec![
            sale("France", json!(2.0), json!(3)),
            sale("France", json!(1.0), json!(1)),
            sale("Spain", json!(5.0), json!(2)),
        ];
        let out = execute(&top_countries_plan(&FieldConfig::default(), 10), &clean).unwrap();

        assert_eq!(
            out,
            vec![
                rec(json!({"_id": "Spain", "total_sales": 10.0})),
                rec(json!({"_id": "France", "total_sales": 7.0})),
            ]
        );
    }

    #[test]
    fn test_top_countries_truncates_and_breaks_ties_by_key() {
        let clean: Vec<Record> = ["Norway", "Austria", "Malta", "Italy"]
            .iter()
            .map(|c| sale(c, json!(1.0), json!(1)))
            .collect();
        let out = execute(&top_countries_plan(&FieldConfig::default(), 3), &clean).unwrap();

        let keys: Vec<&Value> = out.iter().map(|r| &r["_id"]).collect();
        assert_eq!(keys, vec![&json!("Austria"), &json!("Italy"), &json!("Malta")]);
    }

    #[test]
    fn test_clean_filters_nulls_and_missing() {
        let raw = vec![
            sale("France", json!(2.0), json!(3)),
            sale("France", Value::Null, json!(3)),
            sale("France", json!(2.0), Value::Null),
            rec(json!({"Country": "Spain", "UnitPrice": 1.0})),
        ];
        let out = execute(&clean_plan(&FieldConfig::default()), &raw).unwrap();
        assert_eq!(out, vec![raw[0].clone()]);
    }

    #[test]
    fn test_top_products_sums_integers() {
        let clean = vec![
            rec(json!({"Description": "MUG", "UnitPrice": 1.0, "Quantity": 4})),
            rec(json!({"Description": "MUG", "UnitPrice": 1.0, "Quantity": -1})),
            rec(json!({"Description": "LANTERN", "UnitPrice": 3.0, "Quantity": 12})),
        ];
        let out = execute(&top_products_plan(&FieldConfig::default(), 10), &clean).unwrap();
        assert_eq!(
            out,
            vec![
                rec(json!({"_id": "LANTERN", "total_quantity": 12})),
                rec(json!({"_id": "MUG", "total_quantity": 3})),
            ]
        );
    }

    #[test]
    fn test_sales_by_month_orders_and_skips() {
        let clean = vec![
            rec(json!({"InvoiceDate": "1/4/2011 10:00", "UnitPrice": 1.0, "Quantity": 2})),
            rec(json!({"InvoiceDate": "12/1/2010 8:26", "UnitPrice": 2.5, "Quantity": 2})),
            rec(json!({"InvoiceDate": "12/9/2010 9:00", "UnitPrice": 1.0, "Quantity": 1})),
            rec(json!({"InvoiceDate": "not a date", "UnitPrice": 9.0, "Quantity": 9})),
            rec(json!({"InvoiceDate": null, "UnitPrice": 9.0, "Quantity": 9})),
        ];
        let plan = sales_by_month_plan(&FieldConfig::default(), DatePolicy::Skip);
        let out = execute(&plan, &clean).unwrap();

        assert_eq!(
            out,
            vec![
                rec(json!({"_id": "2010-12", "total_sales": 6.0})),
                rec(json!({"_id": "2011-01", "total_sales": 2.0})),
            ]
        );
    }

    #[test]
    fn test_sales_by_month_fail_policy() {
        let clean = vec![rec(json!({"InvoiceDate": "2011-13-45", "UnitPrice": 1.0, "Quantity": 1}))];
        let plan = sales_by_month_plan(&FieldConfig::default(), DatePolicy::Fail);
        let err = execute(&plan, &clean).unwrap_err();
        assert!(matches!(err, EtlError::DateParse { .. }));
    }

    #[test]
    fn test_multiply_rejects_strings() {
        let clean = vec![sale("France", json!("cheap"), json!(1))];
        let err = execute(&top_countries_plan(&FieldConfig::default(), 10), &clean).unwrap_err();
        assert!(matches!(err, EtlError::Evaluation { .. }));
    }

    #[test]
    fn test_empty_input_yields_empty_output() {
        let plan = top_countries_plan(&FieldConfig::default(), 10);
        assert!(execute(&plan, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_parse_date_only_format() {
        let date = parse_date("2011-02-03", "%Y-%m-%d").unwrap();
        assert_eq!(date.format("%Y-%m").to_string(), "2011-02");
    }
}
