//! Translation of aggregation plans to MongoDB pipeline documents.

use super::{Accumulator, AggregationPlan, Expr, SortKey, SortOrder, Stage};
use crate::config::DatePolicy;
use mongodb::bson::{doc, Bson, Document};

impl AggregationPlan {
    /// Render the plan as MongoDB aggregation stages (without `$out`).
    pub fn to_mongo(&self) -> Vec<Document> {
        self.stages.iter().map(stage_to_mongo).collect()
    }
}

fn stage_to_mongo(stage: &Stage) -> Document {
    match stage {
        Stage::Match { not_null } => {
            let mut filter = Document::new();
            for field in not_null {
                // `$ne: null` also rejects missing fields
                filter.insert(field.clone(), doc! { "$ne": Bson::Null });
            }
            doc! { "$match": filter }
        }
        Stage::AddFields(fields) => {
            let mut added = Document::new();
            for (name, expr) in fields {
                added.insert(name.clone(), expr_to_mongo(expr));
            }
            doc! { "$addFields": added }
        }
        Stage::Group { key, accumulators } => {
            let mut group = doc! { "_id": expr_to_mongo(key) };
            for (name, acc) in accumulators {
                let Accumulator::Sum(expr) = acc;
                group.insert(name.clone(), doc! { "$sum": expr_to_mongo(expr) });
            }
            doc! { "$group": group }
        }
        Stage::Sort(keys) => doc! { "$sort": sort_document(keys) },
        Stage::Limit(n) => {
            let limit = i64::try_from(*n).unwrap_or(i64::MAX);
            doc! { "$limit": limit }
        }
    }
}

/// Sort specification in key order: 1 ascending, -1 descending.
pub(crate) fn sort_document(keys: &[SortKey]) -> Document {
    let mut sort = Document::new();
    for key in keys {
        let dir = match key.order {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        };
        sort.insert(key.field.clone(), dir);
    }
    sort
}

fn expr_to_mongo(expr: &Expr) -> Bson {
    match expr {
        Expr::Field(name) => Bson::String(format!("${}", name)),
        Expr::Multiply(operands) => {
            let args: Vec<Bson> = operands.iter().map(expr_to_mongo).collect();
            Bson::Document(doc! { "$multiply": args })
        }
        Expr::YearMonth { input, format, on_error } => {
            let mut parse = doc! {
                "dateString": expr_to_mongo(input),
                "format": format.clone(),
                "onNull": Bson::Null,
            };
            if *on_error == DatePolicy::Skip {
                parse.insert("onError", Bson::Null);
            }
            Bson::Document(doc! {
                "$dateToString": {
                    "format": "%Y-%m",
                    "date": { "$dateFromString": parse },
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldConfig;
    use crate::plan::{clean_plan, sales_by_month_plan, top_countries_plan};

    #[test]
    fn test_clean_plan_to_mongo() {
        let pipeline = clean_plan(&FieldConfig::default()).to_mongo();
        assert_eq!(
            pipeline,
            vec![doc! { "$match": {
                "UnitPrice": { "$ne": Bson::Null },
                "Quantity": { "$ne": Bson::Null },
            }}]
        );
    }

    #[test]
    fn test_top_countries_to_mongo() {
        let pipeline = top_countries_plan(&FieldConfig::default(), 10).to_mongo();
        assert_eq!(
            pipeline,
            vec![
                doc! { "$group": {
                    "_id": "$Country",
                    "total_sales": { "$sum": { "$multiply": ["$UnitPrice", "$Quantity"] } },
                }},
                doc! { "$sort": { "total_sales": -1, "_id": 1 } },
                doc! { "$limit": 10_i64 },
            ]
        );
    }

    #[test]
    fn test_sales_by_month_date_policy() {
        let fields = FieldConfig::default();
        let skip = sales_by_month_plan(&fields, DatePolicy::Skip).to_mongo();
        let fail = sales_by_month_plan(&fields, DatePolicy::Fail).to_mongo();

        let parse_opts = |pipeline: &[Document]| -> Document {
            pipeline[0]
                .get_document("$addFields")
                .and_then(|d| d.get_document("invoice_month"))
                .and_then(|d| d.get_document("$dateToString"))
                .and_then(|d| d.get_document("date"))
                .and_then(|d| d.get_document("$dateFromString"))
                .cloned()
                .unwrap()
        };

        assert!(parse_opts(&skip).contains_key("onError"));
        assert!(!parse_opts(&fail).contains_key("onError"));
        assert_eq!(parse_opts(&skip).get_str("format").unwrap(), "%m/%d/%Y %H:%M");
    }
}
