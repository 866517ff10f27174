//! Declarative aggregation plans.
//!
//! A plan is a sequence of typed stages (`Match`, `AddFields`, `Group`,
//! `Sort`, `Limit`). The same plan is either evaluated in memory by
//! [`execute`] or translated to a MongoDB aggregation pipeline by
//! [`AggregationPlan::to_mongo`]. Materializing the result into a collection
//! is the store's job, not a stage.

mod executor;
mod mongo;

pub use executor::execute;
pub(crate) use executor::sort_records;
pub(crate) use mongo::sort_document;

use crate::config::{DatePolicy, FieldConfig};
use crate::record::ID_FIELD;

/// Computed value inside a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Value of a record field (null when missing)
    Field(String),

    /// Product of the operands; null if any operand is null
    Multiply(Vec<Expr>),

    /// Parse a date string and format it as "YYYY-MM"
    YearMonth {
        input: Box<Expr>,
        format: String,
        on_error: DatePolicy,
    },
}

impl Expr {
    pub fn field(name: impl Into<String>) -> Self {
        Self::Field(name.into())
    }

    /// Date format of a `YearMonth` that must fail on unparseable input.
    fn strict_date_format(&self) -> Option<&str> {
        match self {
            Expr::Field(_) => None,
            Expr::Multiply(operands) => operands.iter().find_map(Expr::strict_date_format),
            Expr::YearMonth { format, on_error: DatePolicy::Fail, .. } => Some(format.as_str()),
            Expr::YearMonth { input, .. } => input.strict_date_format(),
        }
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Field(name) => write!(f, "${}", name),
            Expr::Multiply(operands) => {
                let parts: Vec<String> = operands.iter().map(|e| e.to_string()).collect();
                write!(f, "({})", parts.join(" * "))
            }
            Expr::YearMonth { input, .. } => write!(f, "year_month({})", input),
        }
    }
}

/// Per-group accumulator.
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    /// Sum of the numeric values of the expression; nulls are ignored
    Sum(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub order: SortOrder,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self { field: field.into(), order: SortOrder::Ascending }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self { field: field.into(), order: SortOrder::Descending }
    }
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Keep records where every listed field is present and non-null
    Match { not_null: Vec<String> },

    /// Compute new fields from expressions
    AddFields(Vec<(String, Expr)>),

    /// Group by key, emitting `{_id: key, <name>: <accumulated>}`
    Group {
        key: Expr,
        accumulators: Vec<(String, Accumulator)>,
    },

    /// Stable multi-key sort
    Sort(Vec<SortKey>),

    /// Keep the first n records
    Limit(usize),
}

/// An ordered list of stages with a name for logging.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationPlan {
    pub name: &'static str,
    pub stages: Vec<Stage>,
}

impl AggregationPlan {
    pub fn new(name: &'static str, stages: Vec<Stage>) -> Self {
        Self { name, stages }
    }

    /// Keys of the last sort stage: the order the output is meant to be read in.
    pub fn output_order(&self) -> &[SortKey] {
        self.stages
            .iter()
            .rev()
            .find_map(|stage| match stage {
                Stage::Sort(keys) => Some(keys.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    /// Format of the first date conversion that aborts the plan on bad input.
    pub fn strict_date_format(&self) -> Option<&str> {
        self.stages.iter().find_map(|stage| match stage {
            Stage::AddFields(fields) => fields.iter().find_map(|(_, expr)| expr.strict_date_format()),
            Stage::Group { key, accumulators } => key.strict_date_format().or_else(|| {
                accumulators
                    .iter()
                    .find_map(|(_, Accumulator::Sum(expr))| expr.strict_date_format())
            }),
            _ => None,
        })
    }
}

/// Output field of the sales aggregations.
pub const TOTAL_SALES: &str = "total_sales";

/// Output field of the product aggregation.
pub const TOTAL_QUANTITY: &str = "total_quantity";

const INVOICE_MONTH: &str = "invoice_month";

fn line_total(fields: &FieldConfig) -> Expr {
    Expr::Multiply(vec![
        Expr::field(&fields.unit_price),
        Expr::field(&fields.quantity),
    ])
}

/// Raw to clean: drop records missing a unit price or quantity.
pub fn clean_plan(fields: &FieldConfig) -> AggregationPlan {
    AggregationPlan::new(
        "clean",
        vec![Stage::Match {
            not_null: vec![fields.unit_price.clone(), fields.quantity.clone()],
        }],
    )
}

/// Sales per country, largest first. Ties are ordered by country name.
pub fn top_countries_plan(fields: &FieldConfig, top_n: usize) -> AggregationPlan {
    AggregationPlan::new(
        "top_countries",
        vec![
            Stage::Group {
                key: Expr::field(&fields.country),
                accumulators: vec![(TOTAL_SALES.to_string(), Accumulator::Sum(line_total(fields)))],
            },
            Stage::Sort(vec![SortKey::desc(TOTAL_SALES), SortKey::asc(ID_FIELD)]),
            Stage::Limit(top_n),
        ],
    )
}

/// Units sold per product description, largest first.
pub fn top_products_plan(fields: &FieldConfig, top_n: usize) -> AggregationPlan {
    AggregationPlan::new(
        "top_products",
        vec![
            Stage::Group {
                key: Expr::field(&fields.description),
                accumulators: vec![(
                    TOTAL_QUANTITY.to_string(),
                    Accumulator::Sum(Expr::field(&fields.quantity)),
                )],
            },
            Stage::Sort(vec![SortKey::desc(TOTAL_QUANTITY), SortKey::asc(ID_FIELD)]),
            Stage::Limit(top_n),
        ],
    )
}

/// Sales per calendar month in chronological order, untruncated.
///
/// Records with a null date never reach the group; unparseable dates are
/// dropped or fail the plan according to `date_policy`.
pub fn sales_by_month_plan(fields: &FieldConfig, date_policy: DatePolicy) -> AggregationPlan {
    AggregationPlan::new(
        "sales_by_month",
        vec![
            Stage::AddFields(vec![(
                INVOICE_MONTH.to_string(),
                Expr::YearMonth {
                    input: Box::new(Expr::field(&fields.invoice_date)),
                    format: fields.date_format.clone(),
                    on_error: date_policy,
                },
            )]),
            Stage::Match { not_null: vec![INVOICE_MONTH.to_string()] },
            Stage::Group {
                key: Expr::field(INVOICE_MONTH),
                accumulators: vec![(TOTAL_SALES.to_string(), Accumulator::Sum(line_total(fields)))],
            },
            Stage::Sort(vec![SortKey::asc(ID_FIELD)]),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_plans_limit_and_tie_break() {
        let fields = FieldConfig::default();
        let plan = top_countries_plan(&fields, 10);
        assert_eq!(plan.stages.len(), 3);
        assert_eq!(plan.stages[2], Stage::Limit(10));
        assert_eq!(
            plan.stages[1],
            Stage::Sort(vec![SortKey::desc("total_sales"), SortKey::asc("_id")])
        );

        let plan = top_products_plan(&fields, 3);
        assert_eq!(plan.stages.last(), Some(&Stage::Limit(3)));
    }

    #[test]
    fn test_sales_by_month_is_not_truncated() {
        let plan = sales_by_month_plan(&FieldConfig::default(), DatePolicy::Skip);
        assert!(!plan.stages.iter().any(|s| matches!(s, Stage::Limit(_))));
    }

    #[test]
    fn test_output_order_follows_last_sort() {
        let fields = FieldConfig::default();
        assert_eq!(
            top_products_plan(&fields, 5).output_order(),
            &[SortKey::desc("total_quantity"), SortKey::asc("_id")]
        );
        assert_eq!(
            sales_by_month_plan(&fields, DatePolicy::Skip).output_order(),
            &[SortKey::asc("_id")]
        );
        assert!(clean_plan(&fields).output_order().is_empty());
    }

    #[test]
    fn test_strict_date_format_only_under_fail_policy() {
        let fields = FieldConfig::default();
        assert_eq!(
            sales_by_month_plan(&fields, DatePolicy::Fail).strict_date_format(),
            Some("%m/%d/%Y %H:%M")
        );
        assert_eq!(sales_by_month_plan(&fields, DatePolicy::Skip).strict_date_format(), None);
        assert_eq!(top_countries_plan(&fields, 10).strict_date_format(), None);
    }

    #[test]
    fn test_expr_display() {
        let expr = line_total(&FieldConfig::default());
        assert_eq!(expr.to_string(), "($UnitPrice * $Quantity)");
    }
}
