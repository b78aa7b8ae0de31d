//! Query engine: formula-backed lookups, search, aggregation and a
//! simulated join over linked-record fields.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use super::analytics;
use super::formula::{self, Condition, Logic};
use super::schema::SchemaManager;
use super::{AirtableError, ListOptions, Record, RecordStore, SortSpec};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Airtable(#[from] AirtableError),

    #[error("Unknown aggregation type: {0}")]
    UnknownAggregate(String),

    #[error("Grouping not supported for {0}")]
    GroupingNotSupported(String),

    #[error("Invalid query plan: {0}")]
    InvalidPlan(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateOp {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateOp {
    pub fn parse(s: &str) -> Result<Self, QueryError> {
        match s.to_ascii_lowercase().as_str() {
            "count" => Ok(Self::Count),
            "sum" => Ok(Self::Sum),
            "avg" | "average" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            other => Err(QueryError::UnknownAggregate(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

fn number(x: f64) -> Value {
    serde_json::Number::from_f64(x)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn opt_number(x: Option<f64>) -> Value {
    x.map(number).unwrap_or(Value::Null)
}

/// Applies an aggregation to records already in memory.
pub fn aggregate_records(
    records: &[Record],
    op: AggregateOp,
    field: &str,
    group_by: Option<&str>,
) -> Result<Value, QueryError> {
    if records.is_empty() {
        return Ok(match op {
            AggregateOp::Count | AggregateOp::Sum => json!(0),
            _ => Value::Null,
        });
    }

    let value = match (op, group_by) {
        (AggregateOp::Count, Some(g)) => json!(analytics::count_by_field(records, g)),
        (AggregateOp::Sum, Some(g)) => {
            let sums = analytics::group_and_sum(records, g, field);
            Value::Object(sums.into_iter().map(|(k, v)| (k, number(v))).collect())
        }
        (AggregateOp::Avg, Some(g)) => {
            let avgs = analytics::group_and_average(records, g, field);
            Value::Object(avgs.into_iter().map(|(k, v)| (k, opt_number(v))).collect())
        }
        (op, Some(_)) => return Err(QueryError::GroupingNotSupported(op.as_str().to_string())),
        (AggregateOp::Count, None) => json!(records.len()),
        (AggregateOp::Sum, None) => number(analytics::sum_field(records, field)),
        (AggregateOp::Avg, None) => opt_number(analytics::average_field(records, field)),
        (AggregateOp::Min, None) => opt_number(analytics::min_field(records, field)),
        (AggregateOp::Max, None) => opt_number(analytics::max_field(records, field)),
    };
    Ok(value)
}

#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<dyn RecordStore>,
    schema: Option<Arc<SchemaManager>>,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store, schema: None }
    }

    pub fn with_schema(mut self, schema: Arc<SchemaManager>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub async fn simple_query(
        &self,
        table: &str,
        formula: Option<&str>,
        max_records: Option<usize>,
        sort: Vec<SortSpec>,
        view: Option<&str>,
    ) -> Result<Vec<Record>, QueryError> {
        let options = ListOptions {
            formula: formula.filter(|f| !f.is_empty()).map(str::to_string),
            view: view.map(str::to_string),
            max_records,
            sort,
            ..Default::default()
        };
        match self.store.list(table, &options).await {
            Ok(records) => {
                info!(table, count = records.len(), "Query returned records");
                Ok(records)
            }
            Err(e) => {
                error!(table, error = %e, "Query failed");
                Err(e.into())
            }
        }
    }

    pub async fn filter_query(
        &self,
        table: &str,
        conditions: &[Condition],
        logic: Logic,
        max_records: Option<usize>,
    ) -> Result<Vec<Record>, QueryError> {
        let formula = formula::build_complex_query(conditions, logic);
        self.simple_query(table, Some(&formula), max_records, Vec::new(), None)
            .await
    }

    /// Searches `fields`, or the table's searchable fields from the schema,
    /// or the built-in defaults for the table.
    pub async fn search(
        &self,
        table: &str,
        term: &str,
        fields: Option<&[String]>,
    ) -> Result<Vec<Record>, QueryError> {
        let fields: Vec<String> = match fields {
            Some(f) if !f.is_empty() => f.to_vec(),
            _ => self
                .schema
                .as_ref()
                .map(|s| s.searchable_fields(table))
                .unwrap_or_default(),
        };
        let formula = formula::build_search_query(table, term, &fields);
        self.simple_query(table, Some(&formula), None, Vec::new(), None)
            .await
    }

    pub async fn get_by_id(&self, table: &str, record_id: &str) -> Option<Record> {
        match self.store.get(table, record_id).await {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(table, record_id, error = %e, "Failed to get record");
                None
            }
        }
    }

    pub async fn get_by_email(&self, table: &str, email: &str) -> Result<Vec<Record>, QueryError> {
        let formula = formula::find_by_email(email);
        self.simple_query(table, Some(&formula), None, Vec::new(), None)
            .await
    }

    pub async fn get_by_name(&self, table: &str, name: &str, exact: bool) -> Result<Vec<Record>, QueryError> {
        let formula = formula::find_by_name(name, exact);
        self.simple_query(table, Some(&formula), None, Vec::new(), None)
            .await
    }

    pub async fn count_records(&self, table: &str, formula: Option<&str>) -> Result<usize, QueryError> {
        Ok(self
            .simple_query(table, formula, None, Vec::new(), None)
            .await?
            .len())
    }

    pub async fn aggregate(
        &self,
        table: &str,
        field: &str,
        op: AggregateOp,
        group_by: Option<&str>,
        formula: Option<&str>,
    ) -> Result<Value, QueryError> {
        let records = self
            .simple_query(table, formula, None, Vec::new(), None)
            .await?;
        aggregate_records(&records, op, field, group_by)
    }

    /// Expands `link_field` on each record into `{link_field}_expanded`,
    /// holding the linked records. Linked ids that cannot be fetched are
    /// left out.
    pub async fn join_records(
        &self,
        mut records: Vec<Record>,
        link_field: &str,
        linked_table: &str,
    ) -> Vec<Record> {
        let linked_ids: BTreeSet<String> = records
            .iter()
            .flat_map(|r| link_ids(r.field(link_field)))
            .collect();

        let mut linked: HashMap<String, Record> = HashMap::new();
        for id in linked_ids {
            if let Some(record) = self.get_by_id(linked_table, &id).await {
                linked.insert(id, record);
            }
        }

        let expanded_key = format!("{link_field}_expanded");
        for record in &mut records {
            let ids = link_ids(record.field(link_field));
            if ids.is_empty() {
                continue;
            }
            let expanded: Vec<Value> = ids
                .iter()
                .filter_map(|id| linked.get(id))
                .map(|r| r.clone().into_value())
                .collect();
            record.fields.insert(expanded_key.clone(), Value::Array(expanded));
        }
        records
    }
}

fn link_ids(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Planner
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSpec {
    pub table: String,
    pub field: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSpec {
    #[serde(alias = "agg_type")]
    pub op: AggregateOp,
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub group_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PlanStep {
    Filter {
        table: String,
        conditions: Vec<Condition>,
        logic: Logic,
    },
    Scan {
        table: String,
    },
    Join {
        linked_table: String,
        link_field: String,
    },
    Aggregate(AggregateSpec),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub steps: Vec<PlanStep>,
}

pub struct QueryPlanner {
    engine: QueryEngine,
}

enum Intermediate {
    Empty,
    Records(Vec<Record>),
    Aggregated(Value),
}

impl QueryPlanner {
    pub fn new(engine: QueryEngine) -> Self {
        Self { engine }
    }

    /// A filter step when there are conditions, a scan otherwise, then the
    /// joins in order, then the aggregations.
    pub fn plan(
        table: &str,
        conditions: Vec<Condition>,
        logic: Logic,
        joins: &[JoinSpec],
        aggregates: Vec<AggregateSpec>,
    ) -> QueryPlan {
        let mut steps = Vec::new();
        if conditions.is_empty() {
            steps.push(PlanStep::Scan {
                table: table.to_string(),
            });
        } else {
            steps.push(PlanStep::Filter {
                table: table.to_string(),
                conditions,
                logic,
            });
        }
        steps.extend(joins.iter().map(|j| PlanStep::Join {
            linked_table: j.table.clone(),
            link_field: j.field.clone(),
        }));
        steps.extend(aggregates.into_iter().map(PlanStep::Aggregate));
        QueryPlan { steps }
    }

    /// Runs the plan. Returns a JSON array of records, or the result of the
    /// last aggregation.
    pub async fn execute(&self, plan: &QueryPlan) -> Result<Value, QueryError> {
        let mut state = Intermediate::Empty;
        for step in &plan.steps {
            state = match (step, state) {
                (PlanStep::Filter { table, conditions, logic }, _) => Intermediate::Records(
                    self.engine.filter_query(table, conditions, *logic, None).await?,
                ),
                (PlanStep::Scan { table }, _) => Intermediate::Records(
                    self.engine
                        .simple_query(table, None, None, Vec::new(), None)
                        .await?,
                ),
                (PlanStep::Join { linked_table, link_field }, Intermediate::Records(records)) => {
                    Intermediate::Records(
                        self.engine
                            .join_records(records, link_field, linked_table)
                            .await,
                    )
                }
                (PlanStep::Aggregate(spec), Intermediate::Records(records)) => Intermediate::Aggregated(
                    aggregate_records(&records, spec.op, &spec.field, spec.group_by.as_deref())?,
                ),
                (step, _) => {
                    return Err(QueryError::InvalidPlan(format!(
                        "step {step:?} needs records from a preceding scan or filter"
                    )))
                }
            };
        }
        match state {
            Intermediate::Empty => Ok(Value::Array(Vec::new())),
            Intermediate::Records(records) => Ok(Value::Array(
                records.into_iter().map(Record::into_value).collect(),
            )),
            Intermediate::Aggregated(value) => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::airtable::testing::MemoryStore;

    fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.insert("applicants", "recA1", json!({"Applicant Name": "Ann", "Years in Aviation": 10, "Location": "TX"}));
        store.insert("applicants", "recA2", json!({"Applicant Name": "Bob", "Years in Aviation": 4, "Location": "TX"}));
        store.insert("applicants", "recA3", json!({"Applicant Name": "Cy", "Location": "FL"}));
        store.insert("applicant_pipeline", "recP1", json!({"Applicant": ["recA1"], "Pipeline Stage": "New"}));
        store.insert("applicant_pipeline", "recP2", json!({"Applicant": ["recA2", "recGone"], "Pipeline Stage": "New"}));
        store.insert("applicant_pipeline", "recP3", json!({"Pipeline Stage": "New"}));
        store
    }

    #[tokio::test]
    async fn test_aggregate_ungrouped_and_grouped() {
        let engine = QueryEngine::new(seeded());
        let sum = engine
            .aggregate("applicants", "Years in Aviation", AggregateOp::Sum, None, None)
            .await
            .unwrap();
        assert_eq!(sum, json!(14.0));

        let grouped = engine
            .aggregate("applicants", "Years in Aviation", AggregateOp::Avg, Some("Location"), None)
            .await
            .unwrap();
        assert_eq!(grouped["TX"], json!(7.0));
        assert_eq!(grouped["FL"], Value::Null);

        let err = engine
            .aggregate("applicants", "Years in Aviation", AggregateOp::Max, Some("Location"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::GroupingNotSupported(_)));
    }

    #[tokio::test]
    async fn test_aggregate_on_empty_table() {
        let engine = QueryEngine::new(Arc::new(MemoryStore::new()));
        let count = engine
            .aggregate("contractors", "x", AggregateOp::Count, None, None)
            .await
            .unwrap();
        assert_eq!(count, json!(0));
        let avg = engine
            .aggregate("contractors", "x", AggregateOp::Avg, None, None)
            .await
            .unwrap();
        assert_eq!(avg, Value::Null);
    }

    #[tokio::test]
    async fn test_join_records_expands_links_and_skips_missing() {
        let store = seeded();
        let engine = QueryEngine::new(store.clone());
        let pipelines = store.records("applicant_pipeline");
        let joined = engine.join_records(pipelines, "Applicant", "applicants").await;

        let first = joined[0].fields["Applicant_expanded"].as_array().unwrap();
        assert_eq!(first[0]["id"], json!("recA1"));
        let second = joined[1].fields["Applicant_expanded"].as_array().unwrap();
        assert_eq!(second.len(), 1);
        assert!(!joined[2].fields.contains_key("Applicant_expanded"));
        // recA1, recA2 and recGone are each fetched exactly once
        assert_eq!(store.call_count("get:applicants"), 3);
    }

    #[tokio::test]
    async fn test_get_by_id_swallows_errors() {
        let engine = QueryEngine::new(seeded());
        assert!(engine.get_by_id("applicants", "recNope").await.is_none());
        assert!(engine.get_by_id("applicants", "recA1").await.is_some());
    }

    #[tokio::test]
    async fn test_get_by_name_exact_match() {
        let store = seeded();
        let engine = QueryEngine::new(store.clone());
        let found = engine.get_by_name("applicants", "Bob", true).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "recA2");

        engine.get_by_name("applicants", "Bo", false).await.unwrap();
        let formulas = store.formulas.lock().unwrap().clone();
        assert_eq!(formulas.last().unwrap(), "FIND('Bo', {Applicant Name}) > 0");
    }

    #[tokio::test]
    async fn test_search_uses_schema_fields() {
        let store = Arc::new(MemoryStore::new());
        let schema = Arc::new(
            SchemaManager::from_yaml_str(include_str!("../../config/airtable_schema.yaml")).unwrap(),
        );
        let engine = QueryEngine::new(store.clone()).with_schema(schema);
        engine.search("interactions", "call", None).await.unwrap();
        let formulas = store.formulas.lock().unwrap().clone();
        assert!(formulas[0].contains("FIND('call', {Summary})"));
    }

    #[test]
    fn test_plan_orders_steps() {
        let plan = QueryPlanner::plan(
            "applicant_pipeline",
            vec![Condition::new("Pipeline Stage", "=", json!("New"))],
            Logic::And,
            &[JoinSpec {
                table: "applicants".into(),
                field: "Applicant".into(),
            }],
            vec![AggregateSpec {
                op: AggregateOp::Count,
                field: String::new(),
                group_by: None,
            }],
        );
        assert!(matches!(plan.steps[0], PlanStep::Filter { .. }));
        assert!(matches!(plan.steps[1], PlanStep::Join { .. }));
        assert!(matches!(plan.steps[2], PlanStep::Aggregate(_)));

        let scan = QueryPlanner::plan("applicants", vec![], Logic::And, &[], vec![]);
        assert_eq!(
            scan.steps,
            vec![PlanStep::Scan {
                table: "applicants".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_execute_plan_counts_filtered_records() {
        let planner = QueryPlanner::new(QueryEngine::new(seeded()));
        let plan = QueryPlanner::plan(
            "applicant_pipeline",
            vec![Condition::new("Pipeline Stage", "=", json!("New"))],
            Logic::And,
            &[],
            vec![AggregateSpec {
                op: AggregateOp::Count,
                field: String::new(),
                group_by: None,
            }],
        );
        assert_eq!(planner.execute(&plan).await.unwrap(), json!(3));
    }

    #[tokio::test]
    async fn test_execute_rejects_join_without_records() {
        let planner = QueryPlanner::new(QueryEngine::new(seeded()));
        let plan = QueryPlan {
            steps: vec![PlanStep::Join {
                linked_table: "applicants".into(),
                link_field: "Applicant".into(),
            }],
        };
        assert!(matches!(
            planner.execute(&plan).await,
            Err(QueryError::InvalidPlan(_))
        ));
    }
}
