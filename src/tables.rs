use crate::output::{self, FAIL, OK, WIDE};
use anyhow::{Context, Result, anyhow};
use aws_config::SdkConfig;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::AttributeValue;
use log::{debug, trace, warn};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;

pub const MAX_SAMPLE_ITEMS: i32 = 3;
const SAMPLE_RENDER_CHARS: usize = 500;
const SAMPLE_INDENT: &[u8] = b"      ";
const AUDIT_INDENT: &[u8] = b"  ";

pub type Item = HashMap<String, AttributeValue>;

/// The fields an application entity is expected to carry, keyed by one attribute.
#[derive(Debug, Clone, Copy)]
pub struct ItemShape {
    pub entity: &'static str,
    pub key_attribute: &'static str,
    pub fields: &'static [&'static str],
    pub details: &'static [Detail],
}

/// An extra audit line showing one sample value of a field.
#[derive(Debug, Clone, Copy)]
pub enum Detail {
    /// The first element of an array field.
    First {
        field: &'static str,
        label: &'static str,
    },
    /// One attribute of the first element of an array field.
    FirstAttribute {
        field: &'static str,
        attribute: &'static str,
        label: &'static str,
    },
    /// The field's value, shown only when the field is present.
    Present { field: &'static str },
}

pub const EMPLOYEE_SHAPE: ItemShape = ItemShape {
    entity: "employees",
    key_attribute: "user_id",
    fields: &[
        "name",
        "basic_info",
        "experience_years",
        "skills",
        "project_history",
        "work_experience",
    ],
    details: &[
        Detail::First {
            field: "skills",
            label: "첫 번째 스킬",
        },
        Detail::FirstAttribute {
            field: "work_experience",
            attribute: "project_name",
            label: "첫 번째 프로젝트",
        },
    ],
};

pub const PROJECT_SHAPE: ItemShape = ItemShape {
    entity: "projects",
    key_attribute: "project_id",
    fields: &[
        "project_id",
        "start_date",
        "end_date",
        "team_size",
        "team_members",
        "team_composition",
        "tech_stack",
    ],
    details: &[
        Detail::Present { field: "period" },
        Detail::First {
            field: "team_members",
            label: "첫 번째 항목",
        },
    ],
};

/// Converts a DynamoDB attribute into plain JSON. Numbers always become JSON numbers.
pub fn attribute_to_json(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => number_to_json(n),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::M(m) => item_to_json(m),
        AttributeValue::L(l) => Value::Array(l.iter().map(attribute_to_json).collect()),
        AttributeValue::Ss(ss) => Value::Array(ss.iter().cloned().map(Value::String).collect()),
        AttributeValue::Ns(ns) => Value::Array(ns.iter().map(|n| number_to_json(n)).collect()),
        AttributeValue::B(b) => Value::String(format!("<binary {} bytes>", b.as_ref().len())),
        AttributeValue::Bs(bs) => Value::Array(
            bs.iter()
                .map(|b| Value::String(format!("<binary {} bytes>", b.as_ref().len())))
                .collect(),
        ),
        _ => {
            warn!("Unknown attribute value type: {:?}", value);
            Value::Null
        }
    }
}

fn number_to_json(n: &str) -> Value {
    match n.trim().parse::<f64>().ok().and_then(Number::from_f64) {
        Some(number) => Value::Number(number),
        None => {
            warn!("Number attribute {n} does not fit a finite float");
            Value::Null
        }
    }
}

pub fn item_to_json(item: &Item) -> Value {
    Value::Object(
        item.iter()
            .map(|(k, v)| (k.clone(), attribute_to_json(v)))
            .collect::<Map<String, Value>>(),
    )
}

/// Pretty-prints `value` with the given indent. Non-ASCII text is written verbatim.
pub fn render_json(value: &Value, indent: &[u8]) -> Result<String> {
    let mut buf = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(indent));
    value.serialize(&mut serializer)?;
    Ok(String::from_utf8(buf)?)
}

/// `project_history` -> `projectHistory`. Single-word names are returned unchanged.
pub fn camel_case(snake: &str) -> String {
    let mut out = String::with_capacity(snake.len());
    let mut upper = false;
    for c in snake.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Missing,
    Count(usize),
    Scalar(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldObservation {
    pub name: String,
    pub observed: Observed,
}

impl FieldObservation {
    pub fn line(&self) -> String {
        match &self.observed {
            Observed::Missing => format!("  - {}: N/A", self.name),
            Observed::Count(n) => format!("  - {} 개수: {}", self.name, n),
            Observed::Scalar(s) => format!("  - {}: {}", self.name, s),
        }
    }
}

/// Strings print bare; everything else prints as compact JSON.
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn observe(value: Option<&Value>) -> Observed {
    match value {
        None => Observed::Missing,
        Some(Value::Array(a)) => Observed::Count(a.len()),
        Some(Value::Object(o)) => Observed::Count(o.len()),
        Some(other) => Observed::Scalar(display_value(other)),
    }
}

/// Audits every field of `shape` on `item`, checking the snake_case and camelCase spellings
/// separately since the stored data is not schema-enforced.
pub fn audit_fields(item: &Value, shape: &ItemShape) -> Vec<FieldObservation> {
    let mut observations = Vec::new();
    for field in shape.fields {
        let camel = camel_case(field);
        let mut spellings = vec![field.to_string()];
        if camel != *field {
            spellings.push(camel);
        }
        for name in spellings {
            let observed = observe(item.get(&name));
            observations.push(FieldObservation { name, observed });
        }
    }
    observations
}

fn first_element<'a>(item: &'a Value, field: &str) -> Option<&'a Value> {
    item.get(field)?.as_array()?.first()
}

/// The sample lines declared by `shape.details`. Fields that are absent or empty yield no line.
pub fn first_element_lines(item: &Value, shape: &ItemShape) -> Vec<String> {
    shape
        .details
        .iter()
        .filter_map(|detail| match *detail {
            Detail::First { field, label } => first_element(item, field)
                .map(|first| format!("    {label}: {}", display_value(first))),
            Detail::FirstAttribute {
                field,
                attribute,
                label,
            } => first_element(item, field).map(|first| {
                let value = first
                    .get(attribute)
                    .map_or_else(|| "N/A".to_string(), display_value);
                format!("    {label}: {value}")
            }),
            Detail::Present { field } => item
                .get(field)
                .map(|value| format!("  - {field}: {}", display_value(value))),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSummary {
    pub name: String,
    pub status: String,
    pub item_count: i64,
}

/// The DynamoDB reads the inspector relies on.
#[allow(async_fn_in_trait)]
pub trait TableStore {
    async fn list_tables(&self) -> Result<Vec<String>>;

    async fn describe_table(&self, table_name: &str) -> Result<TableSummary>;

    async fn sample_items(&self, table_name: &str, limit: i32) -> Result<Vec<Item>>;

    /// Fetches the item whose string key `key_attribute` equals `key`, or `None` when absent.
    async fn get_item(
        &self,
        table_name: &str,
        key_attribute: &str,
        key: &str,
    ) -> Result<Option<Item>>;
}

pub struct DynamoTables {
    client: Client,
}

impl DynamoTables {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: Client::new(sdk_config),
        }
    }
}

impl TableStore for DynamoTables {
    async fn list_tables(&self) -> Result<Vec<String>> {
        let mut start_table_name = None;
        let mut table_names = Vec::new();

        loop {
            trace!("Listing tables (start={start_table_name:?})");

            let output = self
                .client
                .list_tables()
                .set_exclusive_start_table_name(start_table_name)
                .send()
                .await
                .context("Failed to list tables")?;

            table_names.extend(output.table_names().iter().cloned());

            start_table_name = output.last_evaluated_table_name;
            if start_table_name.is_none() {
                debug!("Found {} table(s)", table_names.len());
                break Ok(table_names);
            }
        }
    }

    async fn describe_table(&self, table_name: &str) -> Result<TableSummary> {
        let described = self
            .client
            .describe_table()
            .table_name(table_name)
            .send()
            .await
            .with_context(|| format!("Failed to describe table: {}", table_name))?;

        let table = described
            .table()
            .ok_or_else(|| anyhow!("Table {} has no description", table_name))?;

        Ok(TableSummary {
            name: table_name.to_string(),
            status: table
                .table_status()
                .map_or("UNKNOWN", |s| s.as_str())
                .to_string(),
            item_count: table.item_count().unwrap_or_default(),
        })
    }

    async fn sample_items(&self, table_name: &str, limit: i32) -> Result<Vec<Item>> {
        let output = self
            .client
            .scan()
            .table_name(table_name)
            .limit(limit)
            .send()
            .await
            .with_context(|| format!("Failed to scan table: {}", table_name))?;

        Ok(output.items.unwrap_or_default())
    }

    async fn get_item(
        &self,
        table_name: &str,
        key_attribute: &str,
        key: &str,
    ) -> Result<Option<Item>> {
        let output = self
            .client
            .get_item()
            .table_name(table_name)
            .key(key_attribute, AttributeValue::S(key.to_string()))
            .send()
            .await
            .with_context(|| format!("Failed to get {} from {}", key, table_name))?;

        Ok(output.item)
    }
}

fn sample_limit(limit: i32) -> i32 {
    limit.clamp(1, MAX_SAMPLE_ITEMS)
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableOutcome {
    /// Number of items sampled and printed.
    Sampled(usize),
    Failed(String),
}

async fn print_table_summary<T: TableStore>(
    store: &T,
    table_name: &str,
    limit: i32,
) -> Result<usize> {
    let summary = store.describe_table(table_name).await?;

    println!("\n📊 테이블: {table_name}");
    println!("   상태: {}", summary.status);
    println!("   항목 수: {}개", summary.item_count);

    let items = store.sample_items(table_name, sample_limit(limit)).await?;
    if items.is_empty() {
        println!("   ⚠️  데이터 없음");
        return Ok(0);
    }

    println!("   샘플 데이터 (최대 {}개):", sample_limit(limit));
    for (i, item) in items.iter().enumerate() {
        let rendered = render_json(&item_to_json(item), SAMPLE_INDENT)?;
        println!(
            "\n   [{}] {}",
            i + 1,
            output::truncate(&rendered, SAMPLE_RENDER_CHARS)
        );
    }

    Ok(items.len())
}

/// Lists every table in the region and prints a small sample of each. A failure on one table
/// is printed and the next table is still inspected.
pub async fn inspect_tables<T: TableStore>(
    store: &T,
    limit: i32,
) -> Result<Vec<(String, TableOutcome)>> {
    output::banner("DynamoDB 테이블 현황 요약", WIDE);

    println!("\n🔍 실제 테이블 목록 조회 중...");
    let table_names = match store.list_tables().await {
        Ok(names) => names,
        Err(e) => {
            println!("{FAIL} 테이블 목록 조회 실패: {e:#}");
            return Err(e);
        }
    };

    println!("   발견된 테이블: {}개", table_names.len());
    for table_name in &table_names {
        println!("   - {table_name}");
    }

    println!("\n{}", output::rule(WIDE));

    let mut results = Vec::new();
    for table_name in table_names {
        let outcome = match print_table_summary(store, &table_name, limit).await {
            Ok(sampled) => TableOutcome::Sampled(sampled),
            Err(e) => {
                warn!("Failed to inspect table {}: {:#}", table_name, e);
                println!("\n{FAIL} 테이블 {table_name} 조회 실패: {e:#}");
                TableOutcome::Failed(format!("{e:#}"))
            }
        };
        results.push((table_name, outcome));
    }

    output::banner("요약 완료", WIDE);
    Ok(results)
}

fn print_audit(item: &Item, shape: &ItemShape) -> Result<Vec<FieldObservation>> {
    let json = item_to_json(item);

    println!("\n전체 키 목록:");
    let mut keys: Vec<&String> = item.keys().collect();
    keys.sort();
    for key in keys {
        println!("  - {key}");
    }

    println!("\n주요 필드 값:");
    let observations = audit_fields(&json, shape);
    for observation in &observations {
        println!("{}", observation.line());
    }
    for line in first_element_lines(&json, shape) {
        println!("{line}");
    }

    println!("\n전체 데이터:");
    println!("{}", render_json(&json, AUDIT_INDENT)?);
    Ok(observations)
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuditOutcome {
    Found(Vec<FieldObservation>),
    Missing,
    Failed(String),
}

async fn audit_key<T: TableStore>(
    store: &T,
    table_name: &str,
    shape: &ItemShape,
    key: &str,
) -> Result<AuditOutcome> {
    match store.get_item(table_name, shape.key_attribute, key).await? {
        Some(item) => {
            println!("\n{OK} 데이터 발견");
            Ok(AuditOutcome::Found(print_audit(&item, shape)?))
        }
        None => {
            println!("  {FAIL} 데이터 없음");
            Ok(AuditOutcome::Missing)
        }
    }
}

fn item_label(item: &Item, shape: &ItemShape, index: usize) -> String {
    match item.get(shape.key_attribute) {
        Some(AttributeValue::S(key)) => key.clone(),
        _ => format!("#{}", index + 1),
    }
}

/// Prints the structure of the items stored under `keys`, or of a small scan sample when no
/// keys are given. Missing fields and missing items are reported, not treated as failures.
pub async fn audit_items<T: TableStore>(
    store: &T,
    table_name: &str,
    shape: &ItemShape,
    keys: &[String],
) -> Result<Vec<(String, AuditOutcome)>> {
    output::banner(
        &format!("DynamoDB {} 데이터 구조 확인 ({table_name})", shape.entity),
        WIDE,
    );

    let mut results = Vec::new();
    if keys.is_empty() {
        let items = store.sample_items(table_name, MAX_SAMPLE_ITEMS).await?;
        println!("\n총 {}개 샘플 조회", items.len());
        for (i, item) in items.iter().enumerate() {
            println!("\n{}", output::rule(WIDE));
            println!("[{}] {}", i + 1, shape.entity);
            let observations = print_audit(item, shape)?;
            results.push((item_label(item, shape, i), AuditOutcome::Found(observations)));
        }
    } else {
        for key in keys {
            println!("\n[{key}] 데이터 조회 중...");
            let outcome = match audit_key(store, table_name, shape, key).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    println!("  {FAIL} 오류: {e:#}");
                    AuditOutcome::Failed(format!("{e:#}"))
                }
            };
            results.push((key.clone(), outcome));
        }
    }

    output::footer(WIDE);
    Ok(results)
}
