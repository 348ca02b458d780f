//! Flow map: industry-class edges loaded from CSV, and the graph payload
//! the dashboard draws from them.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, FromRow, PgConnection, Postgres, QueryBuilder};

use crate::errors::AppError;
use crate::industry::IndustryClass;

/// Rows per multi-row `INSERT`. Eight binds each keeps us far below the
/// Postgres limit of 65535 parameters per statement.
const INSERT_CHUNK: usize = 1000;

/// One edge between two industry classes, as it appears in the CSV.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, FromRow)]
pub struct FlowMapRecord {
    pub source_domain_code: i32,
    pub source_domain_name: String,
    pub source_class_code: i32,
    pub source_class_name: String,
    pub target_domain_code: i32,
    pub target_domain_name: String,
    pub target_class_code: i32,
    pub target_class_name: String,
}

/// A class inside a domain node. The flow-map table carries no surrogate
/// keys, so `industry_class_id` is the class code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowClass {
    pub industry_class_id: i32,
    pub industry_class_code: i32,
    pub industry_class_name: String,
}

/// One domain box on the dashboard. `domain_id` is the domain code for the
/// same reason `FlowClass::industry_class_id` is the class code. `themes` and
/// `contents` are always present so the client can map over them; nothing
/// in the CSV populates them yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowNode {
    pub id: String,
    pub domain_id: i32,
    pub domain_code: i32,
    pub domain_name: String,
    pub classes: Vec<FlowClass>,
    pub themes: Vec<FlowClass>,
    pub contents: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub source_class_code: i32,
    pub target_class_code: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowMap {
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
    pub loaded_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait FlowMapStore: Send {
    /// Edges in load order, with the timestamp of the load that wrote them.
    async fn list_flowmap_records(
        &mut self,
    ) -> Result<(Vec<FlowMapRecord>, Option<DateTime<Utc>>), AppError>;

    /// Distinct classes on either end of an edge, ordered by class code.
    /// `industry_class_id` is the class code and `domain_id` the domain code,
    /// since `flow_map` stores codes only.
    async fn list_flowmap_classes(&mut self) -> Result<Vec<IndustryClass>, AppError>;

    /// Replace the whole table with `records` atomically. Returns rows written.
    async fn replace_flowmap(
        &mut self,
        records: &[FlowMapRecord],
        loaded_at: DateTime<Utc>,
    ) -> Result<u64, AppError>;
}

#[derive(FromRow)]
struct StoredRecord {
    #[sqlx(flatten)]
    record: FlowMapRecord,
    loaded_at: DateTime<Utc>,
}

#[async_trait]
impl FlowMapStore for PgConnection {
    async fn list_flowmap_records(
        &mut self,
    ) -> Result<(Vec<FlowMapRecord>, Option<DateTime<Utc>>), AppError> {
        let rows = sqlx::query_as::<_, StoredRecord>(
            "SELECT source_domain_code, source_domain_name, source_class_code, source_class_name,
                    target_domain_code, target_domain_name, target_class_code, target_class_name,
                    loaded_at
             FROM flow_map
             ORDER BY id",
        )
        .fetch_all(&mut *self)
        .await?;

        let loaded_at = rows.iter().map(|r| r.loaded_at).max();
        Ok((rows.into_iter().map(|r| r.record).collect(), loaded_at))
    }

    async fn list_flowmap_classes(&mut self) -> Result<Vec<IndustryClass>, AppError> {
        let rows = sqlx::query_as::<_, IndustryClass>(
            r#"
            SELECT class_code AS industry_class_id,
                   class_code AS industry_class_code,
                   MIN(class_name) AS industry_class_name,
                   MIN(domain_code) AS domain_id
            FROM (
                SELECT source_class_code AS class_code, source_class_name AS class_name,
                       source_domain_code AS domain_code
                FROM flow_map
                UNION ALL
                SELECT target_class_code, target_class_name, target_domain_code
                FROM flow_map
            ) classes
            GROUP BY class_code
            ORDER BY class_code
            "#,
        )
        .fetch_all(&mut *self)
        .await?;
        Ok(rows)
    }

    async fn replace_flowmap(
        &mut self,
        records: &[FlowMapRecord],
        loaded_at: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let mut tx = self.begin().await?;

        sqlx::query("DELETE FROM flow_map").execute(&mut *tx).await?;

        let mut written = 0;
        for chunk in records.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO flow_map (
                    source_domain_code, source_domain_name, source_class_code, source_class_name,
                    target_domain_code, target_domain_name, target_class_code, target_class_name,
                    loaded_at
                ) ",
            );
            qb.push_values(chunk, |mut b, r| {
                b.push_bind(r.source_domain_code)
                    .push_bind(&r.source_domain_name)
                    .push_bind(r.source_class_code)
                    .push_bind(&r.source_class_name)
                    .push_bind(r.target_domain_code)
                    .push_bind(&r.target_domain_name)
                    .push_bind(r.target_class_code)
                    .push_bind(&r.target_class_name)
                    .push_bind(loaded_at);
            });
            written += qb.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }
}

/// Group edges into domain nodes. Each node lists every class of that domain
/// seen on either end of an edge, ordered by class code.
pub fn build_flowmap(records: &[FlowMapRecord], loaded_at: Option<DateTime<Utc>>) -> FlowMap {
    let mut domains: BTreeMap<i32, (String, BTreeMap<i32, String>)> = BTreeMap::new();
    let mut visit = |domain_code: i32, domain_name: &str, class_code: i32, class_name: &str| {
        domains
            .entry(domain_code)
            .or_insert_with(|| (domain_name.to_string(), BTreeMap::new()))
            .1
            .entry(class_code)
            .or_insert_with(|| class_name.to_string());
    };

    for r in records {
        visit(r.source_domain_code, &r.source_domain_name, r.source_class_code, &r.source_class_name);
        visit(r.target_domain_code, &r.target_domain_name, r.target_class_code, &r.target_class_name);
    }

    let nodes = domains
        .into_iter()
        .map(|(domain_code, (domain_name, classes))| FlowNode {
            id: domain_code.to_string(),
            domain_id: domain_code,
            domain_code,
            domain_name,
            classes: classes
                .into_iter()
                .map(|(industry_class_code, industry_class_name)| FlowClass {
                    industry_class_id: industry_class_code,
                    industry_class_code,
                    industry_class_name,
                })
                .collect(),
            themes: Vec::new(),
            contents: Vec::new(),
        })
        .collect();

    let edges = records
        .iter()
        .enumerate()
        .map(|(i, r)| FlowEdge {
            id: format!("e{}", i + 1),
            source: r.source_domain_code.to_string(),
            target: r.target_domain_code.to_string(),
            source_class_code: r.source_class_code,
            target_class_code: r.target_class_code,
        })
        .collect();

    FlowMap {
        nodes,
        edges,
        loaded_at,
    }
}
