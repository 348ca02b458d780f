//! Industry classification reads: classes, sub-classes and per-class
//! listing statistics.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, PgConnection};

use crate::errors::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct IndustryClass {
    pub industry_class_id: i32,
    pub industry_class_code: i32,
    pub industry_class_name: String,
    pub domain_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SubClass {
    pub sub_class_id: i32,
    pub industry_class_id: i32,
    pub sub_class_code: Option<String>,
    pub sub_class_major_name: Option<String>,
    pub sub_class_minor_name: Option<String>,
}

/// One value per listing bucket. Serialized with the keys the dashboard
/// reads (`TOTAL`, `Y`, `K`, `N`, `비상장외감`, `비외감`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Buckets<T> {
    #[serde(rename = "TOTAL")]
    pub total: T,
    #[serde(rename = "Y")]
    pub kospi: T,
    #[serde(rename = "K")]
    pub kosdaq: T,
    #[serde(rename = "N")]
    pub konex: T,
    #[serde(rename = "비상장외감")]
    pub unlisted_audited: T,
    #[serde(rename = "비외감")]
    pub unaudited: T,
}

impl<T: Copy> Buckets<T> {
    /// Values in export column order.
    pub fn to_array(&self) -> [T; 6] {
        [
            self.total,
            self.kospi,
            self.kosdaq,
            self.konex,
            self.unlisted_audited,
            self.unaudited,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndustryClassInfo {
    pub domain_name: String,
    pub industry_class_name: String,
    pub sub_class_major_name: Option<String>,
    pub sub_class_minor_name: Option<String>,
    pub cnt: Buckets<i64>,
    pub rate: Buckets<f64>,
}

#[derive(Debug, FromRow)]
struct IndustryClassInfoRow {
    domain_name: String,
    industry_class_name: String,
    sub_class_major_name: Option<String>,
    sub_class_minor_name: Option<String>,
    cnt_total: i64,
    cnt_y: i64,
    cnt_k: i64,
    cnt_n: i64,
    cnt_unlisted_audited: i64,
    cnt_unaudited: i64,
    rate_total: f64,
    rate_y: f64,
    rate_k: f64,
    rate_n: f64,
    rate_unlisted_audited: f64,
    rate_unaudited: f64,
}

impl From<IndustryClassInfoRow> for IndustryClassInfo {
    fn from(row: IndustryClassInfoRow) -> Self {
        Self {
            domain_name: row.domain_name,
            industry_class_name: row.industry_class_name,
            sub_class_major_name: row.sub_class_major_name,
            sub_class_minor_name: row.sub_class_minor_name,
            cnt: Buckets {
                total: row.cnt_total,
                kospi: row.cnt_y,
                kosdaq: row.cnt_k,
                konex: row.cnt_n,
                unlisted_audited: row.cnt_unlisted_audited,
                unaudited: row.cnt_unaudited,
            },
            rate: Buckets {
                total: row.rate_total,
                kospi: row.rate_y,
                kosdaq: row.rate_k,
                konex: row.rate_n,
                unlisted_audited: row.rate_unlisted_audited,
                unaudited: row.rate_unaudited,
            },
        }
    }
}

#[async_trait]
pub trait IndustryStore: Send {
    async fn list_industry_classes(&mut self) -> Result<Vec<IndustryClass>, AppError>;
    async fn list_sub_classes(&mut self) -> Result<Vec<SubClass>, AppError>;
    async fn list_industry_class_info(&mut self) -> Result<Vec<IndustryClassInfo>, AppError>;
}

#[async_trait]
impl IndustryStore for PgConnection {
    async fn list_industry_classes(&mut self) -> Result<Vec<IndustryClass>, AppError> {
        let rows = sqlx::query_as::<_, IndustryClass>(
            "SELECT industry_class_id, industry_class_code, industry_class_name, domain_id
             FROM industry_class
             ORDER BY industry_class_id",
        )
        .fetch_all(&mut *self)
        .await?;
        Ok(rows)
    }

    async fn list_sub_classes(&mut self) -> Result<Vec<SubClass>, AppError> {
        let rows = sqlx::query_as::<_, SubClass>(
            "SELECT sub_class_id, industry_class_id, sub_class_code,
                    sub_class_major_name, sub_class_minor_name
             FROM sub_class
             ORDER BY sub_class_id",
        )
        .fetch_all(&mut *self)
        .await?;
        Ok(rows)
    }

    async fn list_industry_class_info(&mut self) -> Result<Vec<IndustryClassInfo>, AppError> {
        let rows = sqlx::query_as::<_, IndustryClassInfoRow>(
            r#"
            SELECT d.domain_name, s.industry_class_name,
                   s.sub_class_major_name, s.sub_class_minor_name,
                   s.cnt_total, s.cnt_y, s.cnt_k, s.cnt_n,
                   s.cnt_unlisted_audited, s.cnt_unaudited,
                   s.rate_total, s.rate_y, s.rate_k, s.rate_n,
                   s.rate_unlisted_audited, s.rate_unaudited
            FROM industry_class_stat s
            JOIN domain d ON d.domain_id = s.domain_id
            ORDER BY d.domain_id, s.id
            "#,
        )
        .fetch_all(&mut *self)
        .await?;
        Ok(rows.into_iter().map(IndustryClassInfo::from).collect())
    }
}
