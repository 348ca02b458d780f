//! Company overview: paginated listing, typeahead search and the detail view
//! that stitches DART info, the open-API outline and association lists
//! into one nested response.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, PgConnection, Postgres, QueryBuilder};
use tracing::debug;

use crate::db::like_pattern;
use crate::errors::AppError;

/// Maximum number of typeahead suggestions.
pub const SEARCH_LIMIT: i64 = 20;

pub const DEFAULT_LIMIT: i64 = 50;

/// Column selector for the overview listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    FirmName,
    BizrNo,
    JurirNo,
    StockCode,
}

impl Category {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw {
            "firmName" => Ok(Category::FirmName),
            "bizrNo" => Ok(Category::BizrNo),
            "jurirNo" => Ok(Category::JurirNo),
            "stockCode" => Ok(Category::StockCode),
            other => Err(AppError::Validation(format!(
                "category must be one of firmName, bizrNo, jurirNo, stockCode (got `{other}`)"
            ))),
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            Category::FirmName => "firm",
            Category::BizrNo => "bizr_no",
            Category::JurirNo => "jurir_no",
            Category::StockCode => "stock_code",
        }
    }
}

/// Column selector for typeahead search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchCategory {
    Firm,
    BizrNo,
    JurirNo,
}

impl SearchCategory {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw {
            "firm" => Ok(SearchCategory::Firm),
            "bizr_no" => Ok(SearchCategory::BizrNo),
            "jurir_no" => Ok(SearchCategory::JurirNo),
            other => Err(AppError::Validation(format!(
                "category must be one of firm, bizr_no, jurir_no (got `{other}`)"
            ))),
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            SearchCategory::Firm => "firm",
            SearchCategory::BizrNo => "bizr_no",
            SearchCategory::JurirNo => "jurir_no",
        }
    }
}

/// Keyword filter. Matching is a case-insensitive substring match.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OverviewFilter {
    pub category: Option<Category>,
    pub keyword: Option<String>,
}

impl OverviewFilter {
    /// The `(column, pattern)` to filter on, if the filter is active.
    pub fn condition(&self) -> Option<(&'static str, String)> {
        match (self.category, self.keyword.as_deref()) {
            (Some(category), Some(keyword)) if !keyword.is_empty() => {
                Some((category.column(), like_pattern(keyword)))
            }
            _ => None,
        }
    }
}

/// 1-indexed page of `limit` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    limit: i64,
    page: i64,
}

impl Page {
    pub fn new(limit: i64, page: i64) -> Result<Self, AppError> {
        if limit < 1 {
            return Err(AppError::Validation(format!("limit must be positive (got {limit})")));
        }
        if page < 1 {
            return Err(AppError::Validation(format!("page must be positive (got {page})")));
        }
        Ok(Self { limit, page })
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            page: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OverviewSummary {
    pub id: i32,
    pub corp_code: String,
    #[sqlx(rename = "firm")]
    pub firm_name: Option<String>,
    pub bizr_no: Option<String>,
    pub jurir_no: Option<String>,
    pub stock_code: Option<String>,
    pub conglomerate_name: Option<String>,
    pub ceo_name: Option<String>,
    pub establish_date: Option<String>,
    #[serde(rename = "adress1")]
    pub address1: Option<String>,
    #[serde(rename = "adress2")]
    pub address2: Option<String>,
    pub homepage: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct SearchItem {
    pub id: i32,
    pub label: String,
}

/// `dart_corp_info` row.
#[derive(Debug, Clone, Default, FromRow)]
pub struct CorpInfo {
    pub corp_code: String,
    pub corp_name: Option<String>,
    pub corp_name_eng: Option<String>,
    pub stock_name: Option<String>,
    pub stock_code: Option<String>,
    pub ceo_nm: Option<String>,
    pub corp_cls: Option<String>,
    pub jurir_no: String,
    pub bizr_no: Option<String>,
    pub adres: Option<String>,
    pub hm_url: Option<String>,
    pub phn_no: Option<String>,
    pub est_dt: Option<String>,
    pub acc_mt: Option<String>,
}

/// `openapi_outline` row.
#[derive(Debug, Clone, Default, FromRow)]
pub struct CorpOutline {
    pub crno: String,
    pub smenpyn: Option<String>,
    pub enpxchglstgdt: Option<String>,
    pub enpxchglstgaboldt: Option<String>,
    pub enpkosdaqlstgdt: Option<String>,
    pub enpkosdaqlstgaboldt: Option<String>,
    pub enpkrxlstgdt: Option<String>,
    pub enpkrxlstgaboldt: Option<String>,
    pub enpempecnt: Option<i64>,
    pub enppn1avgslryamt: Option<i64>,
    pub audtrptopnnctt: Option<String>,
    pub enpmainbiznm: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub list_date: Option<String>,
    pub delist_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedCorp {
    pub corp_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverviewDetail {
    pub stock_name: Option<String>,
    pub stock_code: Option<String>,
    pub bizr_no: Option<String>,
    pub jurir_no: String,
    pub corp_name: Option<String>,
    pub corp_name_eng: Option<String>,
    pub corp_name_history: Option<Vec<String>>,
    pub corp_cls: Option<&'static str>,
    pub est_dt: Option<String>,
    pub kospi: Listing,
    pub kosdaq: Listing,
    pub konex: Listing,
    pub hm_url: Option<String>,
    pub phn_no: Option<String>,
    pub adres: Option<String>,
    pub ceo_nm: Option<String>,
    pub affiliate_list: Vec<NamedCorp>,
    pub smenpyn: Option<bool>,
    #[serde(rename = "isVenture")]
    pub is_venture: Option<bool>,
    pub sub_corp_list: Vec<NamedCorp>,
    pub shareholder_num: Option<i64>,
    pub enpempecnt: Option<i64>,
    pub enppn1avgslryamt: Option<i64>,
    pub audtrptopnnctt: Option<String>,
    pub acc_mt: Option<String>,
    #[serde(rename = "issuerRate")]
    pub issuer_rate: Option<String>,
    pub enpmainbiznm: Option<String>,
    #[serde(rename = "classList")]
    pub class_list: Vec<String>,
}

/// Display label for a DART `corp_cls` code. Case-insensitive; unknown
/// codes have no label.
pub fn corp_class_label(code: &str) -> Option<&'static str> {
    match code.to_ascii_lowercase().as_str() {
        "y" => Some("유가"),
        "k" => Some("KOSDAQ"),
        "n" => Some("KONEX"),
        "e" => Some("etc"),
        _ => None,
    }
}

/// `smenpyn` y/n flag.
pub fn sme_flag(code: &str) -> Option<bool> {
    match code.to_ascii_lowercase().as_str() {
        "y" => Some(true),
        "n" => Some(false),
        _ => None,
    }
}

/// Read access needed by the overview endpoints.
#[async_trait]
pub trait OverviewStore: Send {
    async fn list_overview(
        &mut self,
        filter: &OverviewFilter,
        page: Page,
    ) -> Result<(Vec<OverviewSummary>, i64), AppError>;

    async fn search_by_category(
        &mut self,
        term: &str,
        category: SearchCategory,
    ) -> Result<Vec<SearchItem>, AppError>;

    async fn find_corp_info(&mut self, corp_code: &str) -> Result<Option<CorpInfo>, AppError>;

    async fn find_outline(&mut self, crno: &str) -> Result<Option<CorpOutline>, AppError>;

    async fn list_affiliate_names(&mut self, crno: &str) -> Result<Vec<String>, AppError>;

    async fn list_sub_corp_names(&mut self, crno: &str) -> Result<Vec<String>, AppError>;
}

const OVERVIEW_COLUMNS: &str = "id, corp_code, firm, bizr_no, jurir_no, stock_code, \
     conglomerate_name, ceo_name, establish_date, address1, address2, homepage";

/// A listing request resolved to the values the SQL binds: the optional
/// `(column, pattern)` filter and the row window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverviewQuery {
    pub condition: Option<(&'static str, String)>,
    pub limit: i64,
    pub offset: i64,
}

impl OverviewQuery {
    pub fn new(filter: &OverviewFilter, page: Page) -> Self {
        Self {
            condition: filter.condition(),
            limit: page.limit(),
            offset: page.offset(),
        }
    }

    /// `SELECT` for one page of the overview listing.
    pub fn page_query(&self) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new(format!("SELECT {OVERVIEW_COLUMNS} FROM company"));
        self.push_filter(&mut qb);
        qb.push(" ORDER BY id LIMIT ")
            .push_bind(self.limit)
            .push(" OFFSET ")
            .push_bind(self.offset);
        qb
    }

    /// `COUNT(*)` over the same filter, independent of the page.
    pub fn count_query(&self) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM company");
        self.push_filter(&mut qb);
        qb
    }

    fn push_filter(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        if let Some((column, pattern)) = &self.condition {
            qb.push(" WHERE ")
                .push(*column)
                .push(" ILIKE ")
                .push_bind(pattern.clone());
        }
    }
}

/// Typeahead lookup: substring match on one column, capped at [`SEARCH_LIMIT`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub column: &'static str,
    pub pattern: String,
    pub limit: i64,
}

impl SearchQuery {
    pub fn new(term: &str, category: SearchCategory) -> Self {
        Self {
            column: category.column(),
            pattern: like_pattern(term),
            limit: SEARCH_LIMIT,
        }
    }

    pub fn query(&self) -> QueryBuilder<'static, Postgres> {
        let column = self.column;
        let mut qb = QueryBuilder::new(format!(
            "SELECT id, {column} AS label FROM company WHERE {column} ILIKE "
        ));
        qb.push_bind(self.pattern.clone())
            .push(format!(" ORDER BY {column} LIMIT "))
            .push_bind(self.limit);
        qb
    }
}

#[async_trait]
impl OverviewStore for PgConnection {
    async fn list_overview(
        &mut self,
        filter: &OverviewFilter,
        page: Page,
    ) -> Result<(Vec<OverviewSummary>, i64), AppError> {
        let query = OverviewQuery::new(filter, page);
        debug!(?query, "Listing overview");

        let mut count = query.count_query();
        let total = count
            .build_query_scalar::<i64>()
            .fetch_one(&mut *self)
            .await?;

        let mut select = query.page_query();
        let rows = select
            .build_query_as::<OverviewSummary>()
            .fetch_all(&mut *self)
            .await?;

        Ok((rows, total))
    }

    async fn search_by_category(
        &mut self,
        term: &str,
        category: SearchCategory,
    ) -> Result<Vec<SearchItem>, AppError> {
        let mut select = SearchQuery::new(term, category).query();
        let items = select
            .build_query_as::<SearchItem>()
            .fetch_all(&mut *self)
            .await?;
        Ok(items)
    }

    async fn find_corp_info(&mut self, corp_code: &str) -> Result<Option<CorpInfo>, AppError> {
        let row = sqlx::query_as::<_, CorpInfo>(
            "SELECT corp_code, corp_name, corp_name_eng, stock_name, stock_code, ceo_nm,
                    corp_cls, jurir_no, bizr_no, adres, hm_url, phn_no, est_dt, acc_mt
             FROM dart_corp_info
             WHERE corp_code = $1",
        )
        .bind(corp_code)
        .fetch_optional(&mut *self)
        .await?;
        Ok(row)
    }

    async fn find_outline(&mut self, crno: &str) -> Result<Option<CorpOutline>, AppError> {
        let row = sqlx::query_as::<_, CorpOutline>(
            "SELECT crno, smenpyn,
                    enpxchglstgdt, enpxchglstgaboldt,
                    enpkosdaqlstgdt, enpkosdaqlstgaboldt,
                    enpkrxlstgdt, enpkrxlstgaboldt,
                    enpempecnt, enppn1avgslryamt, audtrptopnnctt, enpmainbiznm
             FROM openapi_outline
             WHERE crno = $1",
        )
        .bind(crno)
        .fetch_optional(&mut *self)
        .await?;
        Ok(row)
    }

    async fn list_affiliate_names(&mut self, crno: &str) -> Result<Vec<String>, AppError> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT afilcmpynm FROM openapi_affiliate WHERE crno = $1 ORDER BY id",
        )
        .bind(crno)
        .fetch_all(&mut *self)
        .await?;
        Ok(names)
    }

    async fn list_sub_corp_names(&mut self, crno: &str) -> Result<Vec<String>, AppError> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT sbrdenpnm FROM openapi_sub_company WHERE crno = $1 ORDER BY id",
        )
        .bind(crno)
        .fetch_all(&mut *self)
        .await?;
        Ok(names)
    }
}

/// Build the detail view for `corp_code`.
///
/// Fails with [`AppError::NotFound`] when either the DART record or the
/// open-API outline for its registration number is missing.
pub async fn get_detail<S>(store: &mut S, corp_code: &str) -> Result<OverviewDetail, AppError>
where
    S: OverviewStore + ?Sized,
{
    let info = store
        .find_corp_info(corp_code)
        .await?
        .ok_or_else(|| AppError::NotFound("dart data not found".into()))?;

    let outline = store
        .find_outline(&info.jurir_no)
        .await?
        .ok_or_else(|| AppError::NotFound("openapi outline data not found".into()))?;

    let affiliates = store.list_affiliate_names(&info.jurir_no).await?;
    let sub_corps = store.list_sub_corp_names(&info.jurir_no).await?;
    debug!(
        corp_code,
        affiliates = affiliates.len(),
        sub_corps = sub_corps.len(),
        "Composing overview detail"
    );

    Ok(compose_detail(info, outline, affiliates, sub_corps))
}

fn compose_detail(
    info: CorpInfo,
    outline: CorpOutline,
    affiliates: Vec<String>,
    sub_corps: Vec<String>,
) -> OverviewDetail {
    let named = |names: Vec<String>| {
        names
            .into_iter()
            .map(|corp_name| NamedCorp { corp_name })
            .collect()
    };

    OverviewDetail {
        stock_name: info.stock_name,
        stock_code: info.stock_code,
        bizr_no: info.bizr_no,
        jurir_no: info.jurir_no,
        corp_name: info.corp_name,
        corp_name_eng: info.corp_name_eng,
        corp_name_history: None,
        corp_cls: info.corp_cls.as_deref().and_then(corp_class_label),
        est_dt: info.est_dt,
        kospi: Listing {
            list_date: outline.enpxchglstgdt,
            delist_date: outline.enpxchglstgaboldt,
        },
        kosdaq: Listing {
            list_date: outline.enpkosdaqlstgdt,
            delist_date: outline.enpkosdaqlstgaboldt,
        },
        konex: Listing {
            list_date: outline.enpkrxlstgdt,
            delist_date: outline.enpkrxlstgaboldt,
        },
        hm_url: info.hm_url,
        phn_no: info.phn_no,
        adres: info.adres,
        ceo_nm: info.ceo_nm,
        affiliate_list: named(affiliates),
        smenpyn: outline.smenpyn.as_deref().and_then(sme_flag),
        is_venture: None,
        sub_corp_list: named(sub_corps),
        shareholder_num: None,
        enpempecnt: outline.enpempecnt,
        enppn1avgslryamt: outline.enppn1avgslryamt,
        audtrptopnnctt: outline.audtrptopnnctt,
        acc_mt: info.acc_mt,
        issuer_rate: None,
        enpmainbiznm: outline.enpmainbiznm,
        class_list: Vec::new(),
    }
}
