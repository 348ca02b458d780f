//! HTTP surface: routing, query-string parsing, response shaping and the
//! mapping from [`AppError`] to status codes.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use hyper::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::db::{Databases, Store};
use crate::errors::AppError;
use crate::export;
use crate::flowmap::{build_flowmap, FlowMapStore};
use crate::industry::IndustryStore;
use crate::metrics;
use crate::overview::{self, Category, OverviewFilter, OverviewStore, Page, SearchCategory};

/// Shared by every request.
pub struct AppState {
    pub dbs: Databases,
}

/// `{length, data}` wrapper used by the list endpoints.
#[derive(Debug, Serialize)]
pub struct ListEnvelope<T> {
    pub length: i64,
    pub data: Vec<T>,
}

impl<T> ListEnvelope<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self {
            length: data.len() as i64,
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Healthz,
    Metrics,
    FlowmapClasses,
    Flowmap,
    Industry,
    SubClasses,
    IndustryInfo,
    IndustryInfoDownload,
    Overview,
    OverviewSearch,
    OverviewDetail(String),
}

impl Route {
    pub fn resolve(path: &str) -> Option<Self> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let route = match segments.as_slice() {
            ["healthz"] => Route::Healthz,
            ["metrics"] => Route::Metrics,
            ["flowmap"] => Route::Flowmap,
            ["flowmap", "industry-classes"] => Route::FlowmapClasses,
            ["industry"] => Route::Industry,
            ["industry", "subclass"] => Route::SubClasses,
            ["industry", "info"] => Route::IndustryInfo,
            ["industry", "info", "download"] => Route::IndustryInfoDownload,
            ["overview"] => Route::Overview,
            ["overview", "search"] => Route::OverviewSearch,
            ["overview", corp_code, "description"] => Route::OverviewDetail(corp_code.to_string()),
            _ => return None,
        };
        Some(route)
    }

    /// Low-cardinality label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Route::Healthz => "/healthz",
            Route::Metrics => "/metrics",
            Route::FlowmapClasses => "/flowmap/industry-classes",
            Route::Flowmap => "/flowmap",
            Route::Industry => "/industry",
            Route::SubClasses => "/industry/subclass",
            Route::IndustryInfo => "/industry/info",
            Route::IndustryInfoDownload => "/industry/info/download",
            Route::Overview => "/overview",
            Route::OverviewSearch => "/overview/search",
            Route::OverviewDetail(_) => "/overview/{corp_code}/description",
        }
    }
}

/// Decode the query string into a map; the last occurrence of a key wins.
pub fn query_params(query: Option<&str>) -> HashMap<String, String> {
    query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

fn int_param(params: &HashMap<String, String>, name: &str, default: i64) -> Result<i64, AppError> {
    match params.get(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Validation(format!("{name} must be an integer (got `{raw}`)"))),
    }
}

/// `category`, `keyword`, `limit`, `page` for the overview listing.
pub fn overview_params(
    params: &HashMap<String, String>,
) -> Result<(OverviewFilter, Page), AppError> {
    let category = params
        .get("category")
        .filter(|c| !c.is_empty())
        .map(|c| Category::parse(c))
        .transpose()?;
    let filter = OverviewFilter {
        category,
        keyword: params.get("keyword").cloned(),
    };
    let page = Page::new(
        int_param(params, "limit", overview::DEFAULT_LIMIT)?,
        int_param(params, "page", 1)?,
    )?;
    Ok((filter, page))
}

/// `term` and `category`, both required, for typeahead search.
pub fn search_params(params: &HashMap<String, String>) -> Result<(String, SearchCategory), AppError> {
    let term = params
        .get("term")
        .ok_or_else(|| AppError::Validation("term is required".into()))?;
    let category = params
        .get("category")
        .ok_or_else(|| AppError::Validation("category is required".into()))?;
    Ok((term.clone(), SearchCategory::parse(category)?))
}

fn json_response<T: Serialize>(value: &T) -> Result<Response<Body>, AppError> {
    let body = serde_json::to_vec(value)?;
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body))?)
}

fn error_response(err: &AppError) -> Response<Body> {
    let body = serde_json::json!({ "detail": err.to_string() }).to_string();
    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = err.status();
    resp.headers_mut()
        .insert(CONTENT_TYPE, hyper::header::HeaderValue::from_static("application/json"));
    resp
}

fn status_only(status: StatusCode) -> Response<Body> {
    let mut resp = Response::new(Body::empty());
    *resp.status_mut() = status;
    resp
}

async fn dispatch(
    state: &AppState,
    route: &Route,
    params: &HashMap<String, String>,
) -> Result<Response<Body>, AppError> {
    match route {
        Route::Healthz => Ok(Response::new(Body::from("OK"))),

        Route::Metrics => Ok(Response::builder()
            .header(CONTENT_TYPE, metrics::content_type())
            .body(Body::from(metrics::gather_metrics()))?),

        Route::FlowmapClasses => {
            let mut conn = state.dbs.acquire(Store::Primary).await?;
            let data = conn.list_flowmap_classes().await?;
            json_response(&ListEnvelope::new(data))
        }

        Route::Flowmap => {
            let mut conn = state.dbs.acquire(Store::Primary).await?;
            let (records, loaded_at) = conn.list_flowmap_records().await?;
            json_response(&build_flowmap(&records, loaded_at))
        }

        Route::Industry => {
            let mut conn = state.dbs.acquire(Store::Secondary).await?;
            let data = conn.list_industry_classes().await?;
            json_response(&ListEnvelope::new(data))
        }

        Route::SubClasses => {
            let mut conn = state.dbs.acquire(Store::Secondary).await?;
            let data = conn.list_sub_classes().await?;
            json_response(&ListEnvelope::new(data))
        }

        Route::IndustryInfo => {
            let mut conn = state.dbs.acquire(Store::Primary).await?;
            let data = conn.list_industry_class_info().await?;
            json_response(&ListEnvelope::new(data))
        }

        Route::IndustryInfoDownload => {
            let rows = {
                let mut conn = state.dbs.acquire(Store::Primary).await?;
                conn.list_industry_class_info().await?
            };
            let bytes = export::industry_info_xlsx(&rows)?;
            Ok(Response::builder()
                .header(CONTENT_TYPE, export::CONTENT_TYPE)
                .header(
                    CONTENT_DISPOSITION,
                    format!("attachment; filename={}", export::FILE_NAME),
                )
                .body(Body::from(bytes))?)
        }

        Route::Overview => {
            let (filter, page) = overview_params(params)?;
            let mut conn = state.dbs.acquire(Store::Secondary).await?;
            let (data, total) = conn.list_overview(&filter, page).await?;
            json_response(&ListEnvelope {
                length: total,
                data,
            })
        }

        Route::OverviewSearch => {
            let (term, category) = search_params(params)?;
            let mut conn = state.dbs.acquire(Store::Secondary).await?;
            let items = conn.search_by_category(&term, category).await?;
            json_response(&items)
        }

        Route::OverviewDetail(corp_code) => {
            let mut conn = state.dbs.acquire(Store::Primary).await?;
            let detail = overview::get_detail(&mut *conn, corp_code).await?;
            json_response(&detail)
        }
    }
}

/// Entry point for every request. Never fails: errors become responses.
pub async fn handle(state: Arc<AppState>, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let (label, resp) = match Route::resolve(&path) {
        None => ("unmatched", status_only(StatusCode::NOT_FOUND)),
        Some(_) if method != Method::GET => ("unmatched", status_only(StatusCode::METHOD_NOT_ALLOWED)),
        Some(route) => {
            let params = query_params(req.uri().query());
            let resp = match dispatch(&state, &route, &params).await {
                Ok(resp) => resp,
                Err(err @ (AppError::NotFound(_) | AppError::Validation(_))) => {
                    warn!(%method, %path, error = %err, "Request rejected");
                    error_response(&err)
                }
                Err(err) => {
                    error!(%method, %path, error = %err, "Request failed");
                    error_response(&err)
                }
            };
            (route.label(), resp)
        }
    };

    let status = resp.status();
    let elapsed = start.elapsed().as_secs_f64();
    metrics::HTTP_REQUESTS
        .with_label_values(&[label, status.as_str()])
        .inc();
    metrics::HTTP_DURATION.with_label_values(&[label]).observe(elapsed);
    info!(%method, %path, status = status.as_u16(), duration_s = elapsed, "Handled request");

    Ok(resp)
}

/// Serve until `shutdown` resolves, then drain in-flight requests.
pub async fn serve<F>(state: Arc<AppState>, addr: SocketAddr, shutdown: F) -> Result<(), AppError>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let make_svc = make_service_fn(move |_conn| {
        let state = state.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                handle(state.clone(), req)
            }))
        }
    });

    info!(%addr, "Starting API server");
    Server::try_bind(&addr)?
        .serve(make_svc)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("API server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, StartupSettings};

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // Pools are lazy and point nowhere; the requests below must be answered
    // before a connection is ever needed.
    fn unreachable_state() -> Arc<AppState> {
        let settings = Settings {
            primary_database_url: "postgres://nobody@127.0.0.1:1/mvc".into(),
            secondary_database_url: "postgres://nobody@127.0.0.1:1/dev".into(),
            server_bind: "127.0.0.1:0".into(),
            flowmap_csv_path: "./source/mvc_map.csv".into(),
            max_connections: 1,
            startup: StartupSettings::default(),
        };
        Arc::new(AppState {
            dbs: Databases::connect_lazy(&settings).unwrap(),
        })
    }

    async fn get(uri: &str) -> (StatusCode, String) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = handle(unreachable_state(), req).await.unwrap();
        let status = resp.status();
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn routes_resolve_from_paths() {
        assert_eq!(Route::resolve("/flowmap"), Some(Route::Flowmap));
        assert_eq!(Route::resolve("/flowmap/industry-classes"), Some(Route::FlowmapClasses));
        assert_eq!(Route::resolve("/industry/"), Some(Route::Industry));
        assert_eq!(Route::resolve("/industry/info/download"), Some(Route::IndustryInfoDownload));
        assert_eq!(Route::resolve("/overview/search"), Some(Route::OverviewSearch));
        assert_eq!(
            Route::resolve("/overview/00126380/description"),
            Some(Route::OverviewDetail("00126380".into()))
        );
        assert_eq!(Route::resolve("/overview/00126380"), None);
        assert_eq!(Route::resolve("/"), None);
    }

    #[test]
    fn overview_params_default_and_validate() {
        let (filter, page) = overview_params(&params(&[])).unwrap();
        assert_eq!(filter, OverviewFilter::default());
        assert_eq!(page, Page::default());

        let (filter, page) = overview_params(&params(&[
            ("category", "jurirNo"),
            ("keyword", "1101"),
            ("limit", "20"),
            ("page", "3"),
        ]))
        .unwrap();
        assert_eq!(filter.category, Some(Category::JurirNo));
        assert_eq!(filter.keyword.as_deref(), Some("1101"));
        assert_eq!(page.offset(), 40);

        for bad in [
            params(&[("category", "corpName")]),
            params(&[("limit", "ten")]),
            params(&[("page", "0")]),
        ] {
            assert!(matches!(overview_params(&bad), Err(AppError::Validation(_))));
        }
    }

    #[test]
    fn search_params_require_term_and_category() {
        let (term, category) = search_params(&params(&[("term", "삼성"), ("category", "firm")])).unwrap();
        assert_eq!(term, "삼성");
        assert_eq!(category, SearchCategory::Firm);

        assert!(search_params(&params(&[("category", "firm")])).is_err());
        assert!(search_params(&params(&[("term", "x")])).is_err());
        assert!(search_params(&params(&[("term", "x"), ("category", "stock_code")])).is_err());
    }

    #[test]
    fn query_string_is_percent_decoded() {
        let decoded = query_params(Some("keyword=%EC%82%BC%EC%84%B1&page=2"));
        assert_eq!(decoded.get("keyword").map(String::as_str), Some("삼성"));
        assert_eq!(decoded.get("page").map(String::as_str), Some("2"));
        assert!(query_params(None).is_empty());
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let (status, _) = get("/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_overview_parameters_are_400() {
        let (status, body) = get("/overview?category=corp_cls&keyword=x").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(json["detail"].as_str().unwrap().contains("category"));

        let (status, _) = get("/overview/search?term=x").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn non_get_is_405() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/industry")
            .body(Body::empty())
            .unwrap();
        let resp = handle(unreachable_state(), req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn health_and_metrics_need_no_database() {
        let (status, body) = get("/healthz").await;
        assert_eq!((status, body.as_str()), (StatusCode::OK, "OK"));

        let (status, body) = get("/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("corp_registry_api_http_requests_total"));
    }

    #[test]
    fn not_found_maps_to_404_body() {
        let resp = error_response(&AppError::NotFound("dart data not found".into()));
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
