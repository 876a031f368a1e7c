use core::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::{
    collect::{self, CollectConfig},
    db::{DBError, Gateway},
    scheduler::{Scheduler, Status},
    scrape::Launch,
};

pub const PAGE_SIZE: NonZeroU32 = NonZeroU32::new(5).unwrap();

const CONTROL_PANEL: &str = r#"<!doctype html>
<html lang="en">
<head><meta charset="utf-8"><title>Scroll scraper</title></head>
<body>
    <h1>Scroll scraper</h1>
    <p><a href="/start-scrape">Start scraping</a> runs one collection in the background.</p>
    <p><a href="/stop-scrape">Stop scraping</a> asks the active run to finish early.</p>
    <p><a href="/status">Status</a> of the current and last run.</p>
    <p>Stored data: <a href="/records">/records</a> and <a href="/places">/places</a>,
       paged with <code>?page=N</code> (e.g. <a href="/records?page=2">/records?page=2</a>).</p>
</body>
</html>
"#;

pub struct AppState<L> {
    pub gateway: Gateway,
    pub scheduler: Arc<Scheduler>,
    pub launcher: Arc<L>,
    pub config: Arc<CollectConfig>,
    pub page_size: NonZeroU32,
}

impl<L> Clone for AppState<L> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            scheduler: Arc::clone(&self.scheduler),
            launcher: Arc::clone(&self.launcher),
            config: Arc::clone(&self.config),
            page_size: self.page_size,
        }
    }
}

pub fn router<L: Launch>(state: AppState<L>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/records", get(records::<L>))
        .route("/places", get(places::<L>))
        .route("/start-scrape", get(start_scrape::<L>))
        .route("/stop-scrape", get(stop_scrape::<L>))
        .route("/status", get(status::<L>))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Requested page from the raw query pairs: the first `page` value, 1 when
/// absent, unparsable or below 1.
fn page_number(params: &[(String, String)]) -> u64 {
    params
        .iter()
        .find(|(key, _)| key == "page")
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
        .filter(|&p| p >= 1)
        .unwrap_or(1)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: u64,
    pub total_pages: u64,
    pub total_items: u64,
    pub items_per_page: u32,
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

struct ApiError {
    what: &'static str,
    source: DBError,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(target: "server", "{}: {}", self.what, self.source);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": format!("Failed to {}", self.what) })),
        )
            .into_response()
    }
}

async fn index() -> Html<&'static str> {
    Html(CONTROL_PANEL)
}

fn paginate<T>(data: Vec<T>, page: u64, total_items: u64, page_size: NonZeroU32) -> Page<T> {
    let per_page = u64::from(page_size.get());
    Page {
        data,
        pagination: Pagination {
            current_page: page,
            total_pages: total_items.div_ceil(per_page),
            total_items,
            items_per_page: page_size.get(),
        },
    }
}

fn offset(page: u64, page_size: NonZeroU32) -> u64 {
    (page - 1).saturating_mul(u64::from(page_size.get()))
}

async fn records<L: Launch>(
    State(state): State<AppState<L>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Page<crate::record::Record>>, ApiError> {
    let page = page_number(&params);
    let total = state.gateway.count().await.map_err(|source| ApiError {
        what: "count records",
        source,
    })?;
    let data = state
        .gateway
        .fetch_page(state.page_size, offset(page, state.page_size))
        .await
        .map_err(|source| ApiError {
            what: "fetch records",
            source,
        })?;
    Ok(Json(paginate(data, page, total, state.page_size)))
}

async fn places<L: Launch>(
    State(state): State<AppState<L>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Page<crate::record::Place>>, ApiError> {
    let page = page_number(&params);
    let total = state.gateway.count_places().await.map_err(|source| ApiError {
        what: "count places",
        source,
    })?;
    let data = state
        .gateway
        .fetch_places_page(state.page_size, offset(page, state.page_size))
        .await
        .map_err(|source| ApiError {
            what: "fetch places",
            source,
        })?;
    Ok(Json(paginate(data, page, total, state.page_size)))
}

async fn start_scrape<L: Launch>(State(state): State<AppState<L>>) -> (StatusCode, &'static str) {
    let Some(token) = state.scheduler.claim() else {
        tracing::warn!(target: "server", "start requested while a run is active");
        return (StatusCode::CONFLICT, "A scrape is already running.\n");
    };

    let AppState {
        gateway,
        launcher,
        config,
        ..
    } = state;
    tokio::spawn(async move {
        let result = collect::harvest(&*launcher, &gateway, &config, token.cancel()).await;
        token.finish(&result);
    });

    tracing::info!(target: "server", "scrape started");
    (
        StatusCode::ACCEPTED,
        "Scraping started in the background. Check the console or /status for progress.\n",
    )
}

async fn stop_scrape<L: Launch>(State(state): State<AppState<L>>) -> (StatusCode, &'static str) {
    if state.scheduler.cancel() {
        tracing::info!(target: "server", "stop requested");
        (StatusCode::ACCEPTED, "Stopping the active scrape.\n")
    } else {
        (StatusCode::CONFLICT, "No scrape is running.\n")
    }
}

async fn status<L: Launch>(State(state): State<AppState<L>>) -> Json<Status> {
    Json(state.scheduler.status())
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use axum::{body::Body, http::Request};
    use serde_json::Value;
    use tower_service::Service;

    use super::*;
    use crate::{
        record::{Candidate, PlaceCandidate},
        testing::{FakeLauncher, FakeSession, post},
    };

    fn state(launcher: FakeLauncher) -> AppState<FakeLauncher> {
        AppState {
            gateway: Gateway::in_memory().unwrap(),
            scheduler: Scheduler::new(),
            launcher: Arc::new(launcher),
            config: Arc::new(CollectConfig {
                scroll_duration_ms: 0,
                scroll_delay_ms: 5,
                max_scrolls: 0,
                ..CollectConfig::default()
            }),
            page_size: PAGE_SIZE,
        }
    }

    fn endless() -> FakeLauncher {
        FakeLauncher::new(|| FakeSession::new(vec![vec![Ok(post("t3_a", "A"))]]))
    }

    async fn get(app: &mut Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.call(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    async fn get_json(app: &mut Router, uri: &str) -> Value {
        let (status, body) = get(app, uri).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn records_are_paged() {
        let state = state(endless());
        for i in 0..12 {
            state
                .gateway
                .insert(&Candidate {
                    external_id: format!("t3_{i:02}").into(),
                    title: format!("post {i}"),
                    score: i,
                    comment_count: 0,
                    link: None,
                })
                .await
                .unwrap();
        }
        let mut app = router(state);

        let first = get_json(&mut app, "/records").await;
        assert_eq!(first["data"].as_array().unwrap().len(), 5);
        assert_eq!(
            first["pagination"],
            serde_json::json!({ "currentPage": 1, "totalPages": 3, "totalItems": 12, "itemsPerPage": 5 })
        );
        assert_eq!(first["data"][0]["external_id"], "t3_11");
        assert!(first["data"][0]["scraped_at"].as_str().unwrap().ends_with("GMT"));

        let last = get_json(&mut app, "/records?page=3").await;
        assert_eq!(last["data"].as_array().unwrap().len(), 2);
        assert_eq!(last["pagination"]["currentPage"], 3);

        let beyond = get_json(&mut app, "/records?page=4").await;
        assert!(beyond["data"].as_array().unwrap().is_empty());
        assert_eq!(beyond["pagination"]["currentPage"], 4);
        assert_eq!(beyond["pagination"]["totalPages"], 3);

        for odd in [
            "/records?page=abc",
            "/records?page=0",
            "/records?page=-2",
            "/records?page=",
            "/records?page=1&page=2",
        ] {
            let page = get_json(&mut app, odd).await;
            assert_eq!(page["pagination"]["currentPage"], 1, "{odd}");
            assert_eq!(page["data"], first["data"], "{odd}");
        }
    }

    #[tokio::test]
    async fn empty_store_has_no_pages() {
        let mut app = router(state(endless()));
        let page = get_json(&mut app, "/records").await;
        assert_eq!(page["data"], serde_json::json!([]));
        assert_eq!(page["pagination"]["totalPages"], 0);
        assert_eq!(page["pagination"]["totalItems"], 0);
    }

    #[tokio::test]
    async fn places_are_paged() {
        let state = state(endless());
        state
            .gateway
            .insert_place(&PlaceCandidate {
                search_term: "Colosseum Rome".to_owned(),
                name: Some("Colosseum".to_owned()),
                ..PlaceCandidate::default()
            })
            .await
            .unwrap();
        let mut app = router(state);

        let page = get_json(&mut app, "/places?page=1").await;
        assert_eq!(page["data"][0]["name"], "Colosseum");
        assert_eq!(page["data"][0]["search_term"], "Colosseum Rome");
        assert_eq!(page["pagination"]["totalItems"], 1);
    }

    #[tokio::test]
    async fn only_one_scrape_at_a_time() {
        let state = state(endless());
        let scheduler = Arc::clone(&state.scheduler);
        let gateway = state.gateway.clone();
        let mut app = router(state);

        let (code, _) = get(&mut app, "/start-scrape").await;
        assert_eq!(code, StatusCode::ACCEPTED);
        let (code, body) = get(&mut app, "/start-scrape").await;
        assert_eq!(code, StatusCode::CONFLICT);
        assert!(String::from_utf8(body).unwrap().contains("already running"));
        assert_eq!(get_json(&mut app, "/status").await["running"], true);

        tokio::time::timeout(Duration::from_secs(5), async {
            while gateway.count().await.unwrap() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        let (code, _) = get(&mut app, "/stop-scrape").await;
        assert_eq!(code, StatusCode::ACCEPTED);
        tokio::time::timeout(Duration::from_secs(5), scheduler.idle())
            .await
            .unwrap();

        let (code, _) = get(&mut app, "/stop-scrape").await;
        assert_eq!(code, StatusCode::CONFLICT);

        let status = get_json(&mut app, "/status").await;
        assert_eq!(status["running"], false);
        assert_eq!(status["lastRun"]["status"], "completed");
        assert_eq!(status["lastRun"]["report"]["cancelled"], true);
        assert_eq!(gateway.count().await.unwrap(), 1);

        let (code, _) = get(&mut app, "/start-scrape").await;
        assert_eq!(code, StatusCode::ACCEPTED);
        scheduler.cancel();
        tokio::time::timeout(Duration::from_secs(5), scheduler.idle())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_launch_is_reported_in_status() {
        let state = state(FakeLauncher::broken());
        let scheduler = Arc::clone(&state.scheduler);
        let mut app = router(state);

        let (code, _) = get(&mut app, "/start-scrape").await;
        assert_eq!(code, StatusCode::ACCEPTED);
        tokio::time::timeout(Duration::from_secs(5), scheduler.idle())
            .await
            .unwrap();

        let status = get_json(&mut app, "/status").await;
        assert_eq!(status["lastRun"]["status"], "failed");
        assert!(status["lastRun"]["error"].as_str().unwrap().contains("chrome binary not found"));
    }

    #[tokio::test]
    async fn control_panel_links_the_surface() {
        let mut app = router(state(endless()));
        let (code, body) = get(&mut app, "/").await;
        assert_eq!(code, StatusCode::OK);
        let html = String::from_utf8(body).unwrap();
        for link in ["/start-scrape", "/stop-scrape", "/records", "/status"] {
            assert!(html.contains(link), "{link}");
        }
    }

    #[test]
    fn first_page_value_wins() {
        let pairs = |raw: &[(&str, &str)]| -> Vec<(String, String)> {
            raw.iter().map(|&(k, v)| (k.to_owned(), v.to_owned())).collect()
        };
        assert_eq!(page_number(&pairs(&[("page", "2"), ("page", "1")])), 2);
        assert_eq!(page_number(&pairs(&[("sort", "new"), ("page", " 3 ")])), 3);
        assert_eq!(page_number(&pairs(&[("page", "x"), ("page", "3")])), 1);
        assert_eq!(page_number(&[]), 1);
    }
}
