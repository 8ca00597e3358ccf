use axum::{
    extract::{Form, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use booksdb::{BookRecord, Catalog, Command, Snapshot, Store};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt::Write as _;
use std::sync::Arc;
use time::macros::format_description;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

const STYLE_CSS: &str = include_str!("../static/style.css");

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_k")]
    pub k: usize,
}
fn default_k() -> usize { 10 }

#[derive(Deserialize)]
pub struct SearchForm {
    #[serde(default)]
    pub search: String,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub score: f32,
    pub book: BookRecord,
}

/// Index page rendered for one snapshot generation.
struct IndexPage {
    generation: u64,
    body: String,
    etag: String,
}

impl IndexPage {
    fn render(snapshot: &Snapshot) -> Self {
        let generated = snapshot
            .built_at()
            .format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second] UTC"))
            .unwrap_or_default();
        let body = page(
            "Book Search",
            &format!(
                concat!(
                    "<form method=\"post\" action=\"/search\">",
                    "<input type=\"search\" name=\"search\" placeholder=\"Search {} books by title\" autofocus>",
                    "<button type=\"submit\">Search</button></form>",
                    "<footer>Index generated {}</footer>"
                ),
                snapshot.len(),
                generated
            ),
        );
        let etag = format!("\"{:x}\"", Sha1::digest(body.as_bytes()));
        Self { generation: snapshot.generation(), body, etag }
    }
}

#[derive(Clone)]
pub struct AppState {
    store: Arc<Store>,
    catalog: Arc<dyn Catalog>,
    admin_token: Option<String>,
    index_page: Arc<Mutex<Option<Arc<IndexPage>>>>,
}

impl AppState {
    pub fn new(store: Arc<Store>, catalog: Arc<dyn Catalog>, admin_token: Option<String>) -> Self {
        Self { store, catalog, admin_token, index_page: Arc::new(Mutex::new(None)) }
    }

    fn index_page(&self) -> Arc<IndexPage> {
        let snapshot = self.store.get();
        let mut cached = self.index_page.lock();
        if let Some(page) = cached.as_ref().filter(|p| p.generation == snapshot.generation()) {
            return Arc::clone(page);
        }
        let page = Arc::new(IndexPage::render(&snapshot));
        *cached = Some(Arc::clone(&page));
        page
    }
}

pub fn build_app(state: AppState, cors_origins: &[String]) -> Router {
    let origins: Vec<_> = cors_origins.iter().filter_map(|s| s.parse().ok()).collect();
    let cors = if origins.is_empty() {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
    };

    Router::new()
        .route("/", get(index_handler))
        .route("/search", post(search_form_handler))
        .route("/static/*path", get(static_handler))
        .route("/health", get(|| async { "ok" }))
        .route("/api/search", get(search_api_handler))
        .route("/admin/refresh", post(refresh_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn index_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let page = state.index_page();
    let cache_headers = [
        (header::ETAG, page.etag.clone()),
        (header::CACHE_CONTROL, "public, max-age=3600".to_string()),
    ];
    let matches = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == page.etag);
    if matches {
        return (StatusCode::NOT_MODIFIED, cache_headers).into_response();
    }
    (cache_headers, Html(page.body.clone())).into_response()
}

async fn search_form_handler(State(state): State<AppState>, Form(form): Form<SearchForm>) -> Html<String> {
    let args: Vec<&str> = form.search.split_whitespace().collect();
    let snapshot = state.store.get();
    let results = Command::Title.run(&snapshot, &args);
    tracing::debug!(query = %form.search, hits = results.len(), "search completed");

    let mut body = format!(
        "<p><a href=\"/\">New search</a></p><h2>{} results for &ldquo;{}&rdquo;</h2><ol class=\"results\">",
        results.len(),
        escape_html(&form.search)
    );
    for book in results {
        let _ = write!(body, "<li><span class=\"title\">{}</span>", escape_html(&book.title));
        if !book.authors.is_empty() {
            let _ = write!(body, " <span class=\"authors\">{}</span>", escape_html(&book.authors.join(", ")));
        }
        if let Some(series) = &book.series {
            let _ = write!(body, " <span class=\"series\">{}</span>", escape_html(series));
        }
        body.push_str("</li>");
    }
    body.push_str("</ol>");
    Html(page("Search results", &body))
}

async fn static_handler(Path(path): Path<String>) -> Response {
    match path.as_str() {
        "style.css" => ([(header::CONTENT_TYPE, "text/css; charset=utf-8")], STYLE_CSS).into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn search_api_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Json<SearchResponse> {
    let start = std::time::Instant::now();
    let args: Vec<&str> = params.q.split_whitespace().collect();
    let snapshot = state.store.get();
    let scored = Command::Title.run_scored(&snapshot, &args);
    let total_hits = scored.len();
    let k = params.k.clamp(1, 100);
    let results = scored
        .into_iter()
        .take(k)
        .map(|(score, book)| SearchHit { score, book: book.clone() })
        .collect();
    let elapsed = start.elapsed();
    Json(SearchResponse { query: params.q, took_s: elapsed.as_secs_f64(), total_hits, results })
}

async fn refresh_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    authorize(&state, &headers)?;
    let store = Arc::clone(&state.store);
    let catalog = Arc::clone(&state.catalog);
    let refreshed = tokio::task::spawn_blocking(move || store.refresh(catalog.as_ref()))
        .await
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    match refreshed {
        Ok(snapshot) => Ok(Json(serde_json::json!({
            "generation": snapshot.generation(),
            "num_books": snapshot.len(),
        }))),
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "manual refresh failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")))
        }
    }
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, String)> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err((StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set".into())),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}

fn page(title: &str, content: &str) -> String {
    format!(
        concat!(
            "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\">",
            "<title>{title}</title><link rel=\"stylesheet\" href=\"/static/style.css\"></head>",
            "<body><h1>{title}</h1>{content}</body></html>"
        ),
        title = escape_html(title),
        content = content
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
