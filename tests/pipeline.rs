//! End-to-end runs over HTTP against a local mock of the host site and the
//! Gemini endpoint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;

use novel_lens::commands::App;
use novel_lens::config::Config;
use novel_lens::orchestrator::{RunOutcome, Ui};
use novel_lens::render::{FixedCredential, RecordingNotifier, RecordingRenderer, UiEvent};
use novel_lens::session::{Session, ViewOutcome};
use novel_lens::sqlite_store;

#[derive(Default)]
struct Mock {
    review_requests: Mutex<Vec<String>>,
    gemini_calls: AtomicUsize,
    gemini_failures: AtomicUsize,
}

fn listing(cards: &[(&str, &str)], payload: Option<Value>) -> String {
    let cards: String = cards
        .iter()
        .map(|(raw, title)| {
            format!(
                r#"<div class="card"><a class="title" href="/en/novel/{raw}/x" data-novel-id="{raw}">{title}</a>
<div class="detail-buttons"><span class="detail-line">500 views</span><span class="detail-line">20 Readers</span></div>
<span class="rating-text">4.10</span><div class="genres"><span class="genre">Drama</span></div>
<div class="description">About {title}.</div></div>"#
            )
        })
        .collect();
    let script = payload
        .map(|p| format!(r#"<script id="__NEXT_DATA__" type="application/json">{}</script>"#, p))
        .unwrap_or_default();
    format!(r#"<html><body><div class="series-list">{}</div>{}</body></html>"#, cards, script)
}

async fn for_you() -> Html<String> {
    let payload = json!({
        "buildId": "b1",
        "props": { "pageProps": { "list": [
            { "raw_id": "r1", "serie_id": 11 },
            { "raw_id": "r2", "serie_id": 22 }
        ]}}
    });
    Html(listing(&[("r1", "Sword God"), ("r2", "Tea House")], Some(payload)))
}

async fn novel_finder() -> Html<String> {
    Html(listing(&[("r5", "River Song")], None))
}

async fn finder_data() -> Json<Value> {
    Json(json!({ "pageProps": { "series": [{ "raw_id": "r5", "id": 55 }] } }))
}

async fn reviews(State(mock): State<Arc<Mock>>, Query(q): Query<HashMap<String, String>>) -> Json<Value> {
    let id = q.get("serie_id").cloned().unwrap_or_default();
    let page = q.get("page").cloned().unwrap_or_default();
    mock.review_requests.lock().unwrap().push(format!("{}:{}", id, page));

    let data = if page == "0" {
        json!([
            { "username": "alice", "rate": 5, "comment": "Loved the world." },
            { "username": "bob", "rate": 2, "comment": "" },
            { "username": "carol", "rate": 4, "comment": "Good cast." }
        ])
    } else {
        json!([])
    };
    Json(json!({ "success": true, "data": data }))
}

fn assessment() -> Value {
    json!({
        "novelSummary": "A story.",
        "reviewSummary": "According to alice, the world is rich.",
        "assessment": "Good",
        "summary": "Worth reading.",
        "characterDevelopment": "Good",
        "plotStructure": "Good",
        "worldBuilding": "Good",
        "themesAndMessages": "Mixed",
        "writingStyle": "Unknown"
    })
}

async fn generate(State(mock): State<Arc<Mock>>, Json(body): Json<Value>) -> (StatusCode, String) {
    mock.gemini_calls.fetch_add(1, Ordering::SeqCst);
    let remaining = mock.gemini_failures.load(Ordering::SeqCst);
    if remaining > 0 {
        mock.gemini_failures.store(remaining - 1, Ordering::SeqCst);
        return (StatusCode::SERVICE_UNAVAILABLE, "overloaded".into());
    }

    let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap_or_default();
    let novels: Vec<Value> = prompt
        .split("Novels List:\n")
        .nth(1)
        .and_then(|l| serde_json::from_str(l.trim()).ok())
        .unwrap_or_default();
    let items: Vec<Value> = novels.iter().map(|_| assessment()).collect();
    let text = Value::Array(items).to_string();
    let response = json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] });
    (StatusCode::OK, response.to_string())
}

struct Env {
    _tmp: TempDir,
    base: String,
    config: Config,
    mock: Arc<Mock>,
}

async fn start() -> Env {
    let mock = Arc::new(Mock::default());
    let app = Router::new()
        .route("/en/for-you", get(for_you))
        .route("/en/novel-finder", get(novel_finder))
        .route("/_next/data/b1/en/novel-finder.json", get(finder_data))
        .route("/api/review/get", get(reviews))
        .route("/v1beta/models/{*action}", post(generate))
        .with_state(mock.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let base = format!("http://{}", addr);

    let tmp = TempDir::new().unwrap();
    let mut config = Config::minimal();
    config.db.path = tmp.path().join("nlens.sqlite");
    config.site.base_url = base.clone();
    config.site.set_supported_routes(vec![format!(
        r"^{}/en/(for-you|novel-finder)",
        regex_escape(&base)
    )]);
    config.gemini.base_url = base.clone();
    config.gemini.initial_backoff_ms = 10;
    config.reviews.page_delay_ms = 0;
    config.batch.item_delay_ms = 0;

    Env {
        _tmp: tmp,
        base,
        config,
        mock,
    }
}

fn regex_escape(s: &str) -> String {
    s.replace('.', r"\.")
}

struct Wired {
    app: App,
    session: Session,
    renderer: Arc<RecordingRenderer>,
    notifier: Arc<RecordingNotifier>,
}

async fn wire(env: &Env, path: &str) -> Wired {
    let store = Arc::new(sqlite_store::open(&env.config).await.unwrap());
    let app = App::with_store(env.config.clone(), store).await;
    app.settings.set_api_key("test-key").await;

    let renderer = Arc::new(RecordingRenderer::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let ui = Ui {
        renderer: renderer.clone(),
        notifier: notifier.clone(),
        credentials: Arc::new(FixedCredential(None)),
    };
    let session = app.session(&format!("{}{}", env.base, path), ui).unwrap();
    Wired {
        app,
        session,
        renderer,
        notifier,
    }
}

#[tokio::test]
async fn test_analyze_caches_and_drains_the_page() {
    let env = start().await;
    let w = wire(&env, "/en/for-you").await;

    assert_eq!(w.session.init_view().await.unwrap(), ViewOutcome::Displayed(0));
    assert_eq!(w.session.analyze().await.unwrap(), RunOutcome::Analyzed(1));
    assert_eq!(w.session.analyze().await.unwrap(), RunOutcome::Analyzed(1));
    assert_eq!(w.session.analyze().await.unwrap(), RunOutcome::NoNewItems);

    assert_eq!(env.mock.gemini_calls.load(Ordering::SeqCst), 2);
    assert!(w.notifier.events().contains(&UiEvent::NoNewItems));
    assert!(w.renderer.active_indicators().is_empty());

    let requests = env.mock.review_requests.lock().unwrap().clone();
    assert!(requests.contains(&"11:0".to_string()));
    assert!(requests.contains(&"22:0".to_string()));

    let cached = w.app.cache().get("11").await.expect("cached");
    assert_eq!(cached.unknown.as_deref(), Some("Mixed"));
    assert_eq!(cached.assessment.available_usernames, vec!["alice", "carol"]);
}

#[tokio::test]
async fn test_cached_results_survive_a_new_session() {
    let env = start().await;
    {
        let w = wire(&env, "/en/for-you").await;
        w.session.init_view().await.unwrap();
        w.app.settings.override_batch_limit(2);
        assert_eq!(w.session.analyze().await.unwrap(), RunOutcome::Analyzed(2));
    }

    let w = wire(&env, "/en/for-you").await;
    assert_eq!(w.session.init_view().await.unwrap(), ViewOutcome::Displayed(2));
    assert_eq!(env.mock.gemini_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_transient_gemini_errors_are_retried() {
    let env = start().await;
    env.mock.gemini_failures.store(2, Ordering::SeqCst);
    let w = wire(&env, "/en/for-you").await;

    w.session.init_view().await.unwrap();
    assert_eq!(w.session.analyze().await.unwrap(), RunOutcome::Analyzed(1));
    assert_eq!(env.mock.gemini_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_exhausted_retries_leave_cache_untouched() {
    let env = start().await;
    env.mock.gemini_failures.store(10, Ordering::SeqCst);
    let w = wire(&env, "/en/for-you").await;

    w.session.init_view().await.unwrap();
    let outcome = w.session.analyze().await.unwrap();
    assert!(matches!(outcome, RunOutcome::Failed(_)), "{:?}", outcome);
    assert_eq!(env.mock.gemini_calls.load(Ordering::SeqCst), 4);
    assert!(w.app.cache().get("11").await.is_none());

    let failed = w
        .renderer
        .events()
        .into_iter()
        .filter(|e| matches!(e, UiEvent::Failed { .. }))
        .count();
    assert_eq!(failed, 1);
}

#[tokio::test]
async fn test_route_change_refreshes_map_from_data_endpoint() {
    let env = start().await;
    let w = wire(&env, "/en/for-you").await;
    w.session.init_view().await.unwrap();

    let next = format!("{}/en/novel-finder", env.base);
    let outcome = w.session.handle_route_change(&next).await.unwrap();
    assert_eq!(outcome, ViewOutcome::Displayed(0));

    let mapper = w.session.orchestrator().mapper();
    assert_eq!(mapper.lookup("r5").as_deref(), Some("55"));
    assert_eq!(mapper.lookup("r1").as_deref(), Some("11"));

    assert_eq!(w.session.analyze().await.unwrap(), RunOutcome::Analyzed(1));
    assert!(w.app.cache().get("55").await.is_some());
}
