use axum::http::StatusCode;
use hubmatrix::api::{self, AppState};
use hubmatrix::auth::{AdminTokens, Role};
use hubmatrix::db::init_db;
use hubmatrix::domain::{Member, MemberId, Slot};
use hubmatrix::engine::{
    ActiveCountPropagator, CommissionEngine, CommissionSchedule, PositionAllocator,
};
use hubmatrix::notify::{MockNotifier, Notifier};
use hubmatrix::orchestration::{
    MonthlyCycleProcessor, PaymentProcessor, PayoutOrchestrator, PayoutPolicy,
};
use hubmatrix::rail::MockPaymentRail;
use hubmatrix::Repository;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

const OP_TOKEN: &str = "op-token";
const TREASURY_TOKEN: &str = "money-token";
const ROOT_TOKEN: &str = "root-token";

fn admin_tokens() -> AdminTokens {
    let mut tokens = HashMap::new();
    tokens.insert(OP_TOKEN.to_string(), Role::Operator);
    tokens.insert(TREASURY_TOKEN.to_string(), Role::Treasury);
    tokens.insert(ROOT_TOKEN.to_string(), Role::Admin);
    AdminTokens::new(tokens)
}

struct TestApp {
    app: axum::Router,
    repo: Arc<Repository>,
    _temp: TempDir,
}

async fn setup_test_app(tokens: AdminTokens) -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));

    let engine = CommissionEngine::default();
    let propagator = ActiveCountPropagator::new(repo.clone(), CommissionSchedule::default());
    let notifier: Arc<dyn Notifier> = Arc::new(MockNotifier::new());
    let payments = PaymentProcessor::new(
        repo.clone(),
        engine.clone(),
        propagator.clone(),
        notifier.clone(),
    );
    let payouts = PayoutOrchestrator::new(
        repo.clone(),
        Arc::new(MockPaymentRail::new()),
        notifier,
        PayoutPolicy::default(),
    );
    let cycle = MonthlyCycleProcessor::new(repo.clone(), engine, 3);
    let state = AppState::new(
        repo.clone(),
        PositionAllocator::new(repo.clone()),
        propagator,
        payments,
        payouts,
        cycle,
        tokens,
    );

    TestApp {
        app: api::create_router(state),
        repo,
        _temp: temp_dir,
    }
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let req = axum::http::Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post(
    app: axum::Router,
    uri: &str,
    token: Option<&str>,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let mut builder = axum::http::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    let req = builder
        .body(axum::body::Body::from(body.to_string()))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn signup(app: axum::Router, member: &str, referrer: Option<&str>) {
    let mut body = serde_json::json!({ "memberId": member });
    if let Some(referrer) = referrer {
        body["referrerId"] = serde_json::json!(referrer);
    }
    let (status, _) = post(app, "/v1/members", None, body).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_allocate_places_an_imported_member() {
    let t = setup_test_app(admin_tokens()).await;
    // a member row created outside the signup flow, with no slot yet
    let member = Member::new(MemberId::new("m1".to_string()), None);
    t.repo.insert_member(&member).await.unwrap();

    let body = serde_json::json!({ "memberId": "m1" });
    let (status, resp) = post(
        t.app.clone(),
        "/v1/admin/allocate",
        Some(ROOT_TOKEN),
        body.clone(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["slot"]["level"], 1);
    assert_eq!(resp["slot"]["index"], 1);
    assert_eq!(resp["newlyPlaced"], true);

    // replays return the existing slot
    let (status, resp) = post(t.app.clone(), "/v1/admin/allocate", Some(ROOT_TOKEN), body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["slot"]["index"], 1);
    assert_eq!(resp["newlyPlaced"], false);

    let (_, member) = get(t.app, "/v1/members/m1").await;
    assert_eq!(member["slot"]["level"], 1);
}

#[tokio::test]
async fn test_allocate_unknown_member_not_found() {
    let t = setup_test_app(admin_tokens()).await;

    let (status, _) = post(
        t.app,
        "/v1/admin/allocate",
        Some(ROOT_TOKEN),
        serde_json::json!({ "memberId": "ghost" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_allocate_requires_operator_capability() {
    let t = setup_test_app(admin_tokens()).await;
    let body = serde_json::json!({ "memberId": "m1" });

    let (status, _) = post(t.app.clone(), "/v1/admin/allocate", None, body.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = post(
        t.app.clone(),
        "/v1/admin/allocate",
        Some("bogus"),
        body.clone(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, resp) = post(t.app, "/v1/admin/allocate", Some(TREASURY_TOKEN), body).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(resp["error"].as_str().unwrap().contains("treasury"));
}

#[tokio::test]
async fn test_recompute_heals_counter_drift() {
    let t = setup_test_app(admin_tokens()).await;
    signup(t.app.clone(), "alice", None).await;
    signup(t.app.clone(), "bob", Some("alice")).await;
    post(
        t.app.clone(),
        "/v1/events/subscription",
        None,
        serde_json::json!({ "eventId": "sub_1", "memberId": "bob", "active": true }),
    )
    .await;

    // corrupt alice's counter the way a crash mid-propagation would
    t.repo
        .adjust_active_descendants(Slot::new(1, 1), 5)
        .await
        .unwrap();
    let (_, member) = get(t.app.clone(), "/v1/members/alice").await;
    assert_eq!(member["activeDescendants"], 6);

    let (status, resp) = post(
        t.app.clone(),
        "/v1/admin/recompute-rates",
        Some(OP_TOKEN),
        serde_json::json!({ "memberId": "alice" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["activeDescendants"], 1);
    assert_eq!(resp["corrected"], true);
    assert_eq!(resp["structureNo"], 1);

    let (_, member) = get(t.app, "/v1/members/alice").await;
    assert_eq!(member["activeDescendants"], 1);
}

#[tokio::test]
async fn test_recompute_without_drift_reports_clean() {
    let t = setup_test_app(admin_tokens()).await;
    signup(t.app.clone(), "alice", None).await;

    let (status, resp) = post(
        t.app,
        "/v1/admin/recompute-rates",
        Some(OP_TOKEN),
        serde_json::json!({ "memberId": "alice" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["activeDescendants"], 0);
    assert_eq!(resp["corrected"], false);
    assert_eq!(resp["commissionRate"], "0.1");
}

#[tokio::test]
async fn test_manual_payout_creates_pending_entry() {
    let t = setup_test_app(admin_tokens()).await;
    signup(t.app.clone(), "m", None).await;

    let (status, resp) = post(
        t.app.clone(),
        "/v1/admin/manual-payout",
        Some(TREASURY_TOKEN),
        serde_json::json!({ "memberId": "m", "amount": 75.5, "note": "support adjustment" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(resp["memberId"], "m");
    assert_eq!(resp["amount"], "75.5");
    assert_eq!(resp["status"], "pending");
    assert!(resp["entryId"].is_string());

    let (_, commissions) = get(t.app, "/v1/members/m/commissions").await;
    assert_eq!(commissions["entryCount"], 1);
    let entry = &commissions["entries"][0];
    assert_eq!(entry["kind"], "manual");
    assert!(entry["sourceEventId"].as_str().unwrap().starts_with("manual:"));
}

#[tokio::test]
async fn test_manual_payout_validation() {
    let t = setup_test_app(admin_tokens()).await;
    signup(t.app.clone(), "m", None).await;

    let (status, _) = post(
        t.app.clone(),
        "/v1/admin/manual-payout",
        Some(OP_TOKEN),
        serde_json::json!({ "memberId": "m", "amount": 10, "note": "n" }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = post(
        t.app.clone(),
        "/v1/admin/manual-payout",
        Some(TREASURY_TOKEN),
        serde_json::json!({ "memberId": "m", "amount": 0, "note": "n" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(
        t.app,
        "/v1/admin/manual-payout",
        Some(TREASURY_TOKEN),
        serde_json::json!({ "memberId": "ghost", "amount": 10, "note": "n" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_routes_fail_closed_without_token_table() {
    let t = setup_test_app(AdminTokens::default()).await;
    signup(t.app.clone(), "m", None).await;

    let (status, _) = post(
        t.app,
        "/v1/admin/allocate",
        Some("any-token"),
        serde_json::json!({ "memberId": "m" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
