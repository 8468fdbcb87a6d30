
use futures_util::future::join_all;
use score_server::create_routes;
use score_types::{
    LeaderboardTiers, MonthlyPointsResponse, RankResponse, RankingWindow, ScoreReceipt,
    UserScoreState, WindowedScoreResponse,
};
use serde_json::json;
use std::time::Duration;
use test_helpers::*;
use tokio::time::timeout;
use warp::http::StatusCode;
use warp::test::{request, ws};

async fn add_score<F>(routes: &F, auth: &str, delta: i64) -> ScoreReceipt
where
    F: warp::Filter + 'static,
    F::Extract: warp::Reply + Send,
{
    let response = request()
        .method("POST")
        .path("/score")
        .header("authorization", auth)
        .json(&json!({ "delta": delta }))
        .reply(routes)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    serde_json::from_slice(response.body()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let setup = TestServerSetup::new();

    let response = request().path("/health").reply(&setup.routes()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), "OK");
}

#[tokio::test]
async fn test_register_user() {
    let setup = TestServerSetup::new();
    let routes = setup.routes();
    let (user_id, auth) = create_test_user("Fern");

    let response = request()
        .method("POST")
        .path("/users")
        .header("authorization", &auth)
        .json(&json!({ "nickname": "Fern" }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let state: UserScoreState = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(state.user_id, user_id);
    assert_eq!(state.nickname, "Fern");
    assert_eq!(state.current_score, 0);

    let again = request()
        .method("POST")
        .path("/users")
        .header("authorization", &auth)
        .json(&json!({ "nickname": "Fern" }))
        .reply(&routes)
        .await;
    assert_eq!(again.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_anonymous_writes_rejected() {
    let setup = TestServerSetup::new();
    let routes = setup.routes();

    let no_header = request()
        .method("POST")
        .path("/score")
        .json(&json!({ "delta": 5 }))
        .reply(&routes)
        .await;
    assert_eq!(no_header.status(), StatusCode::UNAUTHORIZED);

    let bad_token = request()
        .method("POST")
        .path("/score")
        .header("authorization", "Bearer not-a-user")
        .json(&json!({ "delta": 5 }))
        .reply(&routes)
        .await;
    assert_eq!(bad_token.status(), StatusCode::UNAUTHORIZED);

    let monthly = request()
        .method("POST")
        .path("/monthly-points")
        .json(&json!({ "points": 5 }))
        .reply(&routes)
        .await;
    assert_eq!(monthly.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_add_score_and_windowed_reads() {
    let setup = TestServerSetup::new();
    let routes = setup.routes();
    let (user_id, auth) = create_test_user("Moss");

    let receipt = add_score(&routes, &auth, 5).await;
    assert_eq!(receipt.new_score, 5);

    let daily = request()
        .path(&format!("/users/{}/score?window=daily", user_id))
        .reply(&routes)
        .await;
    assert_eq!(daily.status(), StatusCode::OK);
    let daily: WindowedScoreResponse = serde_json::from_slice(daily.body()).unwrap();
    assert_eq!(daily.window, RankingWindow::Daily);
    assert_eq!(daily.score, 5);
    assert!(!daily.stale);

    setup.clock.advance(Duration::from_secs(25 * 60 * 60));

    let daily = request()
        .path(&format!("/users/{}/score?window=daily", user_id))
        .reply(&routes)
        .await;
    let daily: WindowedScoreResponse = serde_json::from_slice(daily.body()).unwrap();
    assert_eq!(daily.score, 0);

    let now = request()
        .path(&format!("/users/{}/score", user_id))
        .reply(&routes)
        .await;
    let now: WindowedScoreResponse = serde_json::from_slice(now.body()).unwrap();
    assert_eq!(now.window, RankingWindow::Now);
    assert_eq!(now.score, 5);
}

#[tokio::test]
async fn test_overflowing_delta_rejected() {
    let setup = TestServerSetup::new();
    let routes = setup.routes();
    let (user_id, auth) = create_test_user("Cedar");
    add_score(&routes, &auth, i64::MAX).await;

    let response = request()
        .method("POST")
        .path("/score")
        .header("authorization", &auth)
        .json(&json!({ "delta": 1 }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let now = request()
        .path(&format!("/users/{}/score", user_id))
        .reply(&routes)
        .await;
    let now: WindowedScoreResponse = serde_json::from_slice(now.body()).unwrap();
    assert_eq!(now.score, i64::MAX);
}

#[tokio::test]
async fn test_bad_input_rejected() {
    let setup = TestServerSetup::new();
    let routes = setup.routes();
    let (user_id, _) = create_test_user("Reed");

    let bad_window = request()
        .path(&format!("/users/{}/score?window=yearly", user_id))
        .reply(&routes)
        .await;
    assert_eq!(bad_window.status(), StatusCode::BAD_REQUEST);

    let bad_id = request().path("/users/nope/score").reply(&routes).await;
    assert_eq!(bad_id.status(), StatusCode::BAD_REQUEST);

    let bad_period = request()
        .path(&format!("/users/{}/monthly-points/2024-13", user_id))
        .reply(&routes)
        .await;
    assert_eq!(bad_period.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_outage_serves_stale_score() {
    let setup = TestServerSetup::new();
    let routes = setup.routes();
    let (user_id, auth) = create_test_user("Alder");
    add_score(&routes, &auth, 9).await;

    setup.store.set_unavailable(true);

    let response = request()
        .path(&format!("/users/{}/score", user_id))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: WindowedScoreResponse = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body.score, 9);
    assert!(body.stale);

    let write = request()
        .method("POST")
        .path("/score")
        .header("authorization", &auth)
        .json(&json!({ "delta": 1 }))
        .reply(&routes)
        .await;
    assert_eq!(write.status(), StatusCode::SERVICE_UNAVAILABLE);

    let board = request().path("/leaderboard").reply(&routes).await;
    assert_eq!(board.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_leaderboard_tiers_and_rank() {
    let setup = TestServerSetup::new();
    let routes = setup.routes();

    let mut users = Vec::new();
    for (name, score) in [("A", 10), ("B", 50), ("C", 30), ("D", 20), ("E", 40), ("F", 0)] {
        let (user_id, auth) = create_test_user(name);
        let response = request()
            .method("POST")
            .path("/users")
            .header("authorization", &auth)
            .json(&json!({ "nickname": name }))
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        if score != 0 {
            add_score(&routes, &auth, score).await;
        }
        users.push(user_id);
    }

    let response = request().path("/leaderboard?window=weekly").reply(&routes).await;
    assert_eq!(response.status(), StatusCode::OK);
    let tiers: LeaderboardTiers = serde_json::from_slice(response.body()).unwrap();
    let top: Vec<_> = tiers.top.iter().map(|e| e.nickname.as_str()).collect();
    let rest: Vec<_> = tiers.rest.iter().map(|e| e.nickname.as_str()).collect();
    assert_eq!(top, vec!["B", "E", "C"]);
    assert_eq!(rest, vec!["D", "A"]);

    let response = request().path("/leaderboard?top=1").reply(&routes).await;
    let tiers: LeaderboardTiers = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(tiers.window, RankingWindow::Now);
    assert_eq!(tiers.top.len(), 1);
    assert_eq!(tiers.rest.len(), 4);

    let rank = request()
        .path(&format!("/users/{}/rank?window=monthly", users[2]))
        .reply(&routes)
        .await;
    let rank: RankResponse = serde_json::from_slice(rank.body()).unwrap();
    assert_eq!(rank.rank, Some(3));

    // Zero scores never appear on the board
    let rank = request()
        .path(&format!("/users/{}/rank", users[5]))
        .reply(&routes)
        .await;
    let rank: RankResponse = serde_json::from_slice(rank.body()).unwrap();
    assert_eq!(rank.rank, None);
}

#[tokio::test]
async fn test_admin_score_overwrite() {
    let setup = TestServerSetup::new();
    let routes = setup.routes();
    let (user_id, auth) = create_test_user("Birch");
    add_score(&routes, &auth, 3).await;

    let forbidden = request()
        .method("PUT")
        .path(&format!("/users/{}/score", user_id))
        .json(&json!({ "score": 100 }))
        .reply(&routes)
        .await;
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let wrong_token = request()
        .method("PUT")
        .path(&format!("/users/{}/score", user_id))
        .header("x-admin-token", "guess")
        .json(&json!({ "score": 100 }))
        .reply(&routes)
        .await;
    assert_eq!(wrong_token.status(), StatusCode::FORBIDDEN);

    let allowed = request()
        .method("PUT")
        .path(&format!("/users/{}/score", user_id))
        .header("x-admin-token", ADMIN_TOKEN)
        .json(&json!({ "score": 100 }))
        .reply(&routes)
        .await;
    assert_eq!(allowed.status(), StatusCode::NO_CONTENT);

    let now = request()
        .path(&format!("/users/{}/score", user_id))
        .reply(&routes)
        .await;
    let now: WindowedScoreResponse = serde_json::from_slice(now.body()).unwrap();
    assert_eq!(now.score, 100);

    // The overwrite is not an event, so windows still see only the +3
    let daily = request()
        .path(&format!("/users/{}/score?window=daily", user_id))
        .reply(&routes)
        .await;
    let daily: WindowedScoreResponse = serde_json::from_slice(daily.body()).unwrap();
    assert_eq!(daily.score, 3);
}

#[tokio::test]
async fn test_monthly_points() {
    let setup = TestServerSetup::new();
    let routes = setup.routes();
    let (user_id, auth) = create_test_user("Aspen");

    let response = request()
        .method("POST")
        .path("/monthly-points")
        .header("authorization", &auth)
        .json(&json!({ "period": "2024-06", "points": 12 }))
        .reply(&routes)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: MonthlyPointsResponse = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body.period, "2024-06");
    assert_eq!(body.points, 12);

    // No period means the clock's current month (2023-11)
    let response = request()
        .method("POST")
        .path("/monthly-points")
        .header("authorization", &auth)
        .json(&json!({ "points": 4 }))
        .reply(&routes)
        .await;
    let body: MonthlyPointsResponse = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body.period, "2023-11");
    assert_eq!(body.points, 4);

    let response = request()
        .path(&format!("/users/{}/monthly-points/2024-06", user_id))
        .reply(&routes)
        .await;
    let body: MonthlyPointsResponse = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body.points, 12);

    let bad = request()
        .method("POST")
        .path("/monthly-points")
        .header("authorization", &auth)
        .json(&json!({ "period": "June", "points": 1 }))
        .reply(&routes)
        .await;
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_score_feed_pushes_updates() {
    let setup = TestServerSetup::new();
    let routes = setup.routes();
    let (user_id, auth) = create_test_user("Hazel");
    add_score(&routes, &auth, 5).await;

    let mut client = ws()
        .path(&format!("/ws/score?token={}", user_id))
        .handshake(routes.clone())
        .await
        .expect("WebSocket handshake failed");

    let first = timeout(Duration::from_secs(2), client.recv())
        .await
        .expect("no initial score")
        .unwrap();
    let first: serde_json::Value = serde_json::from_str(first.to_str().unwrap()).unwrap();
    assert_eq!(first["user_id"], json!(user_id));
    assert_eq!(first["score"], json!(5));

    add_score(&routes, &auth, 2).await;

    let second = timeout(Duration::from_secs(2), client.recv())
        .await
        .expect("no score update")
        .unwrap();
    let second: serde_json::Value = serde_json::from_str(second.to_str().unwrap()).unwrap();
    assert_eq!(second["score"], json!(7));
}

#[tokio::test]
async fn test_score_feed_requires_token() {
    let setup = TestServerSetup::new();

    let result = ws().path("/ws/score").handshake(setup.routes()).await;
    assert!(result.is_err());

    let result = ws()
        .path("/ws/score?token=garbage")
        .handshake(setup.routes())
        .await;
    assert!(result.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_against_sqlite() {
    let setup = TestServerSetup::new();
    let aggregator = create_sql_aggregator(setup.clock.clone()).await;
    let routes = create_routes(aggregator, setup.auth_service.clone(), setup.config.clone());
    let (user_id, auth) = create_test_user("Rowan");

    let writers = (0..50).map(|_| {
        let routes = routes.clone();
        let auth = auth.clone();
        async move {
            request()
                .method("POST")
                .path("/score")
                .header("authorization", &auth)
                .json(&json!({ "delta": 1 }))
                .reply(&routes)
                .await
                .status()
        }
    });
    let statuses = join_all(writers).await;
    assert!(statuses.iter().all(|s| *s == StatusCode::OK));

    let now = request()
        .path(&format!("/users/{}/score", user_id))
        .reply(&routes)
        .await;
    let now: WindowedScoreResponse = serde_json::from_slice(now.body()).unwrap();
    assert_eq!(now.score, 50);

    let daily = request()
        .path(&format!("/users/{}/score?window=daily", user_id))
        .reply(&routes)
        .await;
    let daily: WindowedScoreResponse = serde_json::from_slice(daily.body()).unwrap();
    assert_eq!(daily.score, 50);
}
