use serde::Deserialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;
use warp::Filter;
use warp::http::StatusCode;

use crate::auth::AuthService;
use crate::config::Config;
use score_core::ScoreAggregator;
use score_types::{
    AddScoreRequest, ErrorResponse, MonthKey, MonthlyPointsRequest, MonthlyPointsResponse,
    RankResponse, RankingWindow, RegisterRequest, ScoreError, SetScoreRequest, UserId,
    WindowedScoreResponse,
};

pub mod auth;
pub mod config;
pub mod websocket;

#[derive(Deserialize)]
struct WindowQuery {
    window: Option<String>,
}

#[derive(Deserialize)]
struct LeaderboardQuery {
    window: Option<String>,
    top: Option<usize>,
}

#[derive(Deserialize)]
struct FeedQuery {
    token: Option<String>,
}

type JsonReply = warp::reply::WithStatus<warp::reply::Json>;

pub fn create_routes(
    aggregator: Arc<ScoreAggregator>,
    auth_service: Arc<AuthService>,
    config: Arc<Config>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let aggregator_filter = warp::any().map({
        let aggregator = aggregator.clone();
        move || aggregator.clone()
    });

    let auth_filter = warp::any().map({
        let auth_service = auth_service.clone();
        move || auth_service.clone()
    });

    let config_filter = warp::any().map({
        let config = config.clone();
        move || config.clone()
    });

    // Score feed socket
    let score_feed = warp::path!("ws" / "score")
        .and(warp::ws())
        .and(warp::query::<FeedQuery>())
        .and(aggregator_filter.clone())
        .and(auth_filter.clone())
        .and_then(handle_score_feed_upgrade);

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::with_status("OK", StatusCode::OK));

    let register = warp::path("users")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::header::optional::<String>("authorization"))
        .and(warp::body::json::<RegisterRequest>())
        .and(aggregator_filter.clone())
        .and(auth_filter.clone())
        .and_then(handle_register_request);

    let add_score = warp::path("score")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::header::optional::<String>("authorization"))
        .and(warp::body::json::<AddScoreRequest>())
        .and(aggregator_filter.clone())
        .and(auth_filter.clone())
        .and_then(handle_add_score_request);

    let set_score = warp::path!("users" / String / "score")
        .and(warp::put())
        .and(warp::header::optional::<String>("x-admin-token"))
        .and(warp::body::json::<SetScoreRequest>())
        .and(aggregator_filter.clone())
        .and(config_filter.clone())
        .and_then(handle_set_score_request);

    let windowed_score = warp::path!("users" / String / "score")
        .and(warp::get())
        .and(warp::query::<WindowQuery>())
        .and(aggregator_filter.clone())
        .and_then(handle_windowed_score_request);

    let rank = warp::path!("users" / String / "rank")
        .and(warp::get())
        .and(warp::query::<WindowQuery>())
        .and(aggregator_filter.clone())
        .and_then(handle_rank_request);

    let leaderboard = warp::path("leaderboard")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<LeaderboardQuery>())
        .and(aggregator_filter.clone())
        .and(config_filter.clone())
        .and_then(handle_leaderboard_request);

    let add_monthly_points = warp::path("monthly-points")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::header::optional::<String>("authorization"))
        .and(warp::body::json::<MonthlyPointsRequest>())
        .and(aggregator_filter.clone())
        .and(auth_filter.clone())
        .and_then(handle_add_monthly_points_request);

    let monthly_points = warp::path!("users" / String / "monthly-points" / String)
        .and(warp::get())
        .and(aggregator_filter.clone())
        .and_then(handle_monthly_points_request);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["content-type", "authorization", "x-admin-token"])
        .allow_methods(vec!["GET", "POST", "PUT"]);

    score_feed
        .or(health)
        .or(register)
        .or(add_score)
        .or(set_score)
        .or(windowed_score)
        .or(rank)
        .or(leaderboard)
        .or(add_monthly_points)
        .or(monthly_points)
        .with(cors)
        .with(warp::log("carbon_scores"))
}

pub fn status_for(err: &ScoreError) -> StatusCode {
    match err {
        ScoreError::Unauthenticated => StatusCode::UNAUTHORIZED,
        ScoreError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ScoreError::TransactionAborted { .. } => StatusCode::CONFLICT,
        ScoreError::UserAlreadyExists { .. } => StatusCode::CONFLICT,
        ScoreError::InvalidPeriod { .. } => StatusCode::BAD_REQUEST,
        ScoreError::ScoreOverflow { .. } => StatusCode::BAD_REQUEST,
        ScoreError::MalformedRecord { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_reply(err: ScoreError) -> JsonReply {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::error!("Request failed: {}", err);
    }
    warp::reply::with_status(warp::reply::json(&ErrorResponse::from(err)), status)
}

fn bad_request(message: impl Into<String>) -> JsonReply {
    warp::reply::with_status(
        warp::reply::json(&ErrorResponse::message(message)),
        StatusCode::BAD_REQUEST,
    )
}

fn ok_json<T: serde::Serialize>(body: &T) -> JsonReply {
    warp::reply::with_status(warp::reply::json(body), StatusCode::OK)
}

/// Compare admin tokens without leaking the position of the first mismatch.
fn admin_token_matches(expected: &str, given: &str) -> bool {
    if expected.len() != given.len() {
        return false;
    }
    expected.as_bytes().ct_eq(given.as_bytes()).into()
}

fn parse_user_id(raw: &str) -> Result<UserId, JsonReply> {
    Uuid::parse_str(raw).map_err(|_| bad_request("Invalid user ID format"))
}

fn parse_window(raw: Option<&str>) -> Result<RankingWindow, JsonReply> {
    match raw {
        None => Ok(RankingWindow::Now),
        Some(raw) => raw.parse().map_err(bad_request),
    }
}

async fn handle_score_feed_upgrade(
    ws: warp::ws::Ws,
    query: FeedQuery,
    aggregator: Arc<ScoreAggregator>,
    auth_service: Arc<AuthService>,
) -> Result<Box<dyn warp::Reply>, warp::Rejection> {
    let Some(token) = query.token else {
        return Ok(Box::new(error_reply(ScoreError::Unauthenticated)));
    };

    match auth_service.validate_token(&token).await {
        Ok(user) => Ok(Box::new(ws.on_upgrade(move |socket| {
            websocket::handle_score_feed(socket, user.user_id, aggregator)
        }))),
        Err(e) => {
            tracing::debug!("Score feed rejected: {}", e);
            Ok(Box::new(error_reply(ScoreError::Unauthenticated)))
        }
    }
}

async fn handle_register_request(
    auth_header: Option<String>,
    request: RegisterRequest,
    aggregator: Arc<ScoreAggregator>,
    auth_service: Arc<AuthService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let nickname = request.nickname.trim();
    if nickname.is_empty() {
        return Ok(bad_request("Nickname must not be empty"));
    }

    let identity = auth_service.identity_from_header(auth_header.as_deref()).await;
    match aggregator.register_user(&identity, nickname).await {
        Ok(state) => Ok(warp::reply::with_status(
            warp::reply::json(&state),
            StatusCode::CREATED,
        )),
        Err(err) => Ok(error_reply(err)),
    }
}

async fn handle_add_score_request(
    auth_header: Option<String>,
    request: AddScoreRequest,
    aggregator: Arc<ScoreAggregator>,
    auth_service: Arc<AuthService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let identity = auth_service.identity_from_header(auth_header.as_deref()).await;
    match aggregator.add_score(&identity, request.delta).await {
        Ok(receipt) => Ok(ok_json(&receipt)),
        Err(err) => Ok(error_reply(err)),
    }
}

async fn handle_set_score_request(
    user_id: String,
    admin_token: Option<String>,
    request: SetScoreRequest,
    aggregator: Arc<ScoreAggregator>,
    config: Arc<Config>,
) -> Result<Box<dyn warp::Reply>, warp::Rejection> {
    let authorized = match (&config.admin_token, &admin_token) {
        (Some(expected), Some(given)) => admin_token_matches(expected, given),
        _ => false,
    };
    if !authorized {
        tracing::warn!("Rejected score overwrite for {} without admin token", user_id);
        return Ok(Box::new(warp::reply::with_status(
            warp::reply::json(&ErrorResponse::message("Admin token required")),
            StatusCode::FORBIDDEN,
        )));
    }

    let user_id = match parse_user_id(&user_id) {
        Ok(id) => id,
        Err(reply) => return Ok(Box::new(reply)),
    };

    match aggregator.set_absolute_score(user_id, request.score).await {
        Ok(()) => Ok(Box::new(StatusCode::NO_CONTENT)),
        Err(err) => Ok(Box::new(error_reply(err))),
    }
}

async fn handle_windowed_score_request(
    user_id: String,
    query: WindowQuery,
    aggregator: Arc<ScoreAggregator>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let user_id = match parse_user_id(&user_id) {
        Ok(id) => id,
        Err(reply) => return Ok(reply),
    };
    let window = match parse_window(query.window.as_deref()) {
        Ok(window) => window,
        Err(reply) => return Ok(reply),
    };

    let (score, stale) = match aggregator.get_windowed_score(&user_id, window, None).await {
        Ok(score) => (score, false),
        Err(err) => match err.fallback() {
            Some(cached) => (cached, true),
            None => return Ok(error_reply(err)),
        },
    };

    Ok(ok_json(&WindowedScoreResponse {
        user_id,
        window,
        score,
        stale,
    }))
}

async fn handle_rank_request(
    user_id: String,
    query: WindowQuery,
    aggregator: Arc<ScoreAggregator>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let user_id = match parse_user_id(&user_id) {
        Ok(id) => id,
        Err(reply) => return Ok(reply),
    };
    let window = match parse_window(query.window.as_deref()) {
        Ok(window) => window,
        Err(reply) => return Ok(reply),
    };

    match aggregator.user_rank(&user_id, window, None).await {
        Ok(rank) => Ok(ok_json(&RankResponse {
            user_id,
            window,
            rank,
        })),
        Err(err) => Ok(error_reply(err)),
    }
}

async fn handle_leaderboard_request(
    query: LeaderboardQuery,
    aggregator: Arc<ScoreAggregator>,
    config: Arc<Config>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let window = match parse_window(query.window.as_deref()) {
        Ok(window) => window,
        Err(reply) => return Ok(reply),
    };
    let top_size = query.top.unwrap_or(config.leaderboard_top_size);

    match aggregator.leaderboard_tiers(window, None, top_size).await {
        Ok(tiers) => Ok(ok_json(&tiers)),
        Err(err) => {
            tracing::error!("Failed to build {} leaderboard: {}", window, err);
            Ok(error_reply(err))
        }
    }
}

async fn handle_add_monthly_points_request(
    auth_header: Option<String>,
    request: MonthlyPointsRequest,
    aggregator: Arc<ScoreAggregator>,
    auth_service: Arc<AuthService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let identity = auth_service.identity_from_header(auth_header.as_deref()).await;

    let period = match request.period.as_deref() {
        Some(raw) => match raw.parse::<MonthKey>() {
            Ok(period) => period,
            Err(err) => return Ok(error_reply(err)),
        },
        None => match MonthKey::from_timestamp_millis(aggregator.now_millis()) {
            Some(period) => period,
            None => return Ok(bad_request("Current month is out of range")),
        },
    };

    match aggregator
        .add_monthly_points(&identity, period, request.points)
        .await
    {
        Ok(points) => Ok(ok_json(&MonthlyPointsResponse {
            period: period.to_string(),
            points,
        })),
        Err(err) => Ok(error_reply(err)),
    }
}

async fn handle_monthly_points_request(
    user_id: String,
    period: String,
    aggregator: Arc<ScoreAggregator>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let user_id = match parse_user_id(&user_id) {
        Ok(id) => id,
        Err(reply) => return Ok(reply),
    };
    let period = match period.parse::<MonthKey>() {
        Ok(period) => period,
        Err(err) => return Ok(error_reply(err)),
    };

    match aggregator.monthly_points(&user_id, period).await {
        Ok(points) => Ok(ok_json(&MonthlyPointsResponse {
            period: period.to_string(),
            points,
        })),
        Err(err) => Ok(error_reply(err)),
    }
}
