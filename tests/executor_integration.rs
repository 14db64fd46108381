use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_test::assert_ok;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use kite_api_client::auth::SessionManager;
use kite_api_client::error::ClientError;
use kite_api_client::rate_limit::{DEFAULT_CATEGORY, RateLimit, ThrottleConfig};
use kite_api_client::rest::{KiteClient, Request, RequestExecutor};

fn web_session() -> Arc<SessionManager> {
    Arc::new(SessionManager::builder().web_token("test_enctoken").build().unwrap())
}

fn fast_throttle(max_penalty_count: u32) -> ThrottleConfig {
    ThrottleConfig::new(max_penalty_count)
        .category(DEFAULT_CATEGORY, vec![RateLimit::new(100, Duration::from_secs(1))])
        .category("slow", vec![RateLimit::new(1, Duration::from_millis(200))])
}

fn build_executor(server: &MockServer, session: Arc<SessionManager>) -> RequestExecutor {
    RequestExecutor::builder(session)
        .base_url(server.uri())
        .throttle(fast_throttle(15))
        .penalty_backoff(Duration::from_millis(10))
        .timeout(Duration::from_millis(300))
        .max_transport_retries(0)
        .build()
        .unwrap()
}

fn success(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "status": "success",
        "data": data
    }))
}

fn error_body(status: u16, message: &str, error_type: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(serde_json::json!({
        "status": "error",
        "message": message,
        "error_type": error_type
    }))
}

#[tokio::test]
async fn test_attaches_credential_and_version_headers() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/user/profile"))
        .and(header("authorization", "enctoken test_enctoken"))
        .and(header("x-kite-version", "3"))
        .respond_with(success(serde_json::json!({ "user_id": "AB1234" })))
        .expect(1)
        .mount(&server)
        .await;

    let executor = build_executor(&server, web_session());
    let payload = executor
        .execute(DEFAULT_CATEGORY, &Request::get("/user/profile"))
        .await
        .unwrap()
        .unwrap();

    let data: serde_json::Value = payload.into_data().unwrap();
    assert_eq!(data["user_id"], "AB1234");
}

#[tokio::test]
async fn test_exchange_token_header() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/portfolio/holdings"))
        .and(header("authorization", "token my_key:my_access"))
        .respond_with(success(serde_json::json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let session = Arc::new(
        SessionManager::builder()
            .exchange_token("my_key", "my_access")
            .build()
            .unwrap(),
    );
    let executor = build_executor(&server, session);
    let result = executor
        .execute(DEFAULT_CATEGORY, &Request::get("/portfolio/holdings"))
        .await;
    assert_ok!(result);
}

#[tokio::test]
async fn test_rate_limited_twice_then_success() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/quote"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/quote"))
        .respond_with(success(serde_json::json!({ "NSE:INFY": { "last_price": 1500.0 } })))
        .expect(1)
        .mount(&server)
        .await;

    let executor = build_executor(&server, web_session());
    let start = Instant::now();
    let payload = executor
        .execute("slow", &Request::get("/quote").query("i", "NSE:INFY"))
        .await
        .unwrap();

    assert!(payload.is_some());
    assert_eq!(executor.penalties().count(), 2);
    assert!(executor.throttle().wait_count() >= 2);
    assert!(start.elapsed() >= Duration::from_millis(400));
}

#[tokio::test]
async fn test_penalty_threshold_stops_all_calls() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(429))
        .expect(2)
        .mount(&server)
        .await;

    let executor = RequestExecutor::builder(web_session())
        .base_url(server.uri())
        .throttle(fast_throttle(1))
        .penalty_backoff(Duration::from_millis(5))
        .max_transport_retries(0)
        .build()
        .unwrap();

    let result = executor
        .execute(DEFAULT_CATEGORY, &Request::get("/orders"))
        .await;
    assert!(matches!(result, Err(ClientError::ExhaustedRetries { penalties: 2 })));
    assert!(executor.penalties().is_tripped());

    // No further request reaches the server.
    let result = executor
        .execute(DEFAULT_CATEGORY, &Request::get("/orders"))
        .await;
    assert!(matches!(result, Err(ClientError::ExhaustedRetries { .. })));
}

#[tokio::test]
async fn test_breaker_trip_stops_callers_waiting_on_throttle() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(429).set_delay(Duration::from_millis(100)))
        .expect(1)
        .mount(&server)
        .await;

    let executor = RequestExecutor::builder(web_session())
        .base_url(server.uri())
        .throttle(
            ThrottleConfig::new(0)
                .category(DEFAULT_CATEGORY, vec![RateLimit::new(1, Duration::from_millis(300))]),
        )
        .penalty_backoff(Duration::from_millis(5))
        .timeout(Duration::from_secs(2))
        .max_transport_retries(0)
        .build()
        .unwrap();

    let first = {
        let executor = executor.clone();
        tokio::spawn(async move {
            executor
                .execute(DEFAULT_CATEGORY, &Request::get("/orders"))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    // Passes the breaker check, then waits on the throttle until after the trip.
    let second = executor
        .execute(DEFAULT_CATEGORY, &Request::get("/orders"))
        .await;

    assert!(matches!(
        first.await.unwrap(),
        Err(ClientError::ExhaustedRetries { penalties: 1 })
    ));
    assert!(matches!(
        second,
        Err(ClientError::ExhaustedRetries { penalties: 1 })
    ));
    assert_eq!(server.received_requests().await.map(|r| r.len()), Some(1));
}

#[tokio::test]
async fn test_session_expiry_invalidates_once() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/portfolio/positions"))
        .respond_with(error_body(403, "Incorrect `api_key` or `access_token`.", "TokenException"))
        .expect(1)
        .mount(&server)
        .await;

    let session = web_session();
    let executor = build_executor(&server, session.clone());

    let result = executor
        .execute(DEFAULT_CATEGORY, &Request::get("/portfolio/positions"))
        .await;
    assert!(matches!(result, Err(ClientError::SessionExpired)));
    assert_eq!(session.invalidations(), 1);
    assert!(!session.is_authenticated().await);
    assert_eq!(executor.penalties().count(), 0);

    // Without a new login the next call fails before touching the network.
    let result = executor
        .execute(DEFAULT_CATEGORY, &Request::get("/portfolio/positions"))
        .await;
    assert!(matches!(result, Err(ClientError::SessionExpired)));
    assert_eq!(session.invalidations(), 1);
}

#[tokio::test]
async fn test_unauthorized_invalidates_session() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/user/margins"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .expect(1)
        .mount(&server)
        .await;

    let session = web_session();
    let executor = build_executor(&server, session.clone());

    let result = executor
        .execute(DEFAULT_CATEGORY, &Request::get("/user/margins"))
        .await;
    assert!(matches!(result, Err(ClientError::SessionExpired)));
    assert_eq!(session.invalidations(), 1);
    assert!(!session.is_authenticated().await);
}

#[tokio::test]
async fn test_forbidden_permission_is_bad_request() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/portfolio/auctions"))
        .respond_with(error_body(403, "Not allowed", "PermissionException"))
        .mount(&server)
        .await;

    let session = web_session();
    let executor = build_executor(&server, session.clone());
    let result = executor
        .execute(DEFAULT_CATEGORY, &Request::get("/portfolio/auctions"))
        .await;

    assert!(matches!(result, Err(ClientError::BadRequest { .. })));
    assert!(session.is_authenticated().await);
}

#[tokio::test]
async fn test_bad_request_carries_provider_message() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/orders/regular"))
        .and(body_string_contains("tradingsymbol=INFY"))
        .respond_with(error_body(400, "Invalid quantity", "InputException"))
        .expect(1)
        .mount(&server)
        .await;

    let executor = build_executor(&server, web_session());
    let request = Request::post("/orders/regular")
        .form("tradingsymbol", "INFY")
        .form("quantity", "0");

    match executor.execute(DEFAULT_CATEGORY, &request).await {
        Err(ClientError::BadRequest { status, message }) => {
            assert_eq!(status.as_u16(), 400);
            assert!(message.contains("Invalid quantity"));
            assert!(message.contains("/orders/regular"));
        }
        other => panic!("expected BadRequest, got {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/trades"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let executor = build_executor(&server, web_session());
    let result = executor
        .execute(DEFAULT_CATEGORY, &Request::get("/trades"))
        .await;
    assert!(matches!(result, Err(ClientError::ServerError { .. })));
}

#[tokio::test]
async fn test_gateway_errors_retried_by_transport() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/trades"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let executor = RequestExecutor::builder(web_session())
        .base_url(server.uri())
        .throttle(fast_throttle(15))
        .max_transport_retries(1)
        .build()
        .unwrap();

    let result = executor
        .execute(DEFAULT_CATEGORY, &Request::get("/trades"))
        .await;
    match result {
        Err(error @ ClientError::ServerError { .. }) => assert!(error.is_retryable()),
        other => panic!("expected ServerError, got {other:?}"),
    }
}

#[tokio::test]
async fn test_transport_retries_take_throttle_slots() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/quote"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(3)
        .expect(3)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/quote"))
        .respond_with(success(serde_json::json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let executor = RequestExecutor::builder(web_session())
        .base_url(server.uri())
        .throttle(
            ThrottleConfig::new(15)
                .category(DEFAULT_CATEGORY, vec![RateLimit::new(1, Duration::from_millis(400))]),
        )
        .max_transport_retries(3)
        .build()
        .unwrap();

    let start = Instant::now();
    let payload = executor
        .execute(DEFAULT_CATEGORY, &Request::get("/quote"))
        .await
        .unwrap();

    assert!(payload.is_some());
    // Four attempts under a 1 per 400ms limit.
    assert!(start.elapsed() >= Duration::from_millis(1200));
    assert!(executor.throttle().wait_count() >= 3);
    assert_eq!(executor.penalties().count(), 0);
}

#[tokio::test]
async fn test_unrecognised_status_returns_none() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/user/margins"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/elsewhere"))
        .expect(1)
        .mount(&server)
        .await;

    let executor = build_executor(&server, web_session());
    let result = executor
        .execute(DEFAULT_CATEGORY, &Request::get("/user/margins"))
        .await
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_read_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/user/profile"))
        .respond_with(success(serde_json::json!({})).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let executor = build_executor(&server, web_session());
    let result = executor
        .execute(DEFAULT_CATEGORY, &Request::get("/user/profile"))
        .await;
    assert!(matches!(result, Err(ClientError::Timeout)));
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let executor = RequestExecutor::builder(web_session())
        .base_url(format!("http://{addr}"))
        .throttle(fast_throttle(15))
        .max_transport_retries(0)
        .build()
        .unwrap();

    let result = executor
        .execute(DEFAULT_CATEGORY, &Request::get("/user/profile"))
        .await;
    assert!(matches!(result, Err(ClientError::NetworkError(_))));
}

#[tokio::test]
async fn test_cancel_while_throttled() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/quote"))
        .respond_with(success(serde_json::json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let executor = RequestExecutor::builder(web_session())
        .base_url(server.uri())
        .throttle(
            ThrottleConfig::new(15)
                .category(DEFAULT_CATEGORY, vec![RateLimit::per_minute(1)]),
        )
        .max_transport_retries(0)
        .build()
        .unwrap();

    let request = Request::get("/quote");
    assert_ok!(executor.execute(DEFAULT_CATEGORY, &request).await);

    let result = executor
        .execute_or_cancel(
            DEFAULT_CATEGORY,
            &request,
            tokio::time::sleep(Duration::from_millis(50)),
        )
        .await;
    assert!(matches!(result, Err(ClientError::Cancelled)));
}

#[tokio::test]
async fn test_client_quote_uses_repeated_instrument_params() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/quote/ltp"))
        .and(query_param("i", "NSE:INFY"))
        .respond_with(success(serde_json::json!({
            "NSE:INFY": { "instrument_token": 408065, "last_price": 1500.5 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = KiteClient::builder(web_session())
        .base_url(server.uri())
        .build()
        .unwrap();

    let ltp = client.ltp(&["NSE:INFY"]).await.unwrap().unwrap();
    assert_eq!(ltp["NSE:INFY"]["instrument_token"], 408065);

    let too_many: Vec<String> = (0..501).map(|i| format!("NSE:S{i}")).collect();
    assert!(matches!(
        client.quote(&too_many).await,
        Err(ClientError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_client_place_order_returns_order_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/orders/regular"))
        .and(body_string_contains("transaction_type=BUY"))
        .and(body_string_contains("quantity=1"))
        .respond_with(success(serde_json::json!({ "order_id": "151220000000000" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = KiteClient::builder(web_session())
        .base_url(server.uri())
        .build()
        .unwrap();

    let order_id = client
        .place_order(
            "regular",
            [
                ("exchange", "NSE"),
                ("tradingsymbol", "INFY"),
                ("transaction_type", "BUY"),
                ("quantity", "1"),
                ("product", "CNC"),
                ("order_type", "MARKET"),
            ],
        )
        .await
        .unwrap();
    assert_eq!(order_id.as_deref(), Some("151220000000000"));
}

#[tokio::test]
async fn test_client_historical_data_unwraps_candles() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/instruments/historical/408065/minute"))
        .and(query_param("from", "2024-03-05 09:15:00"))
        .and(query_param("oi", "1"))
        .respond_with(success(serde_json::json!({
            "candles": [["2024-03-05T09:15:00+0530", 1500, 1502, 1499, 1501, 1200, 0]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = KiteClient::builder(web_session())
        .base_url(server.uri())
        .build()
        .unwrap();

    let candles = client
        .historical_data(
            "408065",
            time::macros::datetime!(2024-03-05 09:15:00),
            time::macros::datetime!(2024-03-05 15:30:00),
            "minute",
            false,
            true,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(candles.as_array().map(Vec::len), Some(1));
}
