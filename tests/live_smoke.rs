use std::sync::Arc;

use kite_api_client::auth::{EnvCredentialProvider, SessionManager, SessionStore};
use kite_api_client::rest::KiteClient;

fn live_tests_enabled() -> bool {
    std::env::var("KITE_LIVE_TESTS").ok().as_deref() == Some("1")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test]
#[ignore]
async fn live_web_session_smoke() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenv::dotenv();
    if !live_tests_enabled() {
        return Ok(());
    }
    init_tracing();

    let user_id = match std::env::var("KITE_USER_ID") {
        Ok(user_id) => user_id,
        Err(_) => return Ok(()),
    };
    let store_dir = std::env::var("KITE_SESSION_DIR").unwrap_or_else(|_| ".kite".into());

    let session = Arc::new(
        SessionManager::builder()
            .user_id(user_id)
            .store(SessionStore::new(store_dir))
            .provider(Arc::new(EnvCredentialProvider::new()))
            .build()?,
    );
    session.ensure_authenticated().await?;

    let client = KiteClient::builder(session).build()?;
    let profile = client.profile().await?;
    assert!(profile.is_some());

    let ltp = client.ltp(&["NSE:INFY"]).await?;
    assert!(ltp.is_some());

    Ok(())
}

#[tokio::test]
#[ignore]
async fn live_access_token_smoke() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenv::dotenv();
    if !live_tests_enabled() {
        return Ok(());
    }
    init_tracing();

    let (api_key, access_token) = match (
        std::env::var("KITE_API_KEY"),
        std::env::var("KITE_ACCESS_TOKEN"),
    ) {
        (Ok(key), Ok(token)) => (key, token),
        _ => return Ok(()),
    };

    let session = SessionManager::builder()
        .exchange_token(api_key, access_token)
        .build()?;
    let client = KiteClient::builder(Arc::new(session)).build()?;

    let holdings = client.holdings().await?;
    assert!(holdings.is_some());

    Ok(())
}
