//! Kite REST API client.
//!
//! Thin endpoint wrappers over [`RequestExecutor`]. Each method builds a
//! request, picks the endpoint's rate limit category and unwraps the
//! provider's `data` field. Payloads stay opaque (`serde_json::Value`).
//!
//! Every method returns `Ok(None)` when the server answers with a status the
//! executor does not recognise.

use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use time::PrimitiveDateTime;

use crate::auth::SessionManager;
use crate::error::ClientError;
use crate::rate_limit::{DEFAULT_CATEGORY, limits};
use crate::rest::endpoints::{market, orders, portfolio, user};
use crate::rest::executor::{Request, RequestExecutor, RequestExecutorBuilder};

/// The Kite REST API client.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use kite_api_client::auth::SessionManager;
/// use kite_api_client::rest::KiteClient;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let session = SessionManager::builder().web_token("enctoken").build()?;
///     let client = KiteClient::builder(Arc::new(session)).build()?;
///
///     let profile = client.profile().await?;
///     println!("Profile: {:?}", profile);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct KiteClient {
    executor: RequestExecutor,
}

#[derive(Debug, Deserialize)]
struct OrderId {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct Candles {
    candles: Value,
}

impl KiteClient {
    /// Wrap an executor.
    pub fn new(executor: RequestExecutor) -> Self {
        Self { executor }
    }

    /// Create a client builder around a session.
    pub fn builder(session: Arc<SessionManager>) -> KiteClientBuilder {
        KiteClientBuilder {
            inner: RequestExecutor::builder(session),
        }
    }

    /// The underlying executor.
    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    async fn data<T: DeserializeOwned>(
        &self,
        category: &str,
        request: Request,
    ) -> Result<Option<T>, ClientError> {
        match self.executor.execute(category, &request).await? {
            Some(payload) => payload.into_data().map(Some),
            None => Ok(None),
        }
    }

    // ========== User ==========

    /// Retrieve the user profile.
    pub async fn profile(&self) -> Result<Option<Value>, ClientError> {
        self.data(DEFAULT_CATEGORY, Request::get(user::PROFILE))
            .await
    }

    /// Funds, cash and margins, optionally for one segment (`equity`, `commodity`).
    pub async fn margins(&self, segment: Option<&str>) -> Result<Option<Value>, ClientError> {
        let path = match segment {
            Some(segment) => format!("{}/{}", user::MARGINS, segment),
            None => user::MARGINS.to_string(),
        };
        self.data(DEFAULT_CATEGORY, Request::get(path)).await
    }

    // ========== Portfolio ==========

    /// Long term equity holdings.
    pub async fn holdings(&self) -> Result<Option<Value>, ClientError> {
        self.data(DEFAULT_CATEGORY, Request::get(portfolio::HOLDINGS))
            .await
    }

    /// Short term positions.
    pub async fn positions(&self) -> Result<Option<Value>, ClientError> {
        self.data(DEFAULT_CATEGORY, Request::get(portfolio::POSITIONS))
            .await
    }

    /// Auctions currently being held.
    pub async fn auctions(&self) -> Result<Option<Value>, ClientError> {
        self.data(DEFAULT_CATEGORY, Request::get(portfolio::AUCTIONS))
            .await
    }

    // ========== Market data ==========

    /// CSV dump of tradable instruments, optionally for one exchange.
    pub async fn instruments(&self, exchange: Option<&str>) -> Result<Option<Vec<u8>>, ClientError> {
        let path = match exchange {
            Some(exchange) => format!("{}/{}", market::INSTRUMENTS, exchange),
            None => market::INSTRUMENTS.to_string(),
        };
        let payload = self
            .executor
            .execute(DEFAULT_CATEGORY, &Request::get(path))
            .await?;
        Ok(payload.map(|p| p.into_bytes()))
    }

    /// Full market quotes for up to 500 instruments (`EXCHANGE:SYMBOL`).
    pub async fn quote<S: AsRef<str>>(&self, instruments: &[S]) -> Result<Option<Value>, ClientError> {
        let request = instrument_request(market::QUOTE, instruments, market::MAX_QUOTE_INSTRUMENTS)?;
        self.data(limits::QUOTE, request).await
    }

    /// OHLC and last traded price for up to 1000 instruments.
    pub async fn ohlc<S: AsRef<str>>(&self, instruments: &[S]) -> Result<Option<Value>, ClientError> {
        let request = instrument_request(market::OHLC, instruments, market::MAX_LTP_INSTRUMENTS)?;
        self.data(limits::QUOTE, request).await
    }

    /// Last traded price for up to 1000 instruments.
    pub async fn ltp<S: AsRef<str>>(&self, instruments: &[S]) -> Result<Option<Value>, ClientError> {
        let request = instrument_request(market::LTP, instruments, market::MAX_LTP_INSTRUMENTS)?;
        self.data(limits::QUOTE, request).await
    }

    /// Historical candles for an instrument.
    pub async fn historical_data(
        &self,
        instrument_token: &str,
        from: PrimitiveDateTime,
        to: PrimitiveDateTime,
        interval: &str,
        continuous: bool,
        oi: bool,
    ) -> Result<Option<Value>, ClientError> {
        let path = format!("{}/{}/{}", market::HISTORICAL, instrument_token, interval);
        let request = Request::get(path)
            .query("from", format_datetime(from))
            .query("to", format_datetime(to))
            .query("continuous", u8::from(continuous).to_string())
            .query("oi", u8::from(oi).to_string());

        let candles: Option<Candles> = self.data(limits::HISTORICAL, request).await?;
        Ok(candles.map(|c| c.candles))
    }

    // ========== Orders ==========

    /// Place an order of a particular variety. Returns the order id.
    ///
    /// `params` are sent as-is (e.g. `exchange`, `tradingsymbol`,
    /// `transaction_type`, `quantity`, `product`, `order_type`, `price`).
    pub async fn place_order<I, K, V>(
        &self,
        variety: &str,
        params: I,
    ) -> Result<Option<String>, ClientError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let request =
            Request::post(format!("{}/{}", orders::ORDERS, variety)).form_pairs(params);
        let id: Option<OrderId> = self.data(limits::ORDER, request).await?;
        Ok(id.map(|id| id.order_id))
    }

    /// Modify an open order. Returns the order id.
    pub async fn modify_order<I, K, V>(
        &self,
        variety: &str,
        order_id: &str,
        params: I,
    ) -> Result<Option<String>, ClientError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let request = Request::put(format!("{}/{}/{}", orders::ORDERS, variety, order_id))
            .form_pairs(params);
        let id: Option<OrderId> = self.data(limits::ORDER, request).await?;
        Ok(id.map(|id| id.order_id))
    }

    /// Cancel an order. Returns the order id.
    pub async fn cancel_order(
        &self,
        variety: &str,
        order_id: &str,
    ) -> Result<Option<String>, ClientError> {
        let request = Request::delete(format!("{}/{}/{}", orders::ORDERS, variety, order_id));
        let id: Option<OrderId> = self.data(limits::ORDER, request).await?;
        Ok(id.map(|id| id.order_id))
    }

    /// All orders for the day.
    pub async fn orders(&self) -> Result<Option<Value>, ClientError> {
        self.data(limits::ORDER, Request::get(orders::ORDERS))
            .await
    }

    /// State history of a single order.
    pub async fn order_history(&self, order_id: &str) -> Result<Option<Value>, ClientError> {
        let request = Request::get(format!("{}/{}", orders::ORDERS, order_id));
        self.data(limits::ORDER, request).await
    }

    /// Trades generated by an order.
    pub async fn order_trades(&self, order_id: &str) -> Result<Option<Value>, ClientError> {
        let request = Request::get(format!("{}/{}/trades", orders::ORDERS, order_id));
        self.data(limits::ORDER, request).await
    }

    /// All executed trades for the day.
    pub async fn trades(&self) -> Result<Option<Value>, ClientError> {
        self.data(DEFAULT_CATEGORY, Request::get(orders::TRADES))
            .await
    }
}

/// Builder for [`KiteClient`]; see [`RequestExecutorBuilder`] for the options.
pub struct KiteClientBuilder {
    inner: RequestExecutorBuilder,
}

impl KiteClientBuilder {
    /// Adjust the executor settings.
    pub fn configure(
        mut self,
        f: impl FnOnce(RequestExecutorBuilder) -> RequestExecutorBuilder,
    ) -> Self {
        self.inner = f(self.inner);
        self
    }

    /// Set the base URL (useful for testing with a mock server).
    pub fn base_url(self, url: impl Into<String>) -> Self {
        self.configure(|b| b.base_url(url))
    }

    /// Build the client.
    pub fn build(self) -> Result<KiteClient, ClientError> {
        Ok(KiteClient::new(self.inner.build()?))
    }
}

fn instrument_request<S: AsRef<str>>(
    path: &str,
    instruments: &[S],
    max: usize,
) -> Result<Request, ClientError> {
    if instruments.is_empty() {
        return Err(ClientError::InvalidInput("At least one instrument is required".into()));
    }
    if instruments.len() > max {
        return Err(ClientError::InvalidInput(format!(
            "Instruments length cannot exceed {max}"
        )));
    }

    Ok(instruments
        .iter()
        .fold(Request::get(path), |request, i| request.query("i", i.as_ref())))
}

/// Kite's `yyyy-mm-dd hh:mm:ss` timestamp format.
fn format_datetime(dt: PrimitiveDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        dt.year(),
        u8::from(dt.month()),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second()
    )
}
