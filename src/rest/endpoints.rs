//! Kite REST API endpoint constants.

/// Base URL for the Kite Connect REST API.
pub const KITE_API_URL: &str = "https://api.kite.trade";

/// Base URL for the Kite web login.
pub const KITE_LOGIN_URL: &str = "https://kite.zerodha.com";

/// API version header name.
pub const VERSION_HEADER: &str = "X-Kite-Version";

/// API version sent with every request.
pub const API_VERSION: &str = "3";

/// Login endpoints (relative to [`KITE_LOGIN_URL`]).
pub mod login {
    /// Submit user id and password.
    pub const LOGIN: &str = "/api/login";
    /// Submit the two-factor code.
    pub const TWOFA: &str = "/api/twofa";
    /// Cookie carrying the web session token.
    pub const ENCTOKEN_COOKIE: &str = "enctoken";
}

/// Session endpoints.
pub mod session {
    /// Exchange a request token for an access token.
    pub const TOKEN: &str = "/session/token";
}

/// User endpoints.
pub mod user {
    /// User profile.
    pub const PROFILE: &str = "/user/profile";
    /// Funds and margins.
    pub const MARGINS: &str = "/user/margins";
}

/// Portfolio endpoints.
pub mod portfolio {
    /// Long term holdings.
    pub const HOLDINGS: &str = "/portfolio/holdings";
    /// Short term positions.
    pub const POSITIONS: &str = "/portfolio/positions";
    /// Auctions currently being held.
    pub const AUCTIONS: &str = "/portfolio/auctions";
}

/// Market data endpoints.
pub mod market {
    /// Instrument dump (CSV).
    pub const INSTRUMENTS: &str = "/instruments";
    /// Full market quotes.
    pub const QUOTE: &str = "/quote";
    /// OHLC and last price.
    pub const OHLC: &str = "/quote/ohlc";
    /// Last traded price.
    pub const LTP: &str = "/quote/ltp";
    /// Historical candles, followed by `/{instrument_token}/{interval}`.
    pub const HISTORICAL: &str = "/instruments/historical";

    /// Maximum instruments per quote request.
    pub const MAX_QUOTE_INSTRUMENTS: usize = 500;
    /// Maximum instruments per OHLC or LTP request.
    pub const MAX_LTP_INSTRUMENTS: usize = 1000;
}

/// Order endpoints.
pub mod orders {
    /// Order book; also the prefix for `/{variety}` and `/{variety}/{order_id}`.
    pub const ORDERS: &str = "/orders";
    /// Executed trades for the day.
    pub const TRADES: &str = "/trades";
}
