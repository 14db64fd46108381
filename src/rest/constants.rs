//! Kite request parameter values.
//!
//! The client does not interpret order fields; these are the strings the
//! API accepts, for callers building `place_order` parameters.

/// Exchanges.
pub mod exchange {
    pub const NSE: &str = "NSE";
    pub const BSE: &str = "BSE";
    pub const NFO: &str = "NFO";
    pub const CDS: &str = "CDS";
    pub const BFO: &str = "BFO";
    pub const MCX: &str = "MCX";
    pub const BCD: &str = "BCD";
}

/// Products.
pub mod product {
    /// Intraday
    pub const MIS: &str = "MIS";
    /// Cash and carry
    pub const CNC: &str = "CNC";
    /// Normal (F&O, overnight)
    pub const NRML: &str = "NRML";
    /// Cover order
    pub const CO: &str = "CO";
}

/// Order types.
pub mod order_type {
    pub const MARKET: &str = "MARKET";
    pub const LIMIT: &str = "LIMIT";
    pub const SLM: &str = "SL-M";
    pub const SL: &str = "SL";
}

/// Order varieties (path segment of order endpoints).
pub mod variety {
    pub const REGULAR: &str = "regular";
    pub const CO: &str = "co";
    pub const AMO: &str = "amo";
    pub const ICEBERG: &str = "iceberg";
    pub const AUCTION: &str = "auction";
}

/// Transaction types.
pub mod transaction_type {
    pub const BUY: &str = "BUY";
    pub const SELL: &str = "SELL";
}

/// Order validity.
pub mod validity {
    pub const DAY: &str = "DAY";
    pub const IOC: &str = "IOC";
    pub const TTL: &str = "TTL";
}

/// Position types.
pub mod position_type {
    pub const DAY: &str = "day";
    pub const OVERNIGHT: &str = "overnight";
}

/// Margin segments.
pub mod margin_segment {
    pub const EQUITY: &str = "equity";
    pub const COMMODITY: &str = "commodity";
}

/// GTT trigger types.
pub mod gtt_type {
    pub const OCO: &str = "two-leg";
    pub const SINGLE: &str = "single";
}
