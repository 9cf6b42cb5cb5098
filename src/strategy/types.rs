/// Venues taking part in the relocation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Venue {
    /// Domestic exchange, KRW-quoted spot books.
    Upbit,
    /// Global exchange, USDT-quoted spot books and USDT-margined futures.
    Binance,
    /// Regional exchange quoting USDT/KRW, used as the relay back to USDT.
    Huobi,
}

/// Venue-native spot pair on the global venue, e.g. "ADAUSDT".
pub fn global_pair(asset: &str) -> String {
    format!("{}USDT", asset)
}

/// Venue-native market code on the domestic venue, e.g. "KRW-ADA".
pub fn domestic_market(asset: &str) -> String {
    format!("KRW-{}", asset)
}

#[derive(Debug, Clone, Copy)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AccountPermissions {
    pub can_trade: bool,
    pub can_withdraw: bool,
    pub can_deposit: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct FuturesBalance {
    pub balance: f64,
    pub withdraw_available: f64,
}

#[derive(Debug, Clone, Copy)]
pub enum TransferDirection {
    SpotToFutures,
    FuturesToSpot,
}

#[derive(Debug, Clone)]
pub struct DepositAddress {
    pub address: String,
    /// Secondary address (memo/tag), required by some chains.
    pub tag: Option<String>,
}

/// Deposit-address generation on the domestic venue is asynchronous: a request
/// may only kick off wallet creation.
#[derive(Debug, Clone)]
pub enum AddressState {
    Ready(DepositAddress),
    Generating,
    Failed(String),
}

/// State of an on-chain withdrawal as reported by the sending venue.
#[derive(Debug, Clone)]
pub enum WithdrawStatus {
    Completed { txid: String },
    Pending,
    Failed,
}

/// What the receiving venue knows about an expected deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositState {
    Accepted,
    Rejected,
    Pending,
    /// The transaction has not appeared in the venue's deposit history yet.
    NotSeen,
}

#[derive(Debug, Clone, Copy)]
pub struct OrderFill {
    pub trade_count: u32,
    pub avg_price: f64,
}

/// Orchestrator state, advanced at each leg boundary. A cycle that completes
/// returns to `Idle`; a cycle that aborts leaves the state at the failure
/// point for the operator to inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Preparing,
    BuyingOnCheapVenue,
    HedgingShort,
    Withdrawing,
    ConfirmingDeposit,
    SellingOnExpensiveVenue,
    CoveringHedge,
}

/// Mutable record of the cycle in flight. Exactly one exists at a time: the
/// detector and orchestrator share one sequential task, so a tick that fires
/// while a cycle is running cannot start a second one.
#[derive(Debug, Clone)]
pub struct TradeContext {
    /// Base asset chosen by the detector.
    pub symbol: String,
    /// Global-venue price at the moment the premium triggered.
    pub trigger_price: f64,
    /// Domestic deposit address for `symbol`.
    pub deposit_address: DepositAddress,
    /// Quote amount available for the buy leg after hedge margin was set aside.
    pub tradable_quote: f64,
    /// Quantity of the open futures short, zero when no hedge is on.
    pub hedge_qty: f64,
}
