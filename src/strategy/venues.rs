//! Capability traits for the three venues the cycle spans. The orchestrator
//! only sees these interfaces; live REST clients implement them, and the
//! integration tests substitute scripted mocks.

use crate::DynError;

use super::types::{
    AccountPermissions, AddressState, DepositAddress, DepositState, FuturesBalance, OrderFill,
    OrderSide, TransferDirection, WithdrawStatus,
};

/// Global venue: USDT spot books plus the USDT-margined futures account used
/// for hedging.
#[async_trait::async_trait]
pub trait GlobalVenue: Send + Sync {
    async fn account_permissions(&self) -> Result<AccountPermissions, DynError>;

    /// Free spot balance of one asset.
    async fn spot_balance(&self, asset: &str) -> Result<f64, DynError>;

    /// LOT_SIZE step for a spot pair.
    async fn lot_step(&self, symbol: &str) -> Result<f64, DynError>;

    async fn market_buy(&self, symbol: &str, quantity: &str) -> Result<(), DynError>;

    async fn market_sell(&self, symbol: &str, quantity: &str) -> Result<(), DynError>;

    async fn futures_balance(&self) -> Result<FuturesBalance, DynError>;

    async fn futures_set_leverage(&self, symbol: &str, leverage: u8) -> Result<(), DynError>;

    /// Quantity decimals of the futures book, read off a recent trade. This
    /// differs from the spot lot size.
    async fn futures_qty_precision(&self, symbol: &str) -> Result<u32, DynError>;

    async fn futures_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<(), DynError>;

    async fn futures_transfer(
        &self,
        asset: &str,
        amount: f64,
        direction: TransferDirection,
    ) -> Result<(), DynError>;

    /// Submit an on-chain withdrawal; returns the venue's withdrawal id.
    async fn withdraw(
        &self,
        asset: &str,
        destination: &DepositAddress,
        amount: &str,
    ) -> Result<String, DynError>;

    async fn withdraw_status(&self, asset: &str, id: &str) -> Result<WithdrawStatus, DynError>;

    async fn deposit_address(&self, asset: &str) -> Result<DepositAddress, DynError>;
}

/// Domestic venue: KRW spot books.
#[async_trait::async_trait]
pub trait DomesticVenue: Send + Sync {
    async fn balance(&self, currency: &str) -> Result<f64, DynError>;

    /// Ask for a deposit address. Wallet generation is asynchronous, so the
    /// caller polls until the state is `Ready`.
    async fn request_deposit_address(&self, currency: &str) -> Result<AddressState, DynError>;

    /// Look up an expected deposit by on-chain transaction id.
    async fn find_deposit(&self, currency: &str, txid: &str) -> Result<DepositState, DynError>;

    /// Market sell by volume; returns the order uuid.
    async fn market_sell(&self, market: &str, volume: &str) -> Result<String, DynError>;

    /// Buy by quote amount (the venue's "price" order type); returns the
    /// order uuid. Fills asynchronously.
    async fn buy_by_quote(&self, market: &str, quote_amount: f64) -> Result<String, DynError>;

    async fn order_fill(&self, uuid: &str) -> Result<OrderFill, DynError>;

    /// Submit an on-chain withdrawal; returns the withdrawal uuid.
    async fn withdraw(&self, currency: &str, amount: &str, address: &str) -> Result<String, DynError>;

    async fn withdrawal_done(&self, uuid: &str) -> Result<bool, DynError>;
}

/// Regional relay venue: KRW/USDT books plus the asset books used to relay
/// value back to the global venue.
#[async_trait::async_trait]
pub trait RelayVenue: Send + Sync {
    async fn balance(&self, currency: &str) -> Result<f64, DynError>;

    async fn best_ask(&self, symbol: &str) -> Result<f64, DynError>;

    /// Limit buy; returns the venue order id.
    async fn limit_buy(&self, symbol: &str, amount: f64, price: f64) -> Result<String, DynError>;

    /// Market sell; returns the venue order id.
    async fn market_sell(&self, symbol: &str, amount: f64) -> Result<String, DynError>;

    async fn filled_amount(&self, order_id: &str) -> Result<f64, DynError>;

    async fn deposit_address(&self, currency: &str, chain: &str) -> Result<String, DynError>;

    /// Submit an on-chain withdrawal with an explicit chain fee.
    async fn withdraw(
        &self,
        currency: &str,
        destination: &DepositAddress,
        amount: f64,
        fee: f64,
    ) -> Result<String, DynError>;

    /// Whether the most recent withdrawal of `currency` has been confirmed.
    async fn latest_withdraw_confirmed(&self, currency: &str) -> Result<bool, DynError>;
}
