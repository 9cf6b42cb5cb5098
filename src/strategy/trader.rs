//! The trade cycle orchestrator.
//!
//! One sequential task evaluates the detector every tick and, when a premium
//! triggers, runs the forward relocation cycle to completion: buy on the
//! global venue, relocate to the domestic venue and sell there, relay the KRW
//! through BTC to the regional venue, then relay USDT through EOS back to the
//! global venue. Every spot position in transit is hedged with an
//! equal-quantity futures short. There is no rollback: a failure mid-leg is a
//! fatal abort and the operator reconciles by hand.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::CycleError;
use crate::settings::Settings;

use super::detector::{PremiumDetector, TickDecision};
use super::poll::{Probe, RetryPolicy};
use super::precision;
use super::price_table::PriceTable;
use super::types::{
    domestic_market, global_pair, AddressState, CycleState, DepositState, OrderSide,
    TradeContext, TransferDirection, Venue, WithdrawStatus,
};
use super::venues::{DomesticVenue, GlobalVenue, RelayVenue};

const HEDGE_LEVERAGE: u8 = 10;
/// Share of the quote balance parked in the futures account as hedge margin.
/// 15% rather than 10%: after the domestic sell the position value has grown
/// and a 10% margin can no longer carry the 10x short.
const HEDGE_MARGIN_FRACTION: f64 = 0.15;
/// Market buys fill at the live price and pay taker fees; size the order with
/// 1% headroom against the trigger price.
const TAKER_FEE_HEADROOM: f64 = 0.99;
/// Relay venue charges 0.1% per fill.
const RELAY_FEE_ADJUST: f64 = 0.999;
/// Headroom on the domestic quote-amount buy.
const DOMESTIC_QUOTE_HEADROOM: f64 = 0.9995;

const BTC_WITHDRAW_FEE: f64 = 0.0009;
const BTC_WITHDRAW_STEP: f64 = 0.0001;
const EOS_WITHDRAW_FEE: f64 = 0.1;
const EOS_STEP: f64 = 0.0001;
const USDT_STEP: f64 = 0.01;

const ADDRESS_POLL_MS: u64 = 500;
const DOMESTIC_FILL_POLL_MS: u64 = 100;
const DOMESTIC_WITHDRAW_POLL_SECS: u64 = 10;

pub struct Trader {
    table: Arc<PriceTable>,
    detector: PremiumDetector,
    global: Arc<dyn GlobalVenue>,
    domestic: Arc<dyn DomesticVenue>,
    relay: Arc<dyn RelayVenue>,
    min_quote_balance: f64,
    /// Order-fill waits.
    order_poll: RetryPolicy,
    /// Withdrawal/deposit waits and submission retries.
    transfer_poll: RetryPolicy,
    /// Deposit-address generation and domestic fill waits.
    quick_poll: RetryPolicy,
    /// Domestic on-chain withdrawal wait.
    slow_poll: RetryPolicy,
    state: CycleState,
}

impl Trader {
    pub fn new(
        table: Arc<PriceTable>,
        global: Arc<dyn GlobalVenue>,
        domestic: Arc<dyn DomesticVenue>,
        relay: Arc<dyn RelayVenue>,
        settings: &Settings,
    ) -> Self {
        let cap = settings.max_poll_attempts;
        let detector = PremiumDetector::new(
            Arc::clone(&table),
            settings.market_list.clone(),
            settings.premium_ratio,
        );
        Self {
            table,
            detector,
            global,
            domestic,
            relay,
            min_quote_balance: settings.min_quote_balance,
            order_poll: RetryPolicy::every_secs(settings.order_poll_secs).with_max_attempts(cap),
            transfer_poll: RetryPolicy::every_secs(settings.transfer_poll_secs).with_max_attempts(cap),
            quick_poll: RetryPolicy::every_millis(ADDRESS_POLL_MS).with_max_attempts(cap),
            slow_poll: RetryPolicy::every_secs(DOMESTIC_WITHDRAW_POLL_SECS).with_max_attempts(cap),
            state: CycleState::Idle,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    fn enter(&mut self, state: CycleState) {
        self.state = state;
    }

    /// One detector tick. Cheap while idle; when a premium triggers this runs
    /// the whole cycle before returning, so a second cycle can never start
    /// underneath it.
    pub async fn monitor(&mut self) -> Result<(), CycleError> {
        match self.detector.evaluate()? {
            TickDecision::Hold => Ok(()),
            TickDecision::Forward { symbol, premium } => {
                info!(symbol = %symbol, premium, "premium above threshold, starting forward cycle");
                self.run_forward_cycle(&symbol).await?;
                info!(symbol = %symbol, "forward cycle complete");
                Ok(())
            }
            TickDecision::Reverse { symbol, premium } => {
                info!(symbol = %symbol, premium, "reverse premium detected; reverse cycle is not supported");
                Ok(())
            }
        }
    }

    async fn run_forward_cycle(&mut self, symbol: &str) -> Result<(), CycleError> {
        let trigger_price = self.table.get(Venue::Binance, &global_pair(symbol));
        if trigger_price == 0.0 {
            return Err(CycleError::fatal(format!("no live global price for {}", symbol)));
        }

        let mut ctx = self.prepare(symbol, trigger_price).await?;
        self.leg_global_to_domestic(&mut ctx).await?;
        self.leg_domestic_to_relay().await?;
        self.leg_relay_to_global().await?;
        self.enter(CycleState::Idle);
        Ok(())
    }

    /// Preparation gate. Everything here must pass before any capital moves;
    /// any failure is fatal and nothing is retried.
    async fn prepare(&mut self, symbol: &str, trigger_price: f64) -> Result<TradeContext, CycleError> {
        self.enter(CycleState::Preparing);

        let perms = self.global.account_permissions().await?;
        if !perms.can_trade || !perms.can_withdraw || !perms.can_deposit {
            return Err(CycleError::fatal(
                "global venue account restricted (trade/withdraw/deposit)",
            ));
        }

        // A non-empty futures account means a previous cycle left hedge state
        // behind; starting on top of it would double-hedge.
        let futures = self.global.futures_balance().await?;
        if futures.balance != 0.0 {
            return Err(CycleError::fatal("futures account not flat before cycle start"));
        }

        let quote_balance = self.global.spot_balance("USDT").await?;
        info!(quote_balance, "global venue quote balance");
        if quote_balance < self.min_quote_balance {
            return Err(CycleError::fatal(format!(
                "quote balance {:.2} below minimum {:.2}",
                quote_balance, self.min_quote_balance
            )));
        }

        let domestic = Arc::clone(&self.domestic);
        let currency = symbol.to_string();
        let deposit_address = self
            .quick_poll
            .run("domestic deposit address", move || {
                let domestic = Arc::clone(&domestic);
                let currency = currency.clone();
                async move {
                    match domestic.request_deposit_address(&currency).await {
                        Ok(AddressState::Ready(address)) => Ok(Probe::Ready(address)),
                        Ok(AddressState::Generating) => Ok(Probe::Retry),
                        Ok(AddressState::Failed(reason)) => Ok(Probe::Abort(format!(
                            "domestic wallet generation failed for {}: {}",
                            currency, reason
                        ))),
                        Err(e) => {
                            warn!(error = %e, "deposit address lookup failed, retrying");
                            Ok(Probe::Retry)
                        }
                    }
                }
            })
            .await?;

        self.global
            .futures_transfer("USDT", quote_balance * HEDGE_MARGIN_FRACTION, TransferDirection::SpotToFutures)
            .await?;

        Ok(TradeContext {
            symbol: symbol.to_string(),
            trigger_price,
            deposit_address,
            tradable_quote: quote_balance * (1.0 - HEDGE_MARGIN_FRACTION),
            hedge_qty: 0.0,
        })
    }

    /// Leg 1: buy the premium asset on the global venue, relocate it to the
    /// domestic venue, sell it there, unwind the hedge.
    async fn leg_global_to_domestic(&mut self, ctx: &mut TradeContext) -> Result<(), CycleError> {
        let symbol = ctx.symbol.clone();
        let pair = global_pair(&symbol);

        self.enter(CycleState::BuyingOnCheapVenue);
        let step = self.global.lot_step(&pair).await?;
        let quantity = ctx.tradable_quote * TAKER_FEE_HEADROOM / ctx.trigger_price;
        let quantity_str = precision::quantize(quantity, step);
        self.global.market_buy(&pair, &quantity_str).await?;
        info!(pair = %pair, quantity = %quantity_str, "global venue buy executed");

        self.enter(CycleState::HedgingShort);
        ctx.hedge_qty = self.hedge_short(&symbol, quantity).await?;

        self.enter(CycleState::Withdrawing);
        // The requested quantity is not what settled: fills and fees differ.
        // Read the actual balance back before moving it.
        let settled = self.global.spot_balance(&symbol).await?;
        let amount = precision::quantize(settled, step);

        // The balance does not reflect the buy immediately; submission is
        // retried until the venue accepts it.
        let global = Arc::clone(&self.global);
        let (sym, addr, amt) = (symbol.clone(), ctx.deposit_address.clone(), amount.clone());
        let withdraw_id = self
            .transfer_poll
            .run("withdrawal submission", move || {
                let global = Arc::clone(&global);
                let (sym, addr, amt) = (sym.clone(), addr.clone(), amt.clone());
                async move {
                    match global.withdraw(&sym, &addr, &amt).await {
                        Ok(id) => Ok(Probe::Ready(id)),
                        Err(e) => {
                            warn!(error = %e, "withdrawal submission failed, retrying");
                            Ok(Probe::Retry)
                        }
                    }
                }
            })
            .await?;
        info!(withdraw_id = %withdraw_id, amount = %amount, "global venue withdrawing to domestic venue");

        let global = Arc::clone(&self.global);
        let (sym, id) = (symbol.clone(), withdraw_id.clone());
        let txid = self
            .transfer_poll
            .run("on-chain withdrawal", move || {
                let global = Arc::clone(&global);
                let (sym, id) = (sym.clone(), id.clone());
                async move {
                    match global.withdraw_status(&sym, &id).await? {
                        WithdrawStatus::Completed { txid } => Ok(Probe::Ready(txid)),
                        WithdrawStatus::Pending => Ok(Probe::Retry),
                        WithdrawStatus::Failed => {
                            Ok(Probe::Abort("on-chain withdrawal failed".to_string()))
                        }
                    }
                }
            })
            .await?;
        info!(txid = %txid, "withdrawal confirmed on-chain");

        self.enter(CycleState::ConfirmingDeposit);
        let domestic = Arc::clone(&self.domestic);
        let (sym, tx) = (symbol.clone(), txid.clone());
        self.transfer_poll
            .run("domestic deposit", move || {
                let domestic = Arc::clone(&domestic);
                let (sym, tx) = (sym.clone(), tx.clone());
                async move {
                    match domestic.find_deposit(&sym, &tx).await? {
                        DepositState::Accepted => Ok(Probe::Ready(())),
                        DepositState::Rejected => {
                            Ok(Probe::Abort("domestic venue rejected the deposit".to_string()))
                        }
                        DepositState::Pending | DepositState::NotSeen => Ok(Probe::Retry),
                    }
                }
            })
            .await?;
        info!("domestic deposit accepted");

        self.enter(CycleState::SellingOnExpensiveVenue);
        let received = self.domestic.balance(&symbol).await?;
        self.domestic
            .market_sell(&domestic_market(&symbol), &received.to_string())
            .await?;
        info!(received, "domestic venue sell executed");

        self.enter(CycleState::CoveringHedge);
        self.global
            .futures_market_order(&pair, OrderSide::Buy, ctx.hedge_qty)
            .await?;
        info!(pair = %pair, quantity = ctx.hedge_qty, "hedge covered");
        ctx.hedge_qty = 0.0;

        Ok(())
    }

    /// Leg 2: convert the domestic KRW into BTC and relocate it to the relay
    /// venue, hedged on the global venue's futures.
    async fn leg_domestic_to_relay(&mut self) -> Result<(), CycleError> {
        self.enter(CycleState::Preparing);
        let relay_address = self.relay.deposit_address("btc", "btc").await?;

        self.enter(CycleState::BuyingOnCheapVenue);
        let krw = self.domestic.balance("KRW").await?;
        info!(krw, "domestic quote balance");
        let order_uuid = self
            .domestic
            .buy_by_quote(&domestic_market("BTC"), (krw * DOMESTIC_QUOTE_HEADROOM).floor())
            .await?;

        // Quote-amount orders fill asynchronously; wait for the first trade.
        let domestic = Arc::clone(&self.domestic);
        let uuid = order_uuid.clone();
        let fill_poll = RetryPolicy::every_millis(DOMESTIC_FILL_POLL_MS)
            .with_max_attempts(self.quick_poll.max_attempts);
        fill_poll
            .run("domestic buy fill", move || {
                let domestic = Arc::clone(&domestic);
                let uuid = uuid.clone();
                async move {
                    let fill = domestic.order_fill(&uuid).await?;
                    if fill.trade_count > 0 {
                        Ok(Probe::Ready(()))
                    } else {
                        Ok(Probe::Retry)
                    }
                }
            })
            .await?;
        info!("domestic venue BTC buy filled");

        let btc = self.domestic.balance("BTC").await? - BTC_WITHDRAW_FEE;

        self.enter(CycleState::HedgingShort);
        let hedge_qty = self.hedge_short("BTC", btc).await?;

        self.enter(CycleState::Withdrawing);
        let amount = precision::quantize(btc, BTC_WITHDRAW_STEP);
        let withdraw_uuid = self
            .domestic
            .withdraw("BTC", &amount, &relay_address)
            .await?;
        info!(withdraw_uuid = %withdraw_uuid, amount = %amount, "domestic venue withdrawing to relay venue");

        let domestic = Arc::clone(&self.domestic);
        let uuid = withdraw_uuid.clone();
        self.slow_poll
            .run("domestic withdrawal", move || {
                let domestic = Arc::clone(&domestic);
                let uuid = uuid.clone();
                async move {
                    match domestic.withdrawal_done(&uuid).await {
                        Ok(true) => Ok(Probe::Ready(())),
                        Ok(false) => Ok(Probe::Retry),
                        Err(e) => {
                            warn!(error = %e, "withdrawal status lookup failed, retrying");
                            Ok(Probe::Retry)
                        }
                    }
                }
            })
            .await?;
        info!("domestic withdrawal done");

        self.enter(CycleState::SellingOnExpensiveVenue);
        // The deposit is not spendable the moment it lands; submission is
        // retried until the relay venue takes the order.
        let sell_amount = precision::floor_to_step(btc, BTC_WITHDRAW_STEP);
        let relay = Arc::clone(&self.relay);
        let order_id = self
            .transfer_poll
            .run("relay sell submission", move || {
                let relay = Arc::clone(&relay);
                async move {
                    match relay.market_sell("btckrw", sell_amount).await {
                        Ok(id) => Ok(Probe::Ready(id)),
                        Err(e) => {
                            warn!(error = %e, "relay sell submission failed, retrying");
                            Ok(Probe::Retry)
                        }
                    }
                }
            })
            .await?;
        info!(order_id = %order_id, "relay venue sell order created");

        self.wait_relay_fill(&order_id, sell_amount, "relay BTC sell").await?;
        info!("relay venue sell order filled");

        self.enter(CycleState::CoveringHedge);
        self.global
            .futures_market_order(&global_pair("BTC"), OrderSide::Buy, hedge_qty)
            .await?;
        info!(quantity = hedge_qty, "BTC hedge covered");

        Ok(())
    }

    /// Leg 3: buy USDT with the relay KRW, relay it through EOS back to the
    /// global venue, sell, and release the hedge margin.
    async fn leg_relay_to_global(&mut self) -> Result<(), CycleError> {
        self.enter(CycleState::BuyingOnCheapVenue);
        let krw = self.relay.balance("krw").await?;
        let ask = self.relay.best_ask("usdtkrw").await?;
        info!(krw, ask, "relay venue buying USDT");

        let usdt_qty = precision::floor_to_step(krw / ask, USDT_STEP);
        let order_id = self.relay.limit_buy("usdtkrw", usdt_qty, ask.floor()).await?;
        self.wait_relay_fill(&order_id, usdt_qty, "relay USDT buy").await?;
        info!(usdt_qty, "relay venue bought USDT");
        let usdt_qty = usdt_qty * RELAY_FEE_ADJUST;

        // EOS is the relay asset: its USDT book on the global venue has the
        // liquidity. Price the relay buy off the live global book.
        let eos_price = self.table.get(Venue::Binance, &global_pair("EOS"));
        if eos_price == 0.0 {
            return Err(CycleError::fatal("no live EOS price for the relay buy"));
        }
        let eos_qty = precision::floor_to_step(usdt_qty / eos_price, EOS_STEP);
        let order_id = self.relay.limit_buy("eosusdt", eos_qty, eos_price).await?;
        self.wait_relay_fill(&order_id, eos_qty, "relay EOS buy").await?;
        info!(eos_qty, "relay venue bought EOS");
        let eos_qty = eos_qty * RELAY_FEE_ADJUST;

        self.enter(CycleState::HedgingShort);
        let hedge_qty = self.hedge_short("EOS", eos_qty).await?;

        self.enter(CycleState::Withdrawing);
        let destination = self.global.deposit_address("EOS").await?;
        let send_qty = precision::floor_to_step(eos_qty - EOS_WITHDRAW_FEE, EOS_STEP);

        let relay = Arc::clone(&self.relay);
        let dest = destination.clone();
        let withdraw_id = self
            .transfer_poll
            .run("relay withdrawal submission", move || {
                let relay = Arc::clone(&relay);
                let dest = dest.clone();
                async move {
                    match relay.withdraw("eos", &dest, send_qty, EOS_WITHDRAW_FEE).await {
                        Ok(id) => Ok(Probe::Ready(id)),
                        Err(e) => {
                            warn!(error = %e, "relay withdrawal submission failed, retrying");
                            Ok(Probe::Retry)
                        }
                    }
                }
            })
            .await?;
        info!(withdraw_id = %withdraw_id, send_qty, "relay venue withdrawing EOS to global venue");

        let relay = Arc::clone(&self.relay);
        self.order_poll
            .run("relay withdrawal confirmation", move || {
                let relay = Arc::clone(&relay);
                async move {
                    if relay.latest_withdraw_confirmed("eos").await? {
                        Ok(Probe::Ready(()))
                    } else {
                        Ok(Probe::Retry)
                    }
                }
            })
            .await?;
        info!("relay withdrawal confirmed");

        self.enter(CycleState::SellingOnExpensiveVenue);
        let pair = global_pair("EOS");
        let step = self.global.lot_step(&pair).await?;
        let settled = self.global.spot_balance("EOS").await?;
        let quantity_str = precision::quantize(settled, step);
        self.global.market_sell(&pair, &quantity_str).await?;
        info!(quantity = %quantity_str, "global venue sell executed");

        self.enter(CycleState::CoveringHedge);
        self.global
            .futures_market_order(&pair, OrderSide::Buy, hedge_qty)
            .await?;
        info!(quantity = hedge_qty, "EOS hedge covered");

        // Pull the hedge margin back to spot, but only once the futures
        // account provably carries no position.
        let futures = self.global.futures_balance().await?;
        if futures.balance != futures.withdraw_available {
            return Err(CycleError::fatal("residual futures position after hedge cover"));
        }
        self.global
            .futures_transfer("USDT", futures.balance, TransferDirection::FuturesToSpot)
            .await?;
        info!(amount = futures.balance, "hedge margin returned to spot");

        Ok(())
    }

    /// Open a 10x futures short for `quantity` of `asset`, rounded to the
    /// futures book's quantity precision. Returns the hedged quantity.
    async fn hedge_short(&self, asset: &str, quantity: f64) -> Result<f64, CycleError> {
        let pair = global_pair(asset);
        self.global.futures_set_leverage(&pair, HEDGE_LEVERAGE).await?;

        let precision = self.global.futures_qty_precision(&pair).await?;
        let scale = 10f64.powi(precision as i32);
        let hedge_qty = (quantity * scale).round() / scale;

        self.global
            .futures_market_order(&pair, OrderSide::Sell, hedge_qty)
            .await?;
        info!(pair = %pair, quantity = hedge_qty, "futures short hedge opened");
        Ok(hedge_qty)
    }

    /// Wait until a relay order's filled amount reaches the requested amount.
    async fn wait_relay_fill(
        &self,
        order_id: &str,
        amount: f64,
        what: &'static str,
    ) -> Result<(), CycleError> {
        let relay = Arc::clone(&self.relay);
        let id = order_id.to_string();
        self.order_poll
            .run(what, move || {
                let relay = Arc::clone(&relay);
                let id = id.clone();
                async move {
                    let filled = relay.filled_amount(&id).await?;
                    if (filled - amount).abs() < 1e-9 {
                        Ok(Probe::Ready(()))
                    } else {
                        Ok(Probe::Retry)
                    }
                }
            })
            .await
    }
}
