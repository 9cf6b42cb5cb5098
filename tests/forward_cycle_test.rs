//! End-to-end run of the forward relocation cycle against scripted venues.
//!
//! Every asynchronous venue interaction (wallet generation, withdrawal
//! settlement, deposit recognition, order fills) reports "not yet" at least
//! once before completing, so the test exercises the retry paths as well as
//! the happy path. Time is paused, so the poll delays elapse instantly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kimp_arb::settings::Settings;
use kimp_arb::strategy::price_table::PriceTable;
use kimp_arb::strategy::trader::Trader;
use kimp_arb::strategy::types::{
    AccountPermissions, AddressState, CycleState, DepositAddress, DepositState, FuturesBalance,
    OrderFill, OrderSide, TransferDirection, Venue, WithdrawStatus,
};
use kimp_arb::strategy::venues::{DomesticVenue, GlobalVenue, RelayVenue};
use kimp_arb::DynError;

fn test_settings() -> Settings {
    Settings {
        market_list: vec!["XRP".to_string(), "EOS".to_string()],
        upbit_access_key: String::new(),
        upbit_secret_key: String::new(),
        binance_access_key: String::new(),
        binance_secret_key: String::new(),
        huobi_korea_access_key: String::new(),
        huobi_korea_secret_key: String::new(),
        huobi_account_id: 0,
        premium_ratio: 1.5,
        min_quote_balance: 400.0,
        order_poll_secs: 5,
        transfer_poll_secs: 3,
        max_poll_attempts: Some(50),
    }
}

#[derive(Default)]
struct GlobalState {
    futures_margin: f64,
    net_positions: HashMap<String, f64>,
    spot_orders: Vec<(String, String, String)>,
    leverage_calls: Vec<(String, u8)>,
    withdraw_attempts: u32,
    status_polls: u32,
}

struct MockGlobal {
    state: Mutex<GlobalState>,
}

impl MockGlobal {
    fn new() -> Self {
        Self {
            state: Mutex::new(GlobalState::default()),
        }
    }
}

#[async_trait::async_trait]
impl GlobalVenue for MockGlobal {
    async fn account_permissions(&self) -> Result<AccountPermissions, DynError> {
        Ok(AccountPermissions {
            can_trade: true,
            can_withdraw: true,
            can_deposit: true,
        })
    }

    async fn spot_balance(&self, asset: &str) -> Result<f64, DynError> {
        Ok(match asset {
            "USDT" => 1000.0,
            // 99% of the 205.2 XRP requested by the buy settles.
            "XRP" => 203.148,
            "EOS" => 598.6,
            _ => 0.0,
        })
    }

    async fn lot_step(&self, symbol: &str) -> Result<f64, DynError> {
        match symbol {
            "XRPUSDT" => Ok(0.1),
            "EOSUSDT" => Ok(0.01),
            other => Err(format!("no lot step scripted for {}", other).into()),
        }
    }

    async fn market_buy(&self, symbol: &str, quantity: &str) -> Result<(), DynError> {
        let mut state = self.state.lock().unwrap();
        state
            .spot_orders
            .push(("buy".to_string(), symbol.to_string(), quantity.to_string()));
        Ok(())
    }

    async fn market_sell(&self, symbol: &str, quantity: &str) -> Result<(), DynError> {
        let mut state = self.state.lock().unwrap();
        state
            .spot_orders
            .push(("sell".to_string(), symbol.to_string(), quantity.to_string()));
        Ok(())
    }

    async fn futures_balance(&self) -> Result<FuturesBalance, DynError> {
        let state = self.state.lock().unwrap();
        Ok(FuturesBalance {
            balance: state.futures_margin,
            withdraw_available: state.futures_margin,
        })
    }

    async fn futures_set_leverage(&self, symbol: &str, leverage: u8) -> Result<(), DynError> {
        let mut state = self.state.lock().unwrap();
        state.leverage_calls.push((symbol.to_string(), leverage));
        Ok(())
    }

    async fn futures_qty_precision(&self, symbol: &str) -> Result<u32, DynError> {
        match symbol {
            "XRPUSDT" => Ok(1),
            "BTCUSDT" => Ok(3),
            "EOSUSDT" => Ok(1),
            other => Err(format!("no futures precision scripted for {}", other).into()),
        }
    }

    async fn futures_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<(), DynError> {
        let signed = match side {
            OrderSide::Buy => quantity,
            OrderSide::Sell => -quantity,
        };
        let mut state = self.state.lock().unwrap();
        *state.net_positions.entry(symbol.to_string()).or_insert(0.0) += signed;
        Ok(())
    }

    async fn futures_transfer(
        &self,
        _asset: &str,
        amount: f64,
        direction: TransferDirection,
    ) -> Result<(), DynError> {
        let mut state = self.state.lock().unwrap();
        match direction {
            TransferDirection::SpotToFutures => state.futures_margin += amount,
            TransferDirection::FuturesToSpot => state.futures_margin -= amount,
        }
        Ok(())
    }

    async fn withdraw(
        &self,
        _asset: &str,
        _destination: &DepositAddress,
        _amount: &str,
    ) -> Result<String, DynError> {
        let mut state = self.state.lock().unwrap();
        state.withdraw_attempts += 1;
        if state.withdraw_attempts == 1 {
            return Err("balance not settled yet".into());
        }
        Ok("gw-1".to_string())
    }

    async fn withdraw_status(&self, _asset: &str, id: &str) -> Result<WithdrawStatus, DynError> {
        assert_eq!(id, "gw-1");
        let mut state = self.state.lock().unwrap();
        state.status_polls += 1;
        if state.status_polls < 3 {
            return Ok(WithdrawStatus::Pending);
        }
        Ok(WithdrawStatus::Completed {
            txid: "tx-1".to_string(),
        })
    }

    async fn deposit_address(&self, asset: &str) -> Result<DepositAddress, DynError> {
        assert_eq!(asset, "EOS");
        Ok(DepositAddress {
            address: "global-eos-addr".to_string(),
            tag: Some("1001001".to_string()),
        })
    }
}

#[derive(Default)]
struct DomesticState {
    address_requests: u32,
    fill_polls: u32,
    deposit_polls: u32,
    withdrawal_polls: u32,
    sells: Vec<(String, String)>,
    quote_buys: Vec<(String, f64)>,
    withdrawals: Vec<(String, String, String)>,
}

struct MockDomestic {
    state: Mutex<DomesticState>,
}

impl MockDomestic {
    fn new() -> Self {
        Self {
            state: Mutex::new(DomesticState::default()),
        }
    }
}

#[async_trait::async_trait]
impl DomesticVenue for MockDomestic {
    async fn balance(&self, currency: &str) -> Result<f64, DynError> {
        Ok(match currency {
            "XRP" => 203.1,
            "KRW" => 1_261_251.0,
            "BTC" => 0.0135,
            _ => 0.0,
        })
    }

    async fn request_deposit_address(&self, currency: &str) -> Result<AddressState, DynError> {
        assert_eq!(currency, "XRP");
        let mut state = self.state.lock().unwrap();
        state.address_requests += 1;
        if state.address_requests == 1 {
            return Ok(AddressState::Generating);
        }
        Ok(AddressState::Ready(DepositAddress {
            address: "dom-xrp-addr".to_string(),
            tag: Some("7777".to_string()),
        }))
    }

    async fn find_deposit(&self, currency: &str, txid: &str) -> Result<DepositState, DynError> {
        assert_eq!(currency, "XRP");
        assert_eq!(txid, "tx-1");
        let mut state = self.state.lock().unwrap();
        state.deposit_polls += 1;
        Ok(match state.deposit_polls {
            1 => DepositState::Pending,
            _ => DepositState::Accepted,
        })
    }

    async fn market_sell(&self, market: &str, volume: &str) -> Result<String, DynError> {
        let mut state = self.state.lock().unwrap();
        state.sells.push((market.to_string(), volume.to_string()));
        Ok("dom-sell-1".to_string())
    }

    async fn buy_by_quote(&self, market: &str, quote_amount: f64) -> Result<String, DynError> {
        let mut state = self.state.lock().unwrap();
        state.quote_buys.push((market.to_string(), quote_amount));
        Ok("dom-buy-1".to_string())
    }

    async fn order_fill(&self, uuid: &str) -> Result<OrderFill, DynError> {
        assert_eq!(uuid, "dom-buy-1");
        let mut state = self.state.lock().unwrap();
        state.fill_polls += 1;
        if state.fill_polls == 1 {
            return Ok(OrderFill {
                trade_count: 0,
                avg_price: 0.0,
            });
        }
        Ok(OrderFill {
            trade_count: 1,
            avg_price: 94_000_000.0,
        })
    }

    async fn withdraw(
        &self,
        currency: &str,
        amount: &str,
        address: &str,
    ) -> Result<String, DynError> {
        let mut state = self.state.lock().unwrap();
        state.withdrawals.push((
            currency.to_string(),
            amount.to_string(),
            address.to_string(),
        ));
        Ok("dom-wd-1".to_string())
    }

    async fn withdrawal_done(&self, uuid: &str) -> Result<bool, DynError> {
        assert_eq!(uuid, "dom-wd-1");
        let mut state = self.state.lock().unwrap();
        state.withdrawal_polls += 1;
        Ok(state.withdrawal_polls > 1)
    }
}

#[derive(Default)]
struct RelayState {
    orders: HashMap<String, (f64, u32)>,
    order_seq: u32,
    sell_attempts: u32,
    withdraw_attempts: u32,
    confirm_polls: u32,
    withdrawals: Vec<(String, f64, f64)>,
}

struct MockRelay {
    state: Mutex<RelayState>,
}

impl MockRelay {
    fn new() -> Self {
        Self {
            state: Mutex::new(RelayState::default()),
        }
    }
}

#[async_trait::async_trait]
impl RelayVenue for MockRelay {
    async fn balance(&self, currency: &str) -> Result<f64, DynError> {
        Ok(match currency {
            "krw" => 894_000.0,
            _ => 0.0,
        })
    }

    async fn best_ask(&self, symbol: &str) -> Result<f64, DynError> {
        assert_eq!(symbol, "usdtkrw");
        Ok(1490.0)
    }

    async fn limit_buy(&self, _symbol: &str, amount: f64, _price: f64) -> Result<String, DynError> {
        let mut state = self.state.lock().unwrap();
        state.order_seq += 1;
        let id = format!("r-buy-{}", state.order_seq);
        state.orders.insert(id.clone(), (amount, 0));
        Ok(id)
    }

    async fn market_sell(&self, symbol: &str, amount: f64) -> Result<String, DynError> {
        assert_eq!(symbol, "btckrw");
        let mut state = self.state.lock().unwrap();
        state.sell_attempts += 1;
        if state.sell_attempts == 1 {
            return Err("deposit not yet spendable".into());
        }
        state.orders.insert("r-sell-1".to_string(), (amount, 0));
        Ok("r-sell-1".to_string())
    }

    async fn filled_amount(&self, order_id: &str) -> Result<f64, DynError> {
        let mut state = self.state.lock().unwrap();
        let (amount, polls) = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| format!("unknown order {}", order_id))?;
        *polls += 1;
        if *polls == 1 {
            return Ok(0.0);
        }
        Ok(*amount)
    }

    async fn deposit_address(&self, currency: &str, chain: &str) -> Result<String, DynError> {
        assert_eq!(currency, "btc");
        assert_eq!(chain, "btc");
        Ok("relay-btc-addr".to_string())
    }

    async fn withdraw(
        &self,
        currency: &str,
        destination: &DepositAddress,
        amount: f64,
        fee: f64,
    ) -> Result<String, DynError> {
        assert_eq!(destination.address, "global-eos-addr");
        let mut state = self.state.lock().unwrap();
        state.withdraw_attempts += 1;
        if state.withdraw_attempts == 1 {
            return Err("insufficient available balance".into());
        }
        state.withdrawals.push((currency.to_string(), amount, fee));
        Ok("r-wd-1".to_string())
    }

    async fn latest_withdraw_confirmed(&self, currency: &str) -> Result<bool, DynError> {
        assert_eq!(currency, "eos");
        let mut state = self.state.lock().unwrap();
        state.confirm_polls += 1;
        Ok(state.confirm_polls > 1)
    }
}

#[tokio::test(start_paused = true)]
async fn forward_cycle_runs_to_completion() {
    let table = Arc::new(PriceTable::new());
    // XRP: 6210 / (4.10 * 1490) is a 1.65% premium, above the 1.5 threshold.
    // EOS: 1490 / (1.0 * 1490) is flat.
    table.set(Venue::Upbit, "KRW-XRP", 6210.0);
    table.set(Venue::Binance, "XRPUSDT", 4.10);
    table.set(Venue::Upbit, "KRW-EOS", 1490.0);
    table.set(Venue::Binance, "EOSUSDT", 1.0);
    table.set(Venue::Huobi, "usdt", 1490.0);

    let global = Arc::new(MockGlobal::new());
    let domestic = Arc::new(MockDomestic::new());
    let relay = Arc::new(MockRelay::new());

    let mut trader = Trader::new(
        Arc::clone(&table),
        Arc::clone(&global) as Arc<dyn GlobalVenue>,
        Arc::clone(&domestic) as Arc<dyn DomesticVenue>,
        Arc::clone(&relay) as Arc<dyn RelayVenue>,
        &test_settings(),
    );

    trader.monitor().await.expect("cycle should complete");
    assert_eq!(trader.state(), CycleState::Idle);

    let global_state = global.state.lock().unwrap();

    // Hedge margin fully returned to spot.
    assert!(global_state.futures_margin.abs() < 1e-9);

    // Every futures short was covered by an equal buy.
    for (symbol, net) in &global_state.net_positions {
        assert!(
            net.abs() < 1e-9,
            "residual futures position on {}: {}",
            symbol,
            net
        );
    }
    assert_eq!(global_state.net_positions.len(), 3);

    // Buy leg: 850 USDT with 1% headroom at the 4.10 trigger, floored to the
    // 0.1 lot step. Sell leg: the settled EOS balance on the 0.01 step.
    assert_eq!(
        global_state.spot_orders,
        vec![
            ("buy".to_string(), "XRPUSDT".to_string(), "205.2".to_string()),
            ("sell".to_string(), "EOSUSDT".to_string(), "598.60".to_string()),
        ]
    );

    // Hedges always open at 10x.
    assert!(!global_state.leverage_calls.is_empty());
    assert!(global_state.leverage_calls.iter().all(|(_, l)| *l == 10));

    let domestic_state = domestic.state.lock().unwrap();

    // The received XRP was sold in full on the domestic book.
    assert_eq!(
        domestic_state.sells,
        vec![("KRW-XRP".to_string(), "203.1".to_string())]
    );

    // BTC bridge buy spends the KRW proceeds with headroom, floored to whole KRW.
    assert_eq!(
        domestic_state.quote_buys,
        vec![("KRW-BTC".to_string(), (1_261_251.0f64 * 0.9995).floor())]
    );

    // BTC leaves for the relay venue net of the chain fee, on the 0.0001 step.
    assert_eq!(
        domestic_state.withdrawals,
        vec![(
            "BTC".to_string(),
            "0.0126".to_string(),
            "relay-btc-addr".to_string()
        )]
    );

    let relay_state = relay.state.lock().unwrap();

    // USDT buy, then EOS buy, both filled.
    assert_eq!(relay_state.order_seq, 2);
    assert_eq!(relay_state.withdrawals.len(), 1);
    let (currency, _, fee) = &relay_state.withdrawals[0];
    assert_eq!(currency, "eos");
    assert_eq!(*fee, 0.1);
}

#[tokio::test(start_paused = true)]
async fn cycle_aborts_when_futures_account_not_flat() {
    let table = Arc::new(PriceTable::new());
    table.set(Venue::Upbit, "KRW-XRP", 6210.0);
    table.set(Venue::Binance, "XRPUSDT", 4.10);
    table.set(Venue::Huobi, "usdt", 1490.0);

    let global = Arc::new(MockGlobal::new());
    global.state.lock().unwrap().futures_margin = 25.0;
    let domestic = Arc::new(MockDomestic::new());
    let relay = Arc::new(MockRelay::new());

    let settings = Settings {
        market_list: vec!["XRP".to_string()],
        ..test_settings()
    };
    let mut trader = Trader::new(
        table,
        Arc::clone(&global) as Arc<dyn GlobalVenue>,
        domestic as Arc<dyn DomesticVenue>,
        relay as Arc<dyn RelayVenue>,
        &settings,
    );

    let err = trader.monitor().await.expect_err("cycle must abort");
    assert!(err.is_fatal());
    assert_eq!(trader.state(), CycleState::Preparing);

    // Nothing was bought and no capital moved.
    let state = global.state.lock().unwrap();
    assert!(state.spot_orders.is_empty());
    assert_eq!(state.futures_margin, 25.0);
}
