//! Shared test doubles: a scriptable exchange, a scripted LLM and fixture
//! builders for pipeline contexts.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use conclave::adapters::{MemoryStore, Store};
use conclave::config::DebateConfig;
use conclave::domain::bot::{BotConfig, ExchangeConfig, QuantWeights, RiskLimits, TradingMode};
use conclave::domain::market::{
    AccountBalance, Candle, MarketCatalogue, MarketInfo, OrderbookSnapshot, PublicTrade, Ticker,
};
use conclave::domain::order::{Order, OrderRequest, OrderStatus, Position};
use conclave::error::{ConclaveError, LlmError, Result};
use conclave::exchange::adapter::{ExchangeAdapter, ExchangeFactory, StreamChannel};
use conclave::exchange::{RateLimitedClient, RateLimiter};
use conclave::llm::adapter::{CompletionRequest, LlmAdapter};
use conclave::llm::{FallbackChain, LlmConfig, LlmFactory, PromptCache};
use conclave::market::{MarketCache, MarketDataService, StreamManager};
use conclave::pipeline::plugin::PluginContext;

// ==================== Mock exchange ====================

/// Scriptable exchange adapter: static markets/candles, adjustable prices
/// and funding, instant acks for orders.
#[derive(Default)]
pub struct MockExchange {
    pub markets: Mutex<MarketCatalogue>,
    pub candles: Mutex<HashMap<(String, String), Vec<Candle>>>,
    pub prices: Mutex<HashMap<String, Decimal>>,
    pub funding: Mutex<HashMap<String, Decimal>>,
    pub orders_sent: Mutex<Vec<OrderRequest>>,
    pub ticker_calls: AtomicU32,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_market(self, symbol: &str, quote_volume: Decimal) -> Self {
        let (base, quote) = symbol.split_once('/').unwrap_or((symbol, "USDT"));
        self.markets.lock().unwrap().markets.insert(
            symbol.to_string(),
            MarketInfo {
                symbol: symbol.to_string(),
                base: base.to_string(),
                quote: quote.to_string(),
                active: true,
                quote_volume_24h: quote_volume,
                min_amount: None,
                price_precision: Some(2),
            },
        );
        self
    }

    /// Seed `count` candles rising in 0.25 steps from `start`, for every
    /// given timeframe, and align the ticker to the last close.
    pub fn with_rising_candles(
        self,
        symbol: &str,
        timeframes: &[&str],
        count: usize,
        start: Decimal,
    ) -> Self {
        let step = dec!(0.25);
        let now = Utc::now();
        for timeframe in timeframes {
            let candles: Vec<Candle> = (0..count)
                .map(|i| {
                    let close = start + step * Decimal::from(i as i64);
                    Candle {
                        timestamp: now - ChronoDuration::minutes((count - i) as i64 * 3),
                        open: close - step,
                        high: close + step,
                        low: close - step,
                        close,
                        volume: dec!(1000),
                    }
                })
                .collect();
            self.candles
                .lock()
                .unwrap()
                .insert((symbol.to_string(), timeframe.to_string()), candles);
        }
        let last = start + step * Decimal::from(count as i64 - 1);
        self.prices.lock().unwrap().insert(symbol.to_string(), last);
        self
    }

    pub fn with_funding(self, symbol: &str, rate: Decimal) -> Self {
        self.funding
            .lock()
            .unwrap()
            .insert(symbol.to_string(), rate);
        self
    }

    pub fn last_price(&self, symbol: &str) -> Decimal {
        self.prices
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .unwrap_or(dec!(100))
    }
}

#[async_trait]
impl ExchangeAdapter for MockExchange {
    fn kind(&self) -> &str {
        "mock"
    }

    fn is_testnet(&self) -> bool {
        true
    }

    async fn load_markets(&self) -> Result<MarketCatalogue> {
        Ok(self.markets.lock().unwrap().clone())
    }

    async fn fetch_ohlcv(&self, symbol: &str, timeframe: &str, limit: u32) -> Result<Vec<Candle>> {
        let candles = self.candles.lock().unwrap();
        let series = candles
            .get(&(symbol.to_string(), timeframe.to_string()))
            .cloned()
            .unwrap_or_default();
        let keep = series.len().saturating_sub(limit as usize);
        Ok(series[keep..].to_vec())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        self.ticker_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Ticker {
            symbol: symbol.to_string(),
            last: self.last_price(symbol),
            bid: None,
            ask: None,
            timestamp: Utc::now(),
        })
    }

    async fn fetch_orderbook(&self, symbol: &str, _depth: u32) -> Result<OrderbookSnapshot> {
        let last = self.last_price(symbol);
        Ok(OrderbookSnapshot {
            symbol: symbol.to_string(),
            bids: vec![(last - dec!(0.01), dec!(10))],
            asks: vec![(last + dec!(0.01), dec!(10))],
            timestamp: Utc::now(),
        })
    }

    async fn fetch_open_interest(&self, _symbol: &str) -> Result<Decimal> {
        Ok(dec!(1000000))
    }

    async fn fetch_funding_rate(&self, symbol: &str) -> Result<Decimal> {
        Ok(self
            .funding
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .unwrap_or(dec!(0.0001)))
    }

    async fn fetch_balance(&self) -> Result<AccountBalance> {
        Ok(AccountBalance {
            currency: "USDT".into(),
            free: dec!(10000),
            used: dec!(0),
            total: dec!(10000),
            timestamp: Utc::now(),
        })
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>> {
        Ok(Vec::new())
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<Order> {
        self.orders_sent.lock().unwrap().push(request.clone());
        let price = request
            .price
            .unwrap_or_else(|| self.last_price(&request.symbol));
        Ok(Order {
            id: format!("mock-{}", self.orders_sent.lock().unwrap().len()),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            status: OrderStatus::Closed,
            amount: request.amount,
            filled: request.amount,
            average_price: Some(price),
            fee: Some((price * request.amount * dec!(0.0005)).round_dp(8)),
            timestamp: Utc::now(),
        })
    }

    async fn cancel_order(&self, _order_id: &str, _symbol: &str) -> Result<()> {
        Ok(())
    }

    async fn watch_ticker(&self, _symbol: &str) -> Result<BoxStream<'static, Result<Ticker>>> {
        Ok(futures_util::stream::pending().boxed())
    }

    async fn watch_trades(&self, _symbol: &str) -> Result<BoxStream<'static, Result<PublicTrade>>> {
        Ok(futures_util::stream::pending().boxed())
    }

    async fn unwatch(&self, _symbol: &str, _channel: StreamChannel) -> Result<()> {
        Ok(())
    }
}

/// Factory handing out one shared mock adapter, optionally refusing a
/// specific exchange id to simulate broken venue wiring.
pub struct MockExchangeFactory {
    pub adapter: Arc<MockExchange>,
    pub fail_for_exchange: Option<i64>,
}

impl ExchangeFactory for MockExchangeFactory {
    fn create(&self, config: &ExchangeConfig) -> Result<Arc<dyn ExchangeAdapter>> {
        if Some(config.id) == self.fail_for_exchange {
            return Err(ConclaveError::InvalidConfig(format!(
                "no adapter for exchange {}",
                config.id
            )));
        }
        Ok(self.adapter.clone())
    }
}

// ==================== Scripted LLM ====================

/// LLM adapter answering from a queue, then from a default value. An
/// optional delay simulates a slow provider for timeout paths.
pub struct ScriptedLlm {
    name: String,
    queue: Mutex<VecDeque<std::result::Result<Value, LlmError>>>,
    default: Value,
    delay: Option<std::time::Duration>,
    pub calls: AtomicU32,
}

impl ScriptedLlm {
    pub fn answering(name: &str, default: Value) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
            default,
            delay: None,
            calls: AtomicU32::new(0),
        })
    }

    pub fn slow(name: &str, default: Value, delay: std::time::Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
            default,
            delay: Some(delay),
            calls: AtomicU32::new(0),
        })
    }

    /// Always fail with a server error.
    pub fn broken(name: &str) -> Arc<Self> {
        let adapter = Self::answering(name, Value::Null);
        for _ in 0..64 {
            adapter.push(Err(LlmError::Server {
                status: 500,
                message: "upstream exploded".into(),
            }));
        }
        adapter
    }

    pub fn push(&self, response: std::result::Result<Value, LlmError>) {
        self.queue.lock().unwrap().push_back(response);
    }
}

#[async_trait]
impl LlmAdapter for ScriptedLlm {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, _request: &CompletionRequest) -> std::result::Result<Value, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let queued = self.queue.lock().unwrap().pop_front();
        match queued {
            Some(response) => response,
            None => Ok(self.default.clone()),
        }
    }
}

// ==================== Fixtures ====================

pub fn exchange_config() -> ExchangeConfig {
    ExchangeConfig {
        id: 1,
        name: "mock".into(),
        kind: "mock".into(),
        testnet: true,
        api_key: None,
        secret_key: None,
        slippage: None,
        commission: None,
    }
}

pub fn bot_config(id: i64) -> BotConfig {
    BotConfig {
        id,
        name: format!("bot_{}", id),
        display_name: format!("Bot {}", id),
        exchange_id: 1,
        workflow_id: 1,
        llm_id: None,
        trading_mode: TradingMode::Paper,
        cycle_interval_secs: 300,
        max_concurrent_symbols: 3,
        timeframes: vec!["3m".into(), "4h".into()],
        ohlcv_limits: HashMap::from([("3m".into(), 100), ("4h".into(), 60)]),
        indicator_configs: Value::Null,
        quant_weights: QuantWeights::default(),
        quant_threshold: 50.0,
        risk_limits: RiskLimits::default(),
        tracing_project: None,
        is_active: true,
    }
}

pub fn llm_config_row(id: i64) -> LlmConfig {
    LlmConfig {
        id,
        name: format!("llm_{}", id),
        provider: conclave::llm::LlmProvider::Openai,
        base_url: Some("http://localhost:9/v1".into()),
        api_key: None,
        model: "scripted".into(),
        temperature: 0.0,
        timeout_secs: 5,
        is_default: id == 1,
        fallback_ids: vec![],
    }
}

/// Everything a pipeline run needs, wired around the mock exchange and a
/// memory store. The exchange is wrapped in the paper fill layer like the
/// worker does for paper bots.
pub struct TestRig {
    pub exchange: Arc<MockExchange>,
    pub paper: Arc<dyn ExchangeAdapter>,
    pub store: Arc<MemoryStore>,
    pub llm: Arc<LlmFactory>,
    pub ctx: PluginContext,
    pub shutdown_tx: tokio::sync::watch::Sender<bool>,
}

pub async fn test_rig(bot: BotConfig, exchange: Arc<MockExchange>) -> TestRig {
    let store = Arc::new(MemoryStore::new());
    store.seed_bot(bot.clone());
    store.seed_exchange(exchange_config());
    store.seed_llm(llm_config_row(1));

    let paper: Arc<dyn ExchangeAdapter> = Arc::new(conclave::exchange::PaperExchange::new(
        exchange.clone(),
        exchange_config(),
    ));
    let limiter = Arc::new(RateLimiter::with_quota("mock", 60000));
    let client = Arc::new(RateLimitedClient::new(paper.clone(), limiter, 10));
    let cache = Arc::new(MarketCache::with_defaults());
    let market = Arc::new(MarketDataService::new(client.clone(), cache.clone()));
    let streams = Arc::new(StreamManager::new(paper.clone(), cache.clone()));
    let llm = Arc::new(LlmFactory::new(vec![llm_config_row(1)]));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let ctx = PluginContext {
        exchange: client,
        market,
        cache,
        streams,
        llm: llm.clone(),
        store: store.clone(),
        bot: Arc::new(bot),
        exchange_config: Arc::new(exchange_config()),
        prompt_cache: Arc::new(PromptCache::new()),
        debate_defaults: DebateConfig::default(),
        prompts_dir: None,
        shutdown: shutdown_rx,
    };

    TestRig {
        exchange,
        paper,
        store,
        llm,
        ctx,
        shutdown_tx,
    }
}

/// Wire a scripted adapter as the default LLM chain.
pub fn script_default_llm(rig: &TestRig, adapter: Arc<ScriptedLlm>) {
    rig.llm
        .register_chain(1, Arc::new(FallbackChain::single(adapter)));
}

/// A decision payload the scripted LLM can answer with.
pub fn batch_decision_json(symbol: &str, action: &str, allocation: f64, leverage: u32) -> Value {
    serde_json::json!({
        "decisions": [{
            "symbol": symbol,
            "action": action,
            "allocation_pct": allocation,
            "confidence": 75.0,
            "leverage": leverage,
            "stop_loss": null,
            "take_profit": null,
            "reasoning": "scripted",
        }],
        "total_allocation_pct": allocation,
        "cash_reserve_pct": 100.0 - allocation,
        "strategy_rationale": "scripted",
    })
}
