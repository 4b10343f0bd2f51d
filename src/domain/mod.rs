//! Core domain types shared across the orchestration core.

pub mod bot;
pub mod decision;
pub mod market;
pub mod order;
pub mod state;

pub use bot::{BotConfig, ExchangeConfig, QuantWeights, RiskLimits, TradingMode};
pub use decision::{
    AnalystOutput, BatchDecision, DebateAction, DebateOutcome, DecisionAction, KeyLevels,
    PortfolioDecision, TraderSuggestion, TrendCall,
};
pub use market::{
    AccountBalance, Candle, IndicatorSet, MarketCatalogue, MarketInfo, OrderbookSnapshot,
    PublicTrade, QuantScore, Ticker,
};
pub use order::{
    Order, OrderRequest, OrderSide, OrderStatus, OrderType, Position, PositionSide, TradeRecord,
    TradeStatus,
};
pub use state::{
    BotState, BotStatus, CycleError, CycleState, ExecutionOutcome, ExecutionStatus,
    PerformanceWindow, RunRecord, TrailingStopProposal,
};
