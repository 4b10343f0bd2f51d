//! Orders, positions and the durable trade record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::decision::DecisionAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }

    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "long" => Some(PositionSide::Long),
            "short" => Some(PositionSide::Short),
            _ => None,
        }
    }

    /// Order side that opens a position on this side.
    pub fn entry_order_side(&self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    TakeProfit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Stop => "stop",
            OrderType::TakeProfit => "take_profit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    Closed,
    Canceled,
    Rejected,
}

/// Order request handed to the exchange adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub leverage: u32,
    pub reduce_only: bool,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// Venue-specific passthrough params
    #[serde(default)]
    pub params: serde_json::Value,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: OrderSide, amount: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            amount,
            price: None,
            leverage: 1,
            reduce_only: false,
            stop_loss: None,
            take_profit: None,
            params: serde_json::Value::Null,
        }
    }

    pub fn with_leverage(mut self, leverage: u32) -> Self {
        self.leverage = leverage;
        self
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    pub fn with_stops(mut self, stop_loss: Option<Decimal>, take_profit: Option<Decimal>) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }
}

/// Order acknowledgement from the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub amount: Decimal,
    pub filled: Decimal,
    pub average_price: Option<Decimal>,
    pub fee: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl Order {
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Closed && self.filled >= self.amount
    }
}

/// An open derivative position as reported by the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub leverage: u32,
    pub margin_used: Decimal,
    pub unrealized_pnl: Decimal,
    pub liquidation_price: Option<Decimal>,
}

impl Position {
    /// Unrealized PnL as a percentage of entry, sign-adjusted for side.
    pub fn unrealized_pnl_pct(&self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        if self.entry_price.is_zero() {
            return 0.0;
        }
        let raw = (self.mark_price - self.entry_price) / self.entry_price;
        let pct = raw.to_f64().unwrap_or(0.0) * 100.0;
        match self.side {
            PositionSide::Long => pct,
            PositionSide::Short => -pct,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Open,
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::Closed => "closed",
        }
    }
}

/// Durable trade history row. Appended on open, updated on close.
///
/// At most one row per `(bot_id, symbol)` has status=open; reprocessing a
/// cycle never duplicates rows because `(bot_id, cycle_id, symbol, action)`
/// is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Option<i64>,
    pub bot_id: i64,
    pub symbol: String,
    pub side: PositionSide,
    pub action: DecisionAction,
    pub entry_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub amount: Decimal,
    pub leverage: u32,
    pub pnl_usd: Option<Decimal>,
    pub pnl_percent: Option<f64>,
    pub fee_paid: Option<Decimal>,
    pub status: TradeStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub cycle_id: i64,
    pub order_id: Option<String>,
}

impl TradeRecord {
    pub fn is_win(&self) -> bool {
        self.pnl_usd.map(|p| p > Decimal::ZERO).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_mapping() {
        assert_eq!(PositionSide::Long.entry_order_side(), OrderSide::Buy);
        assert_eq!(PositionSide::Short.entry_order_side(), OrderSide::Sell);
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
    }

    #[test]
    fn test_unrealized_pnl_pct() {
        let mut pos = Position {
            symbol: "BTC/USDT".into(),
            side: PositionSide::Long,
            size: dec!(0.1),
            entry_price: dec!(100),
            mark_price: dec!(110),
            leverage: 3,
            margin_used: dec!(10),
            unrealized_pnl: dec!(1),
            liquidation_price: None,
        };
        assert!((pos.unrealized_pnl_pct() - 10.0).abs() < 1e-9);

        pos.side = PositionSide::Short;
        assert!((pos.unrealized_pnl_pct() + 10.0).abs() < 1e-9);
    }
}
