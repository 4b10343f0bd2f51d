//! Commission and slippage arithmetic for simulated fills.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::domain::bot::ExchangeConfig;
use crate::domain::order::OrderSide;

/// Default taker commission when the exchange row carries none (0.05%).
pub const DEFAULT_COMMISSION: Decimal = dec!(0.0005);

/// Commission on a notional amount.
pub fn commission(notional: Decimal, rate: Decimal) -> Decimal {
    (notional * rate).round_dp(8)
}

/// Fill price after applying slippage against the taker.
///
/// Buys fill above the reference price, sells below.
pub fn slipped_price(reference: Decimal, slippage: Decimal, side: OrderSide) -> Decimal {
    match side {
        OrderSide::Buy => reference * (Decimal::ONE + slippage),
        OrderSide::Sell => reference * (Decimal::ONE - slippage),
    }
}

/// Simulated fill economics for one order.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedFill {
    pub price: Decimal,
    pub notional: Decimal,
    pub fee: Decimal,
}

/// Compute the fill an order would get on this exchange in paper mode.
pub fn simulate_fill(
    exchange: &ExchangeConfig,
    reference_price: Decimal,
    amount: Decimal,
    side: OrderSide,
) -> SimulatedFill {
    let price = slipped_price(reference_price, exchange.slippage_rate(), side);
    let notional = price * amount;
    SimulatedFill {
        price,
        notional,
        fee: commission(notional, exchange.commission_rate()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(slippage: Option<Decimal>, commission: Option<Decimal>) -> ExchangeConfig {
        ExchangeConfig {
            id: 1,
            name: "test".into(),
            kind: "binance".into(),
            testnet: true,
            api_key: None,
            secret_key: None,
            slippage,
            commission,
        }
    }

    #[test]
    fn test_default_commission_rate() {
        let fill = simulate_fill(&exchange(None, None), dec!(100), dec!(10), OrderSide::Buy);
        // notional 1000 at 0.05% = 0.5
        assert_eq!(fill.fee, dec!(0.50000000));
        assert_eq!(fill.price, dec!(100));
    }

    #[test]
    fn test_slippage_direction() {
        let ex = exchange(Some(dec!(0.001)), None);
        let buy = simulate_fill(&ex, dec!(100), dec!(1), OrderSide::Buy);
        let sell = simulate_fill(&ex, dec!(100), dec!(1), OrderSide::Sell);
        assert_eq!(buy.price, dec!(100.1));
        assert_eq!(sell.price, dec!(99.9));
    }
}
