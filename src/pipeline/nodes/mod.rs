//! Builtin pipeline nodes.

pub mod batch_decision;
pub mod coins_pick;
pub mod debate_decision;
pub mod execution;
pub mod market_state;
pub mod quant_filter;
pub mod risk_monitor;

use super::registry::PluginRegistry;

/// Register every builtin node into the registry.
pub fn register_builtins(registry: &mut PluginRegistry) {
    registry.register(coins_pick::metadata(), coins_pick::constructor);
    registry.register(market_state::metadata(), market_state::constructor);
    registry.register(quant_filter::metadata(), quant_filter::constructor);
    registry.register(batch_decision::metadata(), batch_decision::constructor);
    registry.register(debate_decision::metadata(), debate_decision::constructor);
    registry.register(risk_monitor::metadata(), risk_monitor::constructor);
    registry.register(execution::metadata(), execution::constructor);
}
