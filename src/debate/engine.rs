//! The staged debate pipeline.
//!
//! Phase A fans the analyst out across candidate symbols in parallel; a
//! failing symbol is dropped and logged, never sinking the cycle. Phase B
//! runs bull and bear concurrently for `max_rounds` rounds, each side seeing
//! the previous round's opposing view. Phase C hands everything to the risk
//! manager for the final portfolio decision. Every phase is bounded by
//! `timeout_per_phase` and degrades to a safe fallback on expiry.

use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::domain::decision::{
    AnalystOutput, BatchDecision, DebateOutcome, TraderSuggestion,
};
use crate::domain::state::CycleState;
use crate::error::Result;
use crate::llm::{CompletionRequest, FallbackChain, LlmFactory};
use crate::pipeline::plugin::PluginContext;

use super::prompts::{RolePrompts, ROLE_ANALYST, ROLE_BEAR, ROLE_BULL, ROLE_RISK_MANAGER};
use super::schema;

/// Engine settings resolved from node config and system configs.
#[derive(Debug, Clone)]
pub struct DebateSettings {
    pub max_rounds: u32,
    pub timeout_per_phase: Duration,
    pub trade_history_limit: usize,
    /// Per-role LLM routing from node config; empty means bot-level LLM
    pub role_llm_ids: HashMap<String, i64>,
}

impl DebateSettings {
    pub fn from_context(ctx: &PluginContext, node_config: &serde_json::Value) -> Self {
        let defaults = &ctx.debate_defaults;
        Self {
            max_rounds: node_config
                .get("max_rounds")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32)
                .unwrap_or(defaults.max_rounds)
                .max(1),
            timeout_per_phase: Duration::from_secs(
                node_config
                    .get("timeout_per_phase")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(defaults.timeout_per_phase_secs),
            ),
            trade_history_limit: node_config
                .get("trade_history_limit")
                .and_then(|v| v.as_u64())
                .map(|v| v as usize)
                .unwrap_or(defaults.trade_history_limit),
            role_llm_ids: node_config
                .get("role_llm_ids")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SuggestionBatch {
    suggestions: Vec<TraderSuggestion>,
}

/// Run the full debate for one cycle and produce the portfolio decision.
pub async fn run_debate(
    ctx: &PluginContext,
    state: &CycleState,
    settings: &DebateSettings,
    prompts: &RolePrompts,
) -> Result<DebateOutcome> {
    let market_context = build_market_context(state);

    info!(
        symbols = state.symbols.len(),
        rounds = settings.max_rounds,
        "debate started"
    );

    // ==================== Phase A: analyst ====================
    let analyst_outputs = run_analysts(ctx, state, settings, prompts, &market_context).await;
    let analyst_summary = if analyst_outputs.is_empty() {
        "The analyst produced no usable reports this cycle.".to_string()
    } else {
        analyst_outputs
            .iter()
            .map(|a| format!("{}: {} — {}", a.symbol, a.trend.as_str(), a.summary))
            .collect::<Vec<_>>()
            .join("\n")
    };

    // ==================== Phase B: bull vs bear rounds ====================
    let (bull_suggestions, bear_suggestions, rounds_completed) = run_debate_rounds(
        ctx,
        settings,
        prompts,
        &market_context,
        &analyst_summary,
    )
    .await;

    // ==================== Phase C: risk manager ====================
    let final_decision = run_risk_manager(
        ctx,
        state,
        settings,
        prompts,
        &market_context,
        &analyst_summary,
        &bull_suggestions,
        &bear_suggestions,
    )
    .await;
    let final_decision = normalize_allocations(final_decision, state);

    let debate_summary = format!(
        "analyst: {} reports, bull: {} suggestions, bear: {} suggestions, rounds: {}",
        analyst_outputs.len(),
        bull_suggestions.len(),
        bear_suggestions.len(),
        rounds_completed,
    );
    info!(
        total_allocation = final_decision.total_allocation_pct,
        decisions = final_decision.decisions.len(),
        "debate completed"
    );

    Ok(DebateOutcome {
        analyst_outputs,
        bull_suggestions,
        bear_suggestions,
        rounds_completed,
        final_decision,
        debate_summary,
        completed_at: Utc::now(),
    })
}

fn chain_for(
    llm: &Arc<LlmFactory>,
    settings: &DebateSettings,
    bot_llm_id: Option<i64>,
    role: &str,
) -> Result<Arc<FallbackChain>> {
    llm.chain_for_role(role, &settings.role_llm_ids, bot_llm_id)
}

/// Phase A: one analyst call per candidate symbol, in parallel. Failed
/// symbols are dropped.
async fn run_analysts(
    ctx: &PluginContext,
    state: &CycleState,
    settings: &DebateSettings,
    prompts: &RolePrompts,
    market_context: &str,
) -> Vec<AnalystOutput> {
    let chain = match chain_for(&ctx.llm, settings, ctx.bot.llm_id, ROLE_ANALYST) {
        Ok(chain) => chain,
        Err(e) => {
            warn!("no analyst llm available: {}", e);
            return Vec::new();
        }
    };

    let mut tasks: JoinSet<(String, std::result::Result<AnalystOutput, String>)> = JoinSet::new();
    for symbol in state.symbols.clone() {
        let chain = chain.clone();
        let prompt_cache = ctx.prompt_cache.clone();
        let system = prompts.analyst.clone();
        let per_symbol = symbol_context(state, &symbol);
        let context = market_context.to_string();
        let timeout = settings.timeout_per_phase;

        tasks.spawn(async move {
            let request = CompletionRequest::new(format!(
                "Market overview:\n{}\n\nCandidate symbol {}:\n{}\n\nAnalyse this symbol.",
                context, symbol, per_symbol
            ))
            .with_system(system)
            .with_schema(schema::analyst_schema())
            .with_timeout(timeout);

            let result = tokio::time::timeout(timeout, async {
                let value = chain.complete_cached(&prompt_cache, &request).await?;
                crate::llm::adapter::parse_structured::<AnalystOutput>(value)
            })
            .await;

            match result {
                Ok(Ok(output)) => (symbol, Ok(output)),
                Ok(Err(e)) => (symbol, Err(e.to_string())),
                Err(_) => (symbol, Err("analyst phase timed out".to_string())),
            }
        });
    }

    let mut outputs = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((symbol, Ok(mut output))) => {
                // The model must echo the symbol; repair drift rather than
                // trading the wrong market
                if output.symbol != symbol {
                    debug!(expected = %symbol, got = %output.symbol, "analyst symbol drift repaired");
                    output.symbol = symbol;
                }
                outputs.push(output);
            }
            Ok((symbol, Err(e))) => {
                warn!(symbol = %symbol, "analyst failed, symbol dropped: {}", e);
            }
            Err(e) => warn!("analyst task join error: {}", e),
        }
    }

    outputs.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    outputs
}

/// Phase B: bull and bear run concurrently; each round both see the previous
/// round's opposing view.
async fn run_debate_rounds(
    ctx: &PluginContext,
    settings: &DebateSettings,
    prompts: &RolePrompts,
    market_context: &str,
    analyst_summary: &str,
) -> (Vec<TraderSuggestion>, Vec<TraderSuggestion>, u32) {
    let bull_chain = chain_for(&ctx.llm, settings, ctx.bot.llm_id, ROLE_BULL);
    let bear_chain = chain_for(&ctx.llm, settings, ctx.bot.llm_id, ROLE_BEAR);
    let (bull_chain, bear_chain) = match (bull_chain, bear_chain) {
        (Ok(b), Ok(r)) => (b, r),
        _ => {
            warn!("debate roles unavailable, skipping phase B");
            return (Vec::new(), Vec::new(), 0);
        }
    };

    let mut bull: Vec<TraderSuggestion> = Vec::new();
    let mut bear: Vec<TraderSuggestion> = Vec::new();
    let mut rounds_completed = 0;

    for round in 1..=settings.max_rounds {
        let bull_prompt = round_prompt(market_context, analyst_summary, round, &bear, "bear");
        let bear_prompt = round_prompt(market_context, analyst_summary, round, &bull, "bull");

        let bull_fut = run_side(
            ctx,
            &bull_chain,
            prompts.for_role(ROLE_BULL),
            bull_prompt,
            settings.timeout_per_phase,
        );
        let bear_fut = run_side(
            ctx,
            &bear_chain,
            prompts.for_role(ROLE_BEAR),
            bear_prompt,
            settings.timeout_per_phase,
        );

        let phase = tokio::time::timeout(settings.timeout_per_phase, async {
            tokio::join!(bull_fut, bear_fut)
        })
        .await;

        match phase {
            Ok((new_bull, new_bear)) => {
                debug!(
                    round,
                    bull = new_bull.len(),
                    bear = new_bear.len(),
                    "debate round completed"
                );
                if !new_bull.is_empty() {
                    bull = new_bull;
                }
                if !new_bear.is_empty() {
                    bear = new_bear;
                }
                rounds_completed = round;
            }
            Err(_) => {
                warn!(round, "debate round timed out, keeping previous round");
                break;
            }
        }
    }

    (bull, bear, rounds_completed)
}

async fn run_side(
    ctx: &PluginContext,
    chain: &Arc<FallbackChain>,
    system: &str,
    prompt: String,
    timeout: Duration,
) -> Vec<TraderSuggestion> {
    let request = CompletionRequest::new(prompt)
        .with_system(system)
        .with_schema(schema::suggestions_schema())
        .with_timeout(timeout);

    match chain.complete_cached(&ctx.prompt_cache, &request).await {
        Ok(value) => match crate::llm::adapter::parse_structured::<SuggestionBatch>(value) {
            Ok(batch) => batch.suggestions,
            Err(e) => {
                warn!("trader suggestions failed schema: {}", e);
                Vec::new()
            }
        },
        Err(e) => {
            warn!("trader side failed: {}", e);
            Vec::new()
        }
    }
}

fn round_prompt(
    market_context: &str,
    analyst_summary: &str,
    round: u32,
    opposing: &[TraderSuggestion],
    opposing_name: &str,
) -> String {
    let mut prompt = format!(
        "Analyst summary:\n{}\n\nMarket data:\n{}\n\nRound {}.",
        analyst_summary, market_context, round
    );
    if opposing.is_empty() {
        prompt.push_str(" Give your suggestions.");
    } else {
        prompt.push_str(&format!(
            "\nThe {} side argued last round:\n",
            opposing_name
        ));
        for s in opposing {
            prompt.push_str(&format!(
                "- {}: {:?} conf={:.0} alloc={:.1}% — {}\n",
                s.symbol, s.action, s.confidence, s.allocation_pct, s.reasoning
            ));
        }
        prompt.push_str("Address their arguments, then give your updated suggestions.");
    }
    prompt
}

/// Phase C: risk manager synthesis with trade history injection.
#[allow(clippy::too_many_arguments)]
async fn run_risk_manager(
    ctx: &PluginContext,
    state: &CycleState,
    settings: &DebateSettings,
    prompts: &RolePrompts,
    market_context: &str,
    analyst_summary: &str,
    bull: &[TraderSuggestion],
    bear: &[TraderSuggestion],
) -> BatchDecision {
    let fallback = BatchDecision::all_wait(&state.symbols, "debate degraded, holding everything");

    let chain = match chain_for(&ctx.llm, settings, ctx.bot.llm_id, ROLE_RISK_MANAGER) {
        Ok(chain) => chain,
        Err(e) => {
            warn!("no risk manager llm available: {}", e);
            return fallback;
        }
    };

    let mut review = format!(
        "# Debate review\n\nAnalyst summary:\n{}\n\nMarket data:\n{}\n\n## Bull suggestions\n",
        analyst_summary, market_context
    );
    for s in bull {
        review.push_str(&format!(
            "- {}: {:?}, alloc {:.1}%, conf {:.0}\n  reason: {}\n",
            s.symbol, s.action, s.allocation_pct, s.confidence, s.reasoning
        ));
    }
    review.push_str("\n## Bear suggestions\n");
    for s in bear {
        review.push_str(&format!(
            "- {}: {:?}, alloc {:.1}%, conf {:.0}\n  reason: {}\n",
            s.symbol, s.action, s.allocation_pct, s.confidence, s.reasoning
        ));
    }

    review.push_str(&trade_history_block(ctx, settings).await);

    let limits = &state.config_snapshot.risk_limits;
    review.push_str(&format!(
        "\n## Hard constraints\n\
         - total allocation cap: {:.0}%\n\
         - per-symbol cap: {:.0}%\n\
         - position size: ${} to ${}\n\
         - minimum risk/reward: {:.1}:1\n\
         - maximum leverage: {}x\n\n\
         ## Candidate symbols (use exactly these strings)\n{}\n\n\
         Emit the final portfolio decision covering every candidate symbol.",
        limits.max_total_allocation_pct,
        limits.max_single_allocation_pct,
        limits.min_position_size_usd,
        limits.max_position_size_usd,
        limits.min_risk_reward_ratio,
        limits.max_leverage,
        state.symbols.join(", "),
    ));

    let request = CompletionRequest::new(review)
        .with_system(prompts.for_role(ROLE_RISK_MANAGER))
        .with_schema(schema::batch_decision_schema())
        .with_timeout(settings.timeout_per_phase);

    let result = tokio::time::timeout(settings.timeout_per_phase, async {
        let value = chain.complete_cached(&ctx.prompt_cache, &request).await?;
        crate::llm::adapter::parse_structured::<BatchDecision>(value)
    })
    .await;

    match result {
        Ok(Ok(decision)) => decision,
        Ok(Err(e)) => {
            warn!("risk manager failed, defaulting to wait: {}", e);
            fallback
        }
        Err(_) => {
            warn!(
                timeout_secs = settings.timeout_per_phase.as_secs(),
                "risk manager timed out, defaulting to wait"
            );
            fallback
        }
    }
}

/// Last-N trades, aggregate win rate and consecutive-loss indicator for
/// prompt injection.
async fn trade_history_block(ctx: &PluginContext, settings: &DebateSettings) -> String {
    let trades = match ctx
        .store
        .recent_closed_trades(ctx.bot.id, settings.trade_history_limit)
        .await
    {
        Ok(trades) => trades,
        Err(e) => {
            warn!("trade history unavailable for prompt: {}", e);
            return String::new();
        }
    };

    if trades.is_empty() {
        return "\n## Recent trades\nNo closed trades yet.\n".to_string();
    }

    let wins = trades.iter().filter(|t| t.is_win()).count();
    let win_rate = wins as f64 / trades.len() as f64 * 100.0;
    let consecutive_losses = crate::services::performance::consecutive_losses(&trades);

    let mut block = format!(
        "\n## Recent trades (last {})\nWin rate: {:.0}%",
        trades.len(),
        win_rate
    );
    if consecutive_losses > 0 {
        block.push_str(&format!(
            " — currently {} consecutive losses",
            consecutive_losses
        ));
    }
    block.push('\n');
    for t in &trades {
        block.push_str(&format!(
            "- {} {} {} pnl={}\n",
            t.symbol,
            t.action,
            t.amount,
            t.pnl_usd
                .map(|p| format!("${:.2}", p))
                .unwrap_or_else(|| "n/a".into()),
        ));
    }
    block
}

/// Clamp per-symbol allocations and scale the total into the cap.
pub(crate) fn normalize_allocations(
    mut decision: BatchDecision,
    state: &CycleState,
) -> BatchDecision {
    let limits = &state.config_snapshot.risk_limits;
    let max_single = limits.max_single_allocation_pct;
    let max_total = limits.max_total_allocation_pct;

    for d in &mut decision.decisions {
        if d.action.is_open() && d.allocation_pct > max_single {
            warn!(
                symbol = %d.symbol,
                allocation = d.allocation_pct,
                cap = max_single,
                "per-symbol allocation clamped"
            );
            d.allocation_pct = max_single;
        }
    }

    let total: f64 = decision
        .decisions
        .iter()
        .filter(|d| d.action.is_open())
        .map(|d| d.allocation_pct)
        .sum();
    if total > max_total && total > 0.0 {
        let scale = max_total / total;
        warn!(total, cap = max_total, scale, "total allocation scaled down");
        for d in &mut decision.decisions {
            if d.action.is_open() {
                d.allocation_pct *= scale;
            }
        }
    }

    decision.renormalize();
    decision
}

pub(crate) fn symbol_context(state: &CycleState, symbol: &str) -> String {
    let Some(run) = state.runs.get(symbol) else {
        return "no data collected".to_string();
    };

    let mut text = String::new();
    if let Some(ind) = &run.indicators {
        text.push_str(&format!(
            "price={:.6} rsi14={:.1} macd_hist={:.5} ema20={:.6} volume_ratio={:.2}\n",
            ind.current_price, ind.rsi_14, ind.macd.histogram, ind.ema_20, ind.volume_ratio
        ));
        if let Some(funding) = ind.funding_rate {
            text.push_str(&format!("funding_rate={:.5}%\n", funding * 100.0));
        }
    }
    if let Some(quant) = &run.quant {
        text.push_str(&format!(
            "quant_score={:.1} (trend={:.0} momentum={:.0} volume={:.0} sentiment={:.0})\n",
            quant.total, quant.trend, quant.momentum, quant.volume, quant.sentiment
        ));
    }
    if text.is_empty() {
        text.push_str("no indicator data\n");
    }
    text
}

/// Account, positions and performance context shared by every role.
pub(crate) fn build_market_context(state: &CycleState) -> String {
    let mut text = String::new();

    text.push_str(&format!(
        "Account: total {} {}, free {}\n",
        state.balance.total, state.balance.currency, state.balance.free
    ));

    if state.positions.is_empty() {
        text.push_str("Open positions: none\n");
    } else {
        text.push_str("Open positions (evaluate closes before new entries):\n");
        for pos in &state.positions {
            text.push_str(&format!(
                "- {} {} size={} entry={} mark={} pnl={:.2}% lev={}x\n",
                pos.symbol,
                pos.side,
                pos.size,
                pos.entry_price,
                pos.mark_price,
                pos.unrealized_pnl_pct(),
                pos.leverage,
            ));
        }
    }

    if let Some(perf) = &state.performance {
        text.push_str(&perf.to_prompt_text());
    }

    if !state.errors.is_empty() {
        text.push_str("Problems last observed this cycle (avoid repeating them):\n");
        for err in &state.errors {
            text.push_str(&format!("- [{}] {}\n", err.node, err.message));
        }
    }

    text
}
