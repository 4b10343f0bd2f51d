//! Debate engine behaviour under provider failures: fallback chains keep the
//! cycle alive, timeouts degrade to the wait decision.

mod common;

use rust_decimal_macros::dec;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::{batch_decision_json, bot_config, test_rig, MockExchange, ScriptedLlm};
use conclave::debate::{run_debate, DebateSettings, RolePrompts};
use conclave::domain::decision::DecisionAction;
use conclave::domain::state::CycleState;
use conclave::llm::FallbackChain;

const SYMBOL: &str = "BTC/USDT";

fn analyst_json() -> serde_json::Value {
    json!({
        "symbol": SYMBOL,
        "trend": "bullish",
        "key_levels": {"support": 100.0, "resistance": 120.0},
        "summary": "structure intact above support",
    })
}

fn suggestions_json(action: &str) -> serde_json::Value {
    json!({
        "suggestions": [{
            "symbol": SYMBOL,
            "action": action,
            "confidence": 70.0,
            "allocation_pct": 5.0,
            "stop_loss_pct": 2.0,
            "take_profit_pct": 5.0,
            "reasoning": "scripted",
        }],
    })
}

async fn debate_state(rig: &common::TestRig) -> CycleState {
    let balance = rig.ctx.market.balance().await.unwrap();
    let mut state = CycleState::new(1, (*rig.ctx.bot).clone(), balance, Vec::new());
    state.symbols = vec![SYMBOL.to_string()];
    state.ensure_runs();
    state
}

fn settings(role_llm_ids: HashMap<String, i64>) -> DebateSettings {
    DebateSettings {
        max_rounds: 2,
        timeout_per_phase: Duration::from_secs(5),
        trade_history_limit: 10,
        role_llm_ids,
    }
}

fn mock_exchange() -> Arc<MockExchange> {
    Arc::new(
        MockExchange::new()
            .with_market(SYMBOL, dec!(50000000))
            .with_rising_candles(SYMBOL, &["3m", "4h"], 60, dec!(100)),
    )
}

#[tokio::test]
async fn bull_fallback_keeps_debate_alive() {
    let rig = test_rig(bot_config(1), mock_exchange()).await;

    // Role routing: every role gets its own chain; the bull primary is a
    // broken provider backed by a healthy fallback
    rig.llm.register_chain(
        2,
        Arc::new(FallbackChain::new(vec![
            ScriptedLlm::broken("bull-primary"),
            ScriptedLlm::answering("bull-fallback", suggestions_json("long")),
        ])),
    );
    rig.llm.register_chain(
        3,
        Arc::new(FallbackChain::single(ScriptedLlm::answering(
            "analyst",
            analyst_json(),
        ))),
    );
    rig.llm.register_chain(
        4,
        Arc::new(FallbackChain::single(ScriptedLlm::answering(
            "bear",
            suggestions_json("wait"),
        ))),
    );
    rig.llm.register_chain(
        5,
        Arc::new(FallbackChain::single(ScriptedLlm::answering(
            "risk",
            batch_decision_json(SYMBOL, "open_long", 5.0, 3),
        ))),
    );

    let roles = HashMap::from([
        ("bull".to_string(), 2i64),
        ("analyst".to_string(), 3i64),
        ("bear".to_string(), 4i64),
        ("risk_manager".to_string(), 5i64),
    ]);

    let state = debate_state(&rig).await;
    let outcome = run_debate(&rig.ctx, &state, &settings(roles), &RolePrompts::default())
        .await
        .unwrap();

    // The cycle completed on the fallback; the bull view survived
    assert_eq!(outcome.analyst_outputs.len(), 1);
    assert!(!outcome.bull_suggestions.is_empty());
    assert_eq!(outcome.rounds_completed, 2);
    assert_eq!(outcome.final_decision.decisions.len(), 1);
    assert_eq!(
        outcome.final_decision.decisions[0].action,
        DecisionAction::OpenLong
    );
    assert!(outcome.debate_summary.contains("bull: 1 suggestions"));
}

#[tokio::test]
async fn risk_manager_timeout_degrades_to_wait() {
    let rig = test_rig(bot_config(1), mock_exchange()).await;

    rig.llm.register_chain(
        3,
        Arc::new(FallbackChain::single(ScriptedLlm::answering(
            "analyst",
            analyst_json(),
        ))),
    );
    rig.llm.register_chain(
        4,
        Arc::new(FallbackChain::single(ScriptedLlm::answering(
            "traders",
            suggestions_json("long"),
        ))),
    );
    // Risk manager takes far longer than the phase budget
    rig.llm.register_chain(
        5,
        Arc::new(FallbackChain::single(ScriptedLlm::slow(
            "slow-risk",
            batch_decision_json(SYMBOL, "open_long", 5.0, 3),
            Duration::from_secs(60),
        ))),
    );

    let roles = HashMap::from([
        ("analyst".to_string(), 3i64),
        ("bull".to_string(), 4i64),
        ("bear".to_string(), 4i64),
        ("risk_manager".to_string(), 5i64),
    ]);
    let mut settings = settings(roles);
    settings.timeout_per_phase = Duration::from_millis(200);

    let state = debate_state(&rig).await;
    let outcome = run_debate(&rig.ctx, &state, &settings, &RolePrompts::default())
        .await
        .unwrap();

    // The phase expired and the engine fell back to all-wait
    assert_eq!(outcome.final_decision.total_allocation_pct, 0.0);
    assert!(outcome
        .final_decision
        .decisions
        .iter()
        .all(|d| d.action == DecisionAction::Wait));
}

#[tokio::test]
async fn failed_analyst_drops_symbol_not_cycle() {
    let rig = test_rig(bot_config(1), mock_exchange()).await;

    rig.llm.register_chain(
        3,
        Arc::new(FallbackChain::single(ScriptedLlm::broken("analyst"))),
    );
    rig.llm.register_chain(
        5,
        Arc::new(FallbackChain::single(ScriptedLlm::answering(
            "risk",
            batch_decision_json(SYMBOL, "wait", 0.0, 1),
        ))),
    );

    let roles = HashMap::from([
        ("analyst".to_string(), 3i64),
        ("bull".to_string(), 5i64),
        ("bear".to_string(), 5i64),
        ("risk_manager".to_string(), 5i64),
    ]);

    let state = debate_state(&rig).await;
    let outcome = run_debate(&rig.ctx, &state, &settings(roles), &RolePrompts::default())
        .await
        .unwrap();

    assert!(outcome.analyst_outputs.is_empty());
    // The debate still concluded with a decision
    assert_eq!(outcome.final_decision.decisions.len(), 1);
}

#[tokio::test]
async fn identical_prompts_hit_cycle_cache() {
    let rig = test_rig(bot_config(1), mock_exchange()).await;
    let analyst = ScriptedLlm::answering("analyst", analyst_json());
    rig.llm
        .register_chain(3, Arc::new(FallbackChain::single(analyst.clone())));

    let roles = HashMap::from([("analyst".to_string(), 3i64)]);
    let settings = settings(roles);
    let state = debate_state(&rig).await;
    let prompts = RolePrompts::default();

    // Two debates over the same context share the per-cycle prompt cache
    run_debate(&rig.ctx, &state, &settings, &prompts).await.unwrap();
    let calls_after_first = analyst.calls.load(std::sync::atomic::Ordering::SeqCst);
    run_debate(&rig.ctx, &state, &settings, &prompts).await.unwrap();
    assert_eq!(
        analyst.calls.load(std::sync::atomic::Ordering::SeqCst),
        calls_after_first
    );
}
