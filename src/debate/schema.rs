//! JSON Schemas constraining each phase's structured output.

use serde_json::{json, Value};

/// Phase A: one analyst report. `key_levels` is populated or absent, never
/// an empty shell.
pub fn analyst_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "symbol": {"type": "string"},
            "trend": {"type": "string", "enum": ["bullish", "bearish", "neutral"]},
            "key_levels": {
                "type": ["object", "null"],
                "properties": {
                    "support": {"type": "number"},
                    "resistance": {"type": "number"},
                },
                "required": ["support", "resistance"],
                "additionalProperties": false,
            },
            "summary": {"type": "string"},
        },
        "required": ["symbol", "trend", "summary"],
        "additionalProperties": false,
    })
}

fn suggestion_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "symbol": {"type": "string"},
            "action": {"type": "string", "enum": ["long", "short", "wait"]},
            "confidence": {"type": "number", "minimum": 0, "maximum": 100},
            "allocation_pct": {"type": "number", "minimum": 0, "maximum": 100},
            "stop_loss_pct": {"type": "number"},
            "take_profit_pct": {"type": "number"},
            "reasoning": {"type": "string"},
        },
        "required": [
            "symbol", "action", "confidence", "allocation_pct",
            "stop_loss_pct", "take_profit_pct", "reasoning"
        ],
        "additionalProperties": false,
    })
}

/// Phase B: a batch of trader suggestions from one side.
pub fn suggestions_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "suggestions": {"type": "array", "items": suggestion_schema()},
        },
        "required": ["suggestions"],
        "additionalProperties": false,
    })
}

/// Phase C: the final portfolio decision.
pub fn batch_decision_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "decisions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "symbol": {"type": "string"},
                        "action": {
                            "type": "string",
                            "enum": ["open_long", "open_short", "close_long", "close_short", "wait"],
                        },
                        "allocation_pct": {"type": "number", "minimum": 0, "maximum": 100},
                        "confidence": {"type": "number", "minimum": 0, "maximum": 100},
                        "leverage": {"type": ["integer", "null"], "minimum": 1},
                        "stop_loss": {"type": ["number", "null"]},
                        "take_profit": {"type": ["number", "null"]},
                        "reasoning": {"type": "string"},
                    },
                    "required": ["symbol", "action", "allocation_pct", "confidence", "reasoning"],
                    "additionalProperties": false,
                },
            },
            "total_allocation_pct": {"type": "number"},
            "cash_reserve_pct": {"type": "number"},
            "strategy_rationale": {"type": "string"},
        },
        "required": [
            "decisions", "total_allocation_pct", "cash_reserve_pct", "strategy_rationale"
        ],
        "additionalProperties": false,
    })
}
