//! Role prompt loading.
//!
//! Prompt content is opaque to the core: each role's system prompt is loaded
//! from `<prompts_dir>/debate_<role>.txt` when present, with embedded
//! defaults as fallback.

use std::path::Path;
use tracing::{debug, warn};

pub const ROLE_ANALYST: &str = "analyst";
pub const ROLE_BULL: &str = "bull";
pub const ROLE_BEAR: &str = "bear";
pub const ROLE_RISK_MANAGER: &str = "risk_manager";

const DEFAULT_ANALYST: &str = "\
You are the market analyst of a crypto trading desk. For every candidate \
symbol, analyse the supplied indicators and judge the trend direction \
(bullish, bearish or neutral), key support/resistance levels when they are \
clear, and a one-paragraph summary. Keep symbol strings exactly as given.";

const DEFAULT_BULL: &str = "\
You are the bull trader. Based on the analyst's read, argue the strongest \
long cases. Only suggest entries with confidence above 60 and a \
risk/reward of at least 2:1. Express stops and targets as percentages from \
the current price. Keep symbol strings exactly as given.";

const DEFAULT_BEAR: &str = "\
You are the bear trader. Challenge the bull case: surface overlooked \
downside, weak structure and crowded funding. Suggest shorts where \
justified, with stops and targets as percentages from the current price. \
Keep symbol strings exactly as given.";

const DEFAULT_RISK_MANAGER: &str = "\
You are the risk manager with final authority over the book. Reconcile the \
bull and bear arguments with the account state, open positions, recent \
performance and the hard risk constraints you are given. Emit one decision \
per candidate symbol (open_long, open_short, close_long, close_short or \
wait), allocations that respect the limits, and concrete stop-loss and \
take-profit prices on the correct side of the entry. Keep symbol strings \
exactly as given.";

/// System prompts for the four debate roles.
#[derive(Debug, Clone)]
pub struct RolePrompts {
    pub analyst: String,
    pub bull: String,
    pub bear: String,
    pub risk_manager: String,
}

impl Default for RolePrompts {
    fn default() -> Self {
        Self {
            analyst: DEFAULT_ANALYST.to_string(),
            bull: DEFAULT_BULL.to_string(),
            bear: DEFAULT_BEAR.to_string(),
            risk_manager: DEFAULT_RISK_MANAGER.to_string(),
        }
    }
}

impl RolePrompts {
    /// Load role prompts from a directory, falling back per-role to the
    /// embedded defaults.
    pub fn load(dir: Option<&Path>) -> Self {
        let mut prompts = Self::default();
        let Some(dir) = dir else {
            return prompts;
        };

        for (role, slot) in [
            (ROLE_ANALYST, &mut prompts.analyst),
            (ROLE_BULL, &mut prompts.bull),
            (ROLE_BEAR, &mut prompts.bear),
            (ROLE_RISK_MANAGER, &mut prompts.risk_manager),
        ] {
            let path = dir.join(format!("debate_{}.txt", role));
            match std::fs::read_to_string(&path) {
                Ok(content) if !content.trim().is_empty() => {
                    debug!(role, path = %path.display(), "role prompt loaded");
                    *slot = content;
                }
                Ok(_) => warn!(role, "prompt file empty, using default"),
                Err(_) => debug!(role, "no prompt file, using default"),
            }
        }
        prompts
    }

    pub fn for_role(&self, role: &str) -> &str {
        match role {
            ROLE_ANALYST => &self.analyst,
            ROLE_BULL => &self.bull,
            ROLE_BEAR => &self.bear,
            _ => &self.risk_manager,
        }
    }
}
