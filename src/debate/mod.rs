//! Multi-role debate engine: analyst -> bull/bear rounds -> risk manager.

pub mod engine;
pub mod prompts;
pub mod schema;

pub use engine::{run_debate, DebateSettings};
pub use prompts::RolePrompts;
