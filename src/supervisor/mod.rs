//! Bot supervision: one long-lived worker per bot, lifecycle control and
//! the control-plane surface.

pub mod supervisor;
pub mod worker;

pub use supervisor::{BotSupervisor, SharedDeps};
pub use worker::BotWorker;
