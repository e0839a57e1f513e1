//! Inbound transports: the Papercups webhook and a local REPL.

pub mod cli;
pub mod webhook;

pub use cli::{run_repl, run_session};
pub use webhook::{PapercupsReplySink, ReplySink, WebhookState, webhook_routes};
