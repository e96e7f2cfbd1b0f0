pub mod aggregator;
pub mod dispatcher;
pub mod error;
pub mod limits;
pub mod resolver;
pub mod service;

#[cfg(test)]
pub(crate) mod test_support;

pub use aggregator::{aggregate, ResponseAggregator, FALLBACK_REPLY};
pub use dispatcher::{TurnDispatcher, TurnRequest, TurnStream};
pub use error::ChatError;
pub use limits::TurnLimits;
pub use resolver::{Resolved, SessionResolver};
pub use service::{ChatConfig, ChatReply, ChatRequest, ChatService};
