pub mod agent;
pub mod context;
pub mod engine;
pub mod errors;
pub mod event;
pub mod ids;
pub mod messages;
pub mod session;

pub use agent::AgentProfile;
pub use engine::{ConversationEngine, EventStream};
pub use errors::GatewayError;
pub use event::{Event, EventBody};
pub use ids::{EventId, SessionId};
pub use session::{PendingTurn, Session, SessionKey, Turn};
