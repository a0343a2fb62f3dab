//! Live channel subsystem.
//!
//! # Data Flow
//! ```text
//! ChannelManager (handle)
//!     → Command → ChannelActor (owns ConnectionState, session, reconnect counter)
//!
//! Push up:
//!     PushTransport::connect → reader task → Frame → actor
//!         → ChannelEvent::Message / ChannelEvent::Data(Push)
//!     send() → bounded queue → writer task → RetryExecutor + push-send breaker → sink
//!
//! Push down:
//!     Closed / ConnectFailed → Reconnecting + poller.rs started
//!         → PollOutcome → ChannelEvent::Data(Poll), cache.rs, Degraded
//!     reconnect timer (BackoffPolicy) → Connecting → Connected → poller stopped
//!     attempts exhausted → Error until retry()
//!
//! Every transition and inbound frame → TelemetryBuffer
//! Every event → events.rs (handlers on a dispatcher task, broadcast subscribers)
//! ```
//!
//! # Design Decisions
//! - State changes only inside the actor; readers see a watch mirror
//! - Push and poll streams are each ordered, not ordered against each other

pub mod cache;
pub mod events;
pub mod manager;
pub mod poller;
pub mod state;

pub use cache::PollCache;
pub use events::{ChannelEvent, ChannelNotice, DataSource, EventKind, HandlerId, NoticeContext, Snapshot};
pub use manager::ChannelManager;
pub use poller::FallbackPoller;
pub use state::{ChannelStatus, ConnectionState};
