//! Coordination engine for 5v5 custom matches.
//!
//! A match goes through a timed ban/pick draft, is confirmed by its ten
//! players, and is finally linked to the external game it became by a player
//! vote. Any number of backend replicas can run a [`MatchCoordinator`] over the
//! same storage: a per-match lease decides which replica mutates a match, a
//! per-match lock serializes work inside that replica, and an event inbox keeps
//! redelivered notifications from being applied twice.
//!
//! ```text
//! use std::sync::Arc;
//! use matchcoord::prelude::*;
//!
//! let config = CoordinatorConfig::from_env()?;
//! let coordinator = Arc::new(
//!     MatchCoordinator::builder(config)
//!         .storage(CoordinatorStorage::postgres(pool))
//!         .broadcaster(Arc::new(ChannelBroadcaster::new(1024)))
//!         .build()?,
//! );
//! let monitor = TimeoutMonitor::new(coordinator.clone()).spawn();
//! // ...
//! monitor.shutdown().await;
//! ```

pub mod broadcast;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod draft;
pub mod error;
pub mod game_source;
pub mod inbox;
pub mod match_locks;
pub mod match_storage;
pub mod notification;
pub mod ownership;
pub mod storage;
pub mod telemetry;
pub mod testing;
pub mod timeout_monitor;
pub mod types;
pub mod vote;

/// Commonly used items.
pub mod prelude {
    pub use crate::broadcast::{events, Broadcaster, ChannelBroadcaster, NoopBroadcaster};
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::config::CoordinatorConfig;
    pub use crate::coordinator::{
        CoordinatorStorage, EventOutcome, MatchCoordinator, SkipOutcome, VoteOutcome,
    };
    pub use crate::draft::{DraftPhase, DraftSnapshot, DraftState, SlotFill};
    pub use crate::error::MatchError;
    pub use crate::inbox::{AdmitResult, InboxEvent};
    pub use crate::match_storage::MatchRecord;
    pub use crate::timeout_monitor::{MonitorHandle, SweepReport, TimeoutMonitor};
    pub use crate::types::{
        ActionKind, BackendId, ChampionId, EventId, GameId, MatchId, MatchStatus, PlayerId, Team,
    };
}
