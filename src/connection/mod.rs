//! Connection request lifecycle and the social graph.
//!
//! This module turns a one-sided "connect" action between two users into a
//! mutual, consistent relationship: it tracks pending invitations in both
//! directions, resolves cancel/accept/ignore actions, and maintains the
//! symmetric edge set of established connections.
//!
//! # Architecture
//!
//! ```text
//! ConnectionManager (state machine, sole writer)
//!     ├── GraphStorage (SQLite: invitations + connection edges)
//!     ├── PairLocks (pair-scoped mutual exclusion)
//!     └── dyn ProfileDirectory (derived connection-list projections)
//! ```
//!
//! # Consistency Model
//!
//! - For any unordered pair of users, at most one `pending` invitation
//!   exists, in either direction.
//! - A pending invitation and an established connection never coexist for
//!   the same pair.
//! - Accepting flips the invitation status and inserts the edge in one
//!   storage transaction; partial application is never observable.
//! - All mutations for a pair are serialized by a lock keyed on the sorted
//!   pair; disjoint pairs proceed independently.
//!
//! # Types
//!
//! - [`Invitation`]: a one-directional, time-stamped request to connect
//! - [`Connection`]: an established, symmetric relationship
//! - [`SendOutcome`]: tagged result of a send, including race resolutions
//! - [`RelationshipStatus`]: a viewer's relationship to another user

mod error;
mod locks;
mod manager;
mod storage;
pub mod types;

pub use error::{ConnectionError, Result};
pub use locks::PairLocks;
pub use manager::ConnectionManager;
pub use storage::GraphStorage;
pub use types::{
    Connection, Invitation, InvitationStatus, PairKey, RelationshipStatus, SendOutcome,
};
