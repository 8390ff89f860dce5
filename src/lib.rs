//! Trellis Core Library
//!
//! Core functionality for Trellis - professional networking. This crate
//! implements the social-graph connection subsystem: the invitation
//! lifecycle between two users, the symmetric connection graph built from
//! accepted invitations, and the read-side projections over both.
//!
//! Profile storage and identity live outside this crate and are consumed
//! through the [`directory::ProfileDirectory`] trait.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![deny(unsafe_code)]

pub mod connection;
pub mod directory;
pub mod query;

pub use connection::{
    ConnectionError, ConnectionManager, GraphStorage, Invitation, InvitationStatus,
    RelationshipStatus, SendOutcome,
};
pub use directory::{ProfileDirectory, ProfileProjection};
pub use query::QueryService;
