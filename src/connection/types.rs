//! Core types for the connection subsystem.
//!
//! This module defines the data structures for invitations (one-directional,
//! time-stamped requests to connect), established connections (symmetric
//! relationships), and the tagged results returned by the resolver and the
//! query service.
//!
//! # Identity Model
//!
//! User identifiers are opaque strings owned by the profile directory. The
//! connection core never interprets them beyond equality and ordering; the
//! ordering is only used to normalize unordered pairs (see [`PairKey`]).

use serde::{Deserialize, Serialize};

/// Lifecycle status of an invitation.
///
/// An invitation starts `Pending` and transitions to exactly one terminal
/// status. Terminal invitations are kept as history and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    /// Sent, awaiting a response from the recipient.
    Pending,
    /// Recipient accepted; a connection was established.
    Accepted,
    /// Recipient ignored the invitation.
    Ignored,
    /// Requester withdrew the invitation.
    Cancelled,
}

impl InvitationStatus {
    /// Converts to string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Ignored => "ignored",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "ignored" => Some(Self::Ignored),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Returns whether this status is terminal (no further transitions).
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A one-directional request to connect.
///
/// At most one `Pending` invitation may exist per unordered pair of users,
/// in either direction. Storage assigns the id on creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    /// Storage-assigned identifier.
    pub id: i64,
    /// User who sent the request.
    pub requester_id: String,
    /// User the request is addressed to.
    pub recipient_id: String,
    /// Current lifecycle status.
    pub status: InvitationStatus,
    /// When the request was sent (Unix timestamp).
    pub created_at: i64,
    /// When the request left `Pending`, if it has (Unix timestamp).
    pub resolved_at: Option<i64>,
}

impl Invitation {
    /// The unordered pair this invitation belongs to.
    #[must_use]
    pub fn pair(&self) -> PairKey {
        PairKey::new(&self.requester_id, &self.recipient_id)
    }

    /// Returns whether the given user is the requester or the recipient.
    #[must_use]
    pub fn involves(&self, user_id: &str) -> bool {
        self.requester_id == user_id || self.recipient_id == user_id
    }
}

/// An established, symmetric relationship between two users.
///
/// Stored once per pair with the endpoints in sorted order, so the edge
/// `{a, b}` and the edge `{b, a}` are the same row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Lexicographically smaller endpoint.
    pub user_lo: String,
    /// Lexicographically larger endpoint.
    pub user_hi: String,
    /// When the connection was established (Unix timestamp).
    pub established_at: i64,
}

impl Connection {
    /// Returns the other endpoint, or `None` if `user_id` is not part of
    /// this connection.
    #[must_use]
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        if self.user_lo == user_id {
            Some(&self.user_hi)
        } else if self.user_hi == user_id {
            Some(&self.user_lo)
        } else {
            None
        }
    }
}

/// Normalized key for an unordered pair of users.
///
/// The two ids are stored in sorted order so `{a, b}` and `{b, a}` produce
/// equal keys. This is the uniqueness key for live invitations and edges,
/// and the contention key for pair-scoped locking.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairKey {
    lo: String,
    hi: String,
}

impl PairKey {
    /// Builds the key for an unordered pair. Order of arguments is
    /// irrelevant.
    #[must_use]
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self {
                lo: a.to_string(),
                hi: b.to_string(),
            }
        } else {
            Self {
                lo: b.to_string(),
                hi: a.to_string(),
            }
        }
    }

    /// Lexicographically smaller endpoint.
    #[must_use]
    pub fn lo(&self) -> &str {
        &self.lo
    }

    /// Lexicographically larger endpoint.
    #[must_use]
    pub fn hi(&self) -> &str {
        &self.hi
    }
}

/// Relationship between a viewer and another user, as seen by the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RelationshipStatus {
    /// No live invitation and no connection.
    None,
    /// The viewer has a pending invitation out to the other user.
    PendingSent {
        /// Id of the pending invitation.
        invitation_id: i64,
    },
    /// The other user has a pending invitation out to the viewer.
    PendingReceived {
        /// Id of the pending invitation.
        invitation_id: i64,
    },
    /// The two users are connected.
    Connected,
}

/// Result of a send-request call.
///
/// Only `Sent` created new state; the other variants report the state that
/// already resolved the request. Callers surface them as informational
/// messages, not failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SendOutcome {
    /// A new pending invitation was created.
    Sent(Invitation),
    /// The caller already has a pending invitation out to this user;
    /// that invitation is returned unchanged.
    AlreadySent(Invitation),
    /// The other user had already invited the caller. The pre-existing
    /// invitation was auto-accepted and is returned in its accepted state.
    AlreadyReceived(Invitation),
    /// The two users were already connected. No state changed.
    AlreadyConnected,
}

impl SendOutcome {
    /// The invitation carried by this outcome, if any.
    #[must_use]
    pub const fn invitation(&self) -> Option<&Invitation> {
        match self {
            Self::Sent(inv) | Self::AlreadySent(inv) | Self::AlreadyReceived(inv) => Some(inv),
            Self::AlreadyConnected => None,
        }
    }
}
