//! Read-only queries over invitations, edges, and profiles.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::connection::{GraphStorage, RelationshipStatus, Result};
use crate::directory::{ProfileDirectory, ProfileProjection};

/// Maximum number of rows a profile search returns.
pub const SEARCH_PAGE_SIZE: usize = 25;

/// A pending invitation joined with the requester's profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInvitation {
    /// Profile projection of the requester.
    pub profile: ProfileProjection,
    /// Id of the pending invitation, for accept/ignore calls.
    pub invitation_id: i64,
    /// When the request was sent (Unix timestamp).
    pub sent_at: i64,
}

/// Read-only projections built from storage and the profile directory.
///
/// Never writes; shares the [`GraphStorage`] handle with the manager that
/// owns the write path.
pub struct QueryService {
    storage: Arc<GraphStorage>,
    directory: Arc<dyn ProfileDirectory>,
}

impl QueryService {
    /// Creates a query service over shared storage and directory handles.
    #[must_use]
    pub fn new(storage: Arc<GraphStorage>, directory: Arc<dyn ProfileDirectory>) -> Self {
        Self { storage, directory }
    }

    /// Returns the relationship between `viewer_id` and `other_id`, from
    /// the viewer's perspective.
    ///
    /// A user's relationship to themselves is reported as
    /// [`RelationshipStatus::None`].
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    pub fn relationship_status(
        &self,
        viewer_id: &str,
        other_id: &str,
    ) -> Result<RelationshipStatus> {
        if viewer_id == other_id {
            return Ok(RelationshipStatus::None);
        }

        if self.storage.has_edge(viewer_id, other_id)? {
            return Ok(RelationshipStatus::Connected);
        }

        match self.storage.get_pending_by_pair(viewer_id, other_id)? {
            Some(inv) if inv.requester_id == viewer_id => Ok(RelationshipStatus::PendingSent {
                invitation_id: inv.id,
            }),
            Some(inv) => Ok(RelationshipStatus::PendingReceived {
                invitation_id: inv.id,
            }),
            None => Ok(RelationshipStatus::None),
        }
    }

    /// Returns the pending invitations addressed to a user, newest first,
    /// each joined with the requester's profile.
    ///
    /// Invitations whose requester profile cannot be resolved are dropped
    /// from the result and logged; a missing profile is a soft
    /// inconsistency between the directory and the invitation store, not a
    /// failure of the whole query.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    pub fn pending_invitations(&self, user_id: &str) -> Result<Vec<PendingInvitation>> {
        let pending = self.storage.list_pending_for_recipient(user_id)?;
        let mut result = Vec::with_capacity(pending.len());

        for invitation in pending {
            match self.directory.get_profile(&invitation.requester_id) {
                Ok(Some(profile)) => result.push(PendingInvitation {
                    profile,
                    invitation_id: invitation.id,
                    sent_at: invitation.created_at,
                }),
                Ok(None) => {
                    tracing::warn!(
                        invitation_id = invitation.id,
                        requester = %invitation.requester_id,
                        "dropping pending invitation: requester has no profile"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        invitation_id = invitation.id,
                        requester = %invitation.requester_id,
                        error = %e,
                        "dropping pending invitation: profile lookup failed"
                    );
                }
            }
        }

        Ok(result)
    }

    /// Searches profiles by term, excluding `exclude_user_id`.
    ///
    /// The directory may return the same profile once per match criterion;
    /// the result here contains each profile exactly once (first
    /// occurrence kept) and at most [`SEARCH_PAGE_SIZE`] rows. Relative
    /// ordering across match kinds is an implementation detail, not a
    /// contract.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory search fails.
    pub fn search_profiles(
        &self,
        term: &str,
        exclude_user_id: &str,
    ) -> Result<Vec<ProfileProjection>> {
        let matches = self.directory.search_profiles(term)?;

        let mut seen = HashSet::new();
        let mut result = Vec::new();

        for profile in matches {
            if profile.user_id == exclude_user_id {
                continue;
            }
            if !seen.insert(profile.user_id.clone()) {
                continue;
            }
            result.push(profile);
            if result.len() == SEARCH_PAGE_SIZE {
                break;
            }
        }

        Ok(result)
    }
}
