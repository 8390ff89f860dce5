//! Read-side projections over the connection subsystem.
//!
//! Everything here is read-only: relationship status between two users,
//! the pending-invitation inbox joined with profile projections, and
//! profile search with exclusion and de-duplication. Mutations live in
//! [`crate::connection::ConnectionManager`].

mod service;

pub use service::{PendingInvitation, QueryService, SEARCH_PAGE_SIZE};
