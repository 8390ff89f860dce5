//! Integration tests for the connection subsystem.
//!
//! These tests verify the behavior of the whole stack over an on-disk
//! database:
//! - Request lifecycle (send, accept, cancel, ignore)
//! - Simultaneous-invite race resolution
//! - Authorization rules for each action
//! - Cross-entity consistency between graph edges and directory projections
//! - Read-side queries (status, pending inbox, search)
//! - Persistence across reopen

use std::sync::Arc;

use trellis_core::connection::{
    ConnectionError, ConnectionManager, InvitationStatus, RelationshipStatus, SendOutcome,
};
use trellis_core::query::QueryService;
use trellis_core::ProfileDirectory;

mod helpers;
use helpers::{cleanup_dir, open_stack, seeded_directory, unique_temp_dir};

fn sent_id(outcome: &SendOutcome) -> i64 {
    match outcome {
        SendOutcome::Sent(inv) => inv.id,
        other => panic!("expected Sent, got {other:?}"),
    }
}

// ============================================================================
// Request Lifecycle Tests
// ============================================================================

mod request_lifecycle_tests {
    use super::*;

    #[test]
    fn send_then_status_reflects_both_perspectives() {
        let dir = unique_temp_dir("send_status");
        let (manager, queries, _) = open_stack(&dir);

        let id = sent_id(&manager.send_request("u1", "u2").unwrap());

        assert_eq!(
            queries.relationship_status("u1", "u2").unwrap(),
            RelationshipStatus::PendingSent { invitation_id: id }
        );
        assert_eq!(
            queries.relationship_status("u2", "u1").unwrap(),
            RelationshipStatus::PendingReceived { invitation_id: id }
        );

        cleanup_dir(&dir);
    }

    #[test]
    fn accept_connects_both_directions_and_clears_inbox() {
        let dir = unique_temp_dir("accept_connects");
        let (manager, queries, _) = open_stack(&dir);

        let id = sent_id(&manager.send_request("u1", "u2").unwrap());
        manager.accept_request(id, "u2").unwrap();

        assert_eq!(
            queries.relationship_status("u1", "u2").unwrap(),
            RelationshipStatus::Connected
        );
        assert_eq!(
            queries.relationship_status("u2", "u1").unwrap(),
            RelationshipStatus::Connected
        );
        assert!(queries.pending_invitations("u2").unwrap().is_empty());

        cleanup_dir(&dir);
    }

    #[test]
    fn cancel_frees_pair_for_a_new_request() {
        let dir = unique_temp_dir("cancel_frees");
        let (manager, queries, _) = open_stack(&dir);

        let id = sent_id(&manager.send_request("u1", "u2").unwrap());
        manager.cancel_request(id, "u1").unwrap();

        assert_eq!(
            queries.relationship_status("u1", "u2").unwrap(),
            RelationshipStatus::None
        );
        assert_eq!(
            queries.relationship_status("u2", "u1").unwrap(),
            RelationshipStatus::None
        );

        let outcome = manager.send_request("u1", "u2").unwrap();
        assert!(matches!(outcome, SendOutcome::Sent(_)));

        cleanup_dir(&dir);
    }

    #[test]
    fn ignore_resolves_without_connecting() {
        let dir = unique_temp_dir("ignore");
        let (manager, queries, _) = open_stack(&dir);

        let id = sent_id(&manager.send_request("u1", "u2").unwrap());
        manager.ignore_request(id, "u2").unwrap();

        assert_eq!(
            queries.relationship_status("u1", "u2").unwrap(),
            RelationshipStatus::None
        );
        let resolved = manager.storage().get_invitation(id).unwrap().unwrap();
        assert_eq!(resolved.status, InvitationStatus::Ignored);

        cleanup_dir(&dir);
    }

    #[test]
    fn repeated_send_is_idempotent() {
        let dir = unique_temp_dir("idempotent_send");
        let (manager, _, _) = open_stack(&dir);

        let first = sent_id(&manager.send_request("u1", "u2").unwrap());
        for _ in 0..3 {
            let outcome = manager.send_request("u1", "u2").unwrap();
            let SendOutcome::AlreadySent(inv) = outcome else {
                panic!("expected AlreadySent");
            };
            assert_eq!(inv.id, first);
        }

        assert_eq!(
            manager
                .storage()
                .list_pending_for_recipient("u2")
                .unwrap()
                .len(),
            1
        );

        cleanup_dir(&dir);
    }

    #[test]
    fn self_connection_always_fails() {
        let dir = unique_temp_dir("self_loop");
        let (manager, _, _) = open_stack(&dir);

        for user in ["u1", "u2", "nobody"] {
            let result = manager.send_request(user, user);
            assert!(matches!(result, Err(ConnectionError::InvalidArgument(_))));
        }

        cleanup_dir(&dir);
    }
}

// ============================================================================
// Race Resolution Tests
// ============================================================================

mod race_resolution_tests {
    use super::*;

    #[test]
    fn cross_invite_ends_connected_not_deadlocked() {
        let dir = unique_temp_dir("cross_invite");
        let (manager, queries, _) = open_stack(&dir);

        let first = sent_id(&manager.send_request("u1", "u2").unwrap());
        let outcome = manager.send_request("u2", "u1").unwrap();

        // The earlier invitation wins and is accepted on u2's behalf.
        let SendOutcome::AlreadyReceived(inv) = outcome else {
            panic!("expected AlreadyReceived");
        };
        assert_eq!(inv.id, first);
        assert_eq!(inv.status, InvitationStatus::Accepted);

        let storage = manager.storage();
        assert!(storage.has_edge("u1", "u2").unwrap());
        assert!(storage.get_pending_by_pair("u1", "u2").unwrap().is_none());
        storage.verify_pair_exclusive("u1", "u2").unwrap();

        assert_eq!(
            queries.relationship_status("u1", "u2").unwrap(),
            RelationshipStatus::Connected
        );

        cleanup_dir(&dir);
    }

    #[test]
    fn concurrent_cross_invites_from_two_threads() {
        let dir = unique_temp_dir("threaded_cross");
        let (manager, queries, _) = open_stack(&dir);
        let manager = Arc::new(manager);

        std::thread::scope(|scope| {
            let m1 = Arc::clone(&manager);
            let m2 = Arc::clone(&manager);
            let t1 = scope.spawn(move || m1.send_request("u1", "u2").unwrap());
            let t2 = scope.spawn(move || m2.send_request("u2", "u1").unwrap());
            let (o1, o2) = (t1.join().unwrap(), t2.join().unwrap());

            // One call created the invitation, the other resolved it.
            let sent = [&o1, &o2]
                .iter()
                .filter(|o| matches!(o, SendOutcome::Sent(_)))
                .count();
            let received = [&o1, &o2]
                .iter()
                .filter(|o| matches!(o, SendOutcome::AlreadyReceived(_)))
                .count();
            assert_eq!((sent, received), (1, 1));
        });

        let storage = manager.storage();
        assert!(storage.has_edge("u1", "u2").unwrap());
        assert!(storage.get_pending_by_pair("u1", "u2").unwrap().is_none());
        storage.verify_pair_exclusive("u1", "u2").unwrap();
        assert_eq!(
            queries.relationship_status("u2", "u1").unwrap(),
            RelationshipStatus::Connected
        );

        cleanup_dir(&dir);
    }

    #[test]
    fn disjoint_pairs_mutate_in_parallel() {
        let dir = unique_temp_dir("disjoint_pairs");
        let (manager, _, _) = open_stack(&dir);
        let manager = Arc::new(manager);

        std::thread::scope(|scope| {
            for (a, b) in [("u1", "u2"), ("u3", "u4")] {
                let m = Arc::clone(&manager);
                scope.spawn(move || {
                    let id = sent_id(&m.send_request(a, b).unwrap());
                    m.accept_request(id, b).unwrap();
                });
            }
        });

        let storage = manager.storage();
        assert!(storage.has_edge("u1", "u2").unwrap());
        assert!(storage.has_edge("u3", "u4").unwrap());
        assert!(!storage.has_edge("u1", "u3").unwrap());

        cleanup_dir(&dir);
    }
}

// ============================================================================
// Authorization Tests
// ============================================================================

mod authorization_tests {
    use super::*;

    #[test]
    fn cancel_requires_the_requester() {
        let dir = unique_temp_dir("auth_cancel");
        let (manager, _, _) = open_stack(&dir);

        let id = sent_id(&manager.send_request("u1", "u2").unwrap());

        let by_recipient = manager.cancel_request(id, "u2");
        assert!(matches!(
            by_recipient,
            Err(ConnectionError::Unauthorized(_))
        ));
        let by_stranger = manager.cancel_request(id, "u3");
        assert!(matches!(by_stranger, Err(ConnectionError::Unauthorized(_))));

        // Still pending, still cancellable by the right actor.
        manager.cancel_request(id, "u1").unwrap();

        cleanup_dir(&dir);
    }

    #[test]
    fn accept_and_ignore_require_the_recipient() {
        let dir = unique_temp_dir("auth_accept");
        let (manager, _, _) = open_stack(&dir);

        let id = sent_id(&manager.send_request("u1", "u2").unwrap());

        assert!(matches!(
            manager.accept_request(id, "u1"),
            Err(ConnectionError::Unauthorized(_))
        ));
        assert!(matches!(
            manager.ignore_request(id, "u1"),
            Err(ConnectionError::Unauthorized(_))
        ));
        assert!(!manager.storage().has_edge("u1", "u2").unwrap());

        manager.accept_request(id, "u2").unwrap();

        cleanup_dir(&dir);
    }
}

// ============================================================================
// Invariant Tests
// ============================================================================

mod invariant_tests {
    use super::*;

    #[test]
    fn double_accept_fails_without_changing_the_graph() {
        let dir = unique_temp_dir("double_accept");
        let (manager, _, _) = open_stack(&dir);

        let id = sent_id(&manager.send_request("u1", "u2").unwrap());
        manager.accept_request(id, "u2").unwrap();
        let established = manager
            .storage()
            .connection_between("u1", "u2")
            .unwrap()
            .unwrap()
            .established_at;

        let second = manager.accept_request(id, "u2");
        assert!(matches!(
            second,
            Err(ConnectionError::InvariantViolation(_))
        ));

        let storage = manager.storage();
        assert_eq!(storage.degree("u1").unwrap(), 1);
        assert_eq!(
            storage
                .connection_between("u1", "u2")
                .unwrap()
                .unwrap()
                .established_at,
            established
        );

        cleanup_dir(&dir);
    }

    #[test]
    fn resolved_invitations_reject_every_transition() {
        let dir = unique_temp_dir("terminal_transitions");
        let (manager, _, _) = open_stack(&dir);

        let id = sent_id(&manager.send_request("u1", "u2").unwrap());
        manager.ignore_request(id, "u2").unwrap();

        assert!(matches!(
            manager.accept_request(id, "u2"),
            Err(ConnectionError::InvariantViolation(_))
        ));
        assert!(matches!(
            manager.cancel_request(id, "u1"),
            Err(ConnectionError::InvariantViolation(_))
        ));
        assert!(matches!(
            manager.ignore_request(id, "u2"),
            Err(ConnectionError::InvariantViolation(_))
        ));

        cleanup_dir(&dir);
    }

    #[test]
    fn graph_and_directory_projections_agree() {
        let dir = unique_temp_dir("projection_agreement");
        let (manager, _, directory) = open_stack(&dir);

        let id12 = sent_id(&manager.send_request("u1", "u2").unwrap());
        manager.accept_request(id12, "u2").unwrap();
        let id13 = sent_id(&manager.send_request("u3", "u1").unwrap());
        manager.accept_request(id13, "u1").unwrap();

        let storage = manager.storage();
        for user in ["u1", "u2", "u3"] {
            let mut projected = directory.connection_list(user);
            projected.sort();
            assert_eq!(projected, storage.neighbors(user).unwrap());
            assert_eq!(
                directory
                    .get_profile(user)
                    .unwrap()
                    .unwrap()
                    .connections_count,
                storage.degree(user).unwrap()
            );
        }

        cleanup_dir(&dir);
    }
}

// ============================================================================
// Query Tests
// ============================================================================

mod query_tests {
    use super::*;

    #[test]
    fn pending_inbox_lists_newest_first_with_profiles() {
        let dir = unique_temp_dir("pending_inbox");
        let (manager, queries, _) = open_stack(&dir);

        let first = sent_id(&manager.send_request("u1", "u3").unwrap());
        let second = sent_id(&manager.send_request("u2", "u3").unwrap());

        let inbox = queries.pending_invitations("u3").unwrap();
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox[0].invitation_id, second);
        assert_eq!(inbox[0].profile.full_name, "Grace Hopper");
        assert_eq!(inbox[1].invitation_id, first);
        assert_eq!(inbox[1].profile.full_name, "Ada Lovelace");

        cleanup_dir(&dir);
    }

    #[test]
    fn pending_inbox_drops_unknown_requesters() {
        let dir = unique_temp_dir("pending_drops");
        let (manager, queries, _) = open_stack(&dir);

        manager.send_request("phantom", "u3").unwrap();
        manager.send_request("u1", "u3").unwrap();

        let inbox = queries.pending_invitations("u3").unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].profile.user_id, "u1");

        cleanup_dir(&dir);
    }

    #[test]
    fn search_excludes_self_and_deduplicates() {
        let dir = unique_temp_dir("search");
        let (_, queries, directory) = open_stack(&dir);

        // "Ada Lovelace" (u1) and "Adele Goldberg" (u4) match the prefix;
        // u1 also matches by exact email when searched for it.
        let results = queries.search_profiles("Ad", "u4").unwrap();
        let ids: Vec<&str> = results.iter().map(|p| p.user_id.as_str()).collect();
        assert_eq!(ids, vec!["u1"]);

        directory.put_profile("u5", "ada@example.com", None, Some("ada@example.com"));
        let results = queries.search_profiles("ada@example.com", "u2").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].user_id, "u5");

        cleanup_dir(&dir);
    }
}

// ============================================================================
// Persistence Tests
// ============================================================================

mod persistence_tests {
    use super::*;

    #[test]
    fn open_creates_the_data_directory() {
        let dir = unique_temp_dir("creates_dir");
        assert!(!dir.exists());

        let directory = seeded_directory();
        let _manager = ConnectionManager::open(&dir, directory).expect("should open manager");
        assert!(dir.is_dir());

        cleanup_dir(&dir);
    }

    #[test]
    fn state_survives_reopen() {
        let dir = unique_temp_dir("reopen");

        let invitation_id = {
            let (manager, _, _) = open_stack(&dir);
            let id12 = sent_id(&manager.send_request("u1", "u2").unwrap());
            manager.accept_request(id12, "u2").unwrap();
            sent_id(&manager.send_request("u3", "u1").unwrap())
        };

        let directory = seeded_directory();
        let manager = ConnectionManager::open(&dir, directory.clone()).unwrap();
        let queries = QueryService::new(manager.storage(), directory);

        assert_eq!(
            queries.relationship_status("u1", "u2").unwrap(),
            RelationshipStatus::Connected
        );
        assert_eq!(
            queries.relationship_status("u1", "u3").unwrap(),
            RelationshipStatus::PendingReceived {
                invitation_id
            }
        );

        cleanup_dir(&dir);
    }
}
