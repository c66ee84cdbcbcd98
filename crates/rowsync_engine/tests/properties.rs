//! Property tests: two clients and a server converge after a full round of
//! sessions, whatever they edited in between.

mod common;

use common::*;
use proptest::prelude::*;
use rowsync_engine::{Orchestrator, RemotePeer, ResolutionPolicy, ServerPeer, SessionConfig};
use rowsync_store::Store;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Edit {
    Upsert { site: usize, key: i64, value: u16 },
    Delete { site: usize, key: i64 },
}

fn edit_strategy() -> impl Strategy<Value = Edit> {
    prop_oneof![
        3 => (0..3usize, 1..=5i64, any::<u16>())
            .prop_map(|(site, key, value)| Edit::Upsert { site, key, value }),
        1 => (0..3usize, 1..=5i64).prop_map(|(site, key)| Edit::Delete { site, key }),
    ]
}

fn policy(index: u8) -> ResolutionPolicy {
    match index {
        0 => ResolutionPolicy::RemoteWins,
        1 => ResolutionPolicy::LocalWins,
        _ => ResolutionPolicy::LatestVersionWins,
    }
}

fn apply(stores: &[&Store; 3], edit: &Edit) {
    match edit {
        Edit::Upsert { site, key, value } => stores[*site]
            .transaction(|txn| txn.upsert(TABLE, *key, name("Prop", &format!("V{value}"))))
            .unwrap(),
        Edit::Delete { site, key } => {
            stores[*site]
                .transaction(|txn| txn.delete(TABLE, *key))
                .unwrap();
        }
    }
}

fn client(store: &Arc<Store>, peer: &Arc<dyn RemotePeer>) -> Orchestrator {
    Orchestrator::new(Arc::clone(store), Arc::clone(peer))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn clients_converge_after_a_full_round(
        rounds in prop::collection::vec(prop::collection::vec(edit_strategy(), 0..12), 1..4),
        policy_index in 0u8..3,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let server_store = store();
        let server = server_for(&server_store);
        let peer: Arc<dyn RemotePeer> = Arc::new(ServerPeer::new(Arc::clone(&server)));
        let a_store = store();
        let b_store = store();
        let a = client(&a_store, &peer);
        let b = client(&b_store, &peer);
        let config = SessionConfig::new([TABLE]).with_policy(policy(policy_index));

        for edits in &rounds {
            for edit in edits {
                apply(&[&a_store, &b_store, &server_store], edit);
            }

            runtime.block_on(async {
                for orchestrator in [&a, &b, &a] {
                    let report = orchestrator.synchronize(&config).await;
                    assert!(report.is_completed(), "{report}");
                }
            });

            let expected = digest(&server_store);
            prop_assert_eq!(digest(&a_store), expected.clone());
            prop_assert_eq!(digest(&b_store), expected);
        }
    }

    #[test]
    fn quiet_session_changes_nothing(
        edits in prop::collection::vec(edit_strategy(), 0..12),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let pair = Pair::new();
        let config = SessionConfig::new([TABLE]);
        for edit in &edits {
            // Only the client and the server take part here.
            let edit = match edit {
                Edit::Upsert { site, key, value } => Edit::Upsert { site: site % 2 * 2, key: *key, value: *value },
                Edit::Delete { site, key } => Edit::Delete { site: site % 2 * 2, key: *key },
            };
            apply(&[&pair.client, &pair.client, &pair.server_store], &edit);
        }

        let (first, second) = runtime.block_on(async {
            let first = pair.orchestrator.synchronize(&config).await;
            let second = pair.orchestrator.synchronize(&config).await;
            (first, second)
        });

        prop_assert!(first.is_completed(), "{}", first);
        prop_assert!(second.is_completed(), "{}", second);
        prop_assert_eq!(second.rows_applied, 0);
        prop_assert!(second.conflicts.is_empty());
        prop_assert_eq!(digest(&pair.client), digest(&pair.server_store));
    }
}
