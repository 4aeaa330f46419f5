//! Property tests for the sync engine.

use proptest::prelude::*;
use std::collections::HashSet;
use stopsync_engine::CloudError;
use stopsync_protocol::{ChangeBatch, ChangeToken, RemoteChange, SyncState};
use stopsync_testkit::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn page(changes: Vec<RemoteChange>, token: &[u8]) -> ChangeBatch {
    ChangeBatch::new(changes, ChangeToken::new(token.to_vec()), false)
}

async fn apply_edit(harness: &TestEngine, edit: LocalEdit) {
    let handle = match edit {
        LocalEdit::Save {
            stop_id,
            description,
            preferred,
        } => harness.engine.add_or_edit(stop_id, description, preferred),
        LocalEdit::Delete { stop_id } => harness.engine.delete(&stop_id),
    }
    .unwrap();
    handle.wait().await.unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn store_never_holds_duplicates(
        edits in local_edits_strategy(4, 12),
        remote in remote_changes_strategy(4, 12),
        pushes_fail in any::<bool>(),
    ) {
        runtime().block_on(async {
            let harness = TestEngine::builder().build().ready().await;
            if pushes_fail {
                harness.cloud.fail_always(CloudOp::Push, CloudError::Transient("offline".into()));
                harness.cloud.fail_always(CloudOp::PushDelete, CloudError::Transient("offline".into()));
            }

            let (before, after) = edits.split_at(edits.len() / 2);
            for edit in before.iter().cloned() {
                apply_edit(&harness, edit).await;
            }
            harness.cloud.script_batch(Ok(page(remote, b"r1")));
            harness.engine.fetch_remote_changes(false).await.unwrap();
            for edit in after.iter().cloned() {
                apply_edit(&harness, edit).await;
            }

            let records = harness.engine.store().list_all();
            let ids: HashSet<_> = records.iter().map(|r| r.stop_id.clone()).collect();
            prop_assert_eq!(ids.len(), records.len());

            let pending = harness.engine.store().list_pending();
            let queued: HashSet<_> = pending.iter().map(|op| op.stop_id.clone()).collect();
            prop_assert_eq!(queued.len(), pending.len());
            for op in &pending {
                let record = harness.engine.store().find(&op.stop_id);
                prop_assert!(record.is_some_and(|r| r.is_pending()));
            }
            prop_assert!(pending.windows(2).all(|w| w[0].seq < w[1].seq));
            Ok(())
        })?;
    }

    #[test]
    fn replaying_a_page_is_idempotent(remote in remote_changes_strategy(5, 16)) {
        runtime().block_on(async {
            let harness = TestEngine::builder().build().ready().await;

            harness.cloud.script_batch(Ok(page(remote.clone(), b"r1")));
            harness.engine.fetch_remote_changes(false).await.unwrap();
            let once = harness.engine.store().list_all();

            harness.cloud.script_batch(Ok(page(remote, b"r1")));
            harness.engine.fetch_remote_changes(false).await.unwrap();
            let twice = harness.engine.store().list_all();

            prop_assert_eq!(once, twice);
            prop_assert_eq!(
                harness.engine.store().change_token(),
                Some(ChangeToken::new(b"r1".to_vec()))
            );
            Ok(())
        })?;
    }

    #[test]
    fn older_remote_changes_leave_pending_edits_alone(
        edits in local_edits_strategy(4, 8),
        remote in remote_changes_strategy(4, 16),
    ) {
        runtime().block_on(async {
            let harness = TestEngine::builder().build().ready().await;
            harness.cloud.fail_always(CloudOp::Push, CloudError::Transient("offline".into()));
            harness.cloud.fail_always(CloudOp::PushDelete, CloudError::Transient("offline".into()));

            for edit in edits {
                apply_edit(&harness, edit).await;
            }
            let pending_before: Vec<_> = harness
                .engine
                .store()
                .list_all()
                .into_iter()
                .filter(|r| r.sync_state == SyncState::PendingPush)
                .collect();

            // Generated timestamps are all far in the past.
            harness.cloud.script_batch(Ok(page(remote, b"r1")));
            harness.engine.fetch_remote_changes(false).await.unwrap();

            for record in pending_before {
                let after = harness.engine.store().find(&record.stop_id);
                prop_assert_eq!(after.as_ref(), Some(&record));
                prop_assert!(harness.engine.store().pending(&record.stop_id).is_some());
            }
            Ok(())
        })?;
    }
}
