//! Property-based test generators using proptest.
//!
//! Stop ids are drawn from a small pool so generated operations collide on
//! the same keys often.

use proptest::prelude::*;
use stopsync_protocol::{FavouriteStop, RemoteChange, StopId, SyncState, Timestamp};

/// Strategy for any valid stop id.
pub fn stop_id_strategy() -> impl Strategy<Value = StopId> {
    prop::string::string_regex("[A-Za-z0-9]{1,32}")
        .expect("Invalid regex")
        .prop_map(|s| StopId::new(s).expect("regex yields valid ids"))
}

/// Strategy for one of `pool` fixed stop ids, `S0` to `S{pool-1}`.
pub fn pooled_stop_id_strategy(pool: u8) -> impl Strategy<Value = StopId> {
    (0..pool.max(1)).prop_map(|n| StopId::new(format!("S{n}")).expect("valid pooled id"))
}

/// Strategy for user labels, including empty ones.
pub fn description_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z ]{0,16}").expect("Invalid regex")
}

/// Strategy for clean records drawn from a pool of `pool` stop ids.
pub fn favourite_stop_strategy(pool: u8) -> impl Strategy<Value = FavouriteStop> {
    (
        pooled_stop_id_strategy(pool),
        description_strategy(),
        any::<bool>(),
        1i64..10_000,
        prop::option::of(1u64..100),
    )
        .prop_map(|(stop_id, description, preferred, millis, version)| FavouriteStop {
            stop_id,
            description,
            preferred,
            last_modified: Timestamp::from_millis(millis),
            sync_state: SyncState::Clean,
            remote_version: version,
        })
}

/// Strategy for remote changes, about one in four a tombstone.
pub fn remote_change_strategy(pool: u8) -> impl Strategy<Value = RemoteChange> {
    prop_oneof![
        3 => favourite_stop_strategy(pool).prop_map(RemoteChange::Upsert),
        1 => (pooled_stop_id_strategy(pool), prop::option::of(1i64..10_000)).prop_map(
            |(stop_id, at)| RemoteChange::Tombstone {
                stop_id,
                deleted_at: at.map(Timestamp::from_millis),
            }
        ),
    ]
}

/// Strategy for a page of up to `max_len` remote changes.
pub fn remote_changes_strategy(
    pool: u8,
    max_len: usize,
) -> impl Strategy<Value = Vec<RemoteChange>> {
    prop::collection::vec(remote_change_strategy(pool), 0..=max_len)
}

/// A local action taken by the user.
#[derive(Debug, Clone)]
pub enum LocalEdit {
    /// Add or edit a favourite.
    Save {
        /// Target stop.
        stop_id: StopId,
        /// New label.
        description: String,
        /// New pinned flag.
        preferred: bool,
    },
    /// Delete a favourite.
    Delete {
        /// Target stop.
        stop_id: StopId,
    },
}

/// Strategy for a sequence of local edits over a pool of stop ids.
pub fn local_edits_strategy(pool: u8, max_len: usize) -> impl Strategy<Value = Vec<LocalEdit>> {
    let edit = prop_oneof![
        3 => (pooled_stop_id_strategy(pool), description_strategy(), any::<bool>()).prop_map(
            |(stop_id, description, preferred)| LocalEdit::Save {
                stop_id,
                description,
                preferred,
            }
        ),
        1 => pooled_stop_id_strategy(pool).prop_map(|stop_id| LocalEdit::Delete { stop_id }),
    ];
    prop::collection::vec(edit, 0..=max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn pooled_ids_stay_in_pool(id in pooled_stop_id_strategy(4)) {
            prop_assert!(["S0", "S1", "S2", "S3"].contains(&id.as_str()));
        }

        #[test]
        fn generated_ids_are_valid(id in stop_id_strategy()) {
            prop_assert!(StopId::new(id.as_str()).is_ok());
        }
    }
}
