//! CBOR encoding for everything this crate persists.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value as CBOR.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
pub fn to_cbor<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decodes a value from CBOR bytes.
///
/// # Errors
///
/// Returns [`ProtocolError::Decode`] if the bytes are not valid CBOR for `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FavouriteStop, StopId, SyncState, Timestamp};

    #[test]
    fn stop_survives_cbor() {
        let mut stop = FavouriteStop::new(
            StopId::new("ABCD").unwrap(),
            "Main St",
            true,
            Timestamp::from_millis(1_700_000_000_000),
        );
        stop.sync_state = SyncState::PendingPush;
        stop.remote_version = Some(7);

        let bytes = to_cbor(&stop).unwrap();
        let decoded: FavouriteStop = from_cbor(&bytes).unwrap();
        assert_eq!(decoded, stop);
    }

    #[test]
    fn garbage_is_decode_error() {
        let result: ProtocolResult<FavouriteStop> = from_cbor(&[0xFF, 0x00, 0x13]);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn invalid_stop_id_is_rejected_on_decode() {
        let bytes = to_cbor(&"not valid!").unwrap();
        let result: ProtocolResult<StopId> = from_cbor(&bytes);
        assert!(result.is_err());
    }
}
