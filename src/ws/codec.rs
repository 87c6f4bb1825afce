//! Binary frame codec.
//!
//! Frames follow the y-protocols layout and are read and written through
//! `yrs::sync::Message`:
//!
//! ```text
//! frame      := varuint kind, payload
//! sync       := varuint subtype, varbytes data        (kind 0)
//! awareness  := varbytes update                       (kind 1)
//! update     := varuint n, n * (varuint client, varuint clock, varstring json)
//! ```
//!
//! The helpers here only add the parsed view of presence states that the
//! authorship bookkeeping needs.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use yrs::sync::awareness::AwarenessUpdateEntry;
use yrs::sync::{AwarenessUpdate, Message, SyncMessage};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;

use crate::error::DecodeError;
use crate::models::AwarenessEntry;

/// JSON text of a cleared presence state.
const NULL_STATE: &str = "null";

/// Decode one inbound frame.
pub fn decode_frame(frame: &[u8]) -> Result<Message, DecodeError> {
    Ok(Message::decode_v1(frame)?)
}

pub fn encode_sync(msg: SyncMessage) -> Vec<u8> {
    Message::Sync(msg).encode_v1()
}

pub fn encode_awareness(update: AwarenessUpdate) -> Vec<u8> {
    Message::Awareness(update).encode_v1()
}

/// Short name of a frame, for logs.
pub fn message_label(msg: &Message) -> &'static str {
    match msg {
        Message::Sync(sync) => sync_label(sync),
        Message::Awareness(_) => "awareness",
        Message::AwarenessQuery => "awareness-query",
        Message::Auth(_) => "auth",
        Message::Custom(..) => "custom",
    }
}

pub fn sync_label(msg: &SyncMessage) -> &'static str {
    match msg {
        SyncMessage::SyncStep1(_) => "step1",
        SyncMessage::SyncStep2(_) => "step2",
        SyncMessage::Update(_) => "update",
    }
}

/// Parsed entries of `update`, ordered by client id.
///
/// Fails on the first state that is not valid JSON.
pub fn presence_entries(update: &AwarenessUpdate) -> Result<Vec<AwarenessEntry>, DecodeError> {
    let mut entries = update
        .clients
        .iter()
        .map(|(&client_id, entry)| -> Result<AwarenessEntry, DecodeError> {
            let state = if entry.json.as_ref() == NULL_STATE {
                None
            } else {
                let value = serde_json::from_str::<Value>(&entry.json).map_err(|e| {
                    DecodeError::InvalidJson {
                        client_id,
                        reason: e.to_string(),
                    }
                })?;
                Some(value)
            };
            Ok(AwarenessEntry::new(client_id, entry.clock, state))
        })
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.client_id);
    Ok(entries)
}

/// Build an awareness update out of parsed entries.
pub fn presence_update(entries: &[AwarenessEntry]) -> AwarenessUpdate {
    let clients: HashMap<u64, AwarenessUpdateEntry> = entries
        .iter()
        .map(|entry| {
            let json: Arc<str> = match &entry.state {
                Some(state) => state.to_string().into(),
                None => NULL_STATE.into(),
            };
            (
                entry.client_id,
                AwarenessUpdateEntry {
                    clock: entry.clock,
                    json,
                },
            )
        })
        .collect();
    AwarenessUpdate { clients }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use yrs::StateVector;

    #[test]
    fn test_empty_step1_frame() {
        let frame = encode_sync(SyncMessage::SyncStep1(StateVector::default()));
        assert_eq!(frame, vec![0, 0, 1, 0]);
        let msg = decode_frame(&frame).unwrap();
        assert_eq!(message_label(&msg), "step1");
    }

    #[test]
    fn test_truncated_frame_is_malformed() {
        assert!(matches!(decode_frame(&[]), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode_frame(&[0, 2, 5, 1]), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_unknown_kind_decodes_as_custom() {
        let msg = decode_frame(&[7, 1, 42]).unwrap();
        assert_eq!(msg, Message::Custom(7, vec![42]));
    }

    #[test]
    fn test_presence_entries_parse_states() {
        let update = presence_update(&[
            AwarenessEntry::new(9, 2, None),
            AwarenessEntry::new(4, 1, Some(json!({"name": "Ann"}))),
        ]);
        let frame = encode_awareness(update);
        let Message::Awareness(decoded) = decode_frame(&frame).unwrap() else {
            panic!("expected an awareness frame");
        };
        assert_eq!(
            presence_entries(&decoded).unwrap(),
            vec![
                AwarenessEntry::new(4, 1, Some(json!({"name": "Ann"}))),
                AwarenessEntry::new(9, 2, None),
            ]
        );
    }

    #[test]
    fn test_presence_entries_reject_bad_json() {
        let mut update = presence_update(&[]);
        update.clients.insert(
            3,
            AwarenessUpdateEntry {
                clock: 1,
                json: "{not json".into(),
            },
        );
        assert!(matches!(
            presence_entries(&update),
            Err(DecodeError::InvalidJson { client_id: 3, .. })
        ));
    }
}
