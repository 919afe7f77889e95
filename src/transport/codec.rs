//! NDJSON codec for message serialization
//!
//! One JSON object per line, shared by the mailbox and its clients.

use crate::protocol::{ClientMessage, ServerMessage};
use crate::transport::ChannelError;

/// Encode a client message into NDJSON format (JSON + newline)
pub fn encode_client_message(message: &ClientMessage) -> Result<String, ChannelError> {
    let mut json = serde_json::to_string(message)?;
    json.push('\n');
    Ok(json)
}

/// Encode a server message into NDJSON format
pub fn encode_server_message(message: &ServerMessage) -> Result<String, ChannelError> {
    let mut json = serde_json::to_string(message)?;
    json.push('\n');
    Ok(json)
}

pub fn decode_client_message(line: &str) -> Result<ClientMessage, ChannelError> {
    let message: ClientMessage = serde_json::from_str(line.trim())?;
    Ok(message)
}

pub fn decode_server_message(line: &str) -> Result<ServerMessage, ChannelError> {
    let message: ServerMessage = serde_json::from_str(line.trim())?;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RecordUpdate, SessionRecord};

    #[test]
    fn test_encode_client_message() {
        let message = ClientMessage::new_get();
        let encoded = encode_client_message(&message).unwrap();
        assert!(encoded.ends_with('\n'));
        assert!(encoded.contains("\"type\":\"get\""));
    }

    #[test]
    fn test_update_survives_the_wire() {
        let message = ClientMessage::new_update(RecordUpdate {
            flag: Some(1),
            slope: Some(1500.0),
            ..Default::default()
        });
        let encoded = encode_client_message(&message).unwrap();

        match decode_client_message(&encoded).unwrap() {
            ClientMessage::Update { update, .. } => {
                assert_eq!(update.flag, Some(1));
                assert_eq!(update.slope, Some(1500.0));
                assert_eq!(update.r2, None);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_event_decodes() {
        let record = SessionRecord {
            flag: 4,
            slope: 1000.0,
            ..Default::default()
        };
        let encoded = encode_server_message(&ServerMessage::new_snapshot(record.clone(), 12)).unwrap();
        assert!(encoded.contains("\"type\":\"snapshot\""));

        match decode_server_message(&encoded).unwrap() {
            ServerMessage::Snapshot { record: decoded, ts } => {
                assert_eq!(decoded, record);
                assert_eq!(ts, 12);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_garbage_line_is_a_serialization_error() {
        let err = decode_client_message("{not json").unwrap_err();
        assert!(matches!(err, ChannelError::Serialization(_)));
    }
}
