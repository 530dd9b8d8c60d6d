//! Binary framing for the legacy gateway and feedback service.
//!
//! All integers are big-endian. Outbound notifications use the "enhanced"
//! format (command 1), which carries an identifier the gateway echoes back in
//! its error response (command 8).

use chrono::{DateTime, Utc};

use crate::{DeviceToken, Status, TOKEN_LEN};

/// Command byte of an enhanced notification frame.
pub const NOTIFICATION_COMMAND: u8 = 1;

/// Command byte of a gateway error response.
pub const ERROR_RESPONSE_COMMAND: u8 = 8;

/// Largest payload the gateway accepts.
pub const MAX_PAYLOAD_LEN: usize = 256;

/// command + identifier + expiry + token length + token + payload length.
pub const NOTIFICATION_HEADER_LEN: usize = 1 + 4 + 4 + 2 + TOKEN_LEN + 2;

/// Length of a gateway error response.
pub const ERROR_RESPONSE_LEN: usize = 6;

/// Length of one feedback record: timestamp + token length + token.
pub const FEEDBACK_RECORD_LEN: usize = 4 + 2 + TOKEN_LEN;

/// Encoding or decoding failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("payload is {len} bytes, the gateway accepts at most {MAX_PAYLOAD_LEN}")]
    PayloadTooLarge { len: usize },
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

/// One enhanced notification frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationFrame {
    pub identifier: u32,
    /// Expiry as seconds since the Unix epoch. Zero means "do not store".
    pub expiry: u32,
    pub token: DeviceToken,
    pub payload: Vec<u8>,
}

impl NotificationFrame {
    /// Encode to wire bytes, enforcing the payload size limit.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_notification(self.identifier, &self.token, self.expiry, &self.payload)
    }

    /// Decode one complete frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < NOTIFICATION_HEADER_LEN {
            return Err(CodecError::MalformedFrame(format!(
                "notification frame is {} bytes, header alone is {NOTIFICATION_HEADER_LEN}",
                bytes.len()
            )));
        }
        if bytes[0] != NOTIFICATION_COMMAND {
            return Err(CodecError::MalformedFrame(format!(
                "unexpected notification command {}",
                bytes[0]
            )));
        }

        let identifier = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let expiry = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
        let token_len = u16::from_be_bytes([bytes[9], bytes[10]]) as usize;
        if token_len != TOKEN_LEN {
            return Err(CodecError::MalformedFrame(format!(
                "token length {token_len}, expected {TOKEN_LEN}"
            )));
        }
        let token = DeviceToken::from_slice(&bytes[11..11 + TOKEN_LEN])
            .map_err(|e| CodecError::MalformedFrame(e.to_string()))?;

        let len_at = 11 + TOKEN_LEN;
        let payload_len = notification_payload_len(bytes).ok_or_else(|| {
            CodecError::MalformedFrame("notification header cut short".into())
        })?;
        let payload = &bytes[len_at + 2..];
        if payload.len() != payload_len {
            return Err(CodecError::MalformedFrame(format!(
                "payload length field says {payload_len}, frame carries {}",
                payload.len()
            )));
        }

        Ok(Self {
            identifier,
            expiry,
            token,
            payload: payload.to_vec(),
        })
    }
}

/// Payload length announced by a notification header, or `None` when
/// `header` is shorter than [`NOTIFICATION_HEADER_LEN`].
pub fn notification_payload_len(header: &[u8]) -> Option<usize> {
    let at = NOTIFICATION_HEADER_LEN - 2;
    match header.get(at..NOTIFICATION_HEADER_LEN)? {
        [hi, lo] => Some(u16::from_be_bytes([*hi, *lo]) as usize),
        _ => None,
    }
}

/// Encode an enhanced notification frame.
pub fn encode_notification(
    identifier: u32,
    token: &DeviceToken,
    expiry: u32,
    payload: &[u8],
) -> Result<Vec<u8>, CodecError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLarge { len: payload.len() });
    }

    let mut frame = Vec::with_capacity(NOTIFICATION_HEADER_LEN + payload.len());
    frame.push(NOTIFICATION_COMMAND);
    frame.extend_from_slice(&identifier.to_be_bytes());
    frame.extend_from_slice(&expiry.to_be_bytes());
    frame.extend_from_slice(&(TOKEN_LEN as u16).to_be_bytes());
    frame.extend_from_slice(token.as_bytes());
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Error response sent by the gateway before it drops the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorResponse {
    pub status: Status,
    /// Identifier of the first notification the gateway rejected.
    pub identifier: u32,
}

impl ErrorResponse {
    pub fn new(status: Status, identifier: u32) -> Self {
        Self { status, identifier }
    }

    pub fn encode(&self) -> [u8; ERROR_RESPONSE_LEN] {
        let id = self.identifier.to_be_bytes();
        [
            ERROR_RESPONSE_COMMAND,
            self.status.code(),
            id[0],
            id[1],
            id[2],
            id[3],
        ]
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        decode_error_frame(bytes)
    }
}

/// Decode a gateway error response. Anything but 6 bytes with command 8 is
/// malformed.
pub fn decode_error_frame(bytes: &[u8]) -> Result<ErrorResponse, CodecError> {
    let bytes: &[u8; ERROR_RESPONSE_LEN] = bytes.try_into().map_err(|_| {
        CodecError::MalformedFrame(format!(
            "error response is {} bytes, expected {ERROR_RESPONSE_LEN}",
            bytes.len()
        ))
    })?;
    if bytes[0] != ERROR_RESPONSE_COMMAND {
        return Err(CodecError::MalformedFrame(format!(
            "unexpected error response command {}",
            bytes[0]
        )));
    }

    Ok(ErrorResponse {
        status: Status::from(bytes[1]),
        identifier: u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
    })
}

/// A device the feedback service reports as no longer reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackRecord {
    /// Seconds since the Unix epoch at which the device stopped accepting
    /// notifications.
    pub timestamp: u32,
    pub token: DeviceToken,
}

impl FeedbackRecord {
    pub fn feedback_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(i64::from(self.timestamp), 0).unwrap_or_default()
    }

    pub fn encode(&self) -> [u8; FEEDBACK_RECORD_LEN] {
        let mut record = [0u8; FEEDBACK_RECORD_LEN];
        record[..4].copy_from_slice(&self.timestamp.to_be_bytes());
        record[4..6].copy_from_slice(&(TOKEN_LEN as u16).to_be_bytes());
        record[6..].copy_from_slice(self.token.as_bytes());
        record
    }

    pub fn decode(bytes: &[u8; FEEDBACK_RECORD_LEN]) -> Result<Self, CodecError> {
        let timestamp = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let token_len = u16::from_be_bytes([bytes[4], bytes[5]]) as usize;
        if token_len != TOKEN_LEN {
            return Err(CodecError::MalformedFrame(format!(
                "feedback token length {token_len}, expected {TOKEN_LEN}"
            )));
        }
        let token = DeviceToken::from_slice(&bytes[6..])
            .map_err(|e| CodecError::MalformedFrame(e.to_string()))?;
        Ok(Self { timestamp, token })
    }
}

/// Decode every complete feedback record in `bytes`.
///
/// A partial trailing record marks the end of the stream and is ignored.
pub fn decode_feedback_records(bytes: &[u8]) -> Result<Vec<FeedbackRecord>, CodecError> {
    bytes
        .chunks_exact(FEEDBACK_RECORD_LEN)
        .map(|chunk| {
            let record: &[u8; FEEDBACK_RECORD_LEN] = chunk
                .try_into()
                .map_err(|_| CodecError::MalformedFrame("short feedback record".into()))?;
            FeedbackRecord::decode(record)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn token() -> DeviceToken {
        DeviceToken::new([0xab; TOKEN_LEN])
    }

    #[test]
    fn test_notification_layout() {
        let payload = br#"{"aps":{"badge":1}}"#;
        let frame = encode_notification(0x0102_0304, &token(), 0x0a0b_0c0d, payload).unwrap();

        assert_eq!(frame.len(), NOTIFICATION_HEADER_LEN + payload.len());
        assert_eq!(frame[0], 1);
        assert_eq!(&frame[1..5], &[1, 2, 3, 4]);
        assert_eq!(&frame[5..9], &[0x0a, 0x0b, 0x0c, 0x0d]);
        assert_eq!(&frame[9..11], &[0, 32]);
        assert_eq!(&frame[11..43], &[0xab; 32]);
        assert_eq!(&frame[43..45], &[0, payload.len() as u8]);
        assert_eq!(&frame[45..], payload);
    }

    #[test]
    fn test_notification_decode() {
        let frame = NotificationFrame {
            identifier: 77,
            expiry: 1_700_000_000,
            token: token(),
            payload: b"{}".to_vec(),
        };
        let bytes = frame.encode().unwrap();
        assert_eq!(notification_payload_len(&bytes), Some(2));
        assert_eq!(NotificationFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_payload_len_of_short_header() {
        let bytes = encode_notification(1, &token(), 0, b"{}").unwrap();
        assert_eq!(notification_payload_len(&bytes[..NOTIFICATION_HEADER_LEN - 1]), None);
        assert_eq!(notification_payload_len(&[]), None);
        assert_eq!(notification_payload_len(&bytes[..NOTIFICATION_HEADER_LEN]), Some(2));
    }

    #[test]
    fn test_notification_decode_rejects_truncated_payload() {
        let mut bytes = encode_notification(1, &token(), 0, b"{\"a\":1}").unwrap();
        bytes.pop();
        assert!(matches!(
            NotificationFrame::decode(&bytes),
            Err(CodecError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_payload_limit() {
        let at_limit = vec![b'x'; MAX_PAYLOAD_LEN];
        assert!(encode_notification(1, &token(), 0, &at_limit).is_ok());

        let over = vec![b'x'; MAX_PAYLOAD_LEN + 1];
        assert_eq!(
            encode_notification(1, &token(), 0, &over),
            Err(CodecError::PayloadTooLarge { len: 257 })
        );
    }

    #[test]
    fn test_error_frame_rejects_bad_length() {
        assert!(matches!(
            decode_error_frame(&[8, 8, 0, 0, 0]),
            Err(CodecError::MalformedFrame(_))
        ));
        assert!(matches!(
            decode_error_frame(&[8, 8, 0, 0, 0, 1, 0]),
            Err(CodecError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_error_frame_rejects_bad_command() {
        assert!(matches!(
            decode_error_frame(&[1, 8, 0, 0, 0, 1]),
            Err(CodecError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_error_frame_layout() {
        let bytes = ErrorResponse::new(Status::InvalidToken, 0x0102_0304).encode();
        assert_eq!(bytes, [8, 8, 1, 2, 3, 4]);
    }

    #[test]
    fn test_feedback_records_ignore_partial_tail() {
        let first = FeedbackRecord {
            timestamp: 1_300_000_000,
            token: token(),
        };
        let second = FeedbackRecord {
            timestamp: 1_300_000_060,
            token: DeviceToken::new([0x01; TOKEN_LEN]),
        };

        let mut stream = Vec::new();
        stream.extend_from_slice(&first.encode());
        stream.extend_from_slice(&second.encode());
        stream.extend_from_slice(&[0, 0, 0]);

        let records = decode_feedback_records(&stream).unwrap();
        assert_eq!(records, vec![first, second]);
        assert_eq!(records[0].feedback_at().timestamp(), 1_300_000_000);
    }

    #[test]
    fn test_feedback_record_rejects_bad_token_length() {
        let mut bytes = FeedbackRecord {
            timestamp: 0,
            token: token(),
        }
        .encode();
        bytes[5] = 31;
        assert!(matches!(
            FeedbackRecord::decode(&bytes),
            Err(CodecError::MalformedFrame(_))
        ));
    }

    proptest! {
        #[test]
        fn error_frame_round_trip(status in any::<u8>(), identifier in any::<u32>()) {
            let response = ErrorResponse::new(Status::from(status), identifier);
            let decoded = decode_error_frame(&response.encode()).unwrap();
            prop_assert_eq!(decoded.status.code(), status);
            prop_assert_eq!(decoded.identifier, identifier);
            prop_assert_eq!(decoded, response);
        }
    }
}
