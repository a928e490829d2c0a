//! Wire encode / decode.
//!
//! ```text
//! MAGIC(7) | MD5(payload)(16) | encType(1) | len(payload)(4, LE) | payload | MAGIC(7)
//! ```
//!
//! Cleartext payload: `msgType(1) | version(1) | JSON`.
//!
//! Asymmetric payload, before encryption:
//! `version(1) | token(3..=6) | MAGIC(7) | token | msgType(1) | JSON | "YYYY-MM-DD-HH-MM"`.
//!
//! Relay payload: a signed parcel holding another complete frame.

use chrono::{DateTime, NaiveDateTime, Utc};
use md5::{Digest, Md5};
use rand::Rng;
use serde_json::Value;

use crate::framing::{ByteReader, ByteWriter};
use crate::gateway::{Decrypter, Encrypter};
use crate::message::{EncType, Message, MessageType};
use crate::ProtocolError;

pub const MAGIC: &[u8; 7] = b"murmeli";
pub const VERSION: u8 = 1;

const CHECKSUM_LEN: usize = 16;
const TIMESTAMP_LEN: usize = 16;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M";
const TOKEN_LENGTHS: std::ops::RangeInclusive<usize> = 3..=6;

/// Smallest possible frame: both magics, checksum, type, length.
pub const MIN_FRAME_LEN: usize = 2 * MAGIC.len() + CHECKSUM_LEN + 1 + 4;

/// Encode `msg` into a complete frame.
pub fn encode(msg: &Message, encrypter: &dyn Encrypter) -> Result<Vec<u8>, ProtocolError> {
    msg.ensure_complete()?;

    let payload = match msg.enc_type {
        EncType::None => {
            let mut w = ByteWriter::new();
            w.write_number(msg.msg_type as u64, 1)
                .write_number(VERSION as u64, 1)
                .write_field(&json_body(msg)?);
            encrypter.encrypt(&w.into_bytes(), EncType::None)?
        }
        EncType::Asymmetric => {
            let inner = asymmetric_inner(msg)?;
            encrypter.encrypt(&inner, EncType::Asymmetric)?
        }
        EncType::Relay => msg
            .parcel
            .clone()
            .ok_or_else(|| ProtocolError::Crypto("relay message without parcel".into()))?,
    };

    if payload.len() > u32::MAX as usize {
        return Err(ProtocolError::Serialization("payload too large".into()));
    }

    let mut w = ByteWriter::new();
    w.write_field(MAGIC)
        .write_field(&Md5::digest(&payload))
        .write_number(msg.enc_type as u64, 1)
        .write_length_prefixed(&payload, 4)
        .write_field(MAGIC);
    Ok(w.into_bytes())
}

/// Decode a received frame.
///
/// Any structural problem is an [`ProtocolError::InvalidFrame`]; the caller
/// drops the bytes.
pub fn decode(data: &[u8], decrypter: &dyn Decrypter) -> Result<Message, ProtocolError> {
    let mut r = ByteReader::new(data);
    if r.read_field(MAGIC.len()) != MAGIC {
        return Err(ProtocolError::frame("bad leading magic"));
    }
    let checksum = r.read_field(CHECKSUM_LEN);
    let enc_byte = r
        .read_number(1)
        .ok_or_else(|| ProtocolError::frame("truncated header"))?;
    let payload_len = r
        .read_number(4)
        .ok_or_else(|| ProtocolError::frame("truncated header"))? as usize;
    let payload = r.read_field(payload_len);
    if payload.len() != payload_len || payload.is_empty() {
        return Err(ProtocolError::frame("truncated payload"));
    }
    if r.read_field(MAGIC.len()) != MAGIC {
        return Err(ProtocolError::frame("bad trailing magic"));
    }
    if !r.is_exhausted() {
        return Err(ProtocolError::frame("trailing bytes after frame"));
    }
    if Md5::digest(payload).as_slice() != checksum {
        return Err(ProtocolError::frame("checksum mismatch"));
    }
    let enc_type = EncType::from_u8(enc_byte as u8)
        .ok_or_else(|| ProtocolError::frame(format!("unknown encryption type {enc_byte}")))?;

    match enc_type {
        EncType::None => {
            let (plain, _) = decrypter.decrypt(payload, EncType::None)?;
            decode_cleartext(&plain)
        }
        EncType::Asymmetric => {
            let (plain, signer) = decrypter.decrypt(payload, EncType::Asymmetric)?;
            let mut msg = decode_asymmetric(&plain)?;
            msg.signature_key_id = signer;
            Ok(msg)
        }
        EncType::Relay => {
            let (inner, signer) = decrypter.decrypt(payload, EncType::Relay)?;
            // One level of wrapping only; the inner decode below cannot recurse.
            if frame_enc_type(&inner) == Some(EncType::Relay) {
                return Err(ProtocolError::frame("relay parcel wraps another relay"));
            }
            if let Ok(for_me) = decode(&inner, decrypter) {
                return Ok(for_me);
            }
            let mut msg = Message::relay(inner);
            msg.signature_key_id = signer;
            Ok(msg)
        }
    }
}

/// Read just the encryption tag of a frame, without checking the payload.
fn frame_enc_type(data: &[u8]) -> Option<EncType> {
    let mut r = ByteReader::new(data);
    if r.read_field(MAGIC.len()) != MAGIC {
        return None;
    }
    r.read_field(CHECKSUM_LEN);
    let enc_byte = r.read_number(1)?;
    EncType::from_u8(enc_byte as u8)
}

fn json_body(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(&Value::Object(msg.wire_fields()))
        .map_err(|e| ProtocolError::Serialization(e.to_string()))
}

fn asymmetric_inner(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    let mut rng = rand::rng();
    let mut token = vec![0u8; rng.random_range(TOKEN_LENGTHS)];
    rng.fill(&mut token[..]);

    let timestamp = msg.timestamp.unwrap_or_else(now_secs);
    let stamp = DateTime::<Utc>::from_timestamp(timestamp, 0)
        .ok_or_else(|| ProtocolError::Serialization(format!("timestamp {timestamp} out of range")))?
        .format(TIMESTAMP_FORMAT)
        .to_string();
    if stamp.len() != TIMESTAMP_LEN {
        return Err(ProtocolError::Serialization(format!(
            "timestamp {timestamp} does not fit the wire format"
        )));
    }

    let mut w = ByteWriter::new();
    w.write_number(VERSION as u64, 1)
        .write_field(&token)
        .write_field(MAGIC)
        .write_field(&token)
        .write_number(msg.msg_type as u64, 1)
        .write_field(&json_body(msg)?)
        .write_field(stamp.as_bytes());
    Ok(w.into_bytes())
}

fn decode_cleartext(plain: &[u8]) -> Result<Message, ProtocolError> {
    let mut r = ByteReader::new(plain);
    let msg_type = read_msg_type(&mut r)?;
    if r.read_number(1) != Some(VERSION as u64) {
        return Err(ProtocolError::frame("unsupported version"));
    }
    let msg = hydrate(msg_type, r.rest())?;
    if msg.enc_type != EncType::None {
        return Err(ProtocolError::frame(format!("{msg_type} must be encrypted")));
    }
    Ok(msg)
}

fn decode_asymmetric(plain: &[u8]) -> Result<Message, ProtocolError> {
    if plain.first() != Some(&VERSION) {
        return Err(ProtocolError::frame("unsupported version"));
    }
    for token_len in TOKEN_LENGTHS {
        let mut r = ByteReader::new(&plain[1..]);
        let token = r.read_field(token_len);
        let magic = r.read_field(MAGIC.len());
        let token2 = r.read_field(token_len);
        if token.is_empty() || token != token2 || magic != MAGIC {
            continue;
        }
        let msg_type = read_msg_type(&mut r)?;
        let rest = r.rest();
        if rest.len() < TIMESTAMP_LEN {
            return Err(ProtocolError::frame("missing timestamp"));
        }
        let (json, stamp) = rest.split_at(rest.len() - TIMESTAMP_LEN);
        let mut msg = hydrate(msg_type, json)?;
        if msg.enc_type != EncType::Asymmetric {
            return Err(ProtocolError::frame(format!("{msg_type} must not be encrypted")));
        }
        msg.timestamp = Some(parse_timestamp(stamp)?);
        return Ok(msg);
    }
    Err(ProtocolError::frame("inner marker not found"))
}

fn read_msg_type(r: &mut ByteReader<'_>) -> Result<MessageType, ProtocolError> {
    let code = r
        .read_number(1)
        .ok_or_else(|| ProtocolError::frame("missing message type"))?;
    MessageType::from_u8(code as u8)
        .filter(|t| *t != MessageType::Relay)
        .ok_or_else(|| ProtocolError::frame(format!("unknown message type {code}")))
}

fn hydrate(msg_type: MessageType, json: &[u8]) -> Result<Message, ProtocolError> {
    let value: Value =
        serde_json::from_slice(json).map_err(|e| ProtocolError::frame(format!("bad json: {e}")))?;
    let Value::Object(map) = value else {
        return Err(ProtocolError::frame("json body is not an object"));
    };
    Message::from_wire_fields(msg_type, map)
}

fn parse_timestamp(stamp: &[u8]) -> Result<i64, ProtocolError> {
    let s = std::str::from_utf8(stamp).map_err(|_| ProtocolError::frame("timestamp not utf-8"))?;
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map(|dt| dt.and_utc().timestamp())
        .map_err(|_| ProtocolError::frame(format!("bad timestamp {s:?}")))
}

/// Current time in seconds, truncated to the minute like the wire format.
pub fn now_secs() -> i64 {
    let now = Utc::now().timestamp();
    now - now.rem_euclid(60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::IdentityGateway;
    use crate::message::field;

    fn sender() -> murmeli_transport::PeerId {
        "alicealicealicea".parse().unwrap()
    }

    #[test]
    fn cleartext_roundtrip() {
        let mut msg = Message::contact_request("Alice", "hi, it's me")
            .with_field(field::PUBLIC_KEY, "murmeli-ed25519:00");
        msg.sender_id = Some(sender());

        let frame = encode(&msg, &IdentityGateway).unwrap();
        assert_eq!(&frame[..7], MAGIC);
        assert_eq!(&frame[frame.len() - 7..], MAGIC);

        let back = decode(&frame, &IdentityGateway).unwrap();
        assert_eq!(back.msg_type, MessageType::ContactRequest);
        assert_eq!(back.sender_id, Some(sender()));
        assert_eq!(back.fields, msg.fields);
        assert_eq!(back.timestamp, None);
    }

    #[test]
    fn asymmetric_roundtrip_keeps_minute_timestamp() {
        let mut msg = Message::regular("hello").with_timestamp(1_700_000_040);
        msg.sender_id = Some(sender());

        let back = decode(&encode(&msg, &IdentityGateway).unwrap(), &IdentityGateway).unwrap();
        assert_eq!(back.msg_type, MessageType::Regular);
        assert_eq!(back.field_str(field::MESSAGE_BODY), Some("hello"));
        assert_eq!(back.timestamp, Some(1_700_000_040));
    }

    #[test]
    fn timestamp_loses_seconds() {
        let msg = Message::info_request().with_timestamp(1_700_000_059);
        let back = decode(&encode(&msg, &IdentityGateway).unwrap(), &IdentityGateway).unwrap();
        assert_eq!(back.timestamp, Some(1_700_000_040));
    }

    #[test]
    fn incomplete_message_is_refused() {
        let msg = Message::new(MessageType::Regular);
        assert!(matches!(
            encode(&msg, &IdentityGateway),
            Err(ProtocolError::IncompleteMessage { .. })
        ));
    }

    #[test]
    fn header_layout() {
        let frame = encode(&Message::contact_deny(), &IdentityGateway).unwrap();
        let payload_len = u32::from_le_bytes(frame[24..28].try_into().unwrap()) as usize;
        assert_eq!(frame[23], EncType::None as u8);
        assert_eq!(frame.len(), MIN_FRAME_LEN + payload_len);
        assert_eq!(frame[28], MessageType::ContactDeny as u8);
        assert_eq!(frame[29], VERSION);
    }

    #[test]
    fn rejects_truncated_and_padded() {
        let frame = encode(&Message::contact_deny(), &IdentityGateway).unwrap();
        assert!(decode(&frame[..frame.len() - 1], &IdentityGateway).is_err());
        let mut padded = frame.clone();
        padded.push(0);
        assert!(decode(&padded, &IdentityGateway).is_err());
        assert!(decode(&[], &IdentityGateway).is_err());
    }

    #[test]
    fn rejects_unknown_types() {
        let mut w = ByteWriter::new();
        w.write_number(42, 1).write_number(1, 1).write_field(b"{}");
        let payload = w.into_bytes();
        let mut f = ByteWriter::new();
        f.write_field(MAGIC)
            .write_field(&Md5::digest(&payload))
            .write_number(0, 1)
            .write_length_prefixed(&payload, 4)
            .write_field(MAGIC);
        let err = decode(&f.into_bytes(), &IdentityGateway).unwrap_err();
        assert!(err.to_string().contains("unknown message type 42"));
    }

    #[test]
    fn relay_for_me_unwraps() {
        let inner = encode(&Message::regular("inside").with_timestamp(0), &IdentityGateway).unwrap();
        let outer = encode(&Message::relay(inner), &IdentityGateway).unwrap();
        let msg = decode(&outer, &IdentityGateway).unwrap();
        assert_eq!(msg.msg_type, MessageType::Regular);
        assert_eq!(msg.field_str(field::MESSAGE_BODY), Some("inside"));
    }

    #[test]
    fn relay_not_for_me_stays_opaque() {
        let parcel = b"not a frame at all".to_vec();
        let outer = encode(&Message::relay(parcel.clone()), &IdentityGateway).unwrap();
        let msg = decode(&outer, &IdentityGateway).unwrap();
        assert_eq!(msg.msg_type, MessageType::Relay);
        assert_eq!(msg.parcel, Some(parcel));
    }

    #[test]
    fn relay_inside_relay_rejected() {
        let inner = encode(&Message::regular("inside").with_timestamp(0), &IdentityGateway).unwrap();
        let middle = encode(&Message::relay(inner), &IdentityGateway).unwrap();
        let outer = encode(&Message::relay(middle), &IdentityGateway).unwrap();
        let err = decode(&outer, &IdentityGateway).unwrap_err();
        assert!(err.to_string().contains("wraps another relay"));
    }

    #[test]
    fn now_is_minute_aligned() {
        assert_eq!(now_secs() % 60, 0);
    }
}
