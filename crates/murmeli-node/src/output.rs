//! Human-readable listings for the terminal.

use chrono::{DateTime, Utc};
use murmeli_protocol::{ContactProfile, InboxRow, MessageType, OutboxRow, PendingContact, Recipient};

fn when(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

pub fn print_contacts(profiles: &[ContactProfile]) {
    if profiles.is_empty() {
        println!("no contacts");
        return;
    }
    for p in profiles {
        let key = p.key_id.as_deref().unwrap_or("-");
        println!("{:<10} {:<24} {:<18} {}", p.status, p.tor_id, key, p.shown_name());
        if let Some(robot) = &p.robot {
            println!("{:<10} robot {robot}", "");
        }
    }
}

pub fn print_inbox(rows: &[InboxRow]) {
    if rows.is_empty() {
        println!("inbox empty");
        return;
    }
    for row in rows {
        let from = if row.from_name.is_empty() {
            row.from_id.to_string()
        } else {
            format!("{} <{}>", row.from_name, row.from_id)
        };
        let what = match row.message_type {
            MessageType::ContactRequest => "contact request".to_string(),
            MessageType::ContactReferral => format!(
                "introduces {} ({})",
                row.friend_name.as_deref().unwrap_or("?"),
                row.friend_id.as_ref().map(ToString::to_string).unwrap_or_default()
            ),
            MessageType::ContactReferRequest => format!(
                "asks to meet {}",
                row.friend_id.as_ref().map(ToString::to_string).unwrap_or_default()
            ),
            other => other.to_string(),
        };
        println!("#{} {} from {from}: {what}", row.id, when(row.timestamp));
        if !row.message_body.is_empty() {
            println!("    {}", row.message_body);
        }
        println!("    hash {}", row.message_hash);
    }
}

pub fn print_outbox(rows: &[OutboxRow]) {
    if rows.is_empty() {
        println!("outbox empty");
        return;
    }
    for row in rows {
        let to = match &row.recipient {
            Recipient::Single(peer) => peer.to_string(),
            Recipient::List(peers) => format!("{} peers", peers.len()),
        };
        let relays = if row.relays.is_empty() {
            String::new()
        } else {
            format!(", {} relays left", row.relays.len())
        };
        println!(
            "#{} {} to {to} ({} bytes{relays})",
            row.id,
            row.msg_type,
            row.message.len()
        );
    }
}

pub fn print_pending(pending: &[PendingContact]) {
    for p in pending {
        println!("pending accept from {} <{}>: {}", p.from_name, p.from_id, p.message);
    }
}
