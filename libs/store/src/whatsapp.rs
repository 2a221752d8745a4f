//! WhatsApp chat and message repository.

use chrono::NaiveDateTime;
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use pricebot_core::Result;
use pricebot_core::{ChatType, Error, WhatsAppChat, WhatsAppMessage};

use crate::map::{db_err, json_col, json_col_opt, parsed_col, uuid_col, uuid_col_opt};
use crate::vendors;

const CHAT_COLUMNS: &str =
    "id, title, chat_type, platform_id, vendor_id, extra, last_extracted_at, created_at";
const MSG_COLUMNS: &str = "id, chat_id, client_id, observed_at, sender_name, sender_phone, \
                           is_outgoing, text, message_id, content_hash, raw_payload, \
                           media_document_id, created_at";

fn chat_from_row(row: &Row) -> rusqlite::Result<WhatsAppChat> {
    Ok(WhatsAppChat {
        id: uuid_col(row, 0)?,
        title: row.get(1)?,
        chat_type: parsed_col::<ChatType>(row, 2)?,
        platform_id: row.get(3)?,
        vendor_id: uuid_col_opt(row, 4)?,
        extra: json_col(row, 5)?,
        last_extracted_at: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn message_from_row(row: &Row) -> rusqlite::Result<WhatsAppMessage> {
    Ok(WhatsAppMessage {
        id: uuid_col(row, 0)?,
        chat_id: uuid_col(row, 1)?,
        client_id: row.get(2)?,
        observed_at: row.get(3)?,
        sender_name: row.get(4)?,
        sender_phone: row.get(5)?,
        is_outgoing: row.get::<_, i64>(6)? != 0,
        text: row.get(7)?,
        message_id: row.get(8)?,
        content_hash: row.get(9)?,
        raw_payload: json_col_opt(row, 10)?,
        media_document_id: uuid_col_opt(row, 11)?,
        created_at: row.get(12)?,
    })
}

pub fn get_chat(conn: &Connection, id: Uuid) -> Result<Option<WhatsAppChat>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {CHAT_COLUMNS} FROM whatsapp_chats WHERE id = ?1"))
        .map_err(db_err)?;
    let mut rows = stmt
        .query_map(params![id.to_string()], chat_from_row)
        .map_err(db_err)?;
    rows.next().transpose().map_err(db_err)
}

pub fn find_chat_by_platform_id(conn: &Connection, platform_id: &str) -> Result<Option<WhatsAppChat>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {CHAT_COLUMNS} FROM whatsapp_chats WHERE platform_id = ?1"
        ))
        .map_err(db_err)?;
    let mut rows = stmt
        .query_map(params![platform_id], chat_from_row)
        .map_err(db_err)?;
    rows.next().transpose().map_err(db_err)
}

pub fn find_chat_by_title(conn: &Connection, title: &str) -> Result<Option<WhatsAppChat>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {CHAT_COLUMNS} FROM whatsapp_chats
             WHERE title = ?1 COLLATE NOCASE ORDER BY created_at LIMIT 1"
        ))
        .map_err(db_err)?;
    let mut rows = stmt
        .query_map(params![title.trim()], chat_from_row)
        .map_err(db_err)?;
    rows.next().transpose().map_err(db_err)
}

/// Resolves a chat by platform id, falling back to case-insensitive title.
/// On miss the chat is created; a vendor whose name equals the chat title is
/// mapped automatically. Returns `(chat, created)`.
pub fn get_or_create_chat(
    conn: &Connection,
    title: &str,
    chat_type: ChatType,
    platform_id: Option<&str>,
    now: NaiveDateTime,
) -> Result<(WhatsAppChat, bool)> {
    if let Some(platform_id) = platform_id {
        if let Some(chat) = find_chat_by_platform_id(conn, platform_id)? {
            return Ok((chat, false));
        }
    }
    if let Some(chat) = find_chat_by_title(conn, title)? {
        return Ok((chat, false));
    }

    let vendor_id = vendors::find_by_name(conn, title)?.map(|v| v.id);
    let chat = WhatsAppChat {
        id: Uuid::new_v4(),
        title: title.trim().to_string(),
        chat_type,
        platform_id: platform_id.map(str::to_string),
        vendor_id,
        extra: serde_json::json!({}),
        last_extracted_at: None,
        created_at: now,
    };
    conn.execute(
        &format!(
            "INSERT INTO whatsapp_chats ({CHAT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        ),
        params![
            chat.id.to_string(),
            chat.title,
            chat.chat_type.as_str(),
            chat.platform_id,
            chat.vendor_id.map(|id| id.to_string()),
            chat.extra.to_string(),
            chat.last_extracted_at,
            chat.created_at,
        ],
    )
    .map_err(db_err)?;
    Ok((chat, true))
}

pub fn set_chat_vendor(conn: &Connection, chat_id: Uuid, vendor_id: Option<Uuid>) -> Result<()> {
    let updated = conn
        .execute(
            "UPDATE whatsapp_chats SET vendor_id = ?2 WHERE id = ?1",
            params![chat_id.to_string(), vendor_id.map(|id| id.to_string())],
        )
        .map_err(db_err)?;
    if updated == 0 {
        return Err(Error::not_found("chat"));
    }
    Ok(())
}

pub fn set_last_extracted(conn: &Connection, chat_id: Uuid, at: NaiveDateTime) -> Result<()> {
    conn.execute(
        "UPDATE whatsapp_chats SET last_extracted_at = ?2 WHERE id = ?1",
        params![chat_id.to_string(), at],
    )
    .map_err(db_err)?;
    Ok(())
}

pub fn message_id_exists(conn: &Connection, chat_id: Uuid, message_id: &str) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM whatsapp_messages WHERE chat_id = ?1 AND message_id = ?2",
            params![chat_id.to_string(), message_id],
            |row| row.get(0),
        )
        .map_err(db_err)?;
    Ok(count > 0)
}

/// True when the content hash was stored for this chat after `since`.
pub fn content_hash_seen_since(
    conn: &Connection,
    chat_id: Uuid,
    content_hash: &str,
    since: NaiveDateTime,
) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM whatsapp_messages
             WHERE chat_id = ?1 AND content_hash = ?2 AND observed_at >= ?3",
            params![chat_id.to_string(), content_hash, since],
            |row| row.get(0),
        )
        .map_err(db_err)?;
    Ok(count > 0)
}

pub fn insert_message(conn: &Connection, msg: &WhatsAppMessage) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO whatsapp_messages ({MSG_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        ),
        params![
            msg.id.to_string(),
            msg.chat_id.to_string(),
            msg.client_id,
            msg.observed_at,
            msg.sender_name,
            msg.sender_phone,
            msg.is_outgoing as i64,
            msg.text,
            msg.message_id,
            msg.content_hash,
            msg.raw_payload.as_ref().map(|v| v.to_string()),
            msg.media_document_id.map(|id| id.to_string()),
            msg.created_at,
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Inbound messages observed after `since`, oldest first. Outgoing messages
/// are stored for the record but never extracted.
pub fn inbound_messages_since(
    conn: &Connection,
    chat_id: Uuid,
    since: Option<NaiveDateTime>,
) -> Result<Vec<WhatsAppMessage>> {
    let floor = since.unwrap_or(chrono::NaiveDateTime::MIN);
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {MSG_COLUMNS} FROM whatsapp_messages
             WHERE chat_id = ?1 AND is_outgoing = 0 AND observed_at > ?2
             ORDER BY observed_at"
        ))
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![chat_id.to_string(), floor], message_from_row)
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    Ok(rows)
}

pub fn messages_for_chat(conn: &Connection, chat_id: Uuid) -> Result<Vec<WhatsAppMessage>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {MSG_COLUMNS} FROM whatsapp_messages WHERE chat_id = ?1 ORDER BY observed_at"
        ))
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![chat_id.to_string()], message_from_row)
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use pricebot_core::{content_hash, timefmt};

    fn seed_message(conn: &Connection, chat_id: Uuid, text: &str, message_id: Option<&str>) {
        let now = timefmt::now();
        let msg = WhatsAppMessage {
            id: Uuid::new_v4(),
            chat_id,
            client_id: "c1".into(),
            observed_at: now,
            sender_name: Some("Ana".into()),
            sender_phone: None,
            is_outgoing: false,
            text: text.into(),
            message_id: message_id.map(str::to_string),
            content_hash: content_hash("Deals", Some("Ana"), text),
            raw_payload: None,
            media_document_id: None,
            created_at: now,
        };
        insert_message(conn, &msg).unwrap();
    }

    #[test]
    fn chat_resolution_prefers_platform_id() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn_sync(|conn| {
                let now = timefmt::now();
                let (chat, created) =
                    get_or_create_chat(conn, "Deals", ChatType::Group, Some("123@g.us"), now)?;
                assert!(created);

                // Different title, same platform id: still the same chat.
                let (same, created) =
                    get_or_create_chat(conn, "Deals renamed", ChatType::Group, Some("123@g.us"), now)?;
                assert!(!created);
                assert_eq!(same.id, chat.id);

                // Title match is case-insensitive.
                let (by_title, created) =
                    get_or_create_chat(conn, "DEALS", ChatType::Group, None, now)?;
                assert!(!created);
                assert_eq!(by_title.id, chat.id);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn chat_creation_auto_maps_vendor_by_title() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn_sync(|conn| {
                let now = timefmt::now();
                let (vendor, _) = vendors::get_or_create(conn, "Acme Wholesale", now)?;
                let (chat, _) =
                    get_or_create_chat(conn, "acme wholesale", ChatType::Group, None, now)?;
                assert_eq!(chat.vendor_id, Some(vendor.id));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn dedupe_lookups() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn_sync(|conn| {
                let now = timefmt::now();
                let (chat, _) = get_or_create_chat(conn, "Deals", ChatType::Group, None, now)?;
                seed_message(conn, chat.id, "iPhone 15 - $900", Some("M1"));

                assert!(message_id_exists(conn, chat.id, "M1")?);
                assert!(!message_id_exists(conn, chat.id, "M2")?);

                let hash = content_hash("Deals", Some("Ana"), "iPhone 15 - $900");
                let window_start = now - chrono::Duration::hours(24);
                assert!(content_hash_seen_since(conn, chat.id, &hash, window_start)?);
                let future = now + chrono::Duration::hours(1);
                assert!(!content_hash_seen_since(conn, chat.id, &hash, future)?);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn inbound_window_skips_outgoing() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn_sync(|conn| {
                let now = timefmt::now();
                let (chat, _) = get_or_create_chat(conn, "Deals", ChatType::Group, None, now)?;
                seed_message(conn, chat.id, "Pixel 9 $700", None);
                let outgoing = WhatsAppMessage {
                    id: Uuid::new_v4(),
                    chat_id: chat.id,
                    client_id: "c1".into(),
                    observed_at: now,
                    sender_name: None,
                    sender_phone: None,
                    is_outgoing: true,
                    text: "noted, thanks".into(),
                    message_id: None,
                    content_hash: content_hash("Deals", None, "noted, thanks"),
                    raw_payload: None,
                    media_document_id: None,
                    created_at: now,
                };
                insert_message(conn, &outgoing)?;

                let inbound = inbound_messages_since(conn, chat.id, None)?;
                assert_eq!(inbound.len(), 1);
                assert_eq!(inbound[0].text, "Pixel 9 $700");
                Ok(())
            })
            .unwrap();
    }
}
