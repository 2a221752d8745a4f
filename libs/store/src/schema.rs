//! Database schema. Applied idempotently at startup; there is no separate
//! migration history yet, new columns arrive as new `CREATE TABLE` revisions.

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS vendors (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL UNIQUE COLLATE NOCASE,
    contact_info  TEXT NOT NULL DEFAULT '{}',
    metadata      TEXT NOT NULL DEFAULT '{}',
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS products (
    id             TEXT PRIMARY KEY,
    canonical_name TEXT NOT NULL,
    brand          TEXT,
    model_number   TEXT,
    upc            TEXT UNIQUE,
    category       TEXT,
    specs          TEXT NOT NULL DEFAULT '{}',
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS product_aliases (
    id               TEXT PRIMARY KEY,
    product_id       TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
    alias_text       TEXT NOT NULL,
    source_vendor_id TEXT REFERENCES vendors(id),
    embedding        BLOB,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL,
    UNIQUE (product_id, alias_text, source_vendor_id)
);

CREATE TABLE IF NOT EXISTS source_documents (
    id                  TEXT PRIMARY KEY,
    vendor_id           TEXT REFERENCES vendors(id),
    original_filename   TEXT NOT NULL,
    file_type           TEXT NOT NULL,
    storage_uri         TEXT NOT NULL,
    ingest_started_at   TEXT,
    ingest_completed_at TEXT,
    status              TEXT NOT NULL,
    metadata            TEXT NOT NULL DEFAULT '{}',
    created_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS offers (
    id                 TEXT PRIMARY KEY,
    product_id         TEXT NOT NULL REFERENCES products(id),
    vendor_id          TEXT NOT NULL REFERENCES vendors(id),
    source_document_id TEXT REFERENCES source_documents(id) ON DELETE CASCADE,
    captured_at        TEXT NOT NULL,
    price              TEXT NOT NULL,
    currency           TEXT NOT NULL,
    quantity           INTEGER,
    condition          TEXT,
    min_order_quantity INTEGER,
    location           TEXT,
    notes              TEXT,
    raw_row            TEXT,
    created_at         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_offers_product ON offers(product_id, captured_at);
CREATE INDEX IF NOT EXISTS idx_offers_vendor ON offers(vendor_id, captured_at);
CREATE INDEX IF NOT EXISTS idx_offers_document ON offers(source_document_id);

CREATE TABLE IF NOT EXISTS price_history_spans (
    id              TEXT PRIMARY KEY,
    product_id      TEXT NOT NULL REFERENCES products(id),
    vendor_id       TEXT NOT NULL REFERENCES vendors(id),
    price           TEXT NOT NULL,
    currency        TEXT NOT NULL,
    valid_from      TEXT NOT NULL,
    valid_to        TEXT,
    source_offer_id TEXT REFERENCES offers(id) ON DELETE SET NULL,
    UNIQUE (product_id, vendor_id, valid_from)
);
CREATE INDEX IF NOT EXISTS idx_spans_pair ON price_history_spans(product_id, vendor_id, valid_from);
CREATE INDEX IF NOT EXISTS idx_spans_vendor ON price_history_spans(vendor_id, valid_from);

CREATE TABLE IF NOT EXISTS ingestion_jobs (
    id                 TEXT PRIMARY KEY,
    source_document_id TEXT NOT NULL REFERENCES source_documents(id) ON DELETE CASCADE,
    processor          TEXT,
    status             TEXT NOT NULL,
    logs               TEXT NOT NULL DEFAULT '[]',
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON ingestion_jobs(status, updated_at);

CREATE TABLE IF NOT EXISTS whatsapp_chats (
    id                TEXT PRIMARY KEY,
    title             TEXT NOT NULL,
    chat_type         TEXT NOT NULL,
    platform_id       TEXT UNIQUE,
    vendor_id         TEXT REFERENCES vendors(id),
    extra             TEXT NOT NULL DEFAULT '{}',
    last_extracted_at TEXT,
    created_at        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chats_title ON whatsapp_chats(title COLLATE NOCASE);

CREATE TABLE IF NOT EXISTS whatsapp_messages (
    id                TEXT PRIMARY KEY,
    chat_id           TEXT NOT NULL REFERENCES whatsapp_chats(id) ON DELETE CASCADE,
    client_id         TEXT NOT NULL,
    observed_at       TEXT NOT NULL,
    sender_name       TEXT,
    sender_phone      TEXT,
    is_outgoing       INTEGER NOT NULL DEFAULT 0,
    text              TEXT NOT NULL,
    message_id        TEXT,
    content_hash      TEXT NOT NULL,
    raw_payload       TEXT,
    media_document_id TEXT REFERENCES source_documents(id),
    created_at        TEXT NOT NULL,
    UNIQUE (chat_id, message_id)
);
CREATE INDEX IF NOT EXISTS idx_messages_hash ON whatsapp_messages(chat_id, content_hash, observed_at);
CREATE INDEX IF NOT EXISTS idx_messages_observed ON whatsapp_messages(chat_id, observed_at);
"#;
