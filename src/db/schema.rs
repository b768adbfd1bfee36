/// Schema for every table the worker persists.
pub const SCHEMA: &str = r#"
-- Named cache tiers ("asistencia-static-v1.0.0", ...)
CREATE TABLE IF NOT EXISTS cache_tiers (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots keyed by tier and request descriptor
CREATE TABLE IF NOT EXISTS cache_entries (
    tier TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (tier, request_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_tier ON cache_entries(tier);

-- Submissions waiting for delivery, in insertion order
CREATE TABLE IF NOT EXISTS pending_submissions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tipo TEXT NOT NULL,
    fecha TEXT NOT NULL,
    fecha_iso TEXT NOT NULL,
    hora TEXT NOT NULL,
    enqueued_at TEXT NOT NULL DEFAULT (datetime('now')),
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT
);

-- Which worker version currently controls a scope
CREATE TABLE IF NOT EXISTS registration (
    scope TEXT PRIMARY KEY,
    active_version TEXT NOT NULL,
    activated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
