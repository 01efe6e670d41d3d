//! SQLite schema definition

/// SQL schema for the engine database
pub const SCHEMA_SQL: &str = r#"
-- Fetch runs: one adapter call per backfill step
CREATE TABLE IF NOT EXISTS fetch_runs (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL,
    product_id TEXT NOT NULL,
    checkpoint_id TEXT,
    step_label TEXT NOT NULL,
    url TEXT,
    status TEXT NOT NULL,
    observation_count INTEGER NOT NULL DEFAULT 0,
    payload_hash TEXT,
    error TEXT,
    started_at TEXT NOT NULL,
    completed_at TEXT
);

-- Raw payloads: response bodies deduplicated by blake3 hash
CREATE TABLE IF NOT EXISTS raw_payloads (
    hash TEXT PRIMARY KEY,
    body TEXT NOT NULL,
    byte_size INTEGER NOT NULL,
    first_seen_at TEXT NOT NULL
);

-- Observations: append-only, unique on the natural key
CREATE TABLE IF NOT EXISTS observations (
    id TEXT PRIMARY KEY,
    indicator_code TEXT NOT NULL,
    date TEXT NOT NULL,
    value REAL,
    unit TEXT NOT NULL,
    frequency TEXT NOT NULL,
    regime_tag TEXT NOT NULL,
    source_id TEXT NOT NULL,
    product_id TEXT NOT NULL,
    fetch_run_id TEXT REFERENCES fetch_runs(id),
    payload_hash TEXT,
    inserted_at TEXT NOT NULL,
    UNIQUE(indicator_code, date, regime_tag, source_id)
);

-- Checkpoints: one row per (source, product, chunk)
CREATE TABLE IF NOT EXISTS checkpoints (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL,
    product_id TEXT NOT NULL,
    chunk_label TEXT NOT NULL,
    chunk_start TEXT NOT NULL,
    chunk_end TEXT NOT NULL,
    granularity TEXT NOT NULL,
    last_position TEXT,
    total_steps INTEGER NOT NULL DEFAULT 0,
    processed_steps INTEGER NOT NULL DEFAULT 0,
    inserted INTEGER NOT NULL DEFAULT 0,
    skipped INTEGER NOT NULL DEFAULT 0,
    error_count INTEGER NOT NULL DEFAULT 0,
    errors_json TEXT,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT,
    UNIQUE(source_id, product_id, chunk_label)
);

-- Contradictions: one row per disagreeing source pair
CREATE TABLE IF NOT EXISTS contradictions (
    id TEXT PRIMARY KEY,
    indicator_code TEXT NOT NULL,
    date TEXT NOT NULL,
    regime_tag TEXT NOT NULL,
    source_a TEXT NOT NULL,
    source_b TEXT NOT NULL,
    observation_a TEXT NOT NULL,
    observation_b TEXT NOT NULL,
    value_a REAL NOT NULL,
    value_b REAL NOT NULL,
    variance_percent REAL NOT NULL,
    discrepancy_class TEXT NOT NULL,
    status TEXT NOT NULL,
    resolution_note TEXT,
    resolved_by TEXT,
    chosen_observation TEXT,
    detected_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    resolved_at TEXT,
    UNIQUE(indicator_code, date, regime_tag, source_a, source_b)
);

-- Gap tickets: remediation records for stale series
CREATE TABLE IF NOT EXISTS gap_tickets (
    id TEXT PRIMARY KEY,
    series_id TEXT NOT NULL,
    source_id TEXT NOT NULL,
    indicator_code TEXT NOT NULL,
    regime_tag TEXT NOT NULL,
    missing_item TEXT NOT NULL,
    why_it_matters TEXT NOT NULL,
    priority TEXT NOT NULL,
    status TEXT NOT NULL,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    resolved_at TEXT,
    resolution_note TEXT
);

-- Indexes for common queries
CREATE INDEX IF NOT EXISTS idx_observations_series ON observations(indicator_code, regime_tag, date);
CREATE INDEX IF NOT EXISTS idx_observations_product ON observations(product_id, date);
CREATE INDEX IF NOT EXISTS idx_checkpoints_status ON checkpoints(status);
CREATE INDEX IF NOT EXISTS idx_contradictions_status ON contradictions(status);
CREATE INDEX IF NOT EXISTS idx_fetch_runs_checkpoint ON fetch_runs(checkpoint_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_gap_tickets_open ON gap_tickets(series_id)
    WHERE status IN ('open', 'in_progress');
"#;
