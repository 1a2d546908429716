//! Migration v2: field lookup

pub(super) const NAME: &str = "field lookup";

/// Scan filters check containment first so this index applies.
pub(super) const PG_SQL: &str = "
CREATE INDEX IF NOT EXISTS idx_documents_body ON documents USING GIN (document jsonb_path_ops);
";

pub(super) const SQLITE_SQL: &str = "
CREATE TABLE IF NOT EXISTS record_fields (
    record_id INTEGER NOT NULL REFERENCES records(id) ON DELETE CASCADE,
    field TEXT NOT NULL,
    value_type TEXT NOT NULL,
    value TEXT,
    PRIMARY KEY (record_id, field)
);
";
