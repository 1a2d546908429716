//! Migration v3: scan ordering indexes

pub(super) const NAME: &str = "scan indexes";

pub(super) const PG_SQL: &str = "
CREATE INDEX IF NOT EXISTS idx_documents_recent ON documents (collection, updated_at DESC);
";

pub(super) const SQLITE_SQL: &str = "
CREATE INDEX IF NOT EXISTS idx_records_collection ON records (collection, updated_at DESC);
CREATE INDEX IF NOT EXISTS idx_record_fields_lookup ON record_fields (field, value_type, value);
";
