//! SQL text used by the PostgreSQL store.

/// Name of the queue table.
pub const QUEUE_TABLE: &str = "typesense_sync_queue";

pub(crate) const QUEUE_EXISTS: &str = r#"
    SELECT EXISTS (
        SELECT FROM information_schema.tables
        WHERE table_schema = current_schema()
        AND table_name = 'typesense_sync_queue'
    )
"#;

pub(crate) const CREATE_QUEUE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS typesense_sync_queue (
        id BIGSERIAL PRIMARY KEY,
        record_id TEXT NOT NULL,
        table_name TEXT NOT NULL,
        operation_type VARCHAR(10) NOT NULL,
        created_at TIMESTAMPTZ DEFAULT NOW()
    )
"#;

/// Queues created by older releases lack the uniqueness constraint.
pub(crate) const CREATE_QUEUE_UNIQUE_INDEX: &str = r#"
    CREATE UNIQUE INDEX IF NOT EXISTS typesense_sync_queue_record_key
    ON typesense_sync_queue (record_id, table_name)
"#;

/// Capture function for plain tables. `TG_ARGV[0]` names the key column.
pub(crate) const CAPTURE_FUNCTION: &str = r#"
    CREATE OR REPLACE FUNCTION log_changes_for_typesense()
    RETURNS TRIGGER AS $$
    DECLARE
        key_column TEXT := COALESCE(TG_ARGV[0], 'id');
        changed RECORD;
    BEGIN
        IF (TG_OP = 'DELETE') THEN
            changed := OLD;
        ELSE
            changed := NEW;
        END IF;
        INSERT INTO typesense_sync_queue (record_id, table_name, operation_type)
        VALUES (to_jsonb(changed) ->> key_column, TG_TABLE_NAME, TG_OP)
        ON CONFLICT (record_id, table_name)
        DO UPDATE SET operation_type = EXCLUDED.operation_type, created_at = NOW();
        RETURN changed;
    END;
    $$ LANGUAGE plpgsql
"#;

/// Capture function for view-backed sources. `TG_ARGV[0]` is the view name
/// recorded as the source, `TG_ARGV[1]` the key column.
pub(crate) const NAMED_CAPTURE_FUNCTION: &str = r#"
    CREATE OR REPLACE FUNCTION log_changes_for_typesense_with_name()
    RETURNS TRIGGER AS $$
    DECLARE
        target_table_name TEXT := TG_ARGV[0];
        key_column TEXT := COALESCE(TG_ARGV[1], 'id');
        changed RECORD;
    BEGIN
        IF (TG_OP = 'DELETE') THEN
            changed := OLD;
        ELSE
            changed := NEW;
        END IF;
        INSERT INTO typesense_sync_queue (record_id, table_name, operation_type)
        VALUES (to_jsonb(changed) ->> key_column, target_table_name, TG_OP)
        ON CONFLICT (record_id, table_name)
        DO UPDATE SET operation_type = EXCLUDED.operation_type, created_at = NOW();
        RETURN changed;
    END;
    $$ LANGUAGE plpgsql
"#;

pub(crate) const RELATION_KIND: &str = r#"
    SELECT table_type FROM information_schema.tables
    WHERE table_schema = current_schema() AND table_name = $1
"#;

pub(crate) const TRIGGER_EXISTS: &str = r#"
    SELECT EXISTS (
        SELECT FROM pg_trigger
        WHERE tgname = $1
        AND tgrelid = $2::regclass
    )
"#;

pub(crate) const DESCRIBE_COLUMNS: &str = r#"
    SELECT column_name::text AS column_name, udt_name::text AS udt_name
    FROM information_schema.columns
    WHERE table_schema = current_schema() AND table_name = $1
    ORDER BY ordinal_position
"#;

pub(crate) const CLAIM_BATCH: &str = r#"
    SELECT id, record_id, table_name, operation_type,
           COALESCE(created_at, NOW()) AS created_at
    FROM typesense_sync_queue
    WHERE table_name = ANY($1) AND id > $2
    ORDER BY id ASC
    LIMIT $3
    FOR UPDATE SKIP LOCKED
"#;

pub(crate) const DELETE_ENTRIES: &str = r#"
    DELETE FROM typesense_sync_queue WHERE id = ANY($1)
"#;

pub(crate) const QUEUE_TOTALS: &str = r#"
    SELECT COUNT(*) AS total, MIN(created_at) AS oldest, MAX(created_at) AS newest
    FROM typesense_sync_queue
    WHERE table_name = ANY($1)
"#;

pub(crate) const QUEUE_BREAKDOWN: &str = r#"
    SELECT table_name, operation_type, COUNT(*) AS count
    FROM typesense_sync_queue
    WHERE table_name = ANY($1)
    GROUP BY table_name, operation_type
    ORDER BY table_name, operation_type
"#;

/// Row alias used where a statement derives record ids from a source relation.
pub(crate) const ROW_ALIAS: &str = "__sync_row";

/// Record id text of `row`'s `key_column`, the same form the capture
/// functions store: `to_jsonb(changed) ->> key_column`.
pub(crate) fn record_id_expr(row: &str, key_column: &str) -> String {
    format!("to_jsonb({}) ->> {}", row, quote_literal(key_column))
}

/// Enqueue every row of `source` as an `INSERT`. `$1` is the source name.
pub(crate) fn backfill_statement(source: &str, key_column: &str) -> String {
    let record_id = record_id_expr(ROW_ALIAS, key_column);
    format!(
        "INSERT INTO {queue} (record_id, table_name, operation_type) \
         SELECT {record_id}, $1, 'INSERT' FROM {source} AS {row} \
         WHERE {record_id} IS NOT NULL ORDER BY {key} \
         ON CONFLICT (record_id, table_name) DO NOTHING",
        queue = QUEUE_TABLE,
        record_id = record_id,
        source = quote_ident(source),
        row = ROW_ALIAS,
        key = quote_ident(key_column),
    )
}

/// Load the rows of `source` whose record ids are in `$1`.
///
/// `key_cast` names a key type whose values compare equal after casting the
/// record id text back, so the key's index can be used. Other key types are
/// matched on the record id text itself.
pub(crate) fn fetch_rows_statement(
    select_list: &str,
    source: &str,
    key_column: &str,
    key_cast: Option<&str>,
    record_id_alias: &str,
) -> String {
    let record_id = record_id_expr(ROW_ALIAS, key_column);
    let predicate = match key_cast {
        Some(udt) => format!("{} = ANY(CAST($1 AS {}[]))", quote_ident(key_column), udt),
        None => format!("{} = ANY($1)", record_id),
    };
    format!(
        "SELECT {}, {} AS {} FROM {} AS {} WHERE {}",
        select_list,
        record_id,
        quote_ident(record_id_alias),
        quote_ident(source),
        ROW_ALIAS,
        predicate
    )
}

/// Whether `name` is a bare SQL identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Quote an identifier for interpolation into SQL text.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal for interpolation into SQL text.
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_identifier() {
        assert!(is_plain_identifier("products"));
        assert!(is_plain_identifier("_view_2"));
        assert!(!is_plain_identifier("2products"));
        assert!(!is_plain_identifier("products; DROP TABLE x"));
        assert!(!is_plain_identifier(""));
    }

    #[test]
    fn test_record_id_text_agrees_everywhere() {
        let capture_form = "to_jsonb(changed) ->> key_column";
        assert!(CAPTURE_FUNCTION.contains(capture_form));
        assert!(NAMED_CAPTURE_FUNCTION.contains(capture_form));

        let expected = "to_jsonb(__sync_row) ->> 'code'";
        assert_eq!(record_id_expr(ROW_ALIAS, "code"), expected);

        let backfill = backfill_statement("products", "code");
        assert!(backfill.contains(&format!("SELECT {}, $1, 'INSERT'", expected)));
        assert!(!backfill.contains("::text"));

        let fetch = fetch_rows_statement("\"code\", \"name\"", "products", "code", None, "rid");
        assert_eq!(
            fetch,
            format!(
                "SELECT \"code\", \"name\", {e} AS \"rid\" FROM \"products\" AS __sync_row WHERE {e} = ANY($1)",
                e = expected
            )
        );
    }

    #[test]
    fn test_fetch_rows_uses_key_index_when_castable() {
        let fetch = fetch_rows_statement("\"id\"", "products", "id", Some("int8"), "rid");

        assert!(fetch.contains("WHERE \"id\" = ANY(CAST($1 AS int8[]))"));
        assert!(fetch.contains("to_jsonb(__sync_row) ->> 'id' AS \"rid\""));
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_ident("products"), "\"products\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("o'brien"), "'o''brien'");
    }
}
