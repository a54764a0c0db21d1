use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0001_initial_schema")
        // communities - graph nodes and their acquisition state
        .operation(
            CreateTable::new("communities")
                .add_field(Field::new("name", FieldType::Text).primary_key())
                .add_field(Field::new("status", FieldType::Text).not_null().default("'unfetched'"))
                .add_field(Field::new("attributes", FieldType::Text))
                .add_field(Field::new("moderators", FieldType::Text))
                .add_field(Field::new("searchable_text", FieldType::Text))
                .add_field(Field::new("created_at", FieldType::Text))
                .add_field(
                    Field::new("moderator_status", FieldType::Text)
                        .not_null()
                        .default("'not_fetched'"),
                )
                .add_field(Field::new("fetch_attempts", FieldType::Integer).not_null().default("0"))
                .add_field(Field::new("last_error", FieldType::Text))
                .add_field(Field::new("discovered_at", FieldType::Text).not_null())
                .add_field(Field::new("fetched_at", FieldType::Text)),
        )
        .operation(
            CreateTable::new("moderator_accounts")
                .add_field(Field::new("username", FieldType::Text).primary_key())
                .add_field(Field::new("status", FieldType::Text).not_null().default("'not_fetched'"))
                .add_field(Field::new("communities", FieldType::Text))
                .add_field(Field::new("skip", FieldType::Integer).not_null().default("0"))
                .add_field(Field::new("fetch_attempts", FieldType::Integer).not_null().default("0"))
                .add_field(Field::new("discovered_at", FieldType::Text).not_null())
                .add_field(Field::new("fetched_at", FieldType::Text)),
        )
        // frontier_entries - one queue per edge kind, composite PK
        .operation(RunSql::new(
            r#"CREATE TABLE IF NOT EXISTS frontier_entries (
    frontier TEXT NOT NULL,
    name TEXT NOT NULL,
    processed TEXT NOT NULL DEFAULT 'pending',
    depth INTEGER NOT NULL DEFAULT 0,
    discovered_at TEXT NOT NULL,
    completed_at TEXT,
    PRIMARY KEY (frontier, name)
)"#,
        ))
        // edges - one logical table per edge kind
        .operation(RunSql::new(
            r#"CREATE TABLE IF NOT EXISTS edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    source TEXT NOT NULL,
    target TEXT NOT NULL,
    label TEXT NOT NULL,
    discovered_at TEXT NOT NULL
)"#,
        ))
}
