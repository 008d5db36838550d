//! Database migrations - embedded SQL files
//!
//! Migrations are compiled into the binary at build time using include_str!.
//! Each migration is a tuple of (name, sql_content), applied in order.

/// All migrations, embedded at compile time.
/// Format: (filename, sql_content)
///
/// When adding a migration, create `NNN_description.sql` and append it here.
pub const MIGRATIONS: &[(&str, &str)] = &[
    ("000_migrations.sql", include_str!("000_migrations.sql")),
    ("001_integrations.sql", include_str!("001_integrations.sql")),
    ("002_ledger_entries.sql", include_str!("002_ledger_entries.sql")),
    ("003_sync_events.sql", include_str!("003_sync_events.sql")),
    ("004_exchange_rates.sql", include_str!("004_exchange_rates.sql")),
    ("005_sync_event_errors.sql", include_str!("005_sync_event_errors.sql")),
];
