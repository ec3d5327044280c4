//! Standalone migration runner for campus-api.
//!
//! Usage:
//!   cargo run -p campus-api --bin campus-migrate
//!   cargo run -p campus-api --bin campus-migrate -- --test
//!   cargo run -p campus-api --bin campus-migrate -- --revert
//!
//! Reads DATABASE_URL from the environment (or .env via dotenvy).

use std::path::Path;
use std::process::ExitCode;

use diesel::pg::PgConnection;
use diesel::Connection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

fn main() -> ExitCode {
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    let Ok(mut database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL env var is required");
        return ExitCode::FAILURE;
    };

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|arg| arg == "--test") {
        database_url = with_test_db_suffix(&database_url);
    }
    let revert = args.iter().any(|arg| arg == "--revert");

    println!("Connecting to database...");
    let mut conn = match PgConnection::establish(&database_url) {
        Ok(conn) => conn,
        Err(err) => {
            eprintln!("failed to connect to database: {err}");
            return ExitCode::FAILURE;
        }
    };

    if revert {
        return match conn.revert_last_migration(MIGRATIONS) {
            Ok(version) => {
                println!("Reverted: {version}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("failed to revert migration: {err}");
                ExitCode::FAILURE
            }
        };
    }

    println!("Running pending migrations...");
    let applied = match conn.run_pending_migrations(MIGRATIONS) {
        Ok(applied) => applied,
        Err(err) => {
            eprintln!("failed to run migrations: {err}");
            return ExitCode::FAILURE;
        }
    };

    if applied.is_empty() {
        println!("No pending migrations.");
    } else {
        for migration in &applied {
            println!("  Applied: {migration}");
        }
        println!("{} migration(s) applied.", applied.len());
    }
    ExitCode::SUCCESS
}

/// `postgres://host/campus?x=y` becomes `postgres://host/campus_test?x=y`.
fn with_test_db_suffix(database_url: &str) -> String {
    let (base, query) = match database_url.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (database_url, None),
    };
    let Some((prefix, db_name)) = base.rsplit_once('/') else {
        return database_url.to_string();
    };
    if db_name.is_empty() || db_name.ends_with("_test") {
        return database_url.to_string();
    }

    let mut updated = format!("{prefix}/{db_name}_test");
    if let Some(query) = query {
        updated.push('?');
        updated.push_str(query);
    }
    updated
}
