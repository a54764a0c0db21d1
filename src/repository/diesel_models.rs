//! Diesel ORM models for database tables.
//!
//! These models provide compile-time type checking for database operations.
//! Conversions into domain models live next to each repository.

use diesel::prelude::*;

use crate::schema;

/// Community record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::communities)]
#[diesel(primary_key(name))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CommunityRecord {
    pub name: String,
    pub status: String,
    pub attributes: Option<String>,
    pub moderators: Option<String>,
    pub searchable_text: Option<String>,
    pub created_at: Option<String>,
    pub moderator_status: String,
    pub fetch_attempts: i32,
    pub last_error: Option<String>,
    pub discovered_at: String,
    pub fetched_at: Option<String>,
}

/// New community for insertion. Metadata columns start out NULL.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::communities)]
pub struct NewCommunity<'a> {
    pub name: &'a str,
    pub status: &'a str,
    pub moderator_status: &'a str,
    pub fetch_attempts: i32,
    pub discovered_at: &'a str,
}

/// Moderator account record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::moderator_accounts)]
#[diesel(primary_key(username))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ModeratorAccountRecord {
    pub username: String,
    pub status: String,
    pub communities: Option<String>,
    pub skip: i32,
    pub fetch_attempts: i32,
    pub discovered_at: String,
    pub fetched_at: Option<String>,
}

/// New moderator account for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::moderator_accounts)]
pub struct NewModeratorAccount<'a> {
    pub username: &'a str,
    pub status: &'a str,
    pub skip: i32,
    pub fetch_attempts: i32,
    pub discovered_at: &'a str,
}

/// Frontier entry record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::frontier_entries)]
#[diesel(primary_key(frontier, name))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FrontierEntryRecord {
    pub frontier: String,
    pub name: String,
    pub processed: String,
    pub depth: i32,
    pub discovered_at: String,
    pub completed_at: Option<String>,
}

/// New frontier entry for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::frontier_entries)]
pub struct NewFrontierEntry<'a> {
    pub frontier: &'a str,
    pub name: &'a str,
    pub processed: &'a str,
    pub depth: i32,
    pub discovered_at: &'a str,
}

/// Edge record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::edges)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EdgeRecord {
    pub id: i32,
    pub kind: String,
    pub source: String,
    pub target: String,
    pub label: String,
    pub discovered_at: String,
}

/// New edge for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::edges)]
pub struct NewEdge<'a> {
    pub kind: &'a str,
    pub source: &'a str,
    pub target: &'a str,
    pub label: &'a str,
    pub discovered_at: &'a str,
}
