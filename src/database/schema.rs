// Database schema definitions and migrations
// This module contains the SQL schema for the team ledger database

pub const LEDGER_SCHEMA: &str = include_str!("../../migrations/001_ledger_schema.sql");
