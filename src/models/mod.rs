//! Core data models for the upload relay.
//!
//! These entities represent multipart upload sessions, their uploaded parts,
//! and assembled objects. They map cleanly to database tables via
//! `sqlx::FromRow` and serialize naturally as JSON via `serde`. Wire-level
//! request/response bodies shared by the server handlers and the upload
//! client live in `wire`.

pub mod multipart;
pub mod object;
pub mod wire;
