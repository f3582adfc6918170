//! # Repository Module
//!
//! Repository implementations per aggregate.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  kardex-engine                                                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Repository (this module) ── SQL lives here, nowhere else              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite                                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Methods that must run inside an engine transaction take a
//! `&mut SqliteConnection`; plain reads go through the pool. Every
//! aggregate exposes a `lock_*` touch-update that acquires the database
//! write lock on its primary row before anything else is read.

pub mod order;
pub mod product;
pub mod quote;
pub mod reservation;
pub mod stock;
