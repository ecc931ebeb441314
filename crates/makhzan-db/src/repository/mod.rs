//! # Repository Module
//!
//! Database repository implementations for the Makhzan document store.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern Explained                         │
//! │                                                                         │
//! │  The Repository pattern abstracts database access behind a clean API.  │
//! │                                                                         │
//! │  Store mutation                                                        │
//! │       │                                                                 │
//! │       │  db.records().upsert(EntityKind::Products, &id, &doc)          │
//! │       │  ↓                                                              │
//! │       ▼                                                                 │
//! │  RecordsRepository                                                     │
//! │  ├── upsert / bulk_upsert                                              │
//! │  ├── get / all / ids                                                   │
//! │  └── delete / clear                                                    │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`records::RecordsRepository`] - Generic JSON document CRUD per entity kind
//! - [`retry::RetryQueueRepository`] - Durable cloud-push retry queue
//! - [`settings::SettingsRepository`] - Key/value settings storage

pub mod records;
pub mod retry;
pub mod settings;
