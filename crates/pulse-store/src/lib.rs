//! pulse-store: the authoritative current value of every metric.
//!
//! Three interchangeable backends implement [`Repository`]:
//!
//! - **`MemStorage`**: two maps behind one `RwLock`, no durability
//! - **`FileStorage`**: `MemStorage` plus a JSON snapshot file
//! - **`DbStorage`**: embedded transactional [redb](https://docs.rs/redb) database
//!
//! [`open_storage`] picks one from configuration (DSN, then snapshot
//! file, then memory). [`Persistence`] layers the snapshot durability
//! modes on top of whichever backend was chosen.
//!
//! ```text
//! Storage (enum, implements Repository)
//!   ├── Memory(MemStorage)
//!   ├── File(FileStorage) ── dump / full_dump / load ── snapshot.json
//!   └── Database(DbStorage) ── redb tables: meta, gauges, counters
//!
//! Persistence
//!   ├── persist()  ← after every write in immediate mode
//!   ├── run()      → periodic full dump in deferred mode, final flush on shutdown
//!   └── restore()  → startup load with bounded retry
//! ```

pub mod database;
pub mod error;
pub mod file;
pub mod memory;
pub mod persistence;
pub mod repository;
pub mod snapshot;
pub mod storage;
pub mod tables;

pub use database::DbStorage;
pub use error::{StoreError, StoreResult};
pub use file::FileStorage;
pub use memory::MemStorage;
pub use persistence::{DurabilityMode, Persistence};
pub use repository::Repository;
pub use storage::{Storage, StorageConfig, open_storage};
