//! NostroVostro Ledger
//!
//! Typed access to settlement state held in an external key-value store:
//! institution records, the append-only transaction journal, write-ahead
//! settlement intents, and the derived bilateral nostro/vostro views.

pub mod store;
pub mod memory;
pub mod directory;
pub mod journal;
pub mod intent;
pub mod view;

pub use store::{keys, Expected, KeyValueStore, StoreError, StoreResult, Version, Versioned, WriteBatch, WriteOp};
pub use memory::MemoryStore;
pub use directory::InstitutionDirectory;
pub use journal::{JournalEntry, TransactionJournal};
pub use intent::{Adjustment, IntentLog, RecordUpdate, SettlementIntent};
pub use view::BilateralViewBuilder;

#[cfg(any(test, feature = "test-utils"))]
pub use memory::FaultyStore;
