//! Persistence Adapters
//!
//! Implementations of [`RecordStore`](crate::application::ports::RecordStore).

mod firestore;
mod in_memory;

pub use firestore::{FirestoreStore, document_body};
pub use in_memory::InMemoryRecordStore;
