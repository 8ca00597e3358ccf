pub mod catalog;
pub mod command;
pub mod index;
pub mod normalize;
pub mod snapshot;

pub use catalog::{BookRecord, Catalog, CatalogMeta, SledCatalog};
pub use command::{execute, Command, CommandError};
pub use index::{EntryId, ScoredEntry, SearchIndex};
pub use normalize::{normalize, split_words, Word};
pub use snapshot::{Snapshot, Store};
