use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const BOOKS_TREE: &str = "books";
const META_KEY: &str = "meta.json";

/// Catalog metadata for one book. Only `title` is read by the search core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRecord {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub series: Option<String>,
    #[serde(default)]
    pub published: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogMeta {
    pub num_books: u64,
    pub imported_at: String,
    pub version: u32,
}

/// Source of book records for snapshot refreshes.
pub trait Catalog: Send + Sync {
    /// All records in listing order; the order defines snapshot entry ids.
    fn list_books(&self) -> Result<Vec<BookRecord>>;
}

impl Catalog for Vec<BookRecord> {
    fn list_books(&self) -> Result<Vec<BookRecord>> { Ok(self.clone()) }
}

/// Catalog persisted in a sled database, records keyed by big-endian id.
pub struct SledCatalog {
    path: PathBuf,
    db: sled::Db,
    books: sled::Tree,
}

impl SledCatalog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = sled::open(&path).with_context(|| format!("opening catalog {}", path.display()))?;
        let books = db.open_tree(BOOKS_TREE)?;
        Ok(Self { path, db, books })
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn len(&self) -> usize { self.books.len() }

    pub fn is_empty(&self) -> bool { self.books.is_empty() }

    /// Insert or overwrite records by id.
    pub fn insert_books(&self, records: &[BookRecord]) -> Result<()> {
        let mut batch = sled::Batch::default();
        for record in records {
            batch.insert(record.id.to_be_bytes().to_vec(), bincode::serialize(record)?);
        }
        self.books.apply_batch(batch)?;
        self.books.flush()?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.books.clear()?;
        Ok(())
    }

    pub fn save_meta(&self, meta: &CatalogMeta) -> Result<()> {
        let json = serde_json::to_vec_pretty(meta)?;
        self.db.insert(META_KEY, json)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn load_meta(&self) -> Result<Option<CatalogMeta>> {
        match self.db.get(META_KEY)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl Catalog for SledCatalog {
    fn list_books(&self) -> Result<Vec<BookRecord>> {
        let mut records = Vec::with_capacity(self.books.len());
        for item in self.books.iter() {
            let (key, value) = item?;
            let record: BookRecord = bincode::deserialize(&value)
                .with_context(|| format!("decoding book record {key:?} in {}", self.path.display()))?;
            records.push(record);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn book(id: u64, title: &str) -> BookRecord {
        BookRecord { id, title: title.into(), authors: vec!["Anon".into()], series: None, published: None }
    }

    #[test]
    fn lists_books_in_id_order() {
        let dir = tempdir().unwrap();
        let catalog = SledCatalog::open(dir.path().join("catalog")).unwrap();
        catalog.insert_books(&[book(300, "Lalka"), book(2, "Quo Vadis"), book(17, "Ferdydurke")]).unwrap();

        let titles: Vec<String> = catalog.list_books().unwrap().into_iter().map(|b| b.title).collect();
        assert_eq!(titles, ["Quo Vadis", "Ferdydurke", "Lalka"]);
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn meta_roundtrips_and_is_absent_initially() {
        let dir = tempdir().unwrap();
        let catalog = SledCatalog::open(dir.path()).unwrap();
        assert!(catalog.load_meta().unwrap().is_none());

        let meta = CatalogMeta { num_books: 1, imported_at: "2024-01-01T00:00:00Z".into(), version: 1 };
        catalog.save_meta(&meta).unwrap();
        assert_eq!(catalog.load_meta().unwrap().unwrap().num_books, 1);
    }
}
