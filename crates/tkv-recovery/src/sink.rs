//! The index-mutation seam recovery replay drives (§4.11).

use std::collections::HashMap;

use parking_lot::Mutex;
use tkv_error::Result;
use tkv_types::IndexId;

/// Applies reconstructed effects to the real store. `tkv-core`
/// implements this over `ByteIndex`; [`MapSink`] is an in-memory
/// reference implementation used by tests here.
pub trait RecoverySink: Send + Sync {
    /// # Errors
    /// Implementation-defined; surfaced as the replay's first error.
    fn apply_store(&self, index: IndexId, key: &[u8], value: &[u8]) -> Result<()>;
    fn apply_delete(&self, index: IndexId, key: &[u8]) -> Result<()>;
    fn apply_rename_index(&self, index: IndexId, new_name: &[u8]) -> Result<()>;
    fn apply_delete_index(&self, index: IndexId) -> Result<()>;
}

#[derive(Default)]
pub struct MapSink {
    rows: Mutex<HashMap<(IndexId, Vec<u8>), Vec<u8>>>,
    names: Mutex<HashMap<IndexId, Vec<u8>>>,
}

impl MapSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, index: IndexId, key: &[u8]) -> Option<Vec<u8>> {
        self.rows.lock().get(&(index, key.to_vec())).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecoverySink for MapSink {
    fn apply_store(&self, index: IndexId, key: &[u8], value: &[u8]) -> Result<()> {
        self.rows.lock().insert((index, key.to_vec()), value.to_vec());
        Ok(())
    }

    fn apply_delete(&self, index: IndexId, key: &[u8]) -> Result<()> {
        self.rows.lock().remove(&(index, key.to_vec()));
        Ok(())
    }

    fn apply_rename_index(&self, index: IndexId, new_name: &[u8]) -> Result<()> {
        self.names.lock().insert(index, new_name.to_vec());
        Ok(())
    }

    fn apply_delete_index(&self, index: IndexId) -> Result<()> {
        self.names.lock().remove(&index);
        self.rows.lock().retain(|(idx, _), _| *idx != index);
        Ok(())
    }
}
