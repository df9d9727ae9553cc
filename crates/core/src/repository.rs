//! Persistence seam for logical file records.
//!
//! The relational store is an external collaborator; the core talks to it through
//! [`FileRepository`] using plain value objects. [`InMemoryFileRepository`] backs tests and the
//! command-line tool.

use crate::models::{LogicalFileMetadata, LogicalFileReference, SearchFilters};
use crate::{VaultError, VaultResult};
use std::collections::HashMap;
use std::sync::RwLock;
use vault_uuid::VaultId;

/// Authoritative store of logical file references and their metadata.
pub trait FileRepository: Send + Sync {
    /// Inserts a reference and its metadata as one unit.
    fn insert(
        &self,
        reference: LogicalFileReference,
        metadata: LogicalFileMetadata,
    ) -> VaultResult<()>;

    fn reference(&self, id: VaultId) -> VaultResult<Option<LogicalFileReference>>;

    fn metadata(&self, ref_id: VaultId) -> VaultResult<Option<LogicalFileMetadata>>;

    /// All records matching `filters`, oldest first. Access filtering is not applied here.
    fn search(
        &self,
        filters: &SearchFilters,
    ) -> VaultResult<Vec<(LogicalFileReference, LogicalFileMetadata)>>;

    /// Bumps the download counter, returning the new value.
    fn increment_download_count(&self, id: VaultId) -> VaultResult<u64>;

    /// Removes a record. Returns false if it did not exist. Blobs are left alone.
    fn delete(&self, id: VaultId) -> VaultResult<bool>;
}

#[derive(Debug, Default)]
struct Tables {
    references: HashMap<VaultId, LogicalFileReference>,
    metadata: HashMap<VaultId, LogicalFileMetadata>,
    /// Insertion order, so equal timestamps still list deterministically.
    order: Vec<VaultId>,
}

#[derive(Debug, Default)]
pub struct InMemoryFileRepository {
    tables: RwLock<Tables>,
}

impl InMemoryFileRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> VaultResult<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| VaultError::Repository("repository lock poisoned".into()))
    }

    fn write(&self) -> VaultResult<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| VaultError::Repository("repository lock poisoned".into()))
    }
}

impl FileRepository for InMemoryFileRepository {
    fn insert(
        &self,
        reference: LogicalFileReference,
        metadata: LogicalFileMetadata,
    ) -> VaultResult<()> {
        if metadata.ref_id != reference.id {
            return Err(VaultError::Repository(format!(
                "metadata {} does not belong to reference {}",
                metadata.data_id, reference.id
            )));
        }
        let mut tables = self.write()?;
        if tables.references.contains_key(&reference.id) {
            return Err(VaultError::Repository(format!(
                "reference {} already exists",
                reference.id
            )));
        }
        tables.order.push(reference.id);
        tables.metadata.insert(reference.id, metadata);
        tables.references.insert(reference.id, reference);
        Ok(())
    }

    fn reference(&self, id: VaultId) -> VaultResult<Option<LogicalFileReference>> {
        Ok(self.read()?.references.get(&id).cloned())
    }

    fn metadata(&self, ref_id: VaultId) -> VaultResult<Option<LogicalFileMetadata>> {
        Ok(self.read()?.metadata.get(&ref_id).cloned())
    }

    fn search(
        &self,
        filters: &SearchFilters,
    ) -> VaultResult<Vec<(LogicalFileReference, LogicalFileMetadata)>> {
        let tables = self.read()?;
        let mut rows: Vec<_> = tables
            .order
            .iter()
            .filter_map(|id| {
                let reference = tables.references.get(id)?;
                let metadata = tables.metadata.get(id)?;
                filters
                    .matches(metadata)
                    .then(|| (reference.clone(), metadata.clone()))
            })
            .collect();
        rows.sort_by_key(|(reference, _)| reference.created_at);
        Ok(rows)
    }

    fn increment_download_count(&self, id: VaultId) -> VaultResult<u64> {
        let mut tables = self.write()?;
        let reference = tables
            .references
            .get_mut(&id)
            .ok_or_else(|| VaultError::NotFound(format!("file {id}")))?;
        reference.download_count += 1;
        Ok(reference.download_count)
    }

    fn delete(&self, id: VaultId) -> VaultResult<bool> {
        let mut tables = self.write()?;
        tables.order.retain(|existing| *existing != id);
        tables.metadata.remove(&id);
        Ok(tables.references.remove(&id).is_some())
    }
}
