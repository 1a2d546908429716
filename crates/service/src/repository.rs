//! Backend-agnostic record access.
//!
//! Every call resolves the active backend exactly once and runs entirely
//! against it. A failed call is never retried on the other backend.

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dualstore_core::{
    apply_merge_patch, DomainRecord, FieldFilter, PaginatedResult, Payload, ScanQuery,
};
use dualstore_storage::{BackendError, BackendHandle, Operation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OwnedSemaphorePermit;

use crate::error::RepoError;
use crate::failover::FailoverCoordinator;
use crate::gate::OperationGate;

fn check_collection(collection: &str) -> Result<(), RepoError> {
    if collection.trim().is_empty() {
        return Err(RepoError::InvalidPayload("collection name must not be empty".to_owned()));
    }
    Ok(())
}

/// Cheap to clone; all clones share the gate and the coordinator.
#[derive(Clone)]
pub struct Repository {
    coordinator: Arc<FailoverCoordinator>,
    gate: Arc<OperationGate>,
}

impl Repository {
    pub(crate) fn new(coordinator: Arc<FailoverCoordinator>, gate: Arc<OperationGate>) -> Self {
        Self { coordinator, gate }
    }

    /// Admit the call and pin the backend it will run on.
    async fn begin(
        &self,
        collection: &str,
    ) -> Result<(OwnedSemaphorePermit, Arc<BackendHandle>), RepoError> {
        check_collection(collection)?;
        let permit = self.gate.enter().await?;
        let handle = self.coordinator.active_handle();
        if !handle.is_usable() {
            return Err(RepoError::Backend(BackendError::Unavailable(format!(
                "active backend {} is {}",
                handle.name(),
                handle.state()
            ))));
        }
        Ok((permit, handle))
    }

    pub async fn create(&self, collection: &str, payload: Payload) -> Result<DomainRecord, RepoError> {
        let (_permit, handle) = self.begin(collection).await?;
        let record = handle
            .execute(Operation::Insert { collection: collection.to_owned(), payload })
            .await?
            .into_record()?;
        Ok(record)
    }

    pub async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<DomainRecord>, RepoError> {
        let (_permit, handle) = self.begin(collection).await?;
        let found = handle
            .execute(Operation::Find { collection: collection.to_owned(), id: id.to_owned() })
            .await?
            .into_found()?;
        Ok(found)
    }

    /// Read, check `expected_version`, merge `patch` (RFC 7396) and write back
    /// with a compare-and-swap. A version mismatch is a `Conflict` and
    /// nothing is written.
    pub async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Payload,
        expected_version: i64,
    ) -> Result<DomainRecord, RepoError> {
        let (_permit, handle) = self.begin(collection).await?;
        let current = handle
            .execute(Operation::Find { collection: collection.to_owned(), id: id.to_owned() })
            .await?
            .into_found()?
            .ok_or_else(|| BackendError::NotFound(format!("{collection}/{id}")))?;
        if current.version != expected_version {
            return Err(BackendError::Conflict(format!(
                "{collection}/{id}: expected version {expected_version}, found {}",
                current.version
            ))
            .into());
        }

        let mut payload = current.payload;
        apply_merge_patch(&mut payload, &patch);
        let updated = handle
            .execute(Operation::Replace {
                collection: collection.to_owned(),
                id: id.to_owned(),
                payload,
                expected_version,
            })
            .await?
            .into_record()?;
        Ok(updated)
    }

    /// Overwrite the whole payload, compare-and-swap on `expected_version`.
    pub async fn replace(
        &self,
        collection: &str,
        id: &str,
        payload: Payload,
        expected_version: i64,
    ) -> Result<DomainRecord, RepoError> {
        let (_permit, handle) = self.begin(collection).await?;
        let updated = handle
            .execute(Operation::Replace {
                collection: collection.to_owned(),
                id: id.to_owned(),
                payload,
                expected_version,
            })
            .await?
            .into_record()?;
        Ok(updated)
    }

    pub async fn delete(&self, collection: &str, id: &str) -> Result<(), RepoError> {
        let (_permit, handle) = self.begin(collection).await?;
        handle
            .execute(Operation::Delete { collection: collection.to_owned(), id: id.to_owned() })
            .await?
            .into_deleted()?;
        Ok(())
    }

    /// Most recently updated first. `limit` is clamped into `1..=1000`.
    pub async fn scan(
        &self,
        collection: &str,
        filter: Option<FieldFilter>,
        offset: usize,
        limit: usize,
    ) -> Result<PaginatedResult<DomainRecord>, RepoError> {
        let (_permit, handle) = self.begin(collection).await?;
        let mut query = ScanQuery::new(collection).page(offset, limit);
        query.filter = filter;
        let page = handle.execute(Operation::Scan(query)).await?.into_page()?;
        Ok(page)
    }

    pub fn collection<T>(&self, name: impl Into<String>) -> TypedCollection<T> {
        TypedCollection { repo: self.clone(), name: name.into(), _marker: PhantomData }
    }
}

/// A stored value with its record metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub id: String,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
    pub value: T,
}

impl<T: DeserializeOwned> TryFrom<DomainRecord> for Versioned<T> {
    type Error = RepoError;

    fn try_from(record: DomainRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            value: serde_json::from_value(Value::Object(record.payload))?,
            id: record.id,
            version: record.version,
            updated_at: record.updated_at,
        })
    }
}

fn to_payload<T: Serialize>(value: &T) -> Result<Payload, RepoError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(RepoError::InvalidPayload(format!("expected an object, got {other}"))),
    }
}

/// Typed view over one collection for serde types that serialize to objects.
pub struct TypedCollection<T> {
    repo: Repository,
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> TypedCollection<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn create(&self, value: &T) -> Result<Versioned<T>, RepoError> {
        Versioned::try_from(self.repo.create(&self.name, to_payload(value)?).await?)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Versioned<T>>, RepoError> {
        self.repo.find_by_id(&self.name, id).await?.map(Versioned::try_from).transpose()
    }

    /// Store `value` in place of the current one if the version still matches.
    pub async fn save(&self, id: &str, value: &T, expected_version: i64) -> Result<Versioned<T>, RepoError> {
        Versioned::try_from(self.repo.replace(&self.name, id, to_payload(value)?, expected_version).await?)
    }

    pub async fn delete(&self, id: &str) -> Result<(), RepoError> {
        self.repo.delete(&self.name, id).await
    }

    pub async fn scan(
        &self,
        filter: Option<FieldFilter>,
        offset: usize,
        limit: usize,
    ) -> Result<PaginatedResult<Versioned<T>>, RepoError> {
        let page = self.repo.scan(&self.name, filter, offset, limit).await?;
        let items =
            page.items.into_iter().map(Versioned::try_from).collect::<Result<Vec<_>, RepoError>>()?;
        Ok(PaginatedResult::new(items, page.total, page.offset, page.limit))
    }
}
