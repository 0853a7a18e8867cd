//! Durable user → subscription mapping.
//!
//! The store is a JSON object keyed by user id, each value holding the plan
//! and an RFC 3339 expiry. Writes go to a temporary file in the same
//! directory and are renamed over the original, and the in-memory map is
//! only replaced once the rename succeeded, so readers always see either
//! the old or the new record.

use crate::data_structures::{Entitlement, Plan, UserId};
use crate::error::{FileBotError, Result};
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};
use tempfile::NamedTempFile;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntitlement {
    plan: Plan,
    expires_at: DateTime<Utc>,
}

pub struct EntitlementStore {
    path: PathBuf,
    records: RwLock<BTreeMap<UserId, Entitlement>>,
}

impl EntitlementStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records =
            load_records(&path).map_err(|e| FileBotError::persistence(path.display().to_string(), &e))?;
        debug!(path = %path.display(), count = records.len(), "Loaded entitlement store");

        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, user_id: UserId) -> Option<Entitlement> {
        self.read().get(&user_id).cloned()
    }

    pub fn active(&self, user_id: UserId, now: DateTime<Utc>) -> Option<Entitlement> {
        self.get(user_id).filter(|e| e.is_active(now))
    }

    /// Creates or replaces the user's entitlement, running `days` from `now`.
    pub fn grant(&self, user_id: UserId, days: u32, plan: Plan, now: DateTime<Utc>) -> Result<Entitlement> {
        let entitlement = Entitlement::new(user_id, plan, expiry_after(now, days)?);
        self.update(|records| {
            records.insert(user_id, entitlement.clone());
            Ok(())
        })?;
        info!(user_id, plan = %plan, days, "Granted subscription");
        Ok(entitlement)
    }

    /// Adds days to an existing entitlement. An expired one restarts from `now`.
    pub fn extend(&self, user_id: UserId, days: u32, now: DateTime<Utc>) -> Result<Entitlement> {
        let mut extended = None;
        self.update(|records| {
            let current = records
                .get(&user_id)
                .ok_or(FileBotError::NotSubscribed(user_id))?;
            let base = current.expires_at().max(now);
            let updated = Entitlement::new(user_id, current.plan(), expiry_after(base, days)?);
            records.insert(user_id, updated.clone());
            extended = Some(updated);
            Ok(())
        })?;
        info!(user_id, days, "Extended subscription");
        extended.ok_or(FileBotError::NotSubscribed(user_id))
    }

    /// Removes the user's entitlement. Returns whether there was one.
    pub fn revoke(&self, user_id: UserId) -> Result<bool> {
        if self.get(user_id).is_none() {
            return Ok(false);
        }
        self.update(|records| {
            records.remove(&user_id);
            Ok(())
        })?;
        info!(user_id, "Revoked subscription");
        Ok(true)
    }

    /// All records ordered by expiry, soonest first.
    pub fn list(&self) -> Vec<Entitlement> {
        let mut entitlements: Vec<Entitlement> = self.read().values().cloned().collect();
        entitlements.sort_by(|a, b| {
            a.expires_at()
                .cmp(&b.expires_at())
                .then(a.user_id().cmp(&b.user_id()))
        });
        entitlements
    }

    pub fn active_count(&self, now: DateTime<Utc>) -> usize {
        self.read().values().filter(|e| e.is_active(now)).count()
    }

    pub fn expiring_within(&self, now: DateTime<Utc>, window: Duration) -> Vec<Entitlement> {
        self.list()
            .into_iter()
            .filter(|e| e.expires_within(now, window))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<UserId, Entitlement>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<UserId, Entitlement>) -> Result<()>,
    {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = records.clone();
        mutate(&mut next)?;
        save_records(&self.path, &next)
            .map_err(|e| FileBotError::persistence(self.path.display().to_string(), &e))?;
        *records = next;
        Ok(())
    }
}

fn load_records(path: &Path) -> anyhow::Result<BTreeMap<UserId, Entitlement>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read entitlement store: {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let stored: BTreeMap<String, StoredEntitlement> =
        serde_json::from_str(&content).context("Failed to parse entitlement store")?;

    stored
        .into_iter()
        .map(|(key, value)| {
            let user_id: UserId = key
                .trim()
                .parse()
                .with_context(|| format!("Invalid user id in entitlement store: {}", key))?;
            Ok((user_id, Entitlement::new(user_id, value.plan, value.expires_at)))
        })
        .collect()
}

fn save_records(path: &Path, records: &BTreeMap<UserId, Entitlement>) -> anyhow::Result<()> {
    let stored: BTreeMap<String, StoredEntitlement> = records
        .iter()
        .map(|(user_id, e)| {
            (
                user_id.to_string(),
                StoredEntitlement {
                    plan: e.plan(),
                    expires_at: e.expires_at(),
                },
            )
        })
        .collect();

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut file = NamedTempFile::new_in(&dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    serde_json::to_writer_pretty(&mut file, &stored).context("Failed to serialize entitlements")?;
    file.flush()?;
    file.persist(path)
        .with_context(|| format!("Failed to replace entitlement store: {}", path.display()))?;
    Ok(())
}

fn expiry_after(base: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>> {
    base.checked_add_signed(Duration::days(i64::from(days)))
        .ok_or(FileBotError::InvalidDays(days))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn open_store(dir: &TempDir) -> EntitlementStore {
        EntitlementStore::open(dir.path().join("subs.json")).unwrap()
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert!(store.is_empty());
        assert!(store.get(1).is_none());
    }

    #[test]
    fn test_grant_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.grant(7, 30, Plan::Pro, now()).unwrap();

        let reopened = open_store(&dir);
        let entitlement = reopened.get(7).unwrap();
        assert_eq!(entitlement.plan(), Plan::Pro);
        assert_eq!(entitlement.expires_at(), now() + Duration::days(30));
    }

    #[test]
    fn test_persisted_layout_is_keyed_by_user() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.grant(7, 1, Plan::Premium, now()).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["7"]["plan"], "premium");
        assert_eq!(value["7"]["expires_at"], "2024-03-02T12:00:00Z");
    }

    #[test]
    fn test_grant_replaces_existing_record() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.grant(7, 30, Plan::Pro, now()).unwrap();
        store.grant(7, 90, Plan::Premium, now()).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(7).unwrap().plan(), Plan::Premium);
    }

    #[test]
    fn test_extend_active_and_expired() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.grant(1, 10, Plan::Pro, now()).unwrap();
        let extended = store.extend(1, 5, now()).unwrap();
        assert_eq!(extended.expires_at(), now() + Duration::days(15));

        store.grant(2, 1, Plan::Pro, now() - Duration::days(10)).unwrap();
        let restarted = store.extend(2, 5, now()).unwrap();
        assert_eq!(restarted.expires_at(), now() + Duration::days(5));
    }

    #[test]
    fn test_oversized_days_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert_eq!(
            store.grant(1, u32::MAX, Plan::Pro, now()),
            Err(FileBotError::InvalidDays(u32::MAX))
        );
        assert!(store.is_empty());

        store.grant(1, 10, Plan::Pro, now()).unwrap();
        assert_eq!(
            store.extend(1, u32::MAX, now()),
            Err(FileBotError::InvalidDays(u32::MAX))
        );
        assert_eq!(store.get(1).unwrap().expires_at(), now() + Duration::days(10));
        assert_eq!(open_store(&dir).get(1).unwrap().expires_at(), now() + Duration::days(10));
    }

    #[test]
    fn test_extend_unknown_user_fails() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert_eq!(store.extend(99, 5, now()), Err(FileBotError::NotSubscribed(99)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_revoke() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.grant(1, 10, Plan::Pro, now()).unwrap();

        assert!(store.revoke(1).unwrap());
        assert!(!store.revoke(1).unwrap());
        assert!(open_store(&dir).get(1).is_none());
    }

    #[test]
    fn test_list_is_ordered_by_expiry() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.grant(1, 30, Plan::Pro, now()).unwrap();
        store.grant(2, 5, Plan::Pro, now()).unwrap();
        store.grant(3, 90, Plan::Premium, now()).unwrap();

        let users: Vec<UserId> = store.list().iter().map(|e| e.user_id()).collect();
        assert_eq!(users, vec![2, 1, 3]);
    }

    #[test]
    fn test_expiring_within_and_active_count() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.grant(1, 2, Plan::Pro, now()).unwrap();
        store.grant(2, 30, Plan::Pro, now()).unwrap();
        store.grant(3, 1, Plan::Pro, now() - Duration::days(5)).unwrap();

        let expiring = store.expiring_within(now(), Duration::days(3));
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].user_id(), 1);
        assert_eq!(store.active_count(now()), 2);
    }

    #[test]
    fn test_corrupt_file_is_persistence_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("subs.json");
        fs::write(&path, "{ broken").unwrap();

        match EntitlementStore::open(&path) {
            Err(FileBotError::Persistence { .. }) => {}
            other => panic!("expected persistence error, got {:?}", other.map(|s| s.len())),
        }
    }

    #[test]
    fn test_failed_write_leaves_memory_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone").join("subs.json");
        let store = EntitlementStore::open(&path).unwrap();

        assert!(matches!(
            store.grant(1, 30, Plan::Pro, now()),
            Err(FileBotError::Persistence { .. })
        ));
        assert!(store.get(1).is_none());
    }
}
