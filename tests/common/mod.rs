//! Shared fixtures for the integration tests: an in-memory object store and
//! scripted fakes for every adapter trait.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Resource, ResourceExt};

use backups_operator::adapters::{
    merge_credentials, ActionRow, ClickHouseApi, CredentialStore, Credentials, DgraphApi,
    ExportLocation, ExportOutput, ExportResponse, ExportStorage, HostResolver,
};
use backups_operator::crd::{ClickHouseBackup, DgraphBackupSpec, Phase, PhaseEvent};
use backups_operator::error::{Error, Result};
use backups_operator::store::{ObjectStore, StoredObject};

pub const NAMESPACE: &str = "db";

const ALL_EVENTS: [PhaseEvent; 9] = [
    PhaseEvent::Start,
    PhaseEvent::CreateRequested,
    PhaseEvent::CreateSucceeded,
    PhaseEvent::CreateFailed,
    PhaseEvent::UploadRequested,
    PhaseEvent::UploadSucceeded,
    PhaseEvent::UploadFailed,
    PhaseEvent::ExportSucceeded,
    PhaseEvent::ExportFailed,
];

/// Assert every consecutive pair of `phases` is an edge of the phase graph
pub fn assert_valid_path(start: Phase, phases: &[Phase]) {
    let mut current = start;
    for &next in phases {
        assert!(
            ALL_EVENTS.iter().any(|&e| current.on(e) == Some(next)),
            "no edge from {:?} to {:?} in {:?}",
            current,
            next,
            phases
        );
        current = next;
    }
}

/// Object store keeping objects in memory with Kubernetes-like semantics:
/// resource versions, finalizer-gated deletion, and a separate status write.
pub struct MemoryStore<K> {
    objects: Mutex<BTreeMap<(String, String), K>>,
    status_writes: Mutex<Vec<K>>,
    failing_deletes: Mutex<HashSet<String>>,
    failing_status_writes: Mutex<bool>,
    version: AtomicU64,
    uid: AtomicU64,
    creates: AtomicUsize,
    updates: AtomicUsize,
}

impl<K: StoredObject> Default for MemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: StoredObject> MemoryStore<K> {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            status_writes: Mutex::new(Vec::new()),
            failing_deletes: Mutex::new(HashSet::new()),
            failing_status_writes: Mutex::new(false),
            version: AtomicU64::new(1),
            uid: AtomicU64::new(1),
            creates: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
        }
    }

    fn key(obj: &K) -> (String, String) {
        (
            obj.namespace().unwrap_or_else(|| "default".to_string()),
            obj.name_any(),
        )
    }

    fn next_version(&self) -> String {
        self.version.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// Store `obj` directly, filling in server-side metadata that is unset
    pub fn insert(&self, mut obj: K) -> K {
        let meta = obj.meta_mut();
        if meta.uid.is_none() {
            meta.uid = Some(format!("uid-{}", self.uid.fetch_add(1, Ordering::SeqCst)));
        }
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = Some(Time(Utc::now()));
        }
        if meta.generation.is_none() {
            meta.generation = Some(1);
        }
        meta.resource_version = Some(self.next_version());

        self.objects
            .lock()
            .unwrap()
            .insert(Self::key(&obj), obj.clone());
        obj
    }

    /// Store `obj` with a creation timestamp in the past
    pub fn insert_created_at(&self, mut obj: K, created: DateTime<Utc>) -> K {
        obj.meta_mut().creation_timestamp = Some(Time(created));
        self.insert(obj)
    }

    pub fn fetch(&self, name: &str) -> Option<K> {
        self.objects
            .lock()
            .unwrap()
            .get(&(NAMESPACE.to_string(), name.to_string()))
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .values()
            .map(|o| o.name_any())
            .collect()
    }

    /// Every object written through `update_status`, in order
    pub fn status_writes(&self) -> Vec<K> {
        self.status_writes.lock().unwrap().clone()
    }

    pub fn fail_delete_of(&self, name: &str) {
        self.failing_deletes.lock().unwrap().insert(name.to_string());
    }

    pub fn fail_status_writes(&self) {
        *self.failing_status_writes.lock().unwrap() = true;
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Bump the generation as a spec change would
    pub fn bump_generation(&self, name: &str) -> K {
        let mut objects = self.objects.lock().unwrap();
        let obj = objects
            .get_mut(&(NAMESPACE.to_string(), name.to_string()))
            .unwrap();
        let meta = obj.meta_mut();
        meta.generation = Some(meta.generation.unwrap_or_default() + 1);
        meta.resource_version = Some(self.next_version());
        obj.clone()
    }

    fn check_version(stored: &K, obj: &K) -> Result<()> {
        match obj.resource_version() {
            Some(version) if Some(&version) != stored.resource_version().as_ref() => Err(
                Error::Conflict(format!("{} has a newer version", obj.name_any())),
            ),
            _ => Ok(()),
        }
    }
}

/// Copy the `status` field of `from` into `into`
fn with_status_of<K: StoredObject>(into: &K, from: &K) -> Result<K> {
    let mut value = serde_json::to_value(into)?;
    let status = serde_json::to_value(from)?
        .get("status")
        .cloned()
        .unwrap_or(serde_json::Value::Null);
    value["status"] = status;
    Ok(serde_json::from_value(value)?)
}

#[async_trait]
impl<K: StoredObject> ObjectStore<K> for MemoryStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<K> {
        self.objects
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    async fn list(&self, namespace: &str) -> Result<Vec<K>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, obj: &K) -> Result<K> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.objects.lock().unwrap().contains_key(&Self::key(obj)) {
            return Err(Error::Conflict(format!("{} already exists", obj.name_any())));
        }

        let mut obj = obj.clone();
        let meta = obj.meta_mut();
        meta.uid = None;
        meta.creation_timestamp = None;
        meta.resource_version = None;
        Ok(self.insert(obj))
    }

    async fn update(&self, obj: &K) -> Result<K> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let key = Self::key(obj);
        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::NotFound(obj.name_any()))?;
        Self::check_version(&stored, obj)?;

        let mut updated = with_status_of(obj, &stored)?;
        updated.meta_mut().deletion_timestamp = stored.meta().deletion_timestamp.clone();
        updated.meta_mut().resource_version = Some(self.next_version());

        if updated.meta().deletion_timestamp.is_some() && updated.finalizers().is_empty() {
            objects.remove(&key);
        } else {
            objects.insert(key, updated.clone());
        }
        Ok(updated)
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        if *self.failing_status_writes.lock().unwrap() {
            return Err(Error::Conflict("status write rejected".to_string()));
        }

        let key = Self::key(obj);
        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::NotFound(obj.name_any()))?;
        Self::check_version(&stored, obj)?;

        let mut updated = with_status_of(&stored, obj)?;
        updated.meta_mut().resource_version = Some(self.next_version());
        objects.insert(key, updated.clone());
        self.status_writes.lock().unwrap().push(updated.clone());
        Ok(updated)
    }

    async fn delete(&self, obj: &K) -> Result<()> {
        if self.failing_deletes.lock().unwrap().contains(&obj.name_any()) {
            return Err(Error::storage(format!("delete of {} rejected", obj.name_any())));
        }

        let key = Self::key(obj);
        let mut objects = self.objects.lock().unwrap();
        let mut stored = objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::NotFound(obj.name_any()))?;

        if stored.finalizers().is_empty() {
            objects.remove(&key);
        } else if stored.meta().deletion_timestamp.is_none() {
            stored.meta_mut().deletion_timestamp = Some(Time(Utc::now()));
            stored.meta_mut().resource_version = Some(self.next_version());
            objects.insert(key, stored);
        }
        Ok(())
    }
}

/// Resolver answering every lookup with fixed addresses
pub struct FixedResolver(pub Vec<IpAddr>);

impl FixedResolver {
    pub fn ip(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self(vec![IpAddr::V4(Ipv4Addr::new(a, b, c, d))])
    }

    pub fn failing() -> Self {
        Self(Vec::new())
    }
}

#[async_trait]
impl HostResolver for FixedResolver {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>> {
        if self.0.is_empty() {
            return Err(Error::endpoint(format!("no such host {}", host)));
        }
        Ok(self.0.clone())
    }
}

#[derive(Default)]
struct ServiceState {
    rows: Vec<ActionRow>,
    polls: usize,
    calls: Vec<String>,
}

/// Scripted clickhouse-backup service
///
/// Create and upload calls append a status row carrying the configured final
/// status; the latest row reads "in progress" for the first `pending` polls.
pub struct FakeClickHouseApi {
    create_error: Option<String>,
    upload_error: Option<String>,
    delete_error: Option<String>,
    create_status: (&'static str, &'static str),
    upload_status: (&'static str, &'static str),
    pending: usize,
    foreign_rows: Vec<ActionRow>,
    state: Mutex<ServiceState>,
}

impl Default for FakeClickHouseApi {
    fn default() -> Self {
        Self {
            create_error: None,
            upload_error: None,
            delete_error: None,
            create_status: ("success", ""),
            upload_status: ("success", ""),
            pending: 0,
            foreign_rows: Vec::new(),
            state: Mutex::new(ServiceState::default()),
        }
    }
}

pub fn row(command: &str, status: &str) -> ActionRow {
    ActionRow {
        command: command.to_string(),
        status: status.to_string(),
        ..Default::default()
    }
}

impl FakeClickHouseApi {
    pub fn failing_create(mut self, message: &str) -> Self {
        self.create_error = Some(message.to_string());
        self
    }

    pub fn failing_delete(mut self, message: &str) -> Self {
        self.delete_error = Some(message.to_string());
        self
    }

    pub fn create_status(mut self, status: &'static str, error: &'static str) -> Self {
        self.create_status = (status, error);
        self
    }

    pub fn upload_status(mut self, status: &'static str, error: &'static str) -> Self {
        self.upload_status = (status, error);
        self
    }

    pub fn pending(mut self, polls: usize) -> Self {
        self.pending = polls;
        self
    }

    pub fn foreign_rows(mut self, rows: Vec<ActionRow>) -> Self {
        self.foreign_rows = rows;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn polls(&self) -> usize {
        self.state.lock().unwrap().polls
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl ClickHouseApi for FakeClickHouseApi {
    async fn create(&self, backup: &ClickHouseBackup) -> Result<()> {
        let name = backup.name_any();
        self.record(format!("create {}", name));
        if let Some(message) = &self.create_error {
            return Err(Error::adapter(message.clone()));
        }

        let (status, error) = self.create_status;
        let mut state = self.state.lock().unwrap();
        state.polls = 0;
        state.rows.push(ActionRow {
            error: error.to_string(),
            ..row(&format!("create {}", name), status)
        });
        Ok(())
    }

    async fn upload(&self, backup: &ClickHouseBackup) -> Result<()> {
        let name = backup.name_any();
        self.record(format!("upload {}", name));
        if let Some(message) = &self.upload_error {
            return Err(Error::adapter(message.clone()));
        }

        let (status, error) = self.upload_status;
        let mut state = self.state.lock().unwrap();
        state.polls = 0;
        state.rows.push(ActionRow {
            error: error.to_string(),
            ..row(&format!("upload {}", name), status)
        });
        Ok(())
    }

    async fn status(&self, _backup: &ClickHouseBackup) -> Result<Vec<ActionRow>> {
        let mut state = self.state.lock().unwrap();
        state.polls += 1;

        let mut rows = state.rows.clone();
        if state.polls <= self.pending {
            if let Some(last) = rows.last_mut() {
                last.status = "in progress".to_string();
                last.error.clear();
            }
        }

        // Foreign rows come last so they would win if not filtered out
        rows.extend(self.foreign_rows.iter().cloned());
        Ok(rows)
    }

    async fn delete(&self, backup: &ClickHouseBackup) -> Result<()> {
        self.record(format!("delete {}", backup.name_any()));
        match &self.delete_error {
            Some(message) => Err(Error::adapter(message.clone())),
            None => Ok(()),
        }
    }
}

/// Scripted Dgraph admin endpoint
pub struct FakeDgraphApi {
    result: std::result::Result<ExportOutput, String>,
    calls: Mutex<Vec<(String, Credentials)>>,
}

impl FakeDgraphApi {
    pub fn exporting(files: &[&str]) -> Self {
        Self {
            result: Ok(ExportOutput {
                response: ExportResponse {
                    message: "Export completed.".to_string(),
                    code: "Success".to_string(),
                },
                exported_files: files.iter().map(|f| f.to_string()).collect(),
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Admin URL and credentials of every export call
    pub fn calls(&self) -> Vec<(String, Credentials)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DgraphApi for FakeDgraphApi {
    async fn export(
        &self,
        admin_url: &str,
        _spec: &DgraphBackupSpec,
        credentials: &Credentials,
    ) -> Result<ExportOutput> {
        self.calls
            .lock()
            .unwrap()
            .push((admin_url.to_string(), credentials.clone()));
        self.result.clone().map_err(Error::adapter)
    }
}

/// Records export deletions
#[derive(Default)]
pub struct FakeExportStorage {
    fail: bool,
    calls: Mutex<Vec<(ExportLocation, String, Credentials)>>,
}

impl FakeExportStorage {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<(ExportLocation, String, Credentials)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExportStorage for FakeExportStorage {
    async fn delete_export(
        &self,
        location: &ExportLocation,
        region: &str,
        credentials: &Credentials,
    ) -> Result<usize> {
        self.calls
            .lock()
            .unwrap()
            .push((location.clone(), region.to_string(), credentials.clone()));
        if self.fail {
            return Err(Error::storage("access denied"));
        }
        Ok(2)
    }
}

/// Secrets held in memory
#[derive(Default)]
pub struct FakeCredentialStore {
    secrets: BTreeMap<String, Credentials>,
}

impl FakeCredentialStore {
    pub fn with_secret(mut self, name: &str, entries: &[(&str, &str)]) -> Self {
        self.secrets.insert(
            name.to_string(),
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }
}

#[async_trait]
impl CredentialStore for FakeCredentialStore {
    async fn resolve(&self, names: &[String], namespace: &str) -> Result<Credentials> {
        let mut sets = Vec::new();
        for name in names {
            let secret = self
                .secrets
                .get(name)
                .cloned()
                .ok_or_else(|| Error::SecretNotFound(format!("{}/{}", namespace, name)))?;
            sets.push(secret);
        }
        Ok(merge_credentials(sets))
    }
}
