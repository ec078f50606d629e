//! Shared test fixtures: an in-memory object store with resourceVersion
//! conflict semantics, and scripted backup target / engine clients.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::ObjectMeta;
use kube::runtime::controller::Action;
use kube::ResourceExt;

use volume_backup_operator::clients::{
    BackupInfo, BackupTargetClient, BackupTargetClientFactory, EngineClient, EngineClientFactory,
    TransferRequest, TransferStatus,
};
use volume_backup_operator::controllers::Context;
use volume_backup_operator::crd::cluster::{Volume, VolumeSpec, SETTING_DEFAULT_ENGINE_IMAGE};
use volume_backup_operator::crd::{
    Backup, BackupSpec, BackupState, BackupStatus, BackupTarget, BackupTargetSpec, BackupVolume,
    BackupVolumeSpec, BackupVolumeStatus, BACKUP_FINALIZER, BACKUP_VOLUME_LABEL,
    DEFAULT_BACKUP_TARGET_NAME,
};
use volume_backup_operator::datastore::DataStore;
use volume_backup_operator::events::{EventKind, EventPublisher};
use volume_backup_operator::reconcilers::backup as backup_reconciler;
use volume_backup_operator::{Error, Result};

pub const NAMESPACE: &str = "backup-system";
pub const VOLUME: &str = "vol-1";
pub const TARGET_URL: &str = "s3://backups@us-east-1/";
pub const ENGINE_IMAGE: &str = "engine:v1";
pub const LOCAL_NODE: &str = "node-1";
pub const OTHER_NODE: &str = "node-2";

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Clone, Copy, Debug)]
struct FakeNode {
    ready: bool,
    engine_image_ready: bool,
}

type StatusHook = Box<dyn FnOnce(&mut Backup) + Send>;

#[derive(Default)]
struct Inner {
    version: u64,
    backups: HashMap<String, Backup>,
    backup_volumes: HashMap<String, BackupVolume>,
    targets: HashMap<String, BackupTarget>,
    settings: HashMap<String, String>,
    volumes: HashMap<String, Volume>,
    backing_images: HashMap<String, String>,
    nodes: HashMap<String, FakeNode>,
    failing_gets: HashSet<String>,
}

impl Inner {
    fn next_version(&mut self) -> Option<String> {
        self.version += 1;
        Some(self.version.to_string())
    }
}

fn check_version(stored: &ObjectMeta, incoming: &ObjectMeta, what: &str) -> Result<()> {
    if stored.resource_version != incoming.resource_version {
        return Err(Error::conflict(format!(
            "{}: stored version {:?}, got {:?}",
            what, stored.resource_version, incoming.resource_version
        )));
    }
    Ok(())
}

/// Object store keeping everything in memory. Writes carrying a stale
/// resourceVersion fail with a conflict, like the API server.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    status_hook: Mutex<Option<StatusHook>>,
    pub backup_gets: AtomicUsize,
    pub status_writes: AtomicUsize,
    pub status_conflicts: AtomicUsize,
    pub finalizer_writes: AtomicUsize,
    pub volume_writes: AtomicUsize,
    pub target_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn put_backup(&self, mut backup: Backup) {
        let mut inner = self.inner.lock().unwrap();
        backup.metadata.resource_version = inner.next_version();
        inner.backups.insert(backup.name_any(), backup);
    }

    pub fn backup(&self, name: &str) -> Option<Backup> {
        self.inner.lock().unwrap().backups.get(name).cloned()
    }

    pub fn backup_state(&self, name: &str) -> Option<BackupState> {
        self.backup(name).map(|b| b.state())
    }

    pub fn put_backup_volume(&self, mut backup_volume: BackupVolume) {
        let mut inner = self.inner.lock().unwrap();
        backup_volume.metadata.resource_version = inner.next_version();
        inner
            .backup_volumes
            .insert(backup_volume.name_any(), backup_volume);
    }

    pub fn backup_volume(&self, name: &str) -> Option<BackupVolume> {
        self.inner.lock().unwrap().backup_volumes.get(name).cloned()
    }

    pub fn remove_backup_volume(&self, name: &str) {
        self.inner.lock().unwrap().backup_volumes.remove(name);
    }

    pub fn put_target(&self, mut target: BackupTarget) {
        let mut inner = self.inner.lock().unwrap();
        target.metadata.resource_version = inner.next_version();
        inner.targets.insert(target.name_any(), target);
    }

    pub fn target(&self, name: &str) -> Option<BackupTarget> {
        self.inner.lock().unwrap().targets.get(name).cloned()
    }

    pub fn remove_target(&self, name: &str) {
        self.inner.lock().unwrap().targets.remove(name);
    }

    pub fn set_setting(&self, name: &str, value: &str) {
        self.inner
            .lock()
            .unwrap()
            .settings
            .insert(name.to_string(), value.to_string());
    }

    pub fn put_volume(&self, name: &str, backing_image: &str) {
        let volume = Volume {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(NAMESPACE.to_string()),
                ..Default::default()
            },
            spec: VolumeSpec {
                backing_image: backing_image.to_string(),
            },
        };
        self.inner
            .lock()
            .unwrap()
            .volumes
            .insert(name.to_string(), volume);
    }

    pub fn put_backing_image(&self, name: &str, checksum: &str) {
        self.inner
            .lock()
            .unwrap()
            .backing_images
            .insert(name.to_string(), checksum.to_string());
    }

    pub fn set_node(&self, name: &str, ready: bool, engine_image_ready: bool) {
        self.inner.lock().unwrap().nodes.insert(
            name.to_string(),
            FakeNode {
                ready,
                engine_image_ready,
            },
        );
    }

    /// Make every `get_backup` of this name fail with a non-retryable-looking error
    pub fn fail_gets_of(&self, name: &str) {
        self.inner
            .lock()
            .unwrap()
            .failing_gets
            .insert(name.to_string());
    }

    /// Run `hook` on the stored Backup right before the next status update,
    /// as if another writer committed first.
    pub fn before_next_status_update(&self, hook: impl FnOnce(&mut Backup) + Send + 'static) {
        *self.status_hook.lock().unwrap() = Some(Box::new(hook));
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn get_backup(&self, name: &str) -> Result<Backup> {
        self.backup_gets.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.lock().unwrap();
        if inner.failing_gets.contains(name) {
            return Err(Error::remote(format!("injected failure reading {}", name)));
        }
        inner
            .backups
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("backup {}", name)))
    }

    async fn update_backup_status(&self, backup: &Backup) -> Result<Backup> {
        let name = backup.name_any();
        let hook = self.status_hook.lock().unwrap().take();
        let mut inner = self.inner.lock().unwrap();

        if let Some(hook) = hook {
            let version = inner.next_version();
            if let Some(stored) = inner.backups.get_mut(&name) {
                hook(stored);
                stored.metadata.resource_version = version;
            }
        }

        let version = inner.next_version();
        let stored = inner
            .backups
            .get_mut(&name)
            .ok_or_else(|| Error::not_found(format!("backup {}", name)))?;
        if let Err(e) = check_version(&stored.metadata, &backup.metadata, &name) {
            self.status_conflicts.fetch_add(1, Ordering::SeqCst);
            return Err(e);
        }
        stored.status = backup.status.clone();
        stored.metadata.resource_version = version;
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored.clone())
    }

    async fn add_backup_finalizer(&self, backup: &Backup) -> Result<Backup> {
        let name = backup.name_any();
        let mut inner = self.inner.lock().unwrap();
        let version = inner.next_version();
        let stored = inner
            .backups
            .get_mut(&name)
            .ok_or_else(|| Error::not_found(format!("backup {}", name)))?;
        check_version(&stored.metadata, &backup.metadata, &name)?;
        stored
            .metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(BACKUP_FINALIZER.to_string());
        stored.metadata.resource_version = version;
        self.finalizer_writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored.clone())
    }

    async fn remove_backup_finalizer(&self, backup: &Backup) -> Result<()> {
        let name = backup.name_any();
        let mut inner = self.inner.lock().unwrap();
        let version = inner.next_version();
        let stored = inner
            .backups
            .get_mut(&name)
            .ok_or_else(|| Error::not_found(format!("backup {}", name)))?;
        check_version(&stored.metadata, &backup.metadata, &name)?;
        if let Some(finalizers) = stored.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != BACKUP_FINALIZER);
        }
        stored.metadata.resource_version = version;
        self.finalizer_writes.fetch_add(1, Ordering::SeqCst);

        let gone = stored.metadata.deletion_timestamp.is_some() && stored.finalizers().is_empty();
        if gone {
            inner.backups.remove(&name);
        }
        Ok(())
    }

    async fn get_backup_volume(&self, name: &str) -> Result<BackupVolume> {
        self.backup_volume(name)
            .ok_or_else(|| Error::not_found(format!("backup volume {}", name)))
    }

    async fn update_backup_volume(&self, backup_volume: &BackupVolume) -> Result<BackupVolume> {
        let name = backup_volume.name_any();
        let mut inner = self.inner.lock().unwrap();
        let version = inner.next_version();
        let stored = inner
            .backup_volumes
            .get_mut(&name)
            .ok_or_else(|| Error::not_found(format!("backup volume {}", name)))?;
        check_version(&stored.metadata, &backup_volume.metadata, &name)?;
        stored.spec = backup_volume.spec.clone();
        stored.metadata.resource_version = version;
        self.volume_writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored.clone())
    }

    async fn get_backup_target(&self, name: &str) -> Result<BackupTarget> {
        self.target(name)
            .ok_or_else(|| Error::not_found(format!("backup target {}", name)))
    }

    async fn update_backup_target(&self, backup_target: &BackupTarget) -> Result<BackupTarget> {
        let name = backup_target.name_any();
        let mut inner = self.inner.lock().unwrap();
        let version = inner.next_version();
        let stored = inner
            .targets
            .get_mut(&name)
            .ok_or_else(|| Error::not_found(format!("backup target {}", name)))?;
        check_version(&stored.metadata, &backup_target.metadata, &name)?;
        stored.spec = backup_target.spec.clone();
        stored.metadata.resource_version = version;
        self.target_writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored.clone())
    }

    async fn get_setting(&self, name: &str) -> Result<String> {
        self.inner
            .lock()
            .unwrap()
            .settings
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("setting {}", name)))
    }

    async fn get_volume(&self, name: &str) -> Result<Volume> {
        self.inner
            .lock()
            .unwrap()
            .volumes
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("volume {}", name)))
    }

    async fn get_backing_image_checksum(&self, name: &str) -> Result<String> {
        self.inner
            .lock()
            .unwrap()
            .backing_images
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("backing image {}", name)))
    }

    async fn list_ready_nodes_with_engine_image(&self, _image: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        let mut nodes: Vec<String> = inner
            .nodes
            .iter()
            .filter(|(_, n)| n.ready && n.engine_image_ready)
            .map(|(name, _)| name.clone())
            .collect();
        nodes.sort();
        Ok(nodes)
    }

    async fn check_engine_image_readiness(&self, _image: &str, node: &str) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .nodes
            .get(node)
            .map(|n| n.engine_image_ready)
            .unwrap_or(false))
    }

    async fn is_node_down_or_deleted(&self, node: &str) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.nodes.get(node).map(|n| !n.ready).unwrap_or(true))
    }
}

// ============================================================================
// Backup target
// ============================================================================

#[derive(Clone, Debug)]
pub enum InspectBehavior {
    Found(BackupInfo),
    Missing,
    InProgress,
    Fail,
}

pub struct FakeTargetClient {
    url: String,
    credential: BTreeMap<String, String>,
    inspect: Mutex<InspectBehavior>,
    fail_delete: AtomicBool,
    pub inspected: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
}

impl FakeTargetClient {
    pub fn new(url: &str) -> Self {
        let mut credential = BTreeMap::new();
        credential.insert("AWS_ACCESS_KEY_ID".to_string(), "minio".to_string());
        Self {
            url: url.to_string(),
            credential,
            inspect: Mutex::new(InspectBehavior::Missing),
            fail_delete: AtomicBool::new(false),
            inspected: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn set_inspect(&self, behavior: InspectBehavior) {
        *self.inspect.lock().unwrap() = behavior;
    }

    pub fn fail_deletes(&self) {
        self.fail_delete.store(true, Ordering::SeqCst);
    }

    pub fn inspect_count(&self) -> usize {
        self.inspected.lock().unwrap().len()
    }

    pub fn deleted_urls(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackupTargetClient for FakeTargetClient {
    fn url(&self) -> &str {
        &self.url
    }

    fn credential(&self) -> &BTreeMap<String, String> {
        &self.credential
    }

    async fn inspect_backup(&self, backup_url: &str) -> Result<Option<BackupInfo>> {
        self.inspected.lock().unwrap().push(backup_url.to_string());
        match self.inspect.lock().unwrap().clone() {
            InspectBehavior::Found(info) => Ok(Some(info)),
            InspectBehavior::Missing => Ok(None),
            InspectBehavior::InProgress => Err(Error::InProgress(format!(
                "backup {} is in progress",
                backup_url
            ))),
            InspectBehavior::Fail => Err(Error::remote("connection refused")),
        }
    }

    async fn delete_backup(&self, backup_url: &str) -> Result<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Error::remote("connection refused"));
        }
        self.deleted.lock().unwrap().push(backup_url.to_string());
        Ok(())
    }
}

pub struct FakeTargetFactory {
    client: Arc<FakeTargetClient>,
    fail: AtomicBool,
}

impl FakeTargetFactory {
    pub fn fail_client_creation(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BackupTargetClientFactory for FakeTargetFactory {
    async fn client_for(&self, _target: &BackupTarget) -> Result<Arc<dyn BackupTargetClient>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::SecretNotFound(format!("{}/target-credentials", NAMESPACE)));
        }
        Ok(self.client.clone())
    }
}

// ============================================================================
// Engine
// ============================================================================

/// One scripted answer to `list_transfer_status`
#[derive(Clone, Debug)]
pub enum PollStep {
    Progress(u8),
    Failed(&'static str),
    Missing,
    ListError,
}

pub struct FakeEngine {
    volume: String,
    script: Mutex<VecDeque<PollStep>>,
    last: Mutex<PollStep>,
    fail_start: AtomicBool,
    pub starts: AtomicUsize,
    pub polls: AtomicUsize,
    pub requests: Mutex<Vec<TransferRequest>>,
}

impl FakeEngine {
    pub fn new(volume: &str) -> Self {
        Self {
            volume: volume.to_string(),
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(PollStep::Progress(100)),
            fail_start: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers for the next polls; the last one repeats once exhausted
    pub fn script(&self, steps: Vec<PollStep>) {
        *self.script.lock().unwrap() = steps.into();
    }

    pub fn fail_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> String {
        self.requests
            .lock()
            .unwrap()
            .last()
            .map(|r| r.snapshot_name.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EngineClient for FakeEngine {
    fn volume_name(&self) -> &str {
        &self.volume
    }

    async fn start_transfer(&self, request: &TransferRequest) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::engine("engine unreachable"));
        }
        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn list_transfer_status(&self, _volume_name: &str) -> Result<Vec<TransferStatus>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let step = {
            let mut script = self.script.lock().unwrap();
            let mut last = self.last.lock().unwrap();
            if let Some(step) = script.pop_front() {
                *last = step;
            }
            last.clone()
        };
        let snapshot = self.snapshot();
        match step {
            PollStep::Progress(progress) => Ok(vec![TransferStatus {
                snapshot_name: snapshot,
                progress,
                error: String::new(),
            }]),
            PollStep::Failed(msg) => Ok(vec![TransferStatus {
                snapshot_name: snapshot,
                progress: 40,
                error: msg.to_string(),
            }]),
            PollStep::Missing => Ok(vec![TransferStatus {
                snapshot_name: "some-other-snapshot".to_string(),
                progress: 100,
                error: String::new(),
            }]),
            PollStep::ListError => Err(Error::engine("engine status unavailable")),
        }
    }
}

pub struct FakeEngineFactory {
    engine: Arc<FakeEngine>,
}

#[async_trait]
impl EngineClientFactory for FakeEngineFactory {
    async fn client_for_volume(&self, volume_name: &str) -> Result<Arc<dyn EngineClient>> {
        if volume_name != self.engine.volume {
            return Err(Error::not_found(format!("engine for volume {}", volume_name)));
        }
        Ok(self.engine.clone())
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(Default)]
pub struct RecordingEvents {
    pub events: Mutex<Vec<(String, EventKind, String)>>,
}

impl RecordingEvents {
    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, reason)| reason.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEvents {
    async fn publish(&self, volume_name: &str, kind: EventKind, reason: &str, _message: &str) {
        self.events
            .lock()
            .unwrap()
            .push((volume_name.to_string(), kind, reason.to_string()));
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn backup_meta(name: &str) -> ObjectMeta {
    let mut labels = BTreeMap::new();
    labels.insert(BACKUP_VOLUME_LABEL.to_string(), VOLUME.to_string());
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        labels: Some(labels),
        finalizers: Some(vec![BACKUP_FINALIZER.to_string()]),
        ..Default::default()
    }
}

/// A Backup requesting a transfer of `snapshot`, not yet touched by any controller
pub fn new_backup(name: &str, snapshot: &str) -> Backup {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), "db".to_string());
    Backup {
        metadata: backup_meta(name),
        spec: BackupSpec {
            snapshot_name: snapshot.to_string(),
            labels,
            sync_requested_at: None,
        },
        status: None,
    }
}

/// A Backup owned by `owner` in the given state
pub fn owned_backup(name: &str, owner: &str, state: BackupState) -> Backup {
    let mut backup = new_backup(name, "snap-1");
    backup.status = Some(BackupStatus {
        owner_id: owner.to_string(),
        state,
        ..Default::default()
    });
    backup
}

pub fn mark_deleted(backup: &mut Backup) {
    backup.metadata.deletion_timestamp = Some(Time(Utc::now()));
}

pub fn backup_volume(name: &str, last_backup: &str) -> BackupVolume {
    BackupVolume {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: BackupVolumeSpec::default(),
        status: Some(BackupVolumeStatus {
            last_backup_name: last_backup.to_string(),
            backing_image_checksum: String::new(),
        }),
    }
}

pub fn default_target() -> BackupTarget {
    BackupTarget {
        metadata: ObjectMeta {
            name: Some(DEFAULT_BACKUP_TARGET_NAME.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: BackupTargetSpec {
            backup_target_url: TARGET_URL.to_string(),
            credential_secret: "target-credentials".to_string(),
            sync_requested_at: None,
        },
    }
}

pub fn remote_info(name: &str) -> BackupInfo {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), "db".to_string());
    BackupInfo {
        url: format!("{}?backup={}&volume={}", TARGET_URL, name, VOLUME),
        snapshot_name: "snap-imported".to_string(),
        snapshot_created: "2024-05-01T09:59:00Z".to_string(),
        created: "2024-05-01T10:00:00Z".to_string(),
        size: "2097152".to_string(),
        labels,
        messages: BTreeMap::new(),
        volume_name: VOLUME.to_string(),
        volume_size: "10737418240".to_string(),
        volume_created: "2024-04-01T00:00:00Z".to_string(),
        volume_backing_image_name: String::new(),
    }
}

/// A controller replica wired to in-memory collaborators
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub target: Arc<FakeTargetClient>,
    pub targets: Arc<FakeTargetFactory>,
    pub engine: Arc<FakeEngine>,
    pub events: Arc<RecordingEvents>,
    pub ctx: Arc<Context>,
}

impl Harness {
    /// Two ready, capable nodes; default target, volume and backup volume present
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::default());
        store.set_setting(SETTING_DEFAULT_ENGINE_IMAGE, ENGINE_IMAGE);
        store.set_node(LOCAL_NODE, true, true);
        store.set_node(OTHER_NODE, true, true);
        store.put_target(default_target());
        store.put_volume(VOLUME, "");
        store.put_backup_volume(backup_volume(VOLUME, ""));

        Self::with_store(store, LOCAL_NODE)
    }

    /// Another replica sharing the same store
    pub fn with_store(store: Arc<MemoryStore>, controller_id: &str) -> Self {
        let target = Arc::new(FakeTargetClient::new(TARGET_URL));
        let targets = Arc::new(FakeTargetFactory {
            client: target.clone(),
            fail: AtomicBool::new(false),
        });
        let engine = Arc::new(FakeEngine::new(VOLUME));
        let engines = Arc::new(FakeEngineFactory {
            engine: engine.clone(),
        });
        let events = Arc::new(RecordingEvents::default());

        let ctx = Context::with_collaborators(
            store.clone(),
            targets.clone(),
            engines,
            events.clone(),
            controller_id,
            NAMESPACE,
        )
        .poll_interval(Duration::from_millis(1))
        .retry_policy(3, Duration::from_millis(1), Duration::from_millis(10));

        Self {
            store,
            target,
            targets,
            engine,
            events,
            ctx: Arc::new(ctx),
        }
    }

    pub fn context(&self) -> Arc<Context> {
        self.ctx.clone()
    }

    /// Run one reconcile of the named Backup on this replica
    pub async fn reconcile(&self, name: &str) -> Result<Action> {
        backup_reconciler::reconcile(name, &self.ctx).await
    }

    /// Poll the store until the Backup reaches `state`
    pub async fn wait_for_state(&self, name: &str, state: BackupState) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if self.store.backup_state(name) == Some(state) {
                return;
            }
            if tokio::time::Instant::now() > deadline {
                panic!(
                    "backup {} never reached {:?}, last seen {:?}",
                    name,
                    state,
                    self.store.backup_state(name)
                );
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    /// Wait until no transfer monitor of this harness is polling anymore
    pub async fn settle(&self) {
        let mut last = self.engine.poll_count();
        loop {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let now = self.engine.poll_count();
            if now == last {
                return;
            }
            last = now;
        }
    }
}
