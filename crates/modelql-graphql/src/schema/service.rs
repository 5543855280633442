//! Schema service: named schemas, rebuild coordination and publishing.
//!
//! Each registered schema owns a slot with its own compilation caches, a
//! build mutex and an atomically swapped pointer to the last READY
//! artifact. Readers load that pointer without ever waiting on a build.
//!
//! Rebuild triggers (explicit invalidation or structural-change events)
//! bump the slot's `requested` generation. A rebuild records the
//! generation it observed before taking the build lock; once the lock is
//! held, a rebuild whose generation is already covered by `built` returns
//! the published artifact instead of building again. Concurrent triggers
//! therefore coalesce into one build and one version increment.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_graphql::dynamic::Schema;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use modelql_core::{ChangeBroadcaster, ModelGraph, ModelRegistry, StructuralChange, StructuralChangeKind};
use serde_json::json;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::artifact::{ArtifactRuntime, SchemaArtifact};
use super::assembler::{SchemaAssembler, contribution_key};
use super::contribution::Contribution;
use crate::config::CompilerConfig;
use crate::error::SchemaError;
use crate::filters::FilterCompiler;
use crate::ledger::{FileLedgerStore, LedgerError, VersionLedger, VersionRecord};
use crate::reader::{CompileContext, ModelGraphReader};
use crate::resolvers::DynamicSchemaRenderer;
use crate::types::TypeCompiler;

/// Build state of one named schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaState {
    /// Never built.
    Empty,
    /// A build is running. The previous artifact, if any, is still served.
    Building,
    /// An artifact is published.
    Ready,
}

impl SchemaState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Building,
            2 => Self::Ready,
            _ => Self::Empty,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Empty => 0,
            Self::Building => 1,
            Self::Ready => 2,
        }
    }
}

/// Options of one registered schema.
#[derive(Debug, Clone, Default)]
pub struct SchemaOptions {
    /// Entities to expose, closed over their relationships. All when `None`.
    pub entities: Option<Vec<String>>,
    pub contributions: Vec<Contribution>,
    /// Ledger to record builds in. Derived from the configuration when
    /// unset.
    pub ledger: Option<Arc<VersionLedger>>,
    /// Overrides the service configuration for this schema.
    pub config: Option<CompilerConfig>,
}

impl SchemaOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entities<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entities = Some(entities.into_iter().map(Into::into).collect());
        self
    }

    pub fn contribution(mut self, contribution: Contribution) -> Self {
        self.contributions.push(contribution);
        self
    }

    pub fn ledger(mut self, ledger: Arc<VersionLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn config(mut self, config: CompilerConfig) -> Self {
        self.config = Some(config);
        self
    }
}

/// Rendered executable schema and the artifact it was rendered from.
struct RenderedSchema {
    artifact: Arc<SchemaArtifact>,
    schema: Schema,
}

/// Compilation caches of one schema.
///
/// Builds compile into a private copy; see [`SchemaSlot::merge_caches`].
#[derive(Debug, Clone, Default)]
struct BuildCaches {
    reader: ModelGraphReader,
    types: TypeCompiler,
    filters: FilterCompiler,
}

#[derive(Debug, Default)]
struct SlotCaches {
    caches: BuildCaches,
    /// Bumped by every eviction.
    generation: u64,
}

struct SchemaSlot {
    name: String,
    entities: Option<Vec<String>>,
    contributions: Vec<Contribution>,
    config: CompilerConfig,
    ledger: Arc<VersionLedger>,

    caches: Mutex<SlotCaches>,

    current: ArcSwapOption<SchemaArtifact>,
    rendered: ArcSwapOption<RenderedSchema>,
    build_lock: tokio::sync::Mutex<()>,
    state: AtomicU8,
    /// Generation of the latest rebuild trigger.
    requested: AtomicU64,
    /// Generation the published artifact covers.
    built: AtomicU64,
    /// Last version number handed out.
    version: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl SchemaSlot {
    fn state(&self) -> SchemaState {
        SchemaState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: SchemaState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn is_stale(&self) -> bool {
        self.built.load(Ordering::SeqCst) < self.requested.load(Ordering::SeqCst)
    }

    fn mark_stale(&self) {
        self.requested.fetch_add(1, Ordering::SeqCst);
    }

    fn set_last_error(&self, message: Option<String>) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = message;
        }
    }

    fn assembler<'a>(&'a self, caches: &'a BuildCaches, graph: &'a ModelGraph) -> SchemaAssembler<'a> {
        let ctx = CompileContext::new(graph, &caches.reader, &self.config);
        SchemaAssembler::new(ctx, &caches.types, &caches.filters)
            .contributions(&self.contributions)
            .entities(self.entities.as_deref())
    }

    fn lock_caches(&self) -> Result<MutexGuard<'_, SlotCaches>, SchemaError> {
        self.caches
            .lock()
            .map_err(|_| SchemaError::internal("schema cache lock poisoned"))
    }

    /// Private copy of the caches for one build, with the eviction
    /// generation it was taken at.
    fn snapshot_caches(&self) -> Result<(BuildCaches, u64), SchemaError> {
        let guard = self.lock_caches()?;
        Ok((guard.caches.clone(), guard.generation))
    }

    /// Installs the caches of a finished build. They are dropped when an
    /// eviction ran since the snapshot or the registry moved past `graph`.
    fn merge_caches(
        &self,
        caches: BuildCaches,
        generation: u64,
        graph: &Arc<ModelGraph>,
        registry: &ModelRegistry,
    ) -> bool {
        let Ok(mut guard) = self.lock_caches() else {
            return false;
        };
        if guard.generation != generation || !Arc::ptr_eq(graph, &registry.graph()) {
            debug!(schema = %self.name, "Discarded caches of an outdated build");
            return false;
        }
        guard.caches = caches;
        true
    }

    fn clear_caches(&self) {
        if let Ok(mut guard) = self.lock_caches() {
            guard.caches = BuildCaches::default();
            guard.generation += 1;
        }
    }

    /// Evicts cache entries depending on `entity`. Returns the eviction count.
    fn evict(&self, entity: &str) -> usize {
        let Ok(mut guard) = self.lock_caches() else {
            return 0;
        };
        let caches = &guard.caches;
        let evicted = caches.reader.invalidate(entity)
            + caches.types.invalidate(entity)
            + caches.filters.invalidate(entity);
        guard.generation += 1;
        evicted
    }

    fn covers(&self, entity: &str) -> bool {
        self.current
            .load()
            .as_ref()
            .is_some_and(|a| a.entities.iter().any(|e| e == entity))
    }
}

/// Owns every named schema.
pub struct SchemaService {
    registry: Arc<ModelRegistry>,
    config: CompilerConfig,
    slots: DashMap<String, Arc<SchemaSlot>>,
}

impl SchemaService {
    pub fn new(registry: Arc<ModelRegistry>, config: CompilerConfig) -> Self {
        Self {
            registry,
            config,
            slots: DashMap::new(),
        }
    }

    pub fn new_shared(registry: Arc<ModelRegistry>, config: CompilerConfig) -> Arc<Self> {
        Arc::new(Self::new(registry, config))
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Registers a schema. Nothing is built until first requested.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::DuplicateSchema` if the name is taken,
    /// `SchemaError::Validation` for an invalid configuration, or the
    /// ledger's load error.
    pub fn register(&self, name: &str, options: SchemaOptions) -> Result<(), SchemaError> {
        if self.slots.contains_key(name) {
            return Err(SchemaError::DuplicateSchema(name.to_string()));
        }
        let config = options.config.unwrap_or_else(|| self.config.clone());
        config.validate().map_err(SchemaError::Validation)?;

        let ledger = match options.ledger {
            Some(ledger) => ledger,
            None => Arc::new(open_ledger(name, &config)?),
        };
        let version = ledger.latest_build_number()?;

        let slot = SchemaSlot {
            name: name.to_string(),
            entities: options.entities,
            contributions: options.contributions,
            config,
            ledger,
            caches: Mutex::new(SlotCaches::default()),
            current: ArcSwapOption::empty(),
            rendered: ArcSwapOption::empty(),
            build_lock: tokio::sync::Mutex::new(()),
            state: AtomicU8::new(SchemaState::Empty.as_u8()),
            requested: AtomicU64::new(1),
            built: AtomicU64::new(0),
            version: AtomicU64::new(version),
            last_error: Mutex::new(None),
        };

        match self.slots.entry(name.to_string()) {
            Entry::Occupied(_) => Err(SchemaError::DuplicateSchema(name.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(slot));
                info!(schema = %name, version, "Schema registered");
                Ok(())
            }
        }
    }

    fn slot(&self, name: &str) -> Result<Arc<SchemaSlot>, SchemaError> {
        self.slots
            .get(name)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| SchemaError::UnknownSchema(name.to_string()))
    }

    /// Registered schema names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slots.iter().map(|s| s.key().clone()).collect();
        names.sort();
        names
    }

    /// Last published artifact. Never waits on a running build.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::UnknownSchema`, or `SchemaError::SchemaInitializing`
    /// if nothing has been published yet.
    pub fn get(&self, name: &str) -> Result<Arc<SchemaArtifact>, SchemaError> {
        self.slot(name)?
            .current
            .load_full()
            .ok_or_else(|| SchemaError::SchemaInitializing(name.to_string()))
    }

    /// Published artifact, building the schema first if it was never built.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::UnknownSchema` or the build error.
    pub async fn get_or_build(&self, name: &str) -> Result<Arc<SchemaArtifact>, SchemaError> {
        let slot = self.slot(name)?;
        if let Some(current) = slot.current.load_full() {
            return Ok(current);
        }
        self.rebuild(name).await
    }

    /// Executable schema for the published artifact, rendered once per
    /// artifact.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Self::get_or_build`] or a rendering error.
    pub async fn executable(&self, name: &str) -> Result<Schema, SchemaError> {
        let artifact = self.get_or_build(name).await?;
        let slot = self.slot(name)?;
        let cached = slot
            .rendered
            .load_full()
            .filter(|r| Arc::ptr_eq(&r.artifact, &artifact));
        if let Some(rendered) = cached {
            return Ok(rendered.schema.clone());
        }
        let schema = DynamicSchemaRenderer::render(Arc::clone(&artifact))?;
        slot.rendered.store(Some(Arc::new(RenderedSchema {
            artifact,
            schema: schema.clone(),
        })));
        Ok(schema)
    }

    pub fn state(&self, name: &str) -> Result<SchemaState, SchemaError> {
        Ok(self.slot(name)?.state())
    }

    /// Whether a rebuild trigger arrived after the published artifact.
    pub fn is_stale(&self, name: &str) -> Result<bool, SchemaError> {
        Ok(self.slot(name)?.is_stale())
    }

    /// Last version number handed out for `name`.
    pub fn version(&self, name: &str) -> Result<u64, SchemaError> {
        Ok(self.slot(name)?.version.load(Ordering::SeqCst))
    }

    pub fn ledger(&self, name: &str) -> Result<Arc<VersionLedger>, SchemaError> {
        Ok(Arc::clone(&self.slot(name)?.ledger))
    }

    /// Message of the last failed build, cleared by a successful one.
    pub fn last_error(&self, name: &str) -> Result<Option<String>, SchemaError> {
        let slot = self.slot(name)?;
        let message = slot.last_error.lock().ok().and_then(|g| g.clone());
        Ok(message)
    }

    /// Marks `name` stale so the next rebuild runs.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::UnknownSchema`.
    pub fn invalidate(&self, name: &str) -> Result<(), SchemaError> {
        self.slot(name)?.mark_stale();
        debug!(schema = %name, "Schema invalidated");
        Ok(())
    }

    /// Evicts cached compilation results depending on `entity` and marks
    /// every affected schema stale. Returns the affected schema names.
    pub fn invalidate_entity(&self, entity: &str) -> Vec<String> {
        let mut affected = Vec::new();
        for slot in self.slots.iter() {
            let evicted = slot.evict(entity);
            if evicted > 0 || slot.covers(entity) {
                slot.mark_stale();
                affected.push(slot.name.clone());
            }
            debug!(schema = %slot.name, entity = %entity, evicted, "Evicted dependent cache entries");
        }
        affected.sort();
        affected
    }

    fn invalidate_all(&self) -> Vec<String> {
        let mut affected = Vec::new();
        for slot in self.slots.iter() {
            slot.clear_caches();
            slot.mark_stale();
            affected.push(slot.name.clone());
        }
        affected.sort();
        affected
    }

    /// Applies one structural-change event. Returns the schemas marked
    /// stale.
    ///
    /// Added and removed entities change discovery, so every schema is
    /// reset; other changes evict only dependent cache entries.
    pub fn handle_change(&self, change: &StructuralChange) -> Vec<String> {
        debug!(entity = %change.entity, kind = %change.kind, "Structural change received");
        match change.kind {
            StructuralChangeKind::EntityAdded | StructuralChangeKind::EntityRemoved => {
                self.invalidate_all()
            }
            StructuralChangeKind::FieldsChanged
            | StructuralChangeKind::RelationshipsChanged
            | StructuralChangeKind::DefinitionChanged => self.invalidate_entity(&change.entity),
        }
    }

    /// Brings `name` up to date with every trigger recorded before the
    /// call, using the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns the build error; the previously published artifact stays
    /// in effect.
    pub async fn rebuild(&self, name: &str) -> Result<Arc<SchemaArtifact>, SchemaError> {
        let slot = self.slot(name)?;
        let timeout = slot.config.rebuild_timeout_ms.map(Duration::from_millis);
        self.rebuild_slot(slot, timeout).await
    }

    /// Like [`Self::rebuild`] with a caller-supplied timeout.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::RebuildTimeout` if the build does not finish
    /// in time; the previously published artifact stays in effect.
    pub async fn rebuild_with_timeout(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Arc<SchemaArtifact>, SchemaError> {
        let slot = self.slot(name)?;
        self.rebuild_slot(slot, Some(timeout)).await
    }

    async fn rebuild_slot(
        &self,
        slot: Arc<SchemaSlot>,
        timeout: Option<Duration>,
    ) -> Result<Arc<SchemaArtifact>, SchemaError> {
        let ticket = slot.requested.load(Ordering::SeqCst);
        let _guard = slot.build_lock.lock().await;

        let covered = slot.built.load(Ordering::SeqCst) >= ticket;
        if let Some(current) = slot.current.load_full().filter(|_| covered) {
            debug!(schema = %slot.name, version = current.version, "Rebuild coalesced");
            return Ok(current);
        }

        let target = slot.requested.load(Ordering::SeqCst);
        let version = slot.version.load(Ordering::SeqCst) + 1;
        slot.set_state(SchemaState::Building);
        info!(schema = %slot.name, version, "Building schema");

        let graph = self.registry.graph();
        let (caches, generation) = match slot.snapshot_caches() {
            Ok(snapshot) => snapshot,
            Err(err) => return Err(self.fail(&slot, err)),
        };
        let build_slot = Arc::clone(&slot);
        let build_graph = Arc::clone(&graph);
        let task = tokio::task::spawn_blocking(move || {
            let artifact = build_slot
                .assembler(&caches, &build_graph)
                .assemble(&build_slot.name, version);
            (artifact, caches)
        });
        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    let ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                    return Err(self.fail(&slot, SchemaError::RebuildTimeout(ms)));
                }
            },
            None => task.await,
        };
        let artifact = match joined {
            Ok((Ok(artifact), caches)) => {
                slot.merge_caches(caches, generation, &graph, &self.registry);
                artifact
            }
            Ok((Err(err), _)) => return Err(self.fail(&slot, err)),
            Err(join) => {
                return Err(self.fail(&slot, SchemaError::internal(format!("schema build task failed: {join}"))));
            }
        };

        if let Err(err) = record_version(&slot, &artifact) {
            return Err(self.fail(&slot, err));
        }

        let artifact = Arc::new(artifact);
        slot.version.store(version, Ordering::SeqCst);
        slot.current.store(Some(Arc::clone(&artifact)));
        slot.built.store(target, Ordering::SeqCst);
        slot.set_state(SchemaState::Ready);
        slot.set_last_error(None);
        info!(
            schema = %slot.name,
            version,
            hash = %artifact.hash,
            types = artifact.types.len(),
            "Schema published"
        );
        Ok(artifact)
    }

    /// Restores the state after a failed build and returns the error.
    fn fail(&self, slot: &SchemaSlot, err: SchemaError) -> SchemaError {
        let state = if slot.current.load().is_some() {
            SchemaState::Ready
        } else {
            SchemaState::Empty
        };
        slot.set_state(state);
        slot.set_last_error(Some(err.to_string()));
        warn!(schema = %slot.name, error = %err, "Schema build failed");
        err
    }

    /// Spawns a task applying structural changes from `broadcaster`.
    ///
    /// Each wake-up drains every pending event, then rebuilds the stale
    /// schemas that had already been built once. A lagging receiver
    /// resets every schema. The task ends when the channel closes.
    pub fn subscribe(self: &Arc<Self>, broadcaster: &ChangeBroadcaster) -> JoinHandle<()> {
        let mut rx = broadcaster.subscribe();
        let service = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => {
                        service.handle_change(&change);
                        loop {
                            match rx.try_recv() {
                                Ok(change) => {
                                    service.handle_change(&change);
                                }
                                Err(TryRecvError::Lagged(skipped)) => {
                                    warn!(skipped, "Structural change receiver lagged");
                                    service.invalidate_all();
                                }
                                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                            }
                        }
                        service.rebuild_stale().await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Structural change receiver lagged");
                        service.invalidate_all();
                        service.rebuild_stale().await;
                    }
                    Err(RecvError::Closed) => {
                        debug!("Structural change channel closed");
                        break;
                    }
                }
            }
        })
    }

    /// Rebuilds every stale schema that has a published artifact.
    /// Returns the names rebuilt successfully.
    pub async fn rebuild_stale(&self) -> Vec<String> {
        let stale: Vec<Arc<SchemaSlot>> = self
            .slots
            .iter()
            .filter(|s| s.is_stale() && s.current.load().is_some())
            .map(|s| Arc::clone(s.value()))
            .collect();
        let mut rebuilt = Vec::new();
        for slot in stale {
            let name = slot.name.clone();
            let timeout = slot.config.rebuild_timeout_ms.map(Duration::from_millis);
            if self.rebuild_slot(slot, timeout).await.is_ok() {
                rebuilt.push(name);
            }
        }
        rebuilt
    }

    /// Republishes the artifact persisted with `version` and makes it the
    /// active ledger record.
    ///
    /// Execution plans are rebuilt from the current model graph; the
    /// restored artifact keeps its original version number.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::Ledger` for unknown versions or records
    /// without an artifact, or the plan compilation error. Nothing changes
    /// on error.
    pub async fn rollback(&self, name: &str, version: &str) -> Result<Arc<SchemaArtifact>, SchemaError> {
        let slot = self.slot(name)?;
        let _guard = slot.build_lock.lock().await;

        let record = slot
            .ledger
            .get(version)?
            .ok_or_else(|| LedgerError::NotFound(version.to_string()))?;
        let snapshot = record
            .artifact
            .as_ref()
            .ok_or_else(|| LedgerError::NoArtifact(version.to_string()))?;
        let restored = SchemaArtifact::from_persisted(snapshot)?;

        let graph = self.registry.graph();
        let (caches, generation) = slot.snapshot_caches()?;
        let entities = slot.assembler(&caches, &graph).entity_plans(&restored.entities)?;
        slot.merge_caches(caches, generation, &graph, &self.registry);
        let contributions: HashMap<_, _> = slot
            .contributions
            .iter()
            .map(|c| (contribution_key(c.root, c.name()), Arc::clone(&c.resolver)))
            .collect();
        let runtime = ArtifactRuntime {
            entities,
            contributions,
            config: slot.config.clone(),
        };

        slot.ledger.rollback(version)?;
        let artifact = Arc::new(restored.with_runtime(Arc::new(runtime)));
        slot.current.store(Some(Arc::clone(&artifact)));
        slot.built.store(slot.requested.load(Ordering::SeqCst), Ordering::SeqCst);
        slot.set_state(SchemaState::Ready);
        info!(schema = %name, version = %version, hash = %artifact.hash, "Schema rolled back");
        Ok(artifact)
    }
}

impl fmt::Debug for SchemaService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaService")
            .field("schemas", &self.names())
            .finish_non_exhaustive()
    }
}

/// Ledger of a schema without an explicit one: a JSON file next to the
/// configured ledger path, or memory.
fn open_ledger(name: &str, config: &CompilerConfig) -> Result<VersionLedger, SchemaError> {
    let Some(path) = &config.ledger_path else {
        return Ok(VersionLedger::in_memory());
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "ledger.json".to_string());
    let store = FileLedgerStore::new(path.with_file_name(format!("{name}.{file_name}")));
    Ok(VersionLedger::open(Arc::new(store))?)
}

fn record_version(slot: &SchemaSlot, artifact: &SchemaArtifact) -> Result<(), SchemaError> {
    let mut record = VersionRecord::new(format!("v{}", artifact.version), &artifact.hash)
        .description(format!("Build {} of schema {}", artifact.version, slot.name))
        .created_by("schema-service")
        .metadata("entities", json!(artifact.entities))
        .metadata("types", json!(artifact.types.len()))
        .with_artifact(artifact.persisted()?);
    record.is_active = true;
    slot.ledger.create(record)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use modelql_core::{AttributeDef, EntityDef};

    use super::*;
    use crate::test_support::{invoice_entities, invoice_graph};

    fn service() -> SchemaService {
        let registry = Arc::new(ModelRegistry::new(invoice_graph()));
        let service = SchemaService::new(registry, CompilerConfig::default());
        service.register("main", SchemaOptions::new()).unwrap();
        service
    }

    #[tokio::test]
    async fn test_register_and_first_build() {
        let service = service();
        assert_eq!(service.state("main").unwrap(), SchemaState::Empty);
        assert!(matches!(
            service.get("main").unwrap_err(),
            SchemaError::SchemaInitializing(_)
        ));
        assert!(matches!(
            service.register("main", SchemaOptions::new()).unwrap_err(),
            SchemaError::DuplicateSchema(_)
        ));
        assert!(matches!(
            service.get("other").unwrap_err(),
            SchemaError::UnknownSchema(_)
        ));

        let artifact = service.get_or_build("main").await.unwrap();
        assert_eq!(artifact.version, 1);
        assert_eq!(service.state("main").unwrap(), SchemaState::Ready);
        assert!(Arc::ptr_eq(&artifact, &service.get("main").unwrap()));

        let active = service.ledger("main").unwrap().active().unwrap().unwrap();
        assert_eq!(active.version, "v1");
        assert_eq!(active.schema_hash, artifact.hash);
        assert!(active.artifact.is_some());
    }

    #[tokio::test]
    async fn test_rebuild_without_trigger_is_coalesced() {
        let service = service();
        let first = service.rebuild("main").await.unwrap();
        let second = service.rebuild("main").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(service.version("main").unwrap(), 1);

        service.invalidate("main").unwrap();
        assert!(service.is_stale("main").unwrap());
        let third = service.rebuild("main").await.unwrap();
        assert_eq!(third.version, 2);
        assert_eq!(third.hash, first.hash);
        assert!(!service.is_stale("main").unwrap());
    }

    #[tokio::test]
    async fn test_invalidate_entity_marks_dependants() {
        let registry = Arc::new(ModelRegistry::new(invoice_graph()));
        let service = SchemaService::new(registry, CompilerConfig::default());
        service
            .register("countries", SchemaOptions::new().entities(["Country"]))
            .unwrap();
        service.register("main", SchemaOptions::new()).unwrap();
        service.rebuild("countries").await.unwrap();
        service.rebuild("main").await.unwrap();

        let affected = service.invalidate_entity("LineItem");
        assert_eq!(affected, vec!["countries", "main"]);
        assert!(service.invalidate_entity("Nothing").is_empty());
    }

    #[tokio::test]
    async fn test_failed_build_keeps_previous_artifact() {
        let mut entities = invoice_entities();
        entities.push(EntityDef::new("Note").attribute(AttributeDef::new("body", "text")));
        let registry = Arc::new(ModelRegistry::new(ModelGraph::new(entities).unwrap()));
        let service = SchemaService::new(Arc::clone(&registry), CompilerConfig::default());
        service
            .register("notes", SchemaOptions::new().entities(["Note"]))
            .unwrap();
        let before = service.rebuild("notes").await.unwrap();
        assert_eq!(before.entities, vec!["Note"]);

        registry.remove_entity("Note").unwrap();
        let affected =
            service.handle_change(&StructuralChange::new("Note", StructuralChangeKind::EntityRemoved));
        assert_eq!(affected, vec!["notes"]);

        let err = service.rebuild("notes").await.unwrap_err();
        assert!(matches!(err, SchemaError::UnknownEntity(ref e) if e == "Note"));
        assert!(Arc::ptr_eq(&before, &service.get("notes").unwrap()));
        assert_eq!(service.state("notes").unwrap(), SchemaState::Ready);
        assert!(service.last_error("notes").unwrap().is_some());
        assert_eq!(service.version("notes").unwrap(), 1);
        assert_eq!(service.ledger("notes").unwrap().list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_outdated_build_does_not_repopulate_caches() {
        let registry = Arc::new(ModelRegistry::new(invoice_graph()));
        let service = SchemaService::new(Arc::clone(&registry), CompilerConfig::default());
        service.register("main", SchemaOptions::new()).unwrap();
        service.rebuild("main").await.unwrap();

        // A build starts against the current graph...
        let slot = service.slot("main").unwrap();
        let old_graph = registry.graph();
        let (caches, generation) = slot.snapshot_caches().unwrap();

        // ...the model changes while it runs...
        let country = EntityDef::new("Country")
            .plural("countries")
            .attribute(AttributeDef::new("name", "text"))
            .attribute(AttributeDef::new("code", "char"))
            .attribute(AttributeDef::new("iso3", "char").nullable());
        let kind = registry.upsert_entity(country).unwrap().unwrap();
        assert_eq!(service.handle_change(&StructuralChange::new("Country", kind)), vec!["main"]);

        // ...and it finishes afterwards with entries for the old Country.
        let stale = slot.assembler(&caches, &old_graph).assemble("main", 99).unwrap();
        assert!(stale.type_def("Country").unwrap().get_field("iso3").is_none());
        assert!(!slot.merge_caches(caches, generation, &old_graph, &registry));

        let artifact = service.rebuild("main").await.unwrap();
        assert_eq!(artifact.version, 2);
        assert!(artifact.type_def("Country").unwrap().get_field("iso3").is_some());
    }

    #[tokio::test]
    async fn test_current_build_keeps_its_caches() {
        let service = service();
        service.rebuild("main").await.unwrap();
        let slot = service.slot("main").unwrap();
        let graph = service.registry().graph();
        let (caches, generation) = slot.snapshot_caches().unwrap();
        assert!(slot.merge_caches(caches.clone(), generation, &graph, service.registry()));

        // An eviction between snapshot and merge invalidates the snapshot.
        let (_, generation) = slot.snapshot_caches().unwrap();
        service.invalidate_entity("Country");
        assert!(!slot.merge_caches(caches, generation, &graph, service.registry()));
    }

    #[tokio::test]
    async fn test_rollback_restores_artifact() {
        let service = service();
        let first = service.rebuild("main").await.unwrap();
        service.invalidate("main").unwrap();
        let second = service.rebuild("main").await.unwrap();
        assert_eq!(second.version, 2);

        let restored = service.rollback("main", "v1").await.unwrap();
        assert_eq!(restored.version, 1);
        assert_eq!(restored.hash, first.hash);
        assert!(restored.is_executable());
        let ledger = service.ledger("main").unwrap();
        assert_eq!(ledger.active().unwrap().unwrap().version, "v1");

        let err = service.rollback("main", "v9").await.unwrap_err();
        assert!(matches!(err, SchemaError::Ledger(LedgerError::NotFound(_))));
        assert_eq!(ledger.active().unwrap().unwrap().version, "v1");
    }

    #[tokio::test]
    async fn test_file_ledger_per_schema() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CompilerConfig::default();
        config.ledger_path = Some(dir.path().join("ledger.json"));

        let registry = Arc::new(ModelRegistry::new(invoice_graph()));
        let service = SchemaService::new(Arc::clone(&registry), config.clone());
        service.register("main", SchemaOptions::new()).unwrap();
        service.rebuild("main").await.unwrap();
        assert!(dir.path().join("main.ledger.json").exists());

        // A new service continues numbering from the persisted ledger.
        let service = SchemaService::new(registry, config);
        service.register("main", SchemaOptions::new()).unwrap();
        assert_eq!(service.version("main").unwrap(), 1);
        assert_eq!(service.rebuild("main").await.unwrap().version, 2);
    }
}
