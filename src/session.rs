use serde::Serialize;
use tracing::{debug, info, warn};

use crate::autosave::{AutosaveScheduler, Clock, EngineConfig, StatusTimer, SystemClock};
use crate::document::{
    Breadcrumb, Document, DocumentId, EdgeStyle, Graph, NodeId, NodeKind, Point, SaveStatus, Size,
    SubmapOrigin,
};
use crate::error::{EditError, SessionError};
use crate::graph::{Effect, GraphStore, NodePatch};
use crate::layout::{LayoutEngine, ViewState};
use crate::local_state::LocalState;
use crate::persistence::{Backend, ContentRow, DocumentSummary, StructuralPayload, content_rows};
use crate::submap::{self, Partition};

/// What a renderer or API client needs to draw the current document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub document_id: Option<DocumentId>,
    pub name: String,
    pub dirty: bool,
    pub save_status: SaveStatus,
    pub breadcrumbs: Vec<Breadcrumb>,
    pub selection: Option<NodeId>,
    pub can_undo: bool,
    pub can_redo: bool,
    #[serde(flatten)]
    pub view: ViewState,
}

/// One user's editing session: the live document plus everything that
/// persists it.
///
/// Edits are synchronous. Backend work happens in the `async` methods, which
/// hold `&mut self` for their whole duration, so a save always sees the latest
/// edit and no edit can slip in while a save is in flight.
pub struct Session<B, C = SystemClock> {
    store: GraphStore,
    backend: B,
    clock: C,
    config: EngineConfig,
    autosave: AutosaveScheduler,
    status_timer: StatusTimer,
    breadcrumbs: Vec<Breadcrumb>,
    pending_deletes: Vec<NodeId>,
    local_state: Option<LocalState>,
}

impl<B: Backend> Session<B, SystemClock> {
    pub fn new(backend: B, config: EngineConfig) -> Self {
        Self::with_clock(backend, SystemClock, config)
    }
}

impl<B: Backend, C: Clock> Session<B, C> {
    pub fn with_clock(backend: B, clock: C, config: EngineConfig) -> Self {
        Self {
            store: GraphStore::new(config.history_capacity),
            backend,
            clock,
            autosave: AutosaveScheduler::new(config.autosave_delay),
            status_timer: StatusTimer::default(),
            config,
            breadcrumbs: Vec::new(),
            pending_deletes: Vec::new(),
            local_state: None,
        }
    }

    pub fn with_local_state(mut self, local_state: LocalState) -> Self {
        self.local_state = Some(local_state);
        self
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn document(&self) -> &Document {
        self.store.document()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn breadcrumbs(&self) -> &[Breadcrumb] {
        &self.breadcrumbs
    }

    pub fn autosave_pending(&self) -> bool {
        self.autosave.is_pending()
    }

    pub fn view(&self) -> ViewState {
        LayoutEngine::compute(self.store.graph(), self.store.index())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let document = self.store.document();
        SessionSnapshot {
            document_id: document.id.clone(),
            name: document.name.clone(),
            dirty: document.dirty,
            save_status: document.save_status,
            breadcrumbs: self.breadcrumbs.clone(),
            selection: self.store.selection().cloned(),
            can_undo: self.store.history().can_undo(),
            can_redo: self.store.history().can_redo(),
            view: self.view(),
        }
    }

    // Synchronous edits

    pub fn add_child(&mut self, parent: &NodeId, kind: NodeKind) -> Result<NodeId, SessionError> {
        self.edit(|store| store.add_child(parent, kind))
    }

    pub fn update_node(&mut self, id: &NodeId, patch: NodePatch) -> Result<(), SessionError> {
        self.edit(|store| store.update_node(id, patch))
    }

    /// Marks the start of a multi-step edit (typing into a field) as one undo step.
    pub fn begin_edit(&mut self) {
        self.store.push_history();
    }

    pub fn rename_node(&mut self, id: &NodeId, title: &str) -> Result<bool, SessionError> {
        self.edit(|store| store.rename_node(id, title))
    }

    pub fn rename_document(&mut self, name: &str) {
        self.store.rename_document(name);
        self.drain_effects();
    }

    pub fn set_descendants_collapsed(
        &mut self,
        id: &NodeId,
        collapse: bool,
    ) -> Result<usize, SessionError> {
        self.edit(|store| store.set_descendants_collapsed(id, collapse))
    }

    pub fn reparent_node(&mut self, id: &NodeId, new_parent: &NodeId) -> Result<(), SessionError> {
        self.edit(|store| store.reparent_node(id, new_parent))
    }

    pub fn connect(&mut self, source: &NodeId, target: &NodeId) -> Result<String, SessionError> {
        self.edit(|store| store.connect(source, target))
    }

    pub fn set_edge_type(&mut self, target: &NodeId, style: EdgeStyle) -> Result<(), SessionError> {
        self.edit(|store| store.set_edge_type(target, style))
    }

    pub fn convert_kind(&mut self, id: &NodeId, kind: NodeKind) -> Result<bool, SessionError> {
        self.edit(|store| store.convert_kind(id, kind))
    }

    pub fn report_size(&mut self, id: &NodeId, size: Size) -> Result<(), SessionError> {
        self.edit(|store| store.set_measured_size(id, size))
    }

    pub fn select(&mut self, id: Option<NodeId>) {
        self.store.select(id);
    }

    pub fn drag_start(&mut self, id: &NodeId) -> Result<(), SessionError> {
        self.edit(|store| store.drag_start(id))
    }

    pub fn drag_move(&mut self, id: &NodeId, position: Point) -> Result<(), SessionError> {
        self.edit(|store| store.drag_move(id, position))
    }

    pub fn drag_end(&mut self, id: &NodeId) -> Result<Option<NodeId>, SessionError> {
        self.edit(|store| store.drag_end(id))
    }

    pub fn undo(&mut self) -> bool {
        let undone = self.store.undo();
        self.drain_effects();
        undone
    }

    pub fn redo(&mut self) -> bool {
        let redone = self.store.redo();
        self.drain_effects();
        redone
    }

    /// Deletes the node's subtree and drops the orphaned content rows right away.
    pub async fn delete_node(&mut self, id: &NodeId) -> Result<Vec<NodeId>, SessionError> {
        let removed = self.edit(|store| store.delete_node(id))?;
        self.flush_content_deletes().await;
        Ok(removed)
    }

    // Persistence

    /// Drives timers: fires a due autosave and reverts a stale save status.
    /// Returns true when an autosave ran.
    pub async fn tick(&mut self) -> bool {
        self.flush_content_deletes().await;

        let now = self.clock.now();
        if self.status_timer.take_due(now)
            && matches!(
                self.store.document().save_status,
                SaveStatus::Saved | SaveStatus::Error
            )
        {
            self.store.set_save_status(SaveStatus::Idle);
        }

        if !self.autosave.take_due(now) {
            return false;
        }
        let document = self.store.document();
        if !document.dirty || document.id.is_none() {
            return false;
        }
        if let Err(err) = self.save(None).await {
            warn!("Autosave failed: {err}");
        }
        true
    }

    /// Writes the document now, cancelling any pending autosave.
    pub async fn save(&mut self, name_override: Option<&str>) -> Result<DocumentId, SessionError> {
        if let Some(name) = name_override.map(str::trim).filter(|name| !name.is_empty()) {
            self.store.rename_document(name);
            self.drain_effects();
        }
        self.autosave.cancel();
        self.status_timer.disarm();
        self.store.set_save_status(SaveStatus::Saving);

        let document = self.store.document();
        let id = document.id.clone();
        let name = document.name.clone();
        let origin = document.origin.clone();
        let graph = document.graph.clone();

        match self.persist(id.as_ref(), &name, &graph, origin).await {
            Ok(saved) => {
                let created = id.is_none();
                self.store.set_document_id(saved.clone());
                self.store.mark_clean();
                self.show_status(SaveStatus::Saved);
                if created && self.breadcrumbs.is_empty() {
                    self.remember(&saved);
                }
                info!(document = %saved, name = %name, "Saved document");
                Ok(saved)
            }
            Err(err) => {
                self.show_status(SaveStatus::Error);
                warn!(document = ?id, "Save failed: {err:#}");
                Err(SessionError::Backend(err))
            }
        }
    }

    pub async fn list_documents(&self) -> Result<Vec<DocumentSummary>, SessionError> {
        self.backend
            .list_documents()
            .await
            .map_err(SessionError::Backend)
    }

    /// Switches to a stored top-level document.
    pub async fn open_document(&mut self, id: &DocumentId) -> Result<(), SessionError> {
        self.flush_autosave().await?;
        self.load(id, Vec::new()).await
    }

    /// Starts a fresh, unsaved document with just a root.
    pub async fn new_document(&mut self) -> Result<(), SessionError> {
        self.flush_autosave().await?;
        self.flush_content_deletes().await;
        self.store.replace_document(Document::new());
        self.reset_timers();
        self.breadcrumbs.clear();
        info!("Started a new document");
        Ok(())
    }

    /// Deletes a stored document. Deleting the open one leaves a fresh document in its place.
    pub async fn delete_document(&mut self, id: &DocumentId) -> Result<(), SessionError> {
        self.backend
            .delete_document(id)
            .await
            .map_err(SessionError::Backend)?;

        if self.store.document().id.as_ref() == Some(id) {
            self.store.replace_document(Document::new());
            self.reset_timers();
            self.breadcrumbs.clear();
        }
        if let Some(local_state) = &self.local_state {
            if local_state.last_document().as_ref() == Some(id) {
                if let Err(err) = local_state.forget() {
                    warn!("Failed to clear last opened document: {err:#}");
                }
            }
        }
        info!(document = %id, "Deleted document");
        Ok(())
    }

    /// Reopens the top-level document from the previous session, if any.
    /// A stale reference is forgotten rather than reported.
    pub async fn restore_last_opened(&mut self) -> Result<bool, SessionError> {
        let Some(id) = self.local_state.as_ref().and_then(LocalState::last_document) else {
            return Ok(false);
        };
        match self.load(&id, Vec::new()).await {
            Ok(()) => Ok(true),
            Err(err) => {
                warn!(document = %id, "Could not restore last opened document: {err}");
                if let Some(local_state) = &self.local_state {
                    if let Err(err) = local_state.forget() {
                        warn!("Failed to clear last opened document: {err:#}");
                    }
                }
                Ok(false)
            }
        }
    }

    // Submaps

    /// Moves the node's subtree into a new document and leaves a submap link behind.
    ///
    /// Either both documents end up written and the in-memory parent is
    /// replaced, or the attempt is rolled back as far as the backend allows and
    /// the in-memory parent is untouched.
    pub async fn convert_to_submap(&mut self, id: &NodeId) -> Result<DocumentId, SessionError> {
        self.flush_autosave().await?;
        self.flush_content_deletes().await;

        let partition = Partition::plan(self.store.graph(), self.store.index(), id)?;
        let document = self.store.document();
        let parent_id = document.id.clone();
        let parent_name = document.name.clone();
        let parent_origin = document.origin.clone();

        let child_id = match self
            .backend
            .save_document(
                None,
                partition.child_name(),
                &partition.child_payload(parent_id.as_ref()),
            )
            .await
        {
            Ok(child_id) => child_id,
            Err(err) => return Err(self.partition_failed(err)),
        };

        let moved = partition.child_content();
        if let Err(err) = self.backend.upsert_content(&child_id, &moved).await {
            self.compensate(&child_id, None, &moved).await;
            return Err(self.partition_failed(err));
        }

        let parent_after = partition.apply_to_parent(self.store.graph(), &child_id);
        let parent_payload = StructuralPayload::from_graph(&parent_after, parent_origin.clone());
        let saved = match self
            .backend
            .save_document(parent_id.as_ref(), &parent_name, &parent_payload)
            .await
        {
            Ok(saved) => saved,
            Err(err) => {
                self.compensate(&child_id, parent_id.as_ref(), &moved).await;
                return Err(self.partition_failed(err));
            }
        };
        let rows = content_rows(&parent_after);
        if !rows.is_empty() {
            if let Err(err) = self.backend.upsert_content(&saved, &rows).await {
                self.restore_parent(parent_id.as_ref(), &saved, &parent_name, parent_origin)
                    .await;
                self.compensate(&child_id, parent_id.as_ref(), &moved).await;
                return Err(self.partition_failed(err));
            }
        }

        self.store.replace_graph_after_partition(parent_after);
        self.store.set_document_id(saved.clone());
        self.store.mark_clean();
        self.show_status(SaveStatus::Saved);
        if parent_id.is_none() && self.breadcrumbs.is_empty() {
            self.remember(&saved);
        }
        info!(
            parent = %saved,
            child = %child_id,
            node = %id,
            moved = moved.len(),
            "Converted subtree to submap"
        );
        Ok(child_id)
    }

    /// Opens the child document behind a submap node.
    pub async fn enter_submap(&mut self, node: &NodeId) -> Result<(), SessionError> {
        let target = submap::resolve(self.store.graph(), node)
            .ok_or_else(|| SessionError::NotASubmap(node.clone()))?;
        self.navigate_to_submap(&target).await
    }

    pub async fn navigate_to_submap(&mut self, child: &DocumentId) -> Result<(), SessionError> {
        self.flush_autosave().await?;
        let document = self.store.document();
        let current = document.id.clone().ok_or(SessionError::UnsavedDocument)?;
        let mut trail = self.breadcrumbs.clone();
        trail.push(Breadcrumb {
            document_id: current,
            document_name: document.name.clone(),
        });
        self.load(child, trail).await
    }

    /// Goes back up the breadcrumb trail: one level, or to the entry at `to_index`.
    pub async fn navigate_back(&mut self, to_index: Option<usize>) -> Result<(), SessionError> {
        let len = self.breadcrumbs.len();
        if len == 0 {
            return Ok(());
        }
        let index = to_index.unwrap_or(len - 1);
        if index >= len {
            return Err(SessionError::BreadcrumbOutOfRange { index, len });
        }
        self.flush_autosave().await?;
        let crumb = self.breadcrumbs[index].clone();
        let trail = self.breadcrumbs[..index].to_vec();
        self.load(&crumb.document_id, trail).await
    }

    // Internals

    fn edit<T>(
        &mut self,
        op: impl FnOnce(&mut GraphStore) -> Result<T, EditError>,
    ) -> Result<T, SessionError> {
        let result = op(&mut self.store);
        self.drain_effects();
        Ok(result?)
    }

    fn drain_effects(&mut self) {
        for effect in self.store.take_effects() {
            match effect {
                Effect::ScheduleAutosave => {
                    if self.store.document().id.is_some() {
                        self.autosave.schedule(self.clock.now());
                    }
                }
                Effect::DeleteContent(node) => self.pending_deletes.push(node),
            }
        }
    }

    async fn flush_content_deletes(&mut self) {
        for node in std::mem::take(&mut self.pending_deletes) {
            if let Err(err) = self.backend.delete_content_row(&node).await {
                warn!(node = %node, "Failed to delete content row: {err:#}");
            }
        }
    }

    /// Saves outstanding edits before the in-memory document is replaced.
    async fn flush_autosave(&mut self) -> Result<(), SessionError> {
        let document = self.store.document();
        if document.dirty && document.id.is_some() {
            debug!("Flushing pending autosave");
            self.save(None).await?;
        }
        Ok(())
    }

    async fn persist(
        &self,
        id: Option<&DocumentId>,
        name: &str,
        graph: &Graph,
        origin: Option<SubmapOrigin>,
    ) -> anyhow::Result<DocumentId> {
        let payload = StructuralPayload::from_graph(graph, origin);
        let saved = self.backend.save_document(id, name, &payload).await?;
        let rows = content_rows(graph);
        if !rows.is_empty() {
            self.backend.upsert_content(&saved, &rows).await?;
        }
        Ok(saved)
    }

    async fn load(&mut self, id: &DocumentId, trail: Vec<Breadcrumb>) -> Result<(), SessionError> {
        self.flush_content_deletes().await;
        let (stored, content) = tokio::try_join!(
            self.backend.load_document(id),
            self.backend.load_content(id)
        )
        .map_err(SessionError::Backend)?;

        let graph = stored.payload.to_graph();
        if !graph.nodes().any(|node| node.is_root()) {
            return Err(SessionError::MissingRoot(id.clone()));
        }
        let mut document = Document::with_graph(Some(stored.id.clone()), &stored.name, graph);
        document.origin = stored.payload.origin;

        self.store.replace_document(document);
        self.store.merge_content(&content);
        self.reset_timers();

        let top_level = trail.is_empty();
        self.breadcrumbs = trail;
        if top_level {
            self.remember(&stored.id);
        }
        info!(document = %stored.id, name = %stored.name, depth = self.breadcrumbs.len(), "Opened document");
        Ok(())
    }

    /// Moves content back to the parent and drops the child document. Content
    /// that cannot be moved back is left to the next save of the parent.
    async fn compensate(
        &mut self,
        child: &DocumentId,
        parent: Option<&DocumentId>,
        moved: &[ContentRow],
    ) {
        if let Some(parent) = parent {
            if let Err(err) = self.backend.upsert_content(parent, moved).await {
                warn!(parent = %parent, "Failed to move content back to parent: {err:#}");
                self.store.mark_dirty();
                self.autosave.schedule(self.clock.now());
            }
        }
        if let Err(err) = self.backend.delete_document(child).await {
            warn!(child = %child, "Failed to remove orphaned submap document: {err:#}");
        }
    }

    /// Puts the pre-partition parent structure back after its new structure
    /// was written but its content was not. A parent created by this attempt
    /// is removed instead. If the rewrite fails too, the in-memory parent is
    /// marked dirty so the next save repairs the stored copy.
    async fn restore_parent(
        &mut self,
        original: Option<&DocumentId>,
        written: &DocumentId,
        name: &str,
        origin: Option<SubmapOrigin>,
    ) {
        let Some(original) = original else {
            if let Err(err) = self.backend.delete_document(written).await {
                warn!(parent = %written, "Failed to remove half-written parent: {err:#}");
            }
            return;
        };
        let payload = StructuralPayload::from_graph(self.store.graph(), origin);
        if let Err(err) = self.backend.save_document(Some(original), name, &payload).await {
            warn!(parent = %original, "Failed to restore parent structure: {err:#}");
            self.store.mark_dirty();
            self.autosave.schedule(self.clock.now());
        }
    }

    fn partition_failed(&mut self, err: anyhow::Error) -> SessionError {
        self.show_status(SaveStatus::Error);
        warn!("Submap conversion failed: {err:#}");
        SessionError::Partition(err)
    }

    fn show_status(&mut self, status: SaveStatus) {
        self.store.set_save_status(status);
        let display = match status {
            SaveStatus::Error => self.config.error_display,
            _ => self.config.saved_display,
        };
        self.status_timer.arm(self.clock.now(), display);
    }

    fn reset_timers(&mut self) {
        self.autosave.cancel();
        self.status_timer.disarm();
    }

    fn remember(&self, id: &DocumentId) {
        if let Some(local_state) = &self.local_state {
            if let Err(err) = local_state.remember(id) {
                warn!("Failed to record last opened document: {err:#}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autosave::ManualClock;
    use crate::persistence::MemoryBackend;
    use std::time::Duration;

    fn session() -> (Session<MemoryBackend, ManualClock>, MemoryBackend, ManualClock) {
        let backend = MemoryBackend::new();
        let clock = ManualClock::new();
        let session = Session::with_clock(backend.clone(), clock.clone(), EngineConfig::default());
        (session, backend, clock)
    }

    fn root(session: &Session<MemoryBackend, ManualClock>) -> NodeId {
        session.store().root_id().cloned().unwrap()
    }

    #[tokio::test]
    async fn unsaved_documents_never_autosave() {
        let (mut session, backend, clock) = session();
        let root = root(&session);
        session.add_child(&root, NodeKind::Folder).unwrap();
        assert!(!session.autosave_pending());

        clock.advance(Duration::from_secs(10));
        assert!(!session.tick().await);
        assert_eq!(backend.save_count(), 0);
    }

    #[tokio::test]
    async fn burst_of_edits_is_saved_once_after_the_delay() {
        let (mut session, backend, clock) = session();
        let root = root(&session);
        session.save(Some("Plans")).await.unwrap();
        assert_eq!(backend.save_count(), 1);

        for _ in 0..5 {
            session.add_child(&root, NodeKind::Folder).unwrap();
            clock.advance(Duration::from_millis(500));
            assert!(!session.tick().await);
        }
        clock.advance(Duration::from_millis(1500));
        assert!(session.tick().await);
        assert_eq!(backend.save_count(), 2);
        assert!(!session.document().dirty);
        assert_eq!(session.document().save_status, SaveStatus::Saved);

        clock.advance(Duration::from_secs(2));
        session.tick().await;
        assert_eq!(session.document().save_status, SaveStatus::Idle);
    }

    #[tokio::test]
    async fn manual_save_cancels_pending_autosave() {
        let (mut session, backend, clock) = session();
        let root = root(&session);
        session.save(None).await.unwrap();
        session.add_child(&root, NodeKind::Note).unwrap();
        assert!(session.autosave_pending());

        session.save(None).await.unwrap();
        assert!(!session.autosave_pending());
        clock.advance(Duration::from_secs(5));
        assert!(!session.tick().await);
        assert_eq!(backend.save_count(), 2);
    }

    #[tokio::test]
    async fn failed_save_keeps_document_dirty_and_reverts_status() {
        let (mut session, backend, clock) = session();
        let root = root(&session);
        session.save(None).await.unwrap();
        session.add_child(&root, NodeKind::Note).unwrap();

        backend.set_offline(true);
        let err = session.save(None).await.unwrap_err();
        assert!(matches!(err, SessionError::Backend(_)));
        assert!(!err.is_validation());
        assert!(session.document().dirty);
        assert_eq!(session.document().save_status, SaveStatus::Error);

        clock.advance(Duration::from_secs(3));
        session.tick().await;
        assert_eq!(session.document().save_status, SaveStatus::Idle);
    }

    #[tokio::test]
    async fn deleting_nodes_removes_their_content_rows() {
        let (mut session, backend, _clock) = session();
        let root = root(&session);
        let child = session.add_child(&root, NodeKind::Note).unwrap();
        session.save(None).await.unwrap();
        assert!(backend.content_owner(&child).is_some());

        session.delete_node(&child).await.unwrap();
        assert_eq!(backend.content_owner(&child), None);
    }

    #[tokio::test]
    async fn validation_errors_surface_without_side_effects() {
        let (mut session, _backend, _clock) = session();
        let root = root(&session);
        let err = session.delete_node(&root).await.unwrap_err();
        assert!(err.is_validation());
        assert!(!session.document().dirty);
        assert!(!session.store().history().can_undo());
    }
}
