use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::document::{
    DocumentId, Edge, Graph, Node, NodeId, NodeKind, Point, SubmapOrigin,
};

/// A node as stored in the document record: everything except content and overview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuralNode {
    pub id: NodeId,
    pub position: Point,
    pub kind: NodeKind,
    pub level: u32,
    pub title: String,
    #[serde(default)]
    pub collapsed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submap_ref: Option<DocumentId>,
}

impl From<&Node> for StructuralNode {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            position: node.position,
            kind: node.kind,
            level: node.level,
            title: node.title.clone(),
            collapsed: node.collapsed,
            submap_ref: node.submap_ref.clone(),
        }
    }
}

impl StructuralNode {
    pub fn into_node(self) -> Node {
        let mut node = Node::new(self.id, self.kind, self.position, self.level);
        node.title = self.title;
        node.collapsed = self.collapsed;
        node.submap_ref = self.submap_ref;
        node
    }
}

/// The node/edge graph of a document without any content fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuralPayload {
    pub nodes: Vec<StructuralNode>,
    pub edges: Vec<Edge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<SubmapOrigin>,
}

impl StructuralPayload {
    pub fn from_graph(graph: &Graph, origin: Option<SubmapOrigin>) -> Self {
        Self {
            nodes: graph.nodes().map(StructuralNode::from).collect(),
            edges: graph.edges().to_vec(),
            origin,
        }
    }

    /// Rebuilds the graph with empty content; merge [`NodeContent`] in afterwards.
    pub fn to_graph(&self) -> Graph {
        Graph::from_parts(
            self.nodes.iter().cloned().map(StructuralNode::into_node).collect(),
            self.edges.clone(),
        )
    }
}

/// One row of the per-node content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRow {
    pub node_id: NodeId,
    pub title: String,
    pub content: String,
    pub overview: String,
}

impl ContentRow {
    pub fn from_node(node: &Node) -> Self {
        Self {
            node_id: node.id.clone(),
            title: node.title.clone(),
            content: node.content.clone(),
            overview: node.overview.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeContent {
    pub content: String,
    pub overview: String,
}

/// Content rows owned by `graph`. Submap nodes are skipped: their row belongs
/// to the child document.
pub fn content_rows(graph: &Graph) -> Vec<ContentRow> {
    graph
        .nodes()
        .filter(|node| node.kind != NodeKind::Submap)
        .map(ContentRow::from_node)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub id: DocumentId,
    pub name: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    pub id: DocumentId,
    pub name: String,
    pub payload: StructuralPayload,
    pub updated_at: DateTime<Utc>,
}

/// Durable storage for documents and per-node content.
///
/// Content rows are keyed by node id alone, so upserting a row under a
/// different document moves it there.
pub trait Backend: Send + Sync {
    fn list_documents(&self) -> impl Future<Output = Result<Vec<DocumentSummary>>> + Send;

    fn load_document(&self, id: &DocumentId) -> impl Future<Output = Result<StoredDocument>> + Send;

    fn load_content(
        &self,
        id: &DocumentId,
    ) -> impl Future<Output = Result<HashMap<NodeId, NodeContent>>> + Send;

    /// Updates `id`, or creates a new document when `id` is `None`. Returns the document's id.
    fn save_document(
        &self,
        id: Option<&DocumentId>,
        name: &str,
        payload: &StructuralPayload,
    ) -> impl Future<Output = Result<DocumentId>> + Send;

    fn upsert_content(
        &self,
        document: &DocumentId,
        rows: &[ContentRow],
    ) -> impl Future<Output = Result<()>> + Send;

    fn delete_content_row(&self, node: &NodeId) -> impl Future<Output = Result<()>> + Send;

    fn delete_document(&self, id: &DocumentId) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Default)]
struct MemoryState {
    documents: HashMap<DocumentId, StoredDocument>,
    contents: HashMap<NodeId, (DocumentId, ContentRow)>,
    offline: bool,
    failing_saves: HashSet<DocumentId>,
    failing_content: HashSet<DocumentId>,
    saves: usize,
}

/// In-process backend. Clones share the same storage, so a test can keep a
/// handle while a session owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every request fail until switched back.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.offline = offline;
        }
    }

    /// Makes updates of one existing document fail. Creating documents still works.
    pub fn fail_saves_of(&self, id: &DocumentId) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_saves.insert(id.clone());
        }
    }

    /// Makes content writes for one document fail while structural saves still go through.
    pub fn fail_content_writes_of(&self, id: &DocumentId) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_content.insert(id.clone());
        }
    }

    /// Lifts every failure set with the `fail_*` switches.
    pub fn clear_failures(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_saves.clear();
            state.failing_content.clear();
        }
    }

    pub fn document_count(&self) -> usize {
        self.state.lock().map(|state| state.documents.len()).unwrap_or(0)
    }

    /// Number of successful `save_document` calls so far.
    pub fn save_count(&self) -> usize {
        self.state.lock().map(|state| state.saves).unwrap_or(0)
    }

    pub fn stored(&self, id: &DocumentId) -> Option<StoredDocument> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.documents.get(id).cloned())
    }

    /// The document currently owning a node's content row.
    pub fn content_owner(&self, node: &NodeId) -> Option<DocumentId> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.contents.get(node).map(|(owner, _)| owner.clone()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow!("memory backend lock poisoned"))?;
        if state.offline {
            bail!("backend is offline");
        }
        Ok(state)
    }
}

impl Backend for MemoryBackend {
    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let state = self.lock()?;
        let mut summaries: Vec<DocumentSummary> = state
            .documents
            .values()
            .map(|doc| DocumentSummary {
                id: doc.id.clone(),
                name: doc.name.clone(),
                updated_at: doc.updated_at,
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn load_document(&self, id: &DocumentId) -> Result<StoredDocument> {
        let state = self.lock()?;
        state
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("document '{id}' not found"))
    }

    async fn load_content(&self, id: &DocumentId) -> Result<HashMap<NodeId, NodeContent>> {
        let state = self.lock()?;
        Ok(state
            .contents
            .iter()
            .filter(|(_, (owner, _))| owner == id)
            .map(|(node, (_, row))| {
                (
                    node.clone(),
                    NodeContent {
                        content: row.content.clone(),
                        overview: row.overview.clone(),
                    },
                )
            })
            .collect())
    }

    async fn save_document(
        &self,
        id: Option<&DocumentId>,
        name: &str,
        payload: &StructuralPayload,
    ) -> Result<DocumentId> {
        let mut state = self.lock()?;
        let id = match id {
            Some(id) => {
                if state.failing_saves.contains(id) {
                    bail!("write to document '{id}' rejected");
                }
                if !state.documents.contains_key(id) {
                    bail!("document '{id}' not found");
                }
                id.clone()
            }
            None => DocumentId::generate(),
        };
        state.documents.insert(
            id.clone(),
            StoredDocument {
                id: id.clone(),
                name: name.to_string(),
                payload: payload.clone(),
                updated_at: Utc::now(),
            },
        );
        state.saves += 1;
        Ok(id)
    }

    async fn upsert_content(&self, document: &DocumentId, rows: &[ContentRow]) -> Result<()> {
        let mut state = self.lock()?;
        if state.failing_content.contains(document) {
            bail!("content write to document '{document}' rejected");
        }
        for row in rows {
            state
                .contents
                .insert(row.node_id.clone(), (document.clone(), row.clone()));
        }
        Ok(())
    }

    async fn delete_content_row(&self, node: &NodeId) -> Result<()> {
        self.lock()?.contents.remove(node);
        Ok(())
    }

    async fn delete_document(&self, id: &DocumentId) -> Result<()> {
        let mut state = self.lock()?;
        state.documents.remove(id);
        state.contents.retain(|_, (owner, _)| owner != id);
        Ok(())
    }
}
