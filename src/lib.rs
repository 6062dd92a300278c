pub mod autosave;
pub mod database;
pub mod document;
pub mod error;
pub mod graph;
pub mod hierarchy;
pub mod history;
pub mod layout;
pub mod local_state;
pub mod persistence;
#[cfg(feature = "server")]
pub mod serve;
pub mod session;
pub mod submap;

pub use autosave::{AutosaveScheduler, Clock, EngineConfig, ManualClock, StatusTimer, SystemClock};
pub use database::{Database, DatabaseConfig, SqliteBackend};
pub use document::{
    Breadcrumb, Document, DocumentId, Edge, EdgeKind, EdgeStyle, Graph, Node, NodeId, NodeKind,
    Point, Rect, SaveStatus, Size, SubmapOrigin,
};
pub use error::{EditError, SessionError};
pub use graph::{Effect, GraphStore, NodePatch};
pub use hierarchy::HierarchyIndex;
pub use history::HistoryManager;
pub use layout::{EdgeView, LayoutEngine, NodeView, ViewState};
pub use local_state::LocalState;
pub use persistence::{
    Backend, ContentRow, DocumentSummary, MemoryBackend, NodeContent, StoredDocument,
    StructuralNode, StructuralPayload, content_rows,
};
pub use session::{Session, SessionSnapshot};
pub use submap::Partition;

/// Where a fresh document's root (and a freshly partitioned submap's root) sits.
pub const ROOT_ORIGIN: Point = Point { x: 350.0, y: 250.0 };
pub const ROOT_TITLE: &str = "Central Topic";
pub const DEFAULT_NODE_TITLE: &str = "New Node";
pub const UNTITLED_DOCUMENT: &str = "Untitled Map";
pub const SUBMAP_FALLBACK_NAME: &str = "Submap";

/// Levels deeper than this render with the level-3 styling.
pub const MAX_DISPLAY_LEVEL: u32 = 3;

/// Rendered node widths by display level, used until the renderer reports a measured size.
pub const LEVEL_WIDTHS: [f32; 4] = [180.0, 170.0, 150.0, 130.0];
/// Widths used when placing a new child to the right of its parent.
pub const PLACEMENT_WIDTHS: [f32; 4] = [190.0, 160.0, 135.0, 115.0];
pub const DEFAULT_NODE_HEIGHT: f32 = 44.0;

pub const CHILD_HORIZONTAL_GAP: f32 = 70.0;
pub const CHILD_VERTICAL_SPACING: f32 = 70.0;

pub const GROUP_PADDING_X: f32 = 20.0;
pub const GROUP_PADDING_TOP: f32 = 20.0;
pub const GROUP_HEADER_HEIGHT: f32 = 32.0;
pub const GROUP_PADDING_BOTTOM: f32 = 20.0;
pub const GROUP_MIN_WIDTH: f32 = 200.0;
pub const GROUP_MIN_HEIGHT: f32 = 120.0;

/// One color per level-1 branch, assigned in creation order.
pub const BRANCH_PALETTE: [&str; 10] = [
    "#3b82f6", "#10b981", "#f97316", "#8b5cf6", "#f43f5e", "#06b6d4", "#f59e0b", "#14b8a6",
    "#6366f1", "#d946ef",
];
pub const ROOT_COLOR: &str = "#64748b";
