use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower::ServiceExt;
use tower::service_fn;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{info, warn};

use crate::autosave::EngineConfig;
use crate::database::{DatabaseConfig, SqliteBackend};
use crate::document::{DocumentId, EdgeStyle, NodeId, NodeKind, Point, Size};
use crate::error::{EditError, SessionError};
use crate::graph::NodePatch;
use crate::local_state::LocalState;
use crate::persistence::DocumentSummary;
use crate::session::{Session, SessionSnapshot};

const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Arguments for running the kmap web API. Built by the `serve` subcommand.
#[derive(Debug, Clone)]
pub struct ServeArgs {
    pub host: String,
    pub port: u16,
    /// SQLite database file (defaults to KMAP_DB_PATH or ./kmap.db).
    pub db: Option<PathBuf>,
    /// Directory with a built web UI to serve alongside the API.
    pub ui: Option<PathBuf>,
}

type ApiSession = Session<SqliteBackend>;
type ApiError = (StatusCode, String);

struct ServeState {
    session: Mutex<ApiSession>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddChildRequest {
    #[serde(default)]
    kind: NodeKind,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Created {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SaveRequest {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RenameRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CollapseRequest {
    collapsed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReparentRequest {
    parent_id: NodeId,
}

#[derive(Debug, Deserialize)]
struct KindRequest {
    kind: NodeKind,
}

#[derive(Debug, Deserialize)]
struct EdgeStyleRequest {
    style: EdgeStyle,
}

#[derive(Debug, Deserialize)]
struct ConnectRequest {
    source: NodeId,
    target: NodeId,
}

#[derive(Debug, Deserialize)]
struct DragRequest {
    id: NodeId,
    #[serde(default)]
    position: Option<Point>,
}

#[derive(Debug, Deserialize)]
struct SelectionRequest {
    #[serde(default)]
    id: Option<NodeId>,
}

#[derive(Debug, Deserialize)]
struct BackRequest {
    #[serde(default)]
    index: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmapCreated {
    child_document_id: DocumentId,
    document: SessionSnapshot,
}

pub async fn run_serve(args: ServeArgs) -> Result<()> {
    let db_config = match &args.db {
        Some(path) => DatabaseConfig { path: path.clone() },
        None => DatabaseConfig::default(),
    };
    let backend = SqliteBackend::open(db_config).await?;

    let mut session = Session::new(backend, EngineConfig::from_env());
    match LocalState::in_config_dir() {
        Ok(local_state) => session = session.with_local_state(local_state),
        Err(err) => warn!("Last opened document will not be remembered: {err:#}"),
    }
    if session.restore_last_opened().await? {
        info!(document = %session.document().name, "Restored last opened document");
    }

    let state = Arc::new(ServeState {
        session: Mutex::new(session),
    });

    let ticker_state = Arc::clone(&state);
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            interval.tick().await;
            ticker_state.session.lock().await.tick().await;
        }
    });

    let mut app = Router::new()
        .route("/api/documents", get(list_documents).post(new_document))
        .route("/api/documents/:id", delete(delete_document))
        .route("/api/document", get(get_document))
        .route("/api/document/open/:id", post(open_document))
        .route("/api/document/save", post(save_document))
        .route("/api/document/name", put(rename_document))
        .route("/api/nodes/:id/children", post(add_child))
        .route("/api/nodes/:id", delete(delete_node).patch(patch_node))
        .route("/api/nodes/:id/collapsed", put(put_collapsed))
        .route("/api/nodes/:id/parent", put(put_parent))
        .route("/api/nodes/:id/kind", put(put_kind))
        .route("/api/nodes/:id/edge-style", put(put_edge_style))
        .route("/api/nodes/:id/size", put(put_size))
        .route("/api/nodes/:id/submap", post(convert_to_submap))
        .route("/api/nodes/:id/edit", post(begin_edit))
        .route("/api/edges", post(connect))
        .route("/api/drag/start", post(drag_start))
        .route("/api/drag/move", post(drag_move))
        .route("/api/drag/end", post(drag_end))
        .route("/api/selection", put(put_selection))
        .route("/api/history/undo", post(undo))
        .route("/api/history/redo", post(redo))
        .route("/api/submaps/:id/enter", post(enter_submap))
        .route("/api/breadcrumbs/back", post(navigate_back))
        .with_state(Arc::clone(&state));

    if let Some(root) = args.ui.clone() {
        let static_dir = ServeDir::new(root.clone())
            .append_index_html_on_directories(true)
            .fallback(ServeFile::new(root.join("index.html")));

        let static_service = service_fn(move |req| {
            let svc = static_dir.clone();
            async move {
                match svc.oneshot(req).await {
                    Ok(response) => Ok(response.map(axum::body::Body::new)),
                    Err(error) => {
                        let message = format!("Static file error: {error}");
                        Ok((StatusCode::INTERNAL_SERVER_ERROR, message).into_response())
                    }
                }
            }
        });

        app = app.fallback_service(static_service);
    }

    let app = app.layer(CorsLayer::permissive());

    let addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind HTTP server to {addr}"))?;
    let local: SocketAddr = listener.local_addr()?;

    info!(%local, "kmap server listening");
    println!("kmap server listening on http://{local}");
    println!("Press Ctrl+C to stop.");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("HTTP server error")?;

    ticker.abort();

    // whatever the debounce was still holding goes out before exit
    let mut session = state.session.lock().await;
    if session.document().dirty && session.document().id.is_some() {
        session.save(None).await?;
    }

    Ok(())
}

// Documents

async fn list_documents(
    State(state): State<Arc<ServeState>>,
) -> Result<Json<Vec<DocumentSummary>>, ApiError> {
    let session = state.session.lock().await;
    let documents = session.list_documents().await.map_err(session_error)?;
    Ok(Json(documents))
}

async fn new_document(
    State(state): State<Arc<ServeState>>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let mut session = state.session.lock().await;
    session.new_document().await.map_err(session_error)?;
    Ok(Json(session.snapshot()))
}

async fn delete_document(
    State(state): State<Arc<ServeState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let mut session = state.session.lock().await;
    session
        .delete_document(&DocumentId::from(id))
        .await
        .map_err(session_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_document(State(state): State<Arc<ServeState>>) -> Json<SessionSnapshot> {
    Json(state.session.lock().await.snapshot())
}

async fn open_document(
    State(state): State<Arc<ServeState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let mut session = state.session.lock().await;
    session
        .open_document(&DocumentId::from(id))
        .await
        .map_err(session_error)?;
    Ok(Json(session.snapshot()))
}

async fn save_document(
    State(state): State<Arc<ServeState>>,
    Json(request): Json<SaveRequest>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let mut session = state.session.lock().await;
    session
        .save(request.name.as_deref())
        .await
        .map_err(session_error)?;
    Ok(Json(session.snapshot()))
}

async fn rename_document(
    State(state): State<Arc<ServeState>>,
    Json(request): Json<RenameRequest>,
) -> Json<SessionSnapshot> {
    let mut session = state.session.lock().await;
    session.rename_document(&request.name);
    Json(session.snapshot())
}

// Nodes

async fn add_child(
    State(state): State<Arc<ServeState>>,
    AxumPath(id): AxumPath<String>,
    Json(request): Json<AddChildRequest>,
) -> Result<Json<Created>, ApiError> {
    let mut session = state.session.lock().await;
    let created = session
        .add_child(&NodeId::from(id), request.kind)
        .map_err(session_error)?;
    Ok(Json(Created {
        id: created.to_string(),
    }))
}

async fn patch_node(
    State(state): State<Arc<ServeState>>,
    AxumPath(id): AxumPath<String>,
    Json(patch): Json<NodePatch>,
) -> Result<impl IntoResponse, ApiError> {
    let mut session = state.session.lock().await;
    let id = NodeId::from(id);
    match patch {
        // a bare title change is a rename: trimmed and one undo step
        NodePatch {
            title: Some(title),
            content: None,
            overview: None,
            kind: None,
            collapsed: None,
            submap_ref: None,
        } => {
            session.rename_node(&id, &title).map_err(session_error)?;
        }
        patch => session.update_node(&id, patch).map_err(session_error)?,
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn begin_edit(
    State(state): State<Arc<ServeState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let mut session = state.session.lock().await;
    let id = NodeId::from(id);
    if session.store().node(&id).is_none() {
        return Err(session_error(EditError::NodeNotFound(id).into()));
    }
    session.begin_edit();
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_node(
    State(state): State<Arc<ServeState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<Vec<NodeId>>, ApiError> {
    let mut session = state.session.lock().await;
    let removed = session
        .delete_node(&NodeId::from(id))
        .await
        .map_err(session_error)?;
    Ok(Json(removed))
}

async fn put_collapsed(
    State(state): State<Arc<ServeState>>,
    AxumPath(id): AxumPath<String>,
    Json(request): Json<CollapseRequest>,
) -> Result<Json<usize>, ApiError> {
    let mut session = state.session.lock().await;
    let changed = session
        .set_descendants_collapsed(&NodeId::from(id), request.collapsed)
        .map_err(session_error)?;
    Ok(Json(changed))
}

async fn put_parent(
    State(state): State<Arc<ServeState>>,
    AxumPath(id): AxumPath<String>,
    Json(request): Json<ReparentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut session = state.session.lock().await;
    session
        .reparent_node(&NodeId::from(id), &request.parent_id)
        .map_err(session_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn put_kind(
    State(state): State<Arc<ServeState>>,
    AxumPath(id): AxumPath<String>,
    Json(request): Json<KindRequest>,
) -> Result<Json<bool>, ApiError> {
    let mut session = state.session.lock().await;
    let changed = session
        .convert_kind(&NodeId::from(id), request.kind)
        .map_err(session_error)?;
    Ok(Json(changed))
}

async fn put_edge_style(
    State(state): State<Arc<ServeState>>,
    AxumPath(id): AxumPath<String>,
    Json(request): Json<EdgeStyleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut session = state.session.lock().await;
    session
        .set_edge_type(&NodeId::from(id), request.style)
        .map_err(session_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn put_size(
    State(state): State<Arc<ServeState>>,
    AxumPath(id): AxumPath<String>,
    Json(size): Json<Size>,
) -> Result<impl IntoResponse, ApiError> {
    let mut session = state.session.lock().await;
    session
        .report_size(&NodeId::from(id), size)
        .map_err(session_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn convert_to_submap(
    State(state): State<Arc<ServeState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<SubmapCreated>, ApiError> {
    let mut session = state.session.lock().await;
    let child_document_id = session
        .convert_to_submap(&NodeId::from(id))
        .await
        .map_err(session_error)?;
    Ok(Json(SubmapCreated {
        child_document_id,
        document: session.snapshot(),
    }))
}

// Edges, drag and selection

async fn connect(
    State(state): State<Arc<ServeState>>,
    Json(request): Json<ConnectRequest>,
) -> Result<Json<Created>, ApiError> {
    let mut session = state.session.lock().await;
    let id = session
        .connect(&request.source, &request.target)
        .map_err(session_error)?;
    Ok(Json(Created { id }))
}

async fn drag_start(
    State(state): State<Arc<ServeState>>,
    Json(request): Json<DragRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut session = state.session.lock().await;
    session.drag_start(&request.id).map_err(session_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn drag_move(
    State(state): State<Arc<ServeState>>,
    Json(request): Json<DragRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let position = request.position.ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            "drag move requires a position".to_string(),
        )
    })?;
    let mut session = state.session.lock().await;
    session
        .drag_move(&request.id, position)
        .map_err(session_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn drag_end(
    State(state): State<Arc<ServeState>>,
    Json(request): Json<DragRequest>,
) -> Result<Json<Option<NodeId>>, ApiError> {
    let mut session = state.session.lock().await;
    let dropped_into = session.drag_end(&request.id).map_err(session_error)?;
    Ok(Json(dropped_into))
}

async fn put_selection(
    State(state): State<Arc<ServeState>>,
    Json(request): Json<SelectionRequest>,
) -> impl IntoResponse {
    state.session.lock().await.select(request.id);
    StatusCode::NO_CONTENT
}

// History

async fn undo(State(state): State<Arc<ServeState>>) -> Json<SessionSnapshot> {
    let mut session = state.session.lock().await;
    session.undo();
    Json(session.snapshot())
}

async fn redo(State(state): State<Arc<ServeState>>) -> Json<SessionSnapshot> {
    let mut session = state.session.lock().await;
    session.redo();
    Json(session.snapshot())
}

// Navigation

async fn enter_submap(
    State(state): State<Arc<ServeState>>,
    AxumPath(node): AxumPath<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let mut session = state.session.lock().await;
    session
        .enter_submap(&NodeId::from(node))
        .await
        .map_err(session_error)?;
    Ok(Json(session.snapshot()))
}

async fn navigate_back(
    State(state): State<Arc<ServeState>>,
    Json(request): Json<BackRequest>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let mut session = state.session.lock().await;
    session
        .navigate_back(request.index)
        .await
        .map_err(session_error)?;
    Ok(Json(session.snapshot()))
}

fn session_error(err: SessionError) -> ApiError {
    let status = match &err {
        SessionError::Edit(EditError::NodeNotFound(_)) => StatusCode::NOT_FOUND,
        SessionError::Edit(
            EditError::DuplicateEdge { .. }
            | EditError::AlreadyChild { .. }
            | EditError::AlreadySubmap(_),
        ) => StatusCode::CONFLICT,
        SessionError::UnsavedDocument => StatusCode::CONFLICT,
        _ if err.is_validation() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!("Request failed: {err}");
    }
    (status, err.to_string())
}
