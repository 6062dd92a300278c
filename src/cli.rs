use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use std::fmt::Write as FmtWrite;
use std::path::PathBuf;

use kmap::{
    DatabaseConfig, DocumentId, EngineConfig, GraphStore, NodeId, NodeKind, Session, SqliteBackend,
};
#[cfg(feature = "server")]
use kmap::serve::{ServeArgs, run_serve};

#[derive(Debug, Parser)]
#[command(name = "kmap", about = "Edit and store hierarchical knowledge maps.")]
pub struct Cli {
    /// SQLite database file (defaults to KMAP_DB_PATH or ./kmap.db).
    #[arg(long = "db", global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the editing API server.
    #[cfg(feature = "server")]
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 5151)]
        port: u16,
        /// Directory with a built web UI to serve alongside the API.
        #[arg(long)]
        ui: Option<PathBuf>,
    },
    /// List stored documents, most recently updated first.
    List,
    /// Create an empty document with just a root node.
    New { name: String },
    /// Print a document as an indented outline.
    Show { id: String },
    /// Delete a stored document and its content.
    Delete {
        id: String,
        /// Skip the confirmation prompt.
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

pub async fn dispatch() -> Result<()> {
    let cli = Cli::parse();
    let db_config = match cli.db {
        Some(path) => DatabaseConfig { path },
        None => DatabaseConfig::default(),
    };

    match cli.command {
        #[cfg(feature = "server")]
        Command::Serve { host, port, ui } => {
            run_serve(ServeArgs {
                host,
                port,
                db: Some(db_config.path),
                ui,
            })
            .await
        }
        Command::List => run_list(db_config).await,
        Command::New { name } => run_new(db_config, &name).await,
        Command::Show { id } => run_show(db_config, &DocumentId::from(id)).await,
        Command::Delete { id, yes } => run_delete(db_config, &DocumentId::from(id), yes).await,
    }
}

async fn open_session(db_config: DatabaseConfig) -> Result<Session<SqliteBackend>> {
    let backend = SqliteBackend::open(db_config).await?;
    Ok(Session::new(backend, EngineConfig::from_env()))
}

async fn run_list(db_config: DatabaseConfig) -> Result<()> {
    let session = open_session(db_config).await?;
    let documents = session.list_documents().await?;
    if documents.is_empty() {
        println!("No documents yet.");
        return Ok(());
    }
    for document in documents {
        println!(
            "{}  {}  {}",
            document.id,
            document.updated_at.format("%Y-%m-%d %H:%M"),
            document.name
        );
    }
    Ok(())
}

async fn run_new(db_config: DatabaseConfig, name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        bail!("document name cannot be empty");
    }
    let mut session = open_session(db_config).await?;
    let id = session.save(Some(name)).await?;
    println!("Created '{name}' ({id})");
    Ok(())
}

async fn run_show(db_config: DatabaseConfig, id: &DocumentId) -> Result<()> {
    let mut session = open_session(db_config).await?;
    session
        .open_document(id)
        .await
        .with_context(|| format!("failed to open document '{id}'"))?;
    print!("{}", render_outline(session.store())?);
    Ok(())
}

async fn run_delete(db_config: DatabaseConfig, id: &DocumentId, yes: bool) -> Result<()> {
    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete document '{id}'?"))
            .default(false)
            .interact()
            .context("confirmation was cancelled")?;
        if !confirmed {
            println!("Nothing deleted.");
            return Ok(());
        }
    }
    let mut session = open_session(db_config).await?;
    session.delete_document(id).await?;
    println!("Deleted {id}");
    Ok(())
}

fn render_outline(store: &GraphStore) -> Result<String, std::fmt::Error> {
    let mut out = String::new();
    writeln!(out, "{}", store.document().name)?;
    if let Some(root) = store.root_id() {
        write_subtree(store, root, 0, &mut out)?;
    }
    Ok(out)
}

fn write_subtree(
    store: &GraphStore,
    id: &NodeId,
    depth: usize,
    out: &mut String,
) -> std::fmt::Result {
    let Some(node) = store.node(id) else {
        return Ok(());
    };
    let marker = match node.kind {
        NodeKind::Folder | NodeKind::Group if store.index().has_children(id) => {
            if node.collapsed { "+" } else { "-" }
        }
        NodeKind::Submap => ">",
        _ => "*",
    };
    writeln!(
        out,
        "{}{} {} [{}]",
        "  ".repeat(depth),
        marker,
        node.title,
        node.kind.as_str()
    )?;
    for child in store.index().children_of(id) {
        write_subtree(store, child, depth + 1, out)?;
    }
    Ok(())
}
