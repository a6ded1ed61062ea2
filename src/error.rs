use std::path::PathBuf;

use thiserror::Error;

/// Per-game ingestion failure. One of these aborts a single game; the batch
/// carries on with the next one.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no game identifier in {0:?}")]
    UnidentifiableGame(String),

    #[error("no {kind} document in {}", dir.display())]
    MissingDocument { dir: PathBuf, kind: &'static str },

    #[error("malformed block dump {document}: {source}")]
    Json {
        document: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store write failed: {0}")]
    Store(#[from] rusqlite::Error),
}
