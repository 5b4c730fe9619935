use thiserror::Error;

use petrowatch_http::HttpError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("failed to load price baseline: {source}")]
    BaselineLoad {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("change detection requested before the price baseline was loaded")]
    BaselineNotLoaded,

    #[error("persistence failed during {operation}: {source}")]
    Persistence {
        operation: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl IngestError {
    /// Short category label used in structured logs and error summaries.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            IngestError::Http(e) => e.category(),
            IngestError::BaselineLoad { .. } | IngestError::BaselineNotLoaded => "baseline",
            IngestError::Persistence { .. } => "persistence",
        }
    }
}
