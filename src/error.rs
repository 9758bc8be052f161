use crate::source::DataSourceId;
use crate::style::SymbolizerId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid YAML in stylesheet.")]
    Style(#[from] serde_yaml::Error),

    #[error("Invalid stylesheet: {0}")]
    InvalidStyle(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid GeoJSON: {0}")]
    GeoJson(#[from] serde_json::Error),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Fetch from data source {source_id} failed: {message}")]
    Fetch {
        source_id: DataSourceId,
        message: String,
    },

    #[error("Font error: {0}")]
    Font(String),

    #[error("Canvas error: {0}")]
    Canvas(String),

    #[error("No drawing resources were built for symbolizer {0}")]
    MissingResources(SymbolizerId),

    #[cfg(feature = "postgis")]
    #[error("PostGIS query failed.")]
    Postgis(#[from] sqlx::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
