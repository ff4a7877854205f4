// Core domain collaborators for toolwire: the weather store exposed as tools
// and the document ingestion producer

pub mod ingest;
pub mod weather;

pub use ingest::{DocumentRecord, DocumentSource, IngestError};
pub use weather::{WeatherConfig, WeatherStore};
