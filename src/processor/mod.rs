pub mod ingest;
pub mod resolver;
pub mod segmenter;
