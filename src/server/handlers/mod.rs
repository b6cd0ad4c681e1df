pub mod answer;
pub mod config;
pub mod health;
pub mod ingest;
