/// Persisted entity definitions.
pub mod models;
/// Record store abstraction and its adapters.
pub mod record_store;
/// Backend-agnostic storage errors.
pub mod storage;
