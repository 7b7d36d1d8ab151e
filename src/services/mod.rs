/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Mutation ingestion pipeline.
pub mod ingest_service;
/// Session lifecycle, position and finalization.
pub mod session_service;
/// Server-Sent Events payload builders and fan-out.
pub mod sse_events;
/// Stream opening and SSE response plumbing.
pub mod sse_service;
/// Record store connection supervisor.
pub mod storage_supervisor;
/// Ordered background persistence.
pub mod storage_writer;
/// Reconciliation sweeper: restart recovery, inactivity and finalize retries.
pub mod sweeper;
/// Stream ticket issuance and expiry.
pub mod ticket_service;
