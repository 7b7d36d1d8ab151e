//! Library crate for live-score-back: live scoring sessions, mutation ingestion and SSE fan-out.

pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;
