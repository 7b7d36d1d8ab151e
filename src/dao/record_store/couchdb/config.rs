use std::env;

use super::error::{CouchDaoError, CouchResult};

const DEFAULT_DB: &str = "live_score";

/// Connection settings for the CouchDB record store.
#[derive(Debug, Clone)]
pub struct CouchConfig {
    pub(super) base_url: String,
    pub(super) database: String,
    pub(super) credentials: Option<(String, String)>,
}

impl CouchConfig {
    /// Read `COUCH_BASE_URL` (required), `COUCH_DB`, and the optional
    /// `COUCH_USERNAME`/`COUCH_PASSWORD` pair.
    pub fn from_env() -> CouchResult<Self> {
        let base_url = non_empty("COUCH_BASE_URL").ok_or(CouchDaoError::MissingEnvVar {
            var: "COUCH_BASE_URL",
        })?;
        let database = non_empty("COUCH_DB").unwrap_or_else(|| DEFAULT_DB.to_owned());
        let credentials = non_empty("COUCH_USERNAME").zip(non_empty("COUCH_PASSWORD"));

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            database,
            credentials,
        })
    }
}

fn non_empty(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}
