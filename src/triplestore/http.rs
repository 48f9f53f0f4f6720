//! Remote triple store over the SPARQL 1.1 protocol.
//!
//! Each space maps to its own dataset through URL templates with a
//! `{space}` placeholder, e.g. `http://fuseki:3030/{space}/query`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TripleStoreError;
use crate::quad::Quad;
use crate::space::SpaceId;

use super::auth::{Authenticator, Credentials};
use super::{Solution, TripleStore, TripleStoreResult, results, sparql};

const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";
const SPARQL_QUERY: &str = "application/sparql-query";
const SPARQL_UPDATE: &str = "application/sparql-update";
const N_TRIPLES: &str = "application/n-triples";

fn default_timeout_secs() -> u64 {
    30
}

/// Connection settings for [`HttpTripleStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpTripleStoreConfig {
    /// Query endpoint template, `{space}` is replaced by the space name.
    pub query_url: String,
    /// Update endpoint template.
    pub update_url: String,
    /// Optional dataset creation endpoint (POSTed on `create_space`).
    #[serde(default)]
    pub create_url: Option<String>,
    /// Optional dataset deletion endpoint (DELETE on `drop_space`).
    #[serde(default)]
    pub drop_url: Option<String>,
    /// Per-request timeout. A timeout counts as a triple-store failure.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub credentials: Credentials,
}

impl HttpTripleStoreConfig {
    pub fn new(query_url: impl Into<String>, update_url: impl Into<String>) -> Self {
        Self {
            query_url: query_url.into(),
            update_url: update_url.into(),
            create_url: None,
            drop_url: None,
            timeout_secs: default_timeout_secs(),
            credentials: Credentials::None,
        }
    }
}

fn expand(template: &str, space: &SpaceId) -> String {
    template.replace("{space}", space.as_str())
}

/// [`TripleStore`] speaking the SPARQL 1.1 protocol over HTTP.
pub struct HttpTripleStore {
    config: HttpTripleStoreConfig,
    agent: ureq::Agent,
    auth: Authenticator,
}

impl HttpTripleStore {
    pub fn new(config: HttpTripleStoreConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        let auth = Authenticator::new(config.credentials.clone(), agent.clone());
        Self {
            config,
            agent,
            auth,
        }
    }

    /// Send a request, retrying once with a fresh token on 401.
    fn send(
        &self,
        method: &str,
        url: &str,
        content_type: Option<&str>,
        accept: Option<&str>,
        body: Option<&str>,
    ) -> TripleStoreResult<ureq::Response> {
        let mut retried = false;
        loop {
            let mut request = self.agent.request(method, url);
            if let Some(content_type) = content_type {
                request = request.set("Content-Type", content_type);
            }
            if let Some(accept) = accept {
                request = request.set("Accept", accept);
            }
            if let Some(header) = self.auth.header()? {
                request = request.set("Authorization", &header);
            }
            let result = match body {
                Some(body) => request.send_string(body),
                None => request.call(),
            };
            match result {
                Ok(response) => return Ok(response),
                Err(ureq::Error::Status(401, _)) if !retried && self.auth.invalidate() => {
                    tracing::debug!(url, "triple store rejected token, refreshing");
                    retried = true;
                }
                Err(ureq::Error::Status(status, response)) => {
                    let body = response.into_string().unwrap_or_default();
                    return Err(TripleStoreError::Rejected { status, body });
                }
                Err(ureq::Error::Transport(transport)) => {
                    return Err(TripleStoreError::Transport {
                        endpoint: url.to_string(),
                        message: transport.to_string(),
                    });
                }
            }
        }
    }

    fn query(&self, space: &SpaceId, query: &str, accept: &str) -> TripleStoreResult<ureq::Response> {
        let url = expand(&self.config.query_url, space);
        tracing::debug!(space = %space, %url, "sparql query");
        self.send("POST", &url, Some(SPARQL_QUERY), Some(accept), Some(query))
    }
}

impl TripleStore for HttpTripleStore {
    fn create_space(&self, space: &SpaceId) -> TripleStoreResult<()> {
        match &self.config.create_url {
            Some(template) => {
                let url = expand(template, space);
                match self.send("POST", &url, None, None, Some("")) {
                    // 409: dataset already exists.
                    Ok(_) | Err(TripleStoreError::Rejected { status: 409, .. }) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            // Datasets are provisioned externally; just make sure it is reachable.
            None => self.execute_ask(space, "ASK { }").map(|_| ()),
        }
    }

    fn drop_space(&self, space: &SpaceId) -> TripleStoreResult<()> {
        match &self.config.drop_url {
            Some(template) => {
                let url = expand(template, space);
                match self.send("DELETE", &url, None, None, None) {
                    Ok(_) | Err(TripleStoreError::Rejected { status: 404, .. }) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            None => self.clear_space(space),
        }
    }

    fn execute_update(&self, space: &SpaceId, update: &str) -> TripleStoreResult<()> {
        let url = expand(&self.config.update_url, space);
        tracing::debug!(space = %space, %url, bytes = update.len(), "sparql update");
        self.send("POST", &url, Some(SPARQL_UPDATE), None, Some(update))
            .map(|_| ())
    }

    fn execute_query(&self, space: &SpaceId, query: &str) -> TripleStoreResult<Vec<Solution>> {
        let response = self.query(space, query, SPARQL_RESULTS_JSON)?;
        results::decode_solutions(response.into_reader())
    }

    fn execute_ask(&self, space: &SpaceId, query: &str) -> TripleStoreResult<bool> {
        let response = self.query(space, query, SPARQL_RESULTS_JSON)?;
        results::decode_boolean(response.into_reader())
    }

    fn execute_construct(&self, space: &SpaceId, query: &str) -> TripleStoreResult<Vec<Quad>> {
        let response = self.query(space, query, N_TRIPLES)?;
        results::decode_ntriples(response.into_reader())
    }

    fn clear_space(&self, space: &SpaceId) -> TripleStoreResult<()> {
        self.execute_update(space, sparql::DROP_ALL)
    }
}

impl std::fmt::Debug for HttpTripleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTripleStore")
            .field("query_url", &self.config.query_url)
            .field("update_url", &self.config.update_url)
            .field("auth", &self.auth)
            .finish()
    }
}
