//! Endpoint descriptors and the lookup tables that resolve them.

use std::collections::HashMap;

use crate::config::{DependencyConfig, ServerConfig};
use crate::errors::ClientError;

const RUN_PREDICT: &str = "run/predict";

/// A callable function exposed by the remote server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub index: usize,
    pub api_name: Option<String>,
    pub skips_queue: bool,
    /// False for functions that run only in the browser; those cannot be called.
    pub backend_fn: bool,
    /// Relative path for the direct (skip-queue) call.
    pub uri: String,
}

impl Endpoint {
    pub fn new(config: &ServerConfig, index: usize, dependency: &DependencyConfig) -> Self {
        let api_name = dependency
            .api_name
            .as_deref()
            .map(normalize_api_name)
            .filter(|name| !name.is_empty());
        let skips_queue = !dependency.queue.unwrap_or(config.enable_queue);
        let uri = match &api_name {
            Some(name) => format!("run/{name}"),
            None => RUN_PREDICT.to_string(),
        };
        Self {
            index,
            api_name,
            skips_queue,
            backend_fn: dependency.backend_fn,
            uri,
        }
    }
}

impl Endpoint {
    /// Fails for functions the server cannot run.
    pub fn ensure_callable(&self) -> Result<(), ClientError> {
        if self.backend_fn {
            return Ok(());
        }
        Err(ClientError::invalid_argument(format!(
            "endpoint {} has no backend function",
            self.index
        )))
    }
}

/// How a caller names the endpoint to invoke.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndpointSelector {
    Name(String),
    Index(usize),
}

impl EndpointSelector {
    /// Builds a selector from the optional name/index pair a caller supplies.
    /// Exactly one of the two must be present.
    pub fn from_parts(api_name: Option<&str>, fn_index: Option<usize>) -> Result<Self, ClientError> {
        match (api_name, fn_index) {
            (Some(name), None) => Ok(Self::Name(name.to_string())),
            (None, Some(index)) => Ok(Self::Index(index)),
            (None, None) => Err(ClientError::invalid_argument(
                "an api name or a function index is required",
            )),
            (Some(_), Some(_)) => Err(ClientError::invalid_argument(
                "supply either an api name or a function index, not both",
            )),
        }
    }
}

impl From<&str> for EndpointSelector {
    fn from(value: &str) -> Self {
        Self::Name(value.to_string())
    }
}

impl From<String> for EndpointSelector {
    fn from(value: String) -> Self {
        Self::Name(value)
    }
}

impl From<usize> for EndpointSelector {
    fn from(value: usize) -> Self {
        Self::Index(value)
    }
}

/// Endpoints indexed by position, with a second table for named ones.
#[derive(Clone, Debug, Default)]
pub struct EndpointTable {
    by_index: Vec<Endpoint>,
    by_name: HashMap<String, usize>,
}

impl EndpointTable {
    pub fn from_config(config: &ServerConfig) -> Result<Self, ClientError> {
        let mut table = Self::default();
        for (index, dependency) in config.dependencies.iter().enumerate() {
            let endpoint = Endpoint::new(config, index, dependency);
            if let Some(name) = &endpoint.api_name {
                if table.by_name.insert(name.clone(), index).is_some() {
                    return Err(ClientError::InvalidConfiguration(format!(
                        "api name '{name}' is declared by more than one dependency"
                    )));
                }
            }
            table.by_index.push(endpoint);
        }
        tracing::debug!(
            endpoints = table.by_index.len(),
            named = table.by_name.len(),
            "registered endpoints"
        );
        Ok(table)
    }

    pub fn resolve(&self, selector: &EndpointSelector) -> Result<&Endpoint, ClientError> {
        let found = match selector {
            EndpointSelector::Name(name) => self
                .by_name
                .get(&normalize_api_name(name))
                .and_then(|index| self.by_index.get(*index)),
            EndpointSelector::Index(index) => self.by_index.get(*index),
        };
        found.ok_or_else(|| ClientError::invalid_argument(format!("endpoint not found: {selector:?}")))
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.by_index.iter()
    }
}

fn normalize_api_name(name: &str) -> String {
    name.replace('/', "")
}
