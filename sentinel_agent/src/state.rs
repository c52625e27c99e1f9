//! Shared agent state handed to every handler.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use crate::broadcast::Broadcaster;
use crate::classifier::Classifier;
use crate::config::AgentConfig;
use crate::pipeline::Pipeline;
use crate::query::QueryService;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub broadcaster: Arc<Broadcaster>,
    pub query: QueryService,

    // Open /ws connections, reported by /health
    pub client_count: Arc<AtomicUsize>,
    pub auth_token: Option<String>,
}

impl AppState {
    /// Wires store, classifier and broadcaster together from `cfg`.
    pub fn new(cfg: &AgentConfig, store: Arc<dyn Store>) -> anyhow::Result<Self> {
        let classifier = Classifier::new(&cfg.classifier)?;
        let broadcaster = Arc::new(Broadcaster::new(cfg.broadcast.subscriber_buffer));
        let pipeline = Arc::new(Pipeline::new(store.clone(), classifier, broadcaster.clone()));
        Ok(Self {
            query: QueryService::new(store, &cfg.query),
            pipeline,
            broadcaster,
            client_count: Arc::new(AtomicUsize::new(0)),
            auth_token: cfg.auth_token.clone(),
        })
    }

    pub fn authorized(&self, token: Option<&String>) -> bool {
        match self.auth_token.as_ref() {
            Some(expected) => token == Some(expected),
            None => true,
        }
    }
}
