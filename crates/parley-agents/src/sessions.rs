use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parley_common::{Error, ProviderId, Result, SessionId, TimedResult};
use parley_config::{HistoryConfig, ToolsConfig};
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::handler::{ProviderHandler, TurnOptions};
use crate::history::{HistoryRecord, HistorySink};
use crate::providers::LlmProvider;
use crate::tools::ToolHost;

type HandlerFactory = dyn Fn(&SessionId, &ProviderId) -> Option<ProviderHandler> + Send + Sync;

/// Lazily creates one [`ProviderHandler`] per (session, provider) pair.
///
/// Different pairs run concurrently; turns on the same pair queue on its lock.
pub struct SessionRegistry {
    handlers: DashMap<(SessionId, ProviderId), Arc<Mutex<ProviderHandler>>>,
    factory: Box<HandlerFactory>,
}

impl SessionRegistry {
    pub fn new(
        factory: impl Fn(&SessionId, &ProviderId) -> Option<ProviderHandler> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handlers: DashMap::new(),
            factory: Box::new(factory),
        }
    }

    /// Registry over a fixed provider set, sharing one optional tool host.
    pub fn from_providers(
        providers: Vec<Arc<dyn LlmProvider>>,
        history: HistoryConfig,
        tools: ToolsConfig,
        tool_host: Option<Arc<dyn ToolHost>>,
        events: Option<UnboundedSender<HistoryRecord>>,
    ) -> Self {
        let providers: HashMap<String, Arc<dyn LlmProvider>> = providers
            .into_iter()
            .map(|p| (p.provider_id().to_string(), p))
            .collect();

        Self::new(move |session, provider_id| {
            let provider = providers.get(provider_id.as_str())?;
            let mut handler = ProviderHandler::from_config(Arc::clone(provider), &history, &tools);
            if let Some(host) = &tool_host {
                handler = handler.with_tool_host(Arc::clone(host));
            }
            if let Some(tx) = &events {
                handler = handler.with_history_sink(HistorySink::new(
                    session.clone(),
                    provider_id.clone(),
                    tx.clone(),
                ));
            }
            Some(handler)
        })
    }

    /// The handler for this pair, created on first use. `None` if the
    /// provider is unknown.
    pub fn handler(
        &self,
        session: &SessionId,
        provider: &ProviderId,
    ) -> Option<Arc<Mutex<ProviderHandler>>> {
        let key = (session.clone(), provider.clone());
        if let Some(existing) = self.handlers.get(&key) {
            return Some(Arc::clone(existing.value()));
        }

        let created = Arc::new(Mutex::new((self.factory)(session, provider)?));
        debug!(%session, %provider, "created provider handler");
        // A concurrent caller may have won the race; keep whichever landed first.
        let entry = self.handlers.entry(key).or_insert(created);
        Some(Arc::clone(entry.value()))
    }

    pub async fn process_message(
        &self,
        session: &SessionId,
        provider: &ProviderId,
        user_text: &str,
        options: &TurnOptions,
    ) -> Result<TimedResult> {
        let handler = self
            .handler(session, provider)
            .ok_or_else(|| Error::Config(format!("unknown provider '{provider}'")))?;
        let mut handler = handler.lock().await;
        Ok(handler.process_message(user_text, options).await)
    }

    /// Returns `false` if the pair has no handler yet.
    pub async fn clear_history(&self, session: &SessionId, provider: &ProviderId) -> bool {
        let handler = self
            .handlers
            .get(&(session.clone(), provider.clone()))
            .map(|entry| Arc::clone(entry.value()));
        match handler {
            Some(handler) => {
                handler.lock().await.clear_history();
                true
            }
            None => false,
        }
    }

    /// Forget every handler of a session; returns how many were dropped.
    pub fn remove_session(&self, session: &SessionId) -> usize {
        let mut removed = 0;
        self.handlers.retain(|(s, _), _| {
            let keep = s != session;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
