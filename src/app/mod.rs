//! Client-side state: paginated lists, thread cache, and mutations.

pub mod editor;
pub mod list_state;
pub mod mutations;
pub mod sync;
pub mod threads;

use crate::api::client::ApiClient;
use crate::app::mutations::MutationCoordinator;
use crate::app::sync::ThreadSync;
use crate::config::AppConfig;
use crate::session::store::FileSessionStore;
use anyhow::Context;
use std::sync::Arc;

/// Everything a command needs: the API client, the cache reader, and the
/// mutation coordinator, all sharing one session.
#[derive(Clone)]
pub struct App {
    sync: ThreadSync,
    mutations: MutationCoordinator,
}

impl App {
    /// Connects to the configured backend with the on-disk session.
    pub fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let store = Arc::new(FileSessionStore::new(config.session_path.clone()));
        let client = ApiClient::connect(&config.api, store)
            .with_context(|| format!("failed to create client for {}", config.api.base_url))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: ApiClient) -> Self {
        let sync = ThreadSync::new(client);
        Self {
            mutations: MutationCoordinator::new(sync.clone()),
            sync,
        }
    }

    pub fn client(&self) -> &ApiClient {
        self.sync.client()
    }

    pub fn sync(&self) -> &ThreadSync {
        &self.sync
    }

    pub fn mutations(&self) -> &MutationCoordinator {
        &self.mutations
    }
}
