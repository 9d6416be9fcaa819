use std::time::Instant;

use handoff_core::ContinuationBase;

use crate::store::{StoreHandle, TokenStore};

#[derive(Clone)]
pub struct AppState {
    start: Instant,
    store: StoreHandle,
    links: ContinuationBase,
}

impl AppState {
    pub fn new(store: StoreHandle, links: ContinuationBase) -> Self {
        Self {
            start: Instant::now(),
            store,
            links,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start.elapsed().as_secs()
    }

    pub fn store(&self) -> &dyn TokenStore {
        self.store.as_ref()
    }

    /// Builds continuation links for issued tokens.
    pub fn links(&self) -> &ContinuationBase {
        &self.links
    }
}
