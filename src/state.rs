//! Shared handler state.

use crate::services::{
    conversion_service::Converter, lifecycle::LifecycleManager, password_resolver::PasswordResolver,
    reassembler::Reassembler, storage_service::BlobStore,
};
use chrono::Duration;
use std::sync::Arc;

/// Everything a request handler needs. Cloned per request; all members are
/// cheap handles over the same store.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BlobStore>,
    pub lifecycle: LifecycleManager,
    pub reassembler: Reassembler,
    pub converter: Converter,
}

impl AppState {
    pub fn new(store: Arc<dyn BlobStore>, ttl: Duration, resolver: PasswordResolver) -> Self {
        let lifecycle = LifecycleManager::new(store.clone(), ttl);
        Self {
            reassembler: Reassembler::new(store.clone(), lifecycle.clone()),
            converter: Converter::new(store.clone(), lifecycle.clone(), resolver),
            lifecycle,
            store,
        }
    }
}
