use std::sync::Arc;

use arc_swap::ArcSwap;

use super::app_config::AppConfig;

/// Shared, swappable handle to the loaded configuration. Consumers call
/// `current()` at the point of use rather than caching a borrowed field
/// across an await point, so a future hot-reload signal can replace the
/// whole document without anyone holding a stale reference.
#[derive(Clone)]
pub struct ConfigHandle(Arc<ArcSwap<AppConfig>>);

impl ConfigHandle {
    pub fn new(config: AppConfig) -> Self {
        Self(Arc::new(ArcSwap::from_pointee(config)))
    }

    pub fn current(&self) -> Arc<AppConfig> {
        self.0.load_full()
    }

    pub fn replace(&self, config: AppConfig) {
        self.0.store(Arc::new(config));
    }
}
