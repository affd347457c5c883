pub mod devto;
pub mod medium_rss;

use crate::ingest::types::{Source, SourceProvider};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub use devto::DevtoProvider;
pub use medium_rss::MediumRssProvider;

/// Medium tags followed by default.
pub const MEDIUM_TAGS: &[&str] = &["programming", "software-engineering", "artificial-intelligence"];

/// Source → provider. Sources without an entry are reported as unavailable by the pipeline.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    providers: BTreeMap<Source, Arc<dyn SourceProvider>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the provider's own source, replacing any earlier one.
    pub fn register(&mut self, provider: Arc<dyn SourceProvider>) -> &mut Self {
        self.providers.insert(provider.source(), provider);
        self
    }

    pub fn with(mut self, provider: Arc<dyn SourceProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, source: Source) -> Option<Arc<dyn SourceProvider>> {
        self.providers.get(&source).cloned()
    }

    pub fn sources(&self) -> Vec<Source> {
        self.providers.keys().copied().collect()
    }

    /// Live HTTP providers for the sources this crate can fetch itself.
    pub fn http_default() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("devport-ingest/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self::new()
            .with(Arc::new(DevtoProvider::from_api(client.clone(), 7, 30)))
            .with(Arc::new(MediumRssProvider::from_tags(MEDIUM_TAGS, client))))
    }
}
