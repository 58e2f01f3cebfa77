use std::{collections::HashMap, fmt, sync::Arc};

use portal_core_db::models::coplet::CopletInstanceData;

/// Hooks a coplet type runs when its instances enter or leave a session.
pub trait CopletAdapter: Send + Sync {
    fn login(&self, instance: &CopletInstanceData);

    fn logout(&self, instance: &CopletInstanceData);
}

/// Adapters keyed by the name coplet base data refers to them with.
#[derive(Clone, Default)]
pub struct CopletAdapterRegistry {
    adapters: HashMap<String, Arc<dyn CopletAdapter>>,
}

impl fmt::Debug for CopletAdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.adapters.keys().collect();
        names.sort();
        f.debug_struct("CopletAdapterRegistry")
            .field("adapters", &names)
            .finish()
    }
}

impl CopletAdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, adapter: Arc<dyn CopletAdapter>) {
        let name = name.into();
        if self.adapters.insert(name.clone(), adapter).is_some() {
            tracing::warn!("Replaced coplet adapter {}", name);
        }
    }

    pub fn with_adapter(mut self, name: impl Into<String>, adapter: Arc<dyn CopletAdapter>) -> Self {
        self.register(name, adapter);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn CopletAdapter>> {
        self.adapters.get(name)
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
