use std::{any::Any, sync::Arc};

use dashmap::DashMap;

pub type SessionValue = Arc<dyn Any + Send + Sync>;

/// Per-session attribute storage provided by the hosting web layer.
pub trait SessionStore: Send + Sync {
    fn get_attribute(&self, name: &str) -> Option<SessionValue>;

    fn set_attribute(&self, name: &str, value: SessionValue);

    fn remove_attribute(&self, name: &str);
}

/// Fetch an attribute and downcast it; a value of another type reads as absent.
pub fn get_typed_attribute<T: Any + Send + Sync>(
    session: &dyn SessionStore,
    name: &str,
) -> Option<Arc<T>> {
    session.get_attribute(name)?.downcast::<T>().ok()
}

#[derive(Default)]
pub struct InMemorySession {
    attributes: DashMap<String, SessionValue>,
}

impl InMemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attribute_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.attributes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl SessionStore for InMemorySession {
    fn get_attribute(&self, name: &str) -> Option<SessionValue> {
        self.attributes.get(name).map(|value| Arc::clone(value.value()))
    }

    fn set_attribute(&self, name: &str, value: SessionValue) {
        self.attributes.insert(name.to_string(), value);
    }

    fn remove_attribute(&self, name: &str) {
        self.attributes.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_lookup_checks_the_type() {
        let session = InMemorySession::new();
        session.set_attribute("count", Arc::new(3_u32));

        assert_eq!(get_typed_attribute::<u32>(&session, "count").as_deref(), Some(&3));
        assert!(get_typed_attribute::<String>(&session, "count").is_none());
        assert!(get_typed_attribute::<u32>(&session, "missing").is_none());

        session.remove_attribute("count");
        assert!(session.attribute_names().is_empty());
    }
}
