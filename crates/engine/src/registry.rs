//! Name-keyed helper registry.

use indexmap::IndexMap;

use crate::helper::Helper;

/// A registered helper together with the name it was registered under.
#[derive(Debug, Clone)]
pub struct HelperDescriptor {
    pub name: String,
    pub helper: Helper,
}

impl HelperDescriptor {
    pub fn is_async(&self) -> bool {
        self.helper.is_async()
    }
}

/// Helpers by name, in registration order.
///
/// Registration never validates arity; re-registering a name replaces the
/// previous helper.
#[derive(Debug, Default)]
pub struct HelperRegistry {
    helpers: IndexMap<String, HelperDescriptor>,
}

impl HelperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `helper` under `name`, returning the descriptor it replaced.
    pub fn set(&mut self, name: impl Into<String>, helper: Helper) -> Option<HelperDescriptor> {
        let name = name.into();
        self.helpers.insert(name.clone(), HelperDescriptor { name, helper })
    }

    /// The raw helper registered under `name`.
    pub fn get(&self, name: &str) -> Option<&Helper> {
        self.helpers.get(name).map(|descriptor| &descriptor.helper)
    }

    pub fn descriptor(&self, name: &str) -> Option<&HelperDescriptor> {
        self.helpers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.helpers.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HelperDescriptor> {
        self.helpers.values()
    }

    pub fn len(&self) -> usize {
        self.helpers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.helpers.is_empty()
    }

    pub fn clear(&mut self) {
        self.helpers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use deferred_types::Value;

    #[test]
    fn set_records_sync_and_async_helpers() {
        let mut registry = HelperRegistry::new();
        registry.set("upper", Helper::sync(|_| Ok(Value::Null)));
        registry.set(
            "fetch",
            Helper::asynchronous(|_, completion| {
                completion.succeed(Value::Null);
                Ok(())
            }),
        );

        assert_eq!(registry.names(), vec!["upper", "fetch"]);
        assert!(!registry.descriptor("upper").expect("upper").is_async());
        assert!(registry.descriptor("fetch").expect("fetch").is_async());
    }

    #[test]
    fn set_overwrites_silently_and_returns_previous() {
        let mut registry = HelperRegistry::new();
        let first = Helper::sync(|_| Ok(Value::from(1)));
        let second = Helper::sync(|_| Err(anyhow!("second")));

        assert!(registry.set("helper", first.clone()).is_none());
        let replaced = registry.set("helper", second.clone()).expect("previous descriptor");
        assert!(replaced.helper.ptr_eq(&first));
        assert!(registry.get("helper").expect("helper").ptr_eq(&second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn get_returns_none_for_unknown_names_and_clear_empties() {
        let mut registry = HelperRegistry::new();
        registry.set("upper", Helper::sync(|_| Ok(Value::Null)));
        assert!(registry.get("lower").is_none());
        assert!(registry.contains("upper"));

        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.iter().next().is_none());
    }
}
