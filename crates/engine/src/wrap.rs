//! Deferred proxies for registered helpers.
//!
//! Calling a proxy never runs the helper. It records the call in the engine's
//! invocation store and returns the token standing in for the eventual result.

use std::sync::{Arc, Weak};

use anyhow::anyhow;
use indexmap::IndexMap;

use crate::{
    engine::{EngineState, HelperEngine},
    error::EngineError,
    helper::Helper,
    options::WrapOptions,
};

/// Name recorded for helpers that were wrapped by value rather than by name.
pub const ANONYMOUS_HELPER: &str = "anonymous";

/// What to wrap: a registered helper by name, or a helper value.
#[derive(Debug, Clone)]
pub enum HelperSource {
    Name(String),
    Helper(Helper),
}

impl From<&str> for HelperSource {
    fn from(name: &str) -> Self {
        HelperSource::Name(name.to_string())
    }
}

impl From<String> for HelperSource {
    fn from(name: String) -> Self {
        HelperSource::Name(name)
    }
}

impl From<Helper> for HelperSource {
    fn from(helper: Helper) -> Self {
        HelperSource::Helper(helper)
    }
}

impl HelperEngine {
    /// Returns a deferred proxy for `source`, or the raw helper when
    /// `options.wrap` is false.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when `source` names a helper that is
    /// not registered.
    pub fn wrap_helper(&self, source: impl Into<HelperSource>, options: WrapOptions) -> Result<Helper, EngineError> {
        let (name, helper) = match source.into() {
            HelperSource::Name(name) => {
                let helper = self.helper(&name).ok_or_else(|| EngineError::not_found(&name))?;
                (name, helper)
            }
            HelperSource::Helper(helper) => (ANONYMOUS_HELPER.to_string(), helper),
        };

        if options.wrap {
            Ok(deferred_proxy(&self.state, name, helper))
        } else {
            Ok(helper)
        }
    }

    /// The helper registered under `name`, wrapped or raw per `options`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when nothing is registered under `name`.
    pub fn get(&self, name: &str, options: WrapOptions) -> Result<Helper, EngineError> {
        self.wrap_helper(name, options)
    }

    /// Every registered helper by name, in registration order, wrapped or raw per `options`.
    pub fn wrap_all(&self, options: WrapOptions) -> IndexMap<String, Helper> {
        let registry = self.state.registry();
        registry
            .iter()
            .map(|descriptor| {
                let helper = if options.wrap {
                    deferred_proxy(&self.state, descriptor.name.clone(), descriptor.helper.clone())
                } else {
                    descriptor.helper.clone()
                };
                (descriptor.name.clone(), helper)
            })
            .collect()
    }
}

/// Builds the synchronous proxy that records calls of `helper` under `name`.
///
/// The proxy holds the engine weakly; a record may keep a proxy alive when a
/// proxy is itself wrapped by value.
fn deferred_proxy(state: &Arc<EngineState>, name: String, helper: Helper) -> Helper {
    let engine: Weak<EngineState> = Arc::downgrade(state);
    Helper::sync(move |args| {
        let state = engine
            .upgrade()
            .ok_or_else(|| anyhow!("helper engine for `{name}` has been dropped"))?;
        Ok(state.issue(&name, &helper, args).into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use deferred_types::Value;

    fn engine_with_upper() -> HelperEngine {
        let engine = HelperEngine::with_defaults();
        engine.set(
            "upper",
            Helper::sync(|args| {
                let text = args.first().and_then(Value::as_str).unwrap_or_default();
                Ok(Value::from(text.to_uppercase()))
            }),
        );
        engine
    }

    #[test]
    fn wrapped_helpers_return_sequential_tokens() {
        let engine = engine_with_upper();
        let upper = engine.get("upper", WrapOptions::wrapped()).expect("wrapped");
        assert!(!upper.is_async());

        let instance = engine.instance_index();
        for invocation in 0..3 {
            let token = upper.call(vec!["doowb".into()]).expect("token");
            let expected = format!("{{$ASYNCID${instance}${invocation}$}}");
            assert_eq!(token.as_str(), Some(expected.as_str()));
        }
        assert_eq!(engine.pending_count(), 3);
    }

    #[test]
    fn records_keep_the_name_helper_and_arguments() {
        let engine = engine_with_upper();
        let upper = engine.get("upper", WrapOptions::wrapped()).expect("wrapped");
        let token = upper.call(vec!["doowb".into(), Value::from(2)]).expect("token");

        let record = engine.record(token.as_str().expect("token text")).expect("record");
        assert_eq!(record.helper_name(), "upper");
        assert!(record.helper().ptr_eq(&engine.helper("upper").expect("raw")));
        assert_eq!(record.args(), &[Value::from("doowb"), Value::from(2)]);
        assert!(!record.is_resolved());
    }

    #[test]
    fn raw_requests_return_the_registered_helper() {
        let engine = engine_with_upper();
        let raw = engine.get("upper", WrapOptions::raw()).expect("raw");
        assert!(raw.ptr_eq(&engine.helper("upper").expect("registered")));
        assert_eq!(raw.call(vec!["doowb".into()]).expect("value"), Value::from("DOOWB"));
        assert_eq!(engine.invocation_count(), 0);
    }

    #[test]
    fn unknown_names_are_not_found() {
        let engine = engine_with_upper();
        let error = engine.get("lower", WrapOptions::wrapped()).expect_err("missing");
        assert_eq!(error, EngineError::not_found("lower"));
    }

    #[test]
    fn helpers_wrapped_by_value_are_anonymous() {
        let engine = HelperEngine::with_defaults();
        let helper = Helper::sync(|_| Ok(Value::from("value")));
        let proxy = engine.wrap_helper(helper.clone(), WrapOptions::wrapped()).expect("proxy");
        let token = proxy.call(Vec::new()).expect("token");

        let record = engine.record(token.as_str().expect("token text")).expect("record");
        assert_eq!(record.helper_name(), ANONYMOUS_HELPER);
        assert!(record.helper().ptr_eq(&helper));

        let raw = engine.wrap_helper(helper.clone(), WrapOptions::raw()).expect("raw");
        assert!(raw.ptr_eq(&helper));
    }

    #[test]
    fn async_helpers_get_sync_proxies() {
        let engine = HelperEngine::with_defaults();
        engine.set(
            "fetch",
            Helper::asynchronous(|_, completion| {
                completion.succeed("fetched");
                Ok(())
            }),
        );
        let proxy = engine.get("fetch", WrapOptions::wrapped()).expect("proxy");
        assert!(!proxy.is_async());
        assert!(engine.matches(proxy.call(Vec::new()).expect("token").as_str().expect("text")));
    }

    #[test]
    fn wrap_all_covers_every_registered_helper_in_order() {
        let engine = engine_with_upper();
        engine.set("lower", Helper::sync(|_| Ok(Value::Null)));

        let wrapped = engine.wrap_all(WrapOptions::wrapped());
        assert_eq!(wrapped.keys().collect::<Vec<_>>(), vec!["upper", "lower"]);
        let token = wrapped["lower"].call(Vec::new()).expect("token");
        assert!(engine.matches(token.as_str().expect("text")));

        let raw = engine.wrap_all(WrapOptions::raw());
        assert!(raw["upper"].ptr_eq(&engine.helper("upper").expect("registered")));
    }

    #[test]
    fn proxies_fail_once_the_engine_is_dropped() {
        let engine = engine_with_upper();
        let upper = engine.get("upper", WrapOptions::wrapped()).expect("wrapped");
        drop(engine);
        let error = upper.call(Vec::new()).expect_err("engine dropped");
        assert!(error.to_string().contains("has been dropped"));
    }
}
