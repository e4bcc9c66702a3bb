//! Transform hooks, registered by name and resolved once at startup.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::errors::RecordError;
use search_sync_shared::RawDocument;

/// Signature every transform hook conforms to.
pub type TransformFn = Arc<dyn Fn(RawDocument) -> Result<RawDocument, String> + Send + Sync>;

/// Named transform hooks that table configurations can refer to.
#[derive(Clone, Default)]
pub struct TransformRegistry {
    hooks: HashMap<String, TransformFn>,
}

impl TransformRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the bundled `transformers.*` hooks.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::builtins::register(&mut registry);
        registry
    }

    /// Register `hook` under `name`, replacing any previous hook of that name.
    pub fn register<F>(&mut self, name: impl Into<String>, hook: F)
    where
        F: Fn(RawDocument) -> Result<RawDocument, String> + Send + Sync + 'static,
    {
        self.hooks.insert(name.into(), Arc::new(hook));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.hooks.contains_key(name)
    }

    pub fn resolve(&self, name: &str) -> Option<TransformHook> {
        self.hooks.get(name).map(|hook| TransformHook {
            name: name.to_string(),
            hook: Arc::clone(hook),
        })
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.hooks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("hooks", &self.names())
            .finish()
    }
}

/// A resolved hook.
#[derive(Clone)]
pub struct TransformHook {
    name: String,
    hook: TransformFn,
}

impl TransformHook {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the hook on `document`. Errors and panics inside the hook become
    /// [`RecordError::Transform`].
    pub fn apply(&self, document: RawDocument) -> Result<RawDocument, RecordError> {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.hook)(document))) {
            Ok(Ok(document)) => Ok(document),
            Ok(Err(msg)) => Err(RecordError::Transform(format!("{}: {}", self.name, msg))),
            Err(payload) => Err(RecordError::Transform(format!(
                "{} panicked: {}",
                self.name,
                panic_message(payload.as_ref())
            ))),
        }
    }
}

impl fmt::Debug for TransformHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformHook")
            .field("name", &self.name)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use search_sync_shared::SourceValue;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = TransformRegistry::new();
        registry.register("upper", |mut doc: RawDocument| {
            if let Some(SourceValue::Text(name)) = doc.get_mut("name") {
                *name = name.to_uppercase();
            }
            Ok(doc)
        });

        let hook = registry.resolve("upper").unwrap();
        let mut document = RawDocument::new();
        document.insert("name".to_string(), SourceValue::from("lamp"));

        let document = hook.apply(document).unwrap();
        assert_eq!(document.get("name"), Some(&SourceValue::from("LAMP")));
        assert!(registry.resolve("missing").is_none());
    }

    #[test]
    fn test_hook_error_is_record_local() {
        let mut registry = TransformRegistry::new();
        registry.register("reject", |_doc: RawDocument| Err("bad row".to_string()));

        let err = registry.resolve("reject").unwrap().apply(RawDocument::new()).unwrap_err();
        assert_eq!(err, RecordError::Transform("reject: bad row".to_string()));
    }

    #[test]
    fn test_hook_panic_is_caught() {
        let mut registry = TransformRegistry::new();
        registry.register("boom", |_doc: RawDocument| -> Result<RawDocument, String> {
            panic!("kaboom")
        });

        let err = registry.resolve("boom").unwrap().apply(RawDocument::new()).unwrap_err();
        assert!(matches!(err, RecordError::Transform(msg) if msg.contains("kaboom")));
    }

    #[test]
    fn test_builtins_registered() {
        let registry = TransformRegistry::with_builtins();
        assert_eq!(
            registry.names(),
            vec![
                "transformers.transform_product",
                "transformers.transform_tender",
                "transformers.transform_user",
            ]
        );
    }
}
