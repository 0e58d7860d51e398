//! `EnvVar`: a typed bag of values shared with callable task actions.
//!
//! Generalized from dagrs's `engine::EnvVar`/`Content`, dropping the task-output
//! piping dagrs uses it for (anadama tasks integrate through tracked objects,
//! not through returned action output) while keeping the named-slot, typed-get
//! shape callers already expect.

use std::any::Any;
use std::collections::HashMap;

#[derive(Default)]
pub struct EnvVar {
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl EnvVar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Send + Sync + 'static>(&mut self, key: impl Into<String>, val: T) {
        self.values.insert(key.into(), Box::new(val));
    }

    pub fn get<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>()).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

impl std::fmt::Debug for EnvVar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvVar").field("keys", &self.values.keys().collect::<Vec<_>>()).finish()
    }
}
