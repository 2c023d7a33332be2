//! Request attribute bag.

use std::{any::Any, collections::HashMap, fmt};

/// Key of the [MultipartConfig](crate::limits::MultipartConfig) attached by
/// the dispatch layer.
pub const MULTIPART_CONFIG: &str = "form_gate.multipart.config";

/// Key of the `Vec<String>` of tolerated multipart violation codes.
pub const VIOLATIONS: &str = "form_gate.multipart.violations";

/// String-keyed values attached to a request by the layers around it.
///
/// Cleared when the request completes.
#[derive(Default)]
pub struct Attributes {
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `name`, returning `true` when a previous value
    /// was replaced.
    pub fn insert<N: Into<String>, T: Any + Send + Sync>(&mut self, name: N, value: T) -> bool {
        self.values.insert(name.into(), Box::new(value)).is_some()
    }

    /// Value under `name`, if present and of type `T`.
    pub fn get<T: Any>(&self, name: &str) -> Option<&T> {
        self.values.get(name)?.downcast_ref()
    }

    pub fn get_mut<T: Any>(&mut self, name: &str) -> Option<&mut T> {
        self.values.get_mut(name)?.downcast_mut()
    }

    /// Removes `name`, returning its value when it was of type `T`.
    pub fn remove<T: Any>(&mut self, name: &str) -> Option<T> {
        self.values
            .remove(name)?
            .downcast::<T>()
            .ok()
            .map(|boxed| *boxed)
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}
