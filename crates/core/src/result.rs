//! Result type definition and extension traits for Railway-Oriented Programming.
//!
//! Provides combinators that let controller code express the common
//! "a missing object is not a failure" cases without unwrap/expect/panic.

use crate::error::Error;

/// The standard Result type for controller operations.
///
/// # Examples
///
/// ```ignore
/// // The object may be gone once the last finalizer is released
/// let written = backend.update(object).await.ignore_not_found()?;
/// if let Some(written) = written {
///     store.observe(&written).await;
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait providing safe combinators for Results.
pub trait ResultExt<T> {
    /// Turn `NotFound` into `Ok(None)`, keeping every other error.
    ///
    /// # Errors
    ///
    /// Returns the original error unless it is `NotFound`.
    fn ignore_not_found(self) -> Result<Option<T>>;
}

impl<T> ResultExt<T> for Result<T> {
    fn ignore_not_found(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Extension trait for Option types providing Railway-style operations.
pub trait OptionExt<T> {
    /// Convert Option to Result with a lazy error.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `err` when the option is `None`.
    fn ok_or_else_lazy<F: FnOnce() -> Error>(self, err: F) -> Result<T>;

    /// Tap into None without consuming the Option.
    fn tap_none<F: FnOnce()>(self, f: F) -> Self;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_else_lazy<F: FnOnce() -> Error>(self, err: F) -> Result<T> {
        self.ok_or_else(err)
    }

    fn tap_none<F: FnOnce()>(self, f: F) -> Self {
        if self.is_none() {
            f();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::ObjectKey;
    use crate::resource::ResourceKind;

    #[test]
    fn test_ignore_not_found_maps_to_none() {
        let result: Result<i32> = Err(Error::not_found(
            ResourceKind::GlobalObject,
            ObjectKey::new("default", "gone"),
        ));
        assert_eq!(result.ignore_not_found(), Ok(None));
    }

    #[test]
    fn test_ignore_not_found_keeps_other_errors() {
        let result: Result<i32> = Err(Error::transient("list", "connection reset"));
        assert!(result.ignore_not_found().is_err());
    }

    #[test]
    fn test_ignore_not_found_passes_values() {
        let result: Result<i32> = Ok(7);
        assert_eq!(result.ignore_not_found(), Ok(Some(7)));
    }

    #[test]
    fn test_tap_none() {
        let mut called = false;
        let value: Option<i32> = None;
        let _ = value.tap_none(|| called = true);
        assert!(called);
    }

    #[test]
    fn test_ok_or_else_lazy() {
        let value: Option<i32> = None;
        let result = value.ok_or_else_lazy(|| Error::malformed("missing"));
        assert!(matches!(result, Err(Error::Malformed { .. })));
    }
}
