//! Set of URLs with an active transfer.

use std::collections::HashSet;

use parking_lot::Mutex;

/// URLs currently being transferred.
///
/// Shared between engines by `Arc`; each pipeline owns its own set.
#[derive(Debug, Default)]
pub struct InFlightSet {
    urls: Mutex<HashSet<String>>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `url` as in flight, or return `None` if it already is.
    ///
    /// The marker is removed when the returned guard drops.
    pub fn try_acquire(&self, url: &str) -> Option<InFlightGuard<'_>> {
        if self.urls.lock().insert(url.to_string()) {
            Some(InFlightGuard {
                set: self,
                url: url.to_string(),
            })
        } else {
            None
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.lock().contains(url)
    }

    pub fn len(&self) -> usize {
        self.urls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.lock().is_empty()
    }
}

/// Releases an in-flight marker on drop.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    set: &'a InFlightSet,
    url: String,
}

impl InFlightGuard<'_> {
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.urls.lock().remove(&self.url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let set = InFlightSet::new();
        let guard = set.try_acquire("http://x/a.zip").unwrap();
        assert_eq!(guard.url(), "http://x/a.zip");
        assert!(set.try_acquire("http://x/a.zip").is_none());
        assert!(set.try_acquire("http://x/b.zip").is_some());
        assert!(set.contains("http://x/a.zip"));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let set = InFlightSet::new();
        {
            let _guard = set.try_acquire("u").unwrap();
            assert_eq!(set.len(), 1);
        }
        assert!(set.is_empty());
        assert!(set.try_acquire("u").is_some());
    }

    #[test]
    fn test_guard_releases_on_panic() {
        let set = InFlightSet::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = set.try_acquire("u").unwrap();
            panic!("transfer blew up");
        }));
        assert!(result.is_err());
        assert!(set.is_empty());
    }
}
