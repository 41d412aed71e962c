use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

/// Per-path quiet-period tracking.
///
/// Every notification for a path pushes its deadline out by the window; a
/// path is handed back once nothing has touched it for a full window.
#[derive(Debug)]
pub(crate) struct Debouncer {
    window: Duration,
    deadlines: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            deadlines: HashMap::new(),
        }
    }

    pub(crate) fn touch(&mut self, path: PathBuf, now: Instant) {
        self.deadlines.insert(path, now + self.window);
    }

    /// Stop tracking `path`. Returns whether it was pending.
    pub(crate) fn forget(&mut self, path: &Path) -> bool {
        self.deadlines.remove(path).is_some()
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return every path whose quiet period is over, oldest
    /// deadline first.
    pub(crate) fn take_due(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut due: Vec<(Instant, PathBuf)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(path, deadline)| (*deadline, path.clone()))
            .collect();
        due.sort();
        for (_, path) in &due {
            self.deadlines.remove(path);
        }
        due.into_iter().map(|(_, path)| path).collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(100);

    #[test]
    fn burst_on_one_path_collapses_to_one_release() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        let path = PathBuf::from("/downloads/a.pmp");

        debouncer.touch(path.clone(), start);
        debouncer.touch(path.clone(), start + Duration::from_millis(60));
        debouncer.touch(path.clone(), start + Duration::from_millis(120));

        assert!(debouncer.take_due(start + WINDOW).is_empty());
        assert_eq!(
            debouncer.take_due(start + Duration::from_millis(220)),
            vec![path]
        );
        assert!(debouncer.is_empty());
    }

    #[test]
    fn paths_are_released_independently_in_deadline_order() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        let early = PathBuf::from("/downloads/early.zip");
        let late = PathBuf::from("/downloads/late.zip");

        debouncer.touch(late.clone(), start + Duration::from_millis(30));
        debouncer.touch(early.clone(), start);
        assert_eq!(debouncer.next_deadline(), Some(start + WINDOW));

        assert_eq!(debouncer.take_due(start + WINDOW), vec![early]);
        assert_eq!(
            debouncer.take_due(start + Duration::from_millis(500)),
            vec![late]
        );
    }

    #[test]
    fn forgotten_paths_are_never_released() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        let path = PathBuf::from("/downloads/gone.ttmp2");

        debouncer.touch(path.clone(), start);
        assert!(debouncer.forget(&path));
        assert!(!debouncer.forget(&path));
        assert!(debouncer.take_due(start + Duration::from_secs(5)).is_empty());
        assert_eq!(debouncer.next_deadline(), None);
    }
}
