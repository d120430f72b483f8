//! Request/processing status observed by presentation layers.
//!
//! The agent loop publishes [`StatusSnapshot`]s through a
//! [`StatusTracker`]; callers subscribe with [`StatusTracker::subscribe`]
//! instead of polling shared state. Every mutation, including appends to the
//! partial-response buffer, goes through the tracker's single watch channel.

use std::fmt;

use tokio::sync::watch;

/// What a model instance is currently doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Status {
    /// No worker running.
    #[default]
    Cold,
    /// Worker starting while a request waits on it.
    ColdProcessing,
    /// Preparing a request.
    Processing,
    /// Waiting on the model.
    Querying,
    /// Naming a conversation in the background.
    GeneratingTitle,
    /// Other background work.
    BackgroundTask,
    /// The model is calling tools.
    UsingFunctions,
    /// A long multi-step research turn.
    DeepResearch,
    /// Idle with a worker available.
    Ready,
}

impl Status {
    /// False only for [`Status::Cold`] and [`Status::Ready`].
    pub fn is_working(&self) -> bool {
        !matches!(self, Status::Cold | Status::Ready)
    }

    /// Whether the status should drive a visible foreground indicator.
    pub fn is_foreground_task(&self) -> bool {
        !matches!(
            self,
            Status::BackgroundTask | Status::GeneratingTitle | Status::UsingFunctions
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Status::Cold => "cold",
            Status::ColdProcessing => "starting model",
            Status::Processing => "processing",
            Status::Querying => "querying",
            Status::GeneratingTitle => "generating title",
            Status::BackgroundTask => "background task",
            Status::UsingFunctions => "using functions",
            Status::DeepResearch => "deep research",
            Status::Ready => "ready",
        };
        f.write_str(label)
    }
}

/// Current status plus the partial response streamed so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Current status.
    pub status: Status,
    /// Response text received for the running operation.
    pub partial: String,
}

/// Publishes status changes for one model instance.
///
/// Cloning yields another handle to the same channel.
#[derive(Debug, Clone)]
pub struct StatusTracker {
    tx: watch::Sender<StatusSnapshot>,
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new(Status::Cold)
    }
}

impl StatusTracker {
    /// Create a tracker starting in `initial`.
    pub fn new(initial: Status) -> Self {
        let (tx, _rx) = watch::channel(StatusSnapshot {
            status: initial,
            partial: String::new(),
        });
        Self { tx }
    }

    /// Subscribe to snapshots.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }

    /// Current status.
    pub fn status(&self) -> Status {
        self.tx.borrow().status
    }

    /// Partial response buffered for the running operation.
    pub fn partial(&self) -> String {
        self.tx.borrow().partial.clone()
    }

    /// Start a tracked operation: clear the partial buffer, then switch status.
    ///
    /// Returns `false` (and changes nothing) while deep research is active.
    pub fn begin(&self, status: Status) -> bool {
        self.apply(status, true)
    }

    /// Change status without touching the partial buffer.
    ///
    /// Returns `false` (and changes nothing) while deep research is active.
    pub fn set(&self, status: Status) -> bool {
        self.apply(status, false)
    }

    /// Append streamed text to the partial buffer.
    pub fn append_partial(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.tx.send_modify(|snapshot| snapshot.partial.push_str(text));
    }

    /// Drop the partial buffer, keeping the status.
    pub fn clear_partial(&self) {
        self.tx.send_if_modified(|snapshot| {
            let changed = !snapshot.partial.is_empty();
            snapshot.partial.clear();
            changed
        });
    }

    /// Terminal reset to [`Status::Ready`]; always allowed.
    pub fn reset(&self) {
        self.tx.send_modify(|snapshot| {
            snapshot.status = Status::Ready;
            snapshot.partial.clear();
        });
    }

    /// Enter deep research. Only the returned guard may change status until
    /// it is dropped, which resets to [`Status::Ready`].
    pub fn enter_deep_research(&self) -> DeepResearchGuard {
        self.tx.send_modify(|snapshot| {
            snapshot.status = Status::DeepResearch;
            snapshot.partial.clear();
        });
        DeepResearchGuard {
            tracker: self.clone(),
        }
    }

    fn apply(&self, status: Status, clear_partial: bool) -> bool {
        let mut accepted = true;
        self.tx.send_if_modified(|snapshot| {
            if snapshot.status == Status::DeepResearch && status != Status::DeepResearch {
                accepted = false;
                return false;
            }
            let mut changed = snapshot.status != status;
            snapshot.status = status;
            if clear_partial && !snapshot.partial.is_empty() {
                snapshot.partial.clear();
                changed = true;
            }
            changed
        });
        if !accepted {
            tracing::debug!(%status, "status: ignored change during deep research");
        }
        accepted
    }
}

/// Exclusive status control held by the deep-research controller.
#[derive(Debug)]
pub struct DeepResearchGuard {
    tracker: StatusTracker,
}

impl DeepResearchGuard {
    /// Change status while holding deep-research ownership.
    pub fn set(&self, status: Status) {
        self.tracker.tx.send_modify(|snapshot| snapshot.status = status);
    }

    /// Tracker this guard controls.
    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }
}

impl Drop for DeepResearchGuard {
    fn drop(&mut self) {
        self.tracker.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Status; 9] = [
        Status::Cold,
        Status::ColdProcessing,
        Status::Processing,
        Status::Querying,
        Status::GeneratingTitle,
        Status::BackgroundTask,
        Status::UsingFunctions,
        Status::DeepResearch,
        Status::Ready,
    ];

    #[test]
    fn test_is_working() {
        for status in ALL {
            let expected = !matches!(status, Status::Cold | Status::Ready);
            assert_eq!(status.is_working(), expected, "{status}");
        }
    }

    #[test]
    fn test_is_foreground_task() {
        assert!(!Status::BackgroundTask.is_foreground_task());
        assert!(!Status::GeneratingTitle.is_foreground_task());
        assert!(!Status::UsingFunctions.is_foreground_task());
        assert!(Status::Querying.is_foreground_task());
        assert!(Status::DeepResearch.is_foreground_task());
        assert!(Status::Ready.is_foreground_task());
    }

    #[test]
    fn test_begin_clears_partial() {
        let tracker = StatusTracker::new(Status::Ready);
        tracker.begin(Status::Querying);
        tracker.append_partial("stale text");
        assert_eq!(tracker.partial(), "stale text");

        tracker.begin(Status::BackgroundTask);
        assert_eq!(tracker.partial(), "");
        assert_eq!(tracker.status(), Status::BackgroundTask);
    }

    #[test]
    fn test_clear_partial_keeps_status() {
        let tracker = StatusTracker::new(Status::Ready);
        tracker.begin(Status::Querying);
        tracker.append_partial("abandoned");
        tracker.clear_partial();
        assert_eq!(tracker.partial(), "");
        assert_eq!(tracker.status(), Status::Querying);
    }

    #[test]
    fn test_set_keeps_partial() {
        let tracker = StatusTracker::new(Status::Ready);
        tracker.begin(Status::Querying);
        tracker.append_partial("abc");
        assert!(tracker.set(Status::UsingFunctions));
        assert_eq!(tracker.partial(), "abc");
    }

    #[test]
    fn test_deep_research_blocks_other_writers() {
        let tracker = StatusTracker::new(Status::Ready);
        let guard = tracker.enter_deep_research();

        assert!(!tracker.set(Status::UsingFunctions));
        assert!(!tracker.begin(Status::Querying));
        assert_eq!(tracker.status(), Status::DeepResearch);

        guard.set(Status::UsingFunctions);
        assert_eq!(tracker.status(), Status::UsingFunctions);
        guard.set(Status::DeepResearch);

        drop(guard);
        assert_eq!(tracker.status(), Status::Ready);
        assert!(tracker.set(Status::Querying));
    }

    #[test]
    fn test_reset_always_allowed() {
        let tracker = StatusTracker::new(Status::Ready);
        let _guard = tracker.enter_deep_research();
        tracker.reset();
        assert_eq!(tracker.status(), Status::Ready);
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let tracker = StatusTracker::new(Status::Cold);
        let mut rx = tracker.subscribe();
        tracker.begin(Status::Querying);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().status, Status::Querying);
    }

    #[test]
    fn test_display() {
        assert_eq!(Status::UsingFunctions.to_string(), "using functions");
        assert_eq!(Status::DeepResearch.to_string(), "deep research");
    }
}
