//! Several watch roots behind one notification stream.
//!
//! A [`ComposedSession`] runs one driver per root. The drivers share a
//! single [`Delivery`], which suppresses a path reported by one child when a
//! sibling already reported it within
//! [`COMPOSED_DEDUP_WINDOW`](crate::COMPOSED_DEDUP_WINDOW). Overlapping roots
//! such as `home`, `home/a` and `home/a/file` therefore yield one event per
//! filesystem change.
//!
//! A composed session never delivers [`Notification::Ready`]. Its state
//! still becomes [`SessionState::Ready`] once every child finished discovery.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::delivery::{Delivery, Listener, SessionState};
use crate::error::WatchError;
use crate::events::Notification;
use crate::filter::SharedFilter;
#[cfg(test)]
use crate::native::{NativeWatch, RawResult};
use crate::session::{DriverHandle, Inbox, WatchTarget};

/// A watch over several roots with cross-root dedup.
///
/// Closing the composed session closes every child; errors from one child
/// never affect the others.
///
/// # Examples
///
/// ```no_run
/// use tw_watcher::{Notification, watch};
/// use tw_core::WatchOptions;
///
/// # async fn example() -> Result<(), tw_watcher::WatchError> {
/// let mut watcher = watch(vec!["./src", "./Cargo.toml"], WatchOptions::default()).await?;
/// assert!(watcher.is_composed());
///
/// while let Some(Notification::Change(event)) = watcher.recv().await {
///     println!("{} {}", event.kind, event.path.display());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ComposedSession {
    roots: Vec<PathBuf>,
    children: Vec<DriverHandle>,
    inbox: Inbox,
}

impl ComposedSession {
    /// Starts one platform-backed child per target.
    pub(crate) fn spawn(
        targets: &[WatchTarget],
        filter: &SharedFilter,
        listener: Option<Listener>,
    ) -> Result<Self, WatchError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let delivery = Arc::new(Delivery::composed(tx, targets.len(), listener));

        let mut children = Vec::with_capacity(targets.len());
        for (origin, target) in targets.iter().enumerate() {
            match DriverHandle::spawn_native(origin, target, Arc::clone(filter), Arc::clone(&delivery)) {
                Ok(child) => children.push(child),
                Err(err) => {
                    // Stops the children already spawned
                    delivery.close();
                    return Err(err);
                }
            }
        }

        Ok(Self::assemble(targets, children, rx, delivery))
    }

    /// Starts one child per target on backends produced by `backend`.
    #[cfg(test)]
    pub(crate) fn spawn_with<W, B>(
        targets: &[WatchTarget],
        filter: &SharedFilter,
        listener: Option<Listener>,
        mut backend: B,
    ) -> Self
    where
        W: NativeWatch,
        B: FnMut(usize) -> (W, mpsc::UnboundedReceiver<RawResult>),
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let delivery = Arc::new(Delivery::composed(tx, targets.len(), listener));

        let children = targets
            .iter()
            .enumerate()
            .map(|(origin, target)| {
                let (watch, raw_rx) = backend(origin);
                DriverHandle::spawn(origin, target, Arc::clone(filter), watch, raw_rx, Arc::clone(&delivery))
            })
            .collect();

        Self::assemble(targets, children, rx, delivery)
    }

    fn assemble(
        targets: &[WatchTarget],
        children: Vec<DriverHandle>,
        rx: mpsc::UnboundedReceiver<Notification>,
        delivery: Arc<Delivery>,
    ) -> Self {
        tracing::info!(children = children.len(), "Composed watch session starting");
        Self {
            roots: targets.iter().map(|target| target.root.clone()).collect(),
            children,
            inbox: Inbox::new(rx, delivery),
        }
    }

    /// Returns the canonical roots, in the order they were given.
    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Returns the number of child sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Returns `true` if there are no child sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Receives the next notification from any child.
    ///
    /// Returns `None` after [`Notification::Close`] has been returned.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.inbox.recv().await
    }

    /// Receives a notification without waiting.
    pub fn try_recv(&mut self) -> Result<Notification, mpsc::error::TryRecvError> {
        self.inbox.try_recv()
    }

    /// Stops every child. Idempotent; [`Notification::Close`] is delivered
    /// once for the whole composed session.
    pub fn close(&self) {
        self.inbox.delivery().close();
    }

    /// Returns `true` once the session is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inbox.delivery().is_closed()
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inbox.delivery().state()
    }

    /// Returns the union of every child's watched directories, sorted and
    /// deduplicated.
    pub async fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for child in &self.children {
            paths.extend(child.watched_paths().await);
        }
        paths.sort();
        paths.dedup();
        paths
    }

    /// Closes every child and waits for all driver tasks to finish.
    ///
    /// # Errors
    ///
    /// Returns the first [`WatchError::Task`] if any driver panicked; the
    /// remaining drivers are still awaited.
    pub async fn shutdown(mut self) -> Result<(), WatchError> {
        self.close();
        let mut result = Ok(());
        for child in &mut self.children {
            let joined = child.join().await;
            if result.is_ok() {
                result = joined;
            }
        }
        result
    }
}

impl Drop for ComposedSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use tempfile::TempDir;
    use tw_core::WatchOptions;

    use super::*;
    use crate::filter::AcceptAllFilter;
    use crate::native::testing::MemoryWatch;
    use crate::native::{RawEvent, RawKind, RawSender};

    struct Harness {
        _dir: TempDir,
        root: PathBuf,
        session: ComposedSession,
        raws: Vec<RawSender>,
        watches: Vec<MemoryWatch>,
    }

    /// Composes `root`, `root/a` and `root/a/file2`.
    fn harness(options: &WatchOptions) -> Harness {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir(root.join("a")).unwrap();
        fs::write(root.join("a/file2"), "x").unwrap();

        let targets: Vec<WatchTarget> = [root.clone(), root.join("a"), root.join("a/file2")]
            .iter()
            .map(|path| WatchTarget::resolve(path, options).unwrap())
            .collect();

        let mut raws = Vec::new();
        let mut watches = Vec::new();
        let filter: SharedFilter = Arc::new(AcceptAllFilter);
        let session = ComposedSession::spawn_with(&targets, &filter, None, |_| {
            let (tx, rx) = mpsc::unbounded_channel();
            let watch = MemoryWatch::default();
            raws.push(tx);
            watches.push(watch.clone());
            (watch, rx)
        });

        Harness {
            _dir: dir,
            root,
            session,
            raws,
            watches,
        }
    }

    /// Waits until every child finished its initial discovery.
    async fn settle(session: &ComposedSession) {
        while session.state() != SessionState::Ready {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    async fn collect_changes(session: &mut ComposedSession) -> Vec<PathBuf> {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let mut paths = Vec::new();
        while let Ok(notification) = session.try_recv() {
            if let Notification::Change(event) = notification {
                paths.push(event.path);
            }
        }
        paths
    }

    #[tokio::test(start_paused = true)]
    async fn test_composed_never_emits_ready() {
        let mut h = harness(&WatchOptions::default());
        settle(&h.session).await;

        assert_eq!(h.session.state(), SessionState::Ready);
        assert!(h.session.try_recv().is_err());
        assert_eq!(h.session.len(), 3);
        assert_eq!(h.session.roots()[0], h.root);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_children_report_once() {
        let mut h = harness(&WatchOptions::default().with_delay_ms(0));
        settle(&h.session).await;

        // file2 modified: seen by the `a` child and the file child
        h.raws[1]
            .send(Ok(RawEvent::new(h.root.join("a"), RawKind::Change, "file2")))
            .unwrap();
        h.raws[2]
            .send(Ok(RawEvent::new(h.root.join("a"), RawKind::Change, "file2")))
            .unwrap();
        // new file under `a`: only the `a` child watches that directory
        fs::write(h.root.join("a/new.txt"), "y").unwrap();
        h.raws[1]
            .send(Ok(RawEvent::new(h.root.join("a"), RawKind::Rename, "new.txt")))
            .unwrap();

        let paths = collect_changes(&mut h.session).await;
        assert_eq!(paths, vec![h.root.join("a/file2"), h.root.join("a/new.txt")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_path_reported_again_after_window() {
        let mut h = harness(&WatchOptions::default().with_delay_ms(0));
        settle(&h.session).await;

        let raw = RawEvent::new(h.root.join("a"), RawKind::Change, "file2");
        h.raws[1].send(Ok(raw.clone())).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        h.raws[2].send(Ok(raw)).unwrap();

        let paths = collect_changes(&mut h.session).await;
        assert_eq!(paths.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watched_paths_is_union() {
        let h = harness(&WatchOptions::default());
        settle(&h.session).await;

        // `root` and `root/a` twice (the file child watches `a`)
        assert_eq!(
            h.session.watched_paths().await,
            vec![h.root.clone(), h.root.join("a")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_every_child() {
        let mut h = harness(&WatchOptions::default());
        settle(&h.session).await;

        h.session.close();
        h.session.close();
        assert!(matches!(h.session.recv().await, Some(Notification::Close)));
        assert!(h.session.recv().await.is_none());

        let watches = std::mem::take(&mut h.watches);
        h.session.shutdown().await.unwrap();
        assert!(watches.iter().all(|watch| watch.open_paths().is_empty()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_error_in_one_child_keeps_siblings_running() {
        let mut h = harness(&WatchOptions::default().with_delay_ms(0));
        settle(&h.session).await;

        h.raws[0]
            .send(Err(WatchError::Native(notify::Error::generic("queue overflow"))))
            .unwrap();
        assert!(matches!(
            h.session.recv().await,
            Some(Notification::Error(WatchError::Native(_)))
        ));
        assert!(!h.session.is_closed());
        assert_eq!(h.session.state(), SessionState::Ready);

        h.raws[1]
            .send(Ok(RawEvent::new(h.root.join("a"), RawKind::Change, "file2")))
            .unwrap();
        match h.session.recv().await {
            Some(Notification::Change(event)) => assert_eq!(event.path, h.root.join("a/file2")),
            other => panic!("expected a change, got {other:?}"),
        }

        // The failing child still delivers its own changes
        h.raws[0]
            .send(Ok(RawEvent::new(h.root.clone(), RawKind::Change, "a")))
            .unwrap();
        match h.session.recv().await {
            Some(Notification::Change(event)) => assert_eq!(event.path, h.root.join("a")),
            other => panic!("expected a change, got {other:?}"),
        }
    }
}
