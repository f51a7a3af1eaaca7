//! Single-path watch sessions.
//!
//! A [`WatchSession`] owns one driver task. The driver owns everything that
//! mutates: the [`DirectoryTree`], the [`Debouncer`] and the receiving half
//! of the raw event channel fed by the native watcher. All tree bookkeeping
//! and all debounce timers therefore live on a single task, and the caller
//! only ever talks to it through channels and the shared [`Delivery`].
//!
//! Subtree walks block, so the driver moves the tree onto tokio's blocking
//! pool for initial discovery and whenever a new directory needs exploring,
//! and takes it back before handling the next raw event.
//!
//! # Driver Loop
//!
//! ```text
//!            ┌──────────── cancel (close) ──────────────┐
//!            │                                           ▼
//! raw event ─► tree.process ─► filter ─► debouncer ─► classify ─► Delivery
//!                                            ▲
//!                        sleep_until(next_deadline)
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tw_core::{Encoding, WatchOptions};

use crate::debounce::Debouncer;
use crate::delivery::{Delivery, Listener, SessionState};
use crate::error::WatchError;
use crate::events::{ChangeEvent, Notification, classify};
use crate::filter::SharedFilter;
use crate::native::{NativeWatch, NotifyWatch, RawEvent, RawResult};
use crate::tree::{DirectoryTree, WatchScope};

/// Everything a session needs to know about its root, resolved once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WatchTarget {
    pub(crate) root: PathBuf,
    pub(crate) scope: WatchScope,
    pub(crate) encoding: Encoding,
    pub(crate) delay: Duration,
}

impl WatchTarget {
    /// Validates and resolves `path` against `options`.
    ///
    /// The root is canonicalized so that it matches the paths native
    /// watchers report. Any path the platform accepts is valid, including
    /// non-UTF-8 ones. Nothing is opened here.
    pub(crate) fn resolve(path: &Path, options: &WatchOptions) -> Result<Self, WatchError> {
        let root = match path.canonicalize() {
            Ok(canonical) => canonical,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(WatchError::path_not_found(path));
            }
            Err(err) => return Err(err.into()),
        };

        let scope = if !root.is_dir() {
            WatchScope::File
        } else if options.recursive {
            WatchScope::Recursive
        } else {
            WatchScope::Directory
        };

        Ok(Self {
            root,
            scope,
            encoding: options.encoding,
            delay: options.delay(),
        })
    }
}

/// Requests answered by a running driver.
#[derive(Debug)]
pub(crate) enum Control {
    WatchedPaths(oneshot::Sender<Vec<PathBuf>>),
}

struct Driver {
    origin: usize,
    encoding: Encoding,
    filter: SharedFilter,
    debouncer: Debouncer,
    raw_rx: mpsc::UnboundedReceiver<RawResult>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    delivery: Arc<Delivery>,
    cancel: CancellationToken,
}

impl Driver {
    async fn run<W: NativeWatch>(mut self, tree: DirectoryTree<W>) {
        let root = tree.root().to_path_buf();
        tracing::info!(root = %root.display(), scope = ?tree.scope(), "Watch session starting");

        let Some(mut tree) = self.discover(tree).await else {
            return;
        };
        self.delivery.ready(self.origin);

        loop {
            let deadline = self.debouncer.next_deadline();
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,

                Some(control) = self.control_rx.recv() => Self::handle_control(&tree, control),

                raw = self.raw_rx.recv() => match raw {
                    Some(Ok(raw)) => self.handle_raw(&mut tree, &raw),
                    Some(Err(err)) => self.delivery.error(err),
                    None => break,
                },

                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.flush_due();
                }
            }

            if tree.has_unexplored() {
                tree = match self.explore(tree).await {
                    Some(tree) => tree,
                    None => return,
                };
            }
        }

        self.debouncer.clear();
        tree.close();
        tracing::info!(root = %root.display(), "Watch session stopped");
    }

    /// Builds the initial watch set on the blocking pool.
    async fn discover<W: NativeWatch>(&self, tree: DirectoryTree<W>) -> Option<DirectoryTree<W>> {
        let (mut tree, started) = self.on_blocking_pool(tree, DirectoryTree::start).await?;
        if let Err(err) = started {
            self.delivery.error(err);
        }
        self.report_failures(&mut tree);
        Some(tree)
    }

    /// Watches the subtrees of newly tracked directories on the blocking pool.
    async fn explore<W: NativeWatch>(&self, tree: DirectoryTree<W>) -> Option<DirectoryTree<W>> {
        let (mut tree, ()) = self.on_blocking_pool(tree, DirectoryTree::explore_pending).await?;
        self.report_failures(&mut tree);
        Some(tree)
    }

    /// Moves `tree` onto the blocking pool, runs `work` there and hands the
    /// tree back. `None` if the work panicked; the tree and its handles are
    /// gone with it.
    async fn on_blocking_pool<W, T, F>(&self, mut tree: DirectoryTree<W>, work: F) -> Option<(DirectoryTree<W>, T)>
    where
        W: NativeWatch,
        T: Send + 'static,
        F: FnOnce(&mut DirectoryTree<W>) -> T + Send + 'static,
    {
        let task = tokio::task::spawn_blocking(move || {
            let output = work(&mut tree);
            (tree, output)
        });

        match task.await {
            Ok(done) => Some(done),
            Err(err) => {
                tracing::error!(origin = self.origin, error = %err, "Directory walk failed");
                self.delivery.error(err.into());
                None
            }
        }
    }

    fn handle_control<W: NativeWatch>(tree: &DirectoryTree<W>, control: Control) {
        match control {
            Control::WatchedPaths(reply) => {
                let _ = reply.send(tree.tracked_paths());
            }
        }
    }

    fn handle_raw<W: NativeWatch>(&mut self, tree: &mut DirectoryTree<W>, raw: &RawEvent) {
        let Some(path) = tree.process(raw) else {
            tracing::trace!(origin = %raw.origin.display(), name = ?raw.name, "Ignoring unrelated raw event");
            return;
        };
        self.report_failures(tree);

        if !self.filter.should_process(&path) {
            tracing::trace!(path = %path.display(), "Filtered out file event");
            return;
        }

        if let Some(path) = self.debouncer.submit(path, Instant::now()) {
            self.emit(path);
        }
    }

    fn flush_due(&mut self) {
        for path in self.debouncer.drain_due(Instant::now()) {
            self.emit(path);
        }
    }

    fn emit(&self, path: PathBuf) {
        let kind = classify(&path);
        self.delivery
            .change(self.origin, ChangeEvent::new(kind, path, self.encoding));
    }

    fn report_failures<W: NativeWatch>(&self, tree: &mut DirectoryTree<W>) {
        for err in tree.drain_failures() {
            self.delivery.error(err);
        }
    }
}

/// Caller side of one driver task.
#[derive(Debug)]
pub(crate) struct DriverHandle {
    control: mpsc::UnboundedSender<Control>,
    task: Option<JoinHandle<()>>,
}

impl DriverHandle {
    /// Spawns a driver for `target` on the current runtime.
    pub(crate) fn spawn<W: NativeWatch>(
        origin: usize,
        target: &WatchTarget,
        filter: SharedFilter,
        watch: W,
        raw_rx: mpsc::UnboundedReceiver<RawResult>,
        delivery: Arc<Delivery>,
    ) -> Self {
        let (control, control_rx) = mpsc::unbounded_channel();
        let tree = DirectoryTree::new(target.root.clone(), target.scope, Arc::clone(&filter), watch);
        let driver = Driver {
            origin,
            encoding: target.encoding,
            filter,
            debouncer: Debouncer::new(target.delay),
            raw_rx,
            control_rx,
            cancel: delivery.cancelled(),
            delivery,
        };

        Self {
            control,
            task: Some(tokio::spawn(driver.run(tree))),
        }
    }

    /// Spawns a driver backed by the platform watcher.
    pub(crate) fn spawn_native(
        origin: usize,
        target: &WatchTarget,
        filter: SharedFilter,
        delivery: Arc<Delivery>,
    ) -> Result<Self, WatchError> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let watch = NotifyWatch::new(raw_tx)?;
        Ok(Self::spawn(origin, target, filter, watch, raw_rx, delivery))
    }

    /// Asks the driver for its tracked directories; empty once it stopped.
    pub(crate) async fn watched_paths(&self) -> Vec<PathBuf> {
        let (reply, response) = oneshot::channel();
        if self.control.send(Control::WatchedPaths(reply)).is_err() {
            return Vec::new();
        }
        response.await.unwrap_or_default()
    }

    /// Waits for the driver task to finish.
    pub(crate) async fn join(&mut self) -> Result<(), WatchError> {
        if let Some(task) = self.task.take() {
            task.await?;
        }
        Ok(())
    }
}

/// Receiving side shared by single and composed sessions.
///
/// Changes still queued when the session closes are discarded, and nothing
/// is returned after [`Notification::Close`].
#[derive(Debug)]
pub(crate) struct Inbox {
    rx: mpsc::UnboundedReceiver<Notification>,
    delivery: Arc<Delivery>,
    finished: bool,
}

impl Inbox {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Notification>, delivery: Arc<Delivery>) -> Self {
        Self {
            rx,
            delivery,
            finished: false,
        }
    }

    pub(crate) fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    pub(crate) async fn recv(&mut self) -> Option<Notification> {
        while !self.finished {
            let notification = self.rx.recv().await;
            if let Some(notification) = self.accept(notification) {
                return Some(notification);
            }
        }
        None
    }

    pub(crate) fn try_recv(&mut self) -> Result<Notification, mpsc::error::TryRecvError> {
        while !self.finished {
            let notification = match self.rx.try_recv() {
                Ok(notification) => Some(notification),
                Err(mpsc::error::TryRecvError::Empty) => return Err(mpsc::error::TryRecvError::Empty),
                Err(mpsc::error::TryRecvError::Disconnected) => None,
            };
            if let Some(notification) = self.accept(notification) {
                return Ok(notification);
            }
        }
        Err(mpsc::error::TryRecvError::Disconnected)
    }

    fn accept(&mut self, notification: Option<Notification>) -> Option<Notification> {
        match notification {
            None => {
                self.finished = true;
                None
            }
            Some(Notification::Close) => {
                self.finished = true;
                Some(Notification::Close)
            }
            Some(Notification::Change(_)) if self.delivery.is_closed() => None,
            Some(other) => Some(other),
        }
    }
}

/// A watch on one file or directory.
///
/// # Lifecycle
///
/// 1. **Creation**: [`watch`](crate::watch) validates the path and options
///    and spawns the driver task. The session starts in
///    [`SessionState::Initializing`].
/// 2. **Ready**: once the initial watch set is built, a single
///    [`Notification::Ready`] is delivered.
/// 3. **Events**: [`recv`](Self::recv) yields changes, and runtime errors as
///    [`Notification::Error`]. Errors never close the session.
/// 4. **Close**: [`close`](Self::close) (or dropping the session) stops all
///    delivery immediately. A single [`Notification::Close`] follows, then
///    `recv` returns `None`.
///
/// # Examples
///
/// ```no_run
/// use tw_watcher::{Notification, watch};
/// use tw_core::WatchOptions;
///
/// # async fn example() -> Result<(), tw_watcher::WatchError> {
/// let mut watcher = watch("./src", WatchOptions::default().with_recursive(true)).await?;
///
/// while let Some(notification) = watcher.recv().await {
///     match notification {
///         Notification::Change(event) => println!("{} {}", event.kind, event.name),
///         Notification::Error(err) => eprintln!("{err}"),
///         Notification::Ready | Notification::Close => {}
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct WatchSession {
    root: PathBuf,
    driver: DriverHandle,
    inbox: Inbox,
}

impl WatchSession {
    /// Starts a platform-backed session on an already-resolved target.
    pub(crate) fn spawn(
        target: &WatchTarget,
        filter: SharedFilter,
        listener: Option<Listener>,
    ) -> Result<Self, WatchError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let delivery = Arc::new(Delivery::single(tx, listener));
        let driver = DriverHandle::spawn_native(0, target, filter, Arc::clone(&delivery))?;
        Ok(Self::assemble(target, driver, rx, delivery))
    }

    /// Starts a session on a caller-provided native backend.
    #[cfg(test)]
    pub(crate) fn spawn_with<W: NativeWatch>(
        target: &WatchTarget,
        filter: SharedFilter,
        listener: Option<Listener>,
        watch: W,
        raw_rx: mpsc::UnboundedReceiver<RawResult>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let delivery = Arc::new(Delivery::single(tx, listener));
        let driver = DriverHandle::spawn(0, target, filter, watch, raw_rx, Arc::clone(&delivery));
        Self::assemble(target, driver, rx, delivery)
    }

    fn assemble(
        target: &WatchTarget,
        driver: DriverHandle,
        rx: mpsc::UnboundedReceiver<Notification>,
        delivery: Arc<Delivery>,
    ) -> Self {
        Self {
            root: target.root.clone(),
            driver,
            inbox: Inbox::new(rx, delivery),
        }
    }

    /// Returns the canonical watch root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Receives the next notification.
    ///
    /// Returns `None` after [`Notification::Close`] has been returned.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.inbox.recv().await
    }

    /// Receives a notification without waiting.
    pub fn try_recv(&mut self) -> Result<Notification, mpsc::error::TryRecvError> {
        self.inbox.try_recv()
    }

    /// Stops the session. Idempotent.
    ///
    /// No change is delivered once this returns, including changes already
    /// queued but not yet received.
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

    /// Returns the directories currently backed by native handles, sorted.
    ///
    /// Empty once the session is closed.
    pub async fn watched_paths(&self) -> Vec<PathBuf> {
        self.driver.watched_paths().await
    }

    /// Closes the session and waits for its driver task to release every
    /// native handle.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Task`] if the driver task panicked.
    pub async fn shutdown(mut self) -> Result<(), WatchError> {
        self.close();
        self.driver.join().await
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        // The driver notices the cancellation and closes its handles
        self.close();
    }
}
