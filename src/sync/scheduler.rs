//! List view task and its refresh triggers.
//!
//! `mount` spawns one task that exclusively owns the [`ListView`]. It
//! multiplexes five sources with `tokio::select!`:
//! - **Commands**: manual refresh and teardown from the [`ListViewHandle`]
//! - **Refresh results**: fetches spawned by any trigger, applied in arrival order
//! - **Lifecycle**: a background/inactive → active transition starts a refresh
//! - **Relay**: pending updates from the edit view
//! - **Interval**: periodic refresh, first tick one period after mount
//!
//! Refreshes are never coalesced. Each trigger spawns its own fetch and the
//! last result to arrive wins. After teardown, fetches still in flight find
//! the view inactive and drop their result.

use super::lifecycle::AppState;
use super::notify::Notifier;
use super::reconcile::Reconciler;
use super::relay::{PendingUpdate, RelayReceiver, RouteParams};
use super::SyncError;
use crate::api::{ApiError, Category, CategoryClient};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Message shown when a diff pass finds visible changes.
const CHANGED_MESSAGE: &str = "Categories updated";

/// Capacity of the refresh result queue.
const RESULT_QUEUE: usize = 16;

/// What started a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    Mount,
    Foreground,
    Interval,
    Manual,
}

impl RefreshTrigger {
    /// Mount and manual failures are shown to the user; the rest are logged.
    pub fn surfaces_errors(self) -> bool {
        matches!(self, RefreshTrigger::Mount | RefreshTrigger::Manual)
    }

    /// Only a manual refresh shows a loading indicator.
    pub fn shows_indicator(self) -> bool {
        self == RefreshTrigger::Manual
    }
}

impl fmt::Display for RefreshTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RefreshTrigger::Mount => "mount",
            RefreshTrigger::Foreground => "foreground",
            RefreshTrigger::Interval => "interval",
            RefreshTrigger::Manual => "manual",
        })
    }
}

/// Observable state of a list view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListState {
    pub snapshot: Vec<Category>,
    /// A manual refresh is in flight.
    pub refreshing: bool,
    /// Last surfaced refresh failure, cleared by the next successful refresh.
    pub error: Option<String>,
}

/// The list view's state machine. Owned by the view task while mounted.
#[derive(Debug, Default)]
pub struct ListView {
    state: ListState,
    reconciler: Reconciler,
    manual_in_flight: usize,
}

impl ListView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ListState {
        &self.state
    }

    pub fn snapshot(&self) -> &[Category] {
        &self.state.snapshot
    }

    /// Marks a refresh as started.
    pub fn begin_refresh(&mut self, trigger: RefreshTrigger) {
        if trigger.shows_indicator() {
            self.manual_in_flight += 1;
            self.state.refreshing = true;
        }
    }

    /// Applies a finished refresh: replaces the snapshot on success, records
    /// or logs the failure otherwise.
    pub fn apply_refresh(
        &mut self,
        trigger: RefreshTrigger,
        result: Result<Vec<Category>, ApiError>,
        notifier: &Notifier,
    ) {
        if trigger.shows_indicator() {
            self.manual_in_flight = self.manual_in_flight.saturating_sub(1);
            self.state.refreshing = self.manual_in_flight > 0;
        }

        match result {
            Ok(categories) => {
                tracing::debug!(%trigger, count = categories.len(), "Applied refresh");
                if self.reconciler.observe(&categories) {
                    notifier.success(CHANGED_MESSAGE);
                }
                self.state.snapshot = categories;
                self.state.error = None;
            }
            Err(e) if trigger.surfaces_errors() => {
                tracing::warn!(%trigger, error = %e, "Refresh failed");
                let message = format!("Failed to load categories: {}", e);
                notifier.error(message.clone());
                self.state.error = Some(message);
            }
            Err(e) => {
                tracing::warn!(%trigger, error = %e, "Background refresh failed");
            }
        }
    }

    /// Merges a pending update into the snapshot.
    ///
    /// Returns false if the same update was already applied.
    pub fn apply_pending(&mut self, update: &PendingUpdate, notifier: &Notifier) -> bool {
        let Some(merged) = self.reconciler.apply(&self.state.snapshot, update) else {
            return false;
        };
        tracing::info!(
            category_id = update.category_id,
            name = ?update.new_name,
            image_url = ?update.new_image_url,
            "Applied pending update"
        );
        if self.reconciler.has_seen_snapshot() && self.reconciler.observe(&merged) {
            notifier.success(CHANGED_MESSAGE);
        }
        self.state.snapshot = merged;
        true
    }

    /// Applies a queued refresh result unless the view was torn down after it
    /// was queued. Returns whether it was applied.
    fn deliver(&mut self, outcome: RefreshOutcome, active: bool, notifier: &Notifier) -> bool {
        if !active {
            let stale = SyncError::StaleViewDiscard {
                trigger: outcome.trigger,
            };
            tracing::debug!(error = %stale, "Dropping queued refresh result");
            return false;
        }
        self.apply_refresh(outcome.trigger, outcome.result, notifier);
        true
    }

    /// Decodes, applies and acknowledges whatever the relay currently carries.
    fn take_params(&mut self, relay: &mut RelayReceiver, notifier: &Notifier) {
        let params: RouteParams = relay.current();
        if params.is_empty() {
            return;
        }
        match PendingUpdate::from_params(&params) {
            Ok(Some(update)) => {
                self.apply_pending(&update, notifier);
            }
            Ok(None) => {
                tracing::debug!("Route parameters carry no update");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed route parameters");
            }
        }
        relay.acknowledge(&params);
    }
}

#[derive(Debug)]
enum ViewCommand {
    Refresh,
    Teardown,
}

struct RefreshOutcome {
    trigger: RefreshTrigger,
    result: Result<Vec<Category>, ApiError>,
}

/// Host-side handle to a mounted list view.
#[derive(Debug)]
pub struct ListViewHandle {
    commands: mpsc::Sender<ViewCommand>,
    state: watch::Receiver<ListState>,
    active: Arc<AtomicBool>,
    task: JoinHandle<ListView>,
}

impl ListViewHandle {
    /// Requests a manual refresh.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        self.commands
            .send(ViewCommand::Refresh)
            .await
            .map_err(|_| SyncError::ViewClosed)
    }

    pub fn state(&self) -> watch::Receiver<ListState> {
        self.state.clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stops the view and returns its final state.
    ///
    /// Refreshes still in flight are discarded when they complete.
    pub async fn teardown(self) -> Result<ListView, SyncError> {
        self.active.store(false, Ordering::Release);
        // The task may already be gone; joining below reports that.
        let _ = self.commands.send(ViewCommand::Teardown).await;
        self.task.await.map_err(|e| {
            tracing::error!(error = %e, "List view task failed");
            SyncError::ViewClosed
        })
    }
}

/// Everything the view task owns besides the view itself.
struct ViewTask {
    client: CategoryClient,
    notifier: Notifier,
    lifecycle: watch::Receiver<AppState>,
    relay: RelayReceiver,
    commands: mpsc::Receiver<ViewCommand>,
    state_tx: watch::Sender<ListState>,
    active: Arc<AtomicBool>,
    interval: Duration,
}

/// Mounts a list view: starts the mount refresh, applies any attached route
/// parameters, and keeps the view in sync until teardown.
pub fn mount(
    client: CategoryClient,
    lifecycle: watch::Receiver<AppState>,
    relay: RelayReceiver,
    notifier: Notifier,
    interval: Duration,
) -> ListViewHandle {
    let (command_tx, command_rx) = mpsc::channel(8);
    let (state_tx, state_rx) = watch::channel(ListState::default());
    let active = Arc::new(AtomicBool::new(true));

    let task = ViewTask {
        client,
        notifier,
        lifecycle,
        relay,
        commands: command_rx,
        state_tx,
        active: Arc::clone(&active),
        interval: interval.max(Duration::from_millis(1)),
    };
    tracing::info!(interval_ms = task.interval.as_millis() as u64, "Mounting list view");

    ListViewHandle {
        commands: command_tx,
        state: state_rx,
        active,
        task: tokio::spawn(run_view(ListView::new(), task)),
    }
}

async fn run_view(mut view: ListView, mut task: ViewTask) -> ListView {
    let (result_tx, mut result_rx) = mpsc::channel::<RefreshOutcome>(RESULT_QUEUE);

    view.begin_refresh(RefreshTrigger::Mount);
    spawn_refresh(&task, RefreshTrigger::Mount, &result_tx);
    view.take_params(&mut task.relay, &task.notifier);
    publish(&task.state_tx, &view);

    let mut ticker = tokio::time::interval_at(Instant::now() + task.interval, task.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_app_state = *task.lifecycle.borrow_and_update();
    let mut lifecycle_open = true;

    loop {
        tokio::select! {
            biased;

            command = task.commands.recv() => match command {
                Some(ViewCommand::Refresh) => {
                    view.begin_refresh(RefreshTrigger::Manual);
                    spawn_refresh(&task, RefreshTrigger::Manual, &result_tx);
                }
                Some(ViewCommand::Teardown) | None => break,
            },

            Some(outcome) = result_rx.recv() => {
                view.deliver(outcome, task.active.load(Ordering::Acquire), &task.notifier);
            }

            changed = task.lifecycle.changed(), if lifecycle_open => match changed {
                Ok(()) => {
                    let next = *task.lifecycle.borrow_and_update();
                    if AppState::is_foreground_transition(last_app_state, next) {
                        tracing::info!("App returned to foreground, refreshing categories");
                        view.begin_refresh(RefreshTrigger::Foreground);
                        spawn_refresh(&task, RefreshTrigger::Foreground, &result_tx);
                    }
                    last_app_state = next;
                }
                Err(_) => {
                    tracing::debug!("Lifecycle source closed");
                    lifecycle_open = false;
                }
            },

            changed = task.relay.changed() => {
                if changed.is_ok() {
                    view.take_params(&mut task.relay, &task.notifier);
                }
            }

            _ = ticker.tick() => {
                view.begin_refresh(RefreshTrigger::Interval);
                spawn_refresh(&task, RefreshTrigger::Interval, &result_tx);
            }
        }

        publish(&task.state_tx, &view);
    }

    task.active.store(false, Ordering::Release);
    tracing::info!("List view torn down");
    view
}

fn publish(state_tx: &watch::Sender<ListState>, view: &ListView) {
    state_tx.send_if_modified(|current| {
        if *current == view.state {
            false
        } else {
            *current = view.state.clone();
            true
        }
    });
}

fn spawn_refresh(task: &ViewTask, trigger: RefreshTrigger, tx: &mpsc::Sender<RefreshOutcome>) {
    let client = task.client.clone();
    let active = Arc::clone(&task.active);
    let tx = tx.clone();
    tracing::debug!(%trigger, "Refreshing categories");

    tokio::spawn(async move {
        let result = client.list().await;
        let delivered =
            active.load(Ordering::Acquire) && tx.send(RefreshOutcome { trigger, result }).await.is_ok();
        if !delivered {
            let stale = SyncError::StaleViewDiscard { trigger };
            tracing::debug!(error = %stale, "Dropping refresh result");
        }
    });
}
