use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use coursetime_core::activity::{
    ActivityMonitor, ActivityPhase, ActivityState, ActivityTransition, InteractionKind,
};
use coursetime_core::settings::ActivitySettings;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::clock::SessionClock;
use crate::identity::IdentityProvider;

const COUNTDOWN_STEP: Duration = Duration::from_secs(1);

/// Tears down a background subscription when disposed or dropped.
#[derive(Debug)]
#[must_use = "dropping a Disposer immediately cancels its task"]
pub struct Disposer {
    handle: Option<JoinHandle<()>>,
}

impl Disposer {
    fn new(handle: JoinHandle<()>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    pub fn dispose(mut self) {
        self.abort();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Disposer {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Held by an open study session until its final record is written.
#[derive(Debug)]
pub(crate) struct FlushGuard {
    _open: mpsc::Sender<()>,
}

/// Counts open study sessions so the forced logout can wait for their final writes.
///
/// The slot is emptied when the logout starts; no session can register after that.
#[derive(Debug)]
struct FlushBarrier {
    slot: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
}

impl FlushBarrier {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Some(mpsc::channel(1))),
        }
    }

    fn register(&self) -> Option<FlushGuard> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref().map(|(open, _)| FlushGuard {
            _open: open.clone(),
        })
    }

    /// Closes registration. `None` if a logout already took the barrier.
    fn close(&self) -> Option<mpsc::Receiver<()>> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.take().map(|(_, pending)| pending)
    }
}

/// Shared activity tracking for one learner session.
///
/// Phase changes and countdown updates are published on a watch channel;
/// interactions that keep an active learner active are not. The forced logout
/// ends the learner session through the `IdentityProvider`, once, after every
/// open study session has written its final record.
#[derive(Clone)]
pub struct ActivityService {
    monitor: Arc<Mutex<ActivityMonitor>>,
    state: Arc<watch::Sender<ActivityState>>,
    clock: SessionClock,
    identity: Arc<dyn IdentityProvider>,
    flushes: Arc<FlushBarrier>,
}

impl ActivityService {
    #[must_use]
    pub fn new(
        settings: ActivitySettings,
        clock: SessionClock,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let now = clock.now();
        let monitor = ActivityMonitor::new(settings, now);
        let state = watch::Sender::new(monitor.state(now));
        Self {
            monitor: Arc::new(Mutex::new(monitor)),
            state: Arc::new(state),
            clock,
            identity,
            flushes: Arc::new(FlushBarrier::new()),
        }
    }

    /// Registers an open study session. `None` once the forced logout started.
    pub(crate) fn register_session(&self) -> Option<FlushGuard> {
        self.flushes.register()
    }

    fn lock(&self) -> MutexGuard<'_, ActivityMonitor> {
        self.monitor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ActivityState> {
        self.state.subscribe()
    }

    /// Fresh snapshot, including the latest interaction time.
    #[must_use]
    pub fn state(&self) -> ActivityState {
        self.lock().state(self.clock.now())
    }

    pub fn record(&self, kind: InteractionKind) -> Option<ActivityTransition> {
        let now = self.clock.now();
        let mut monitor = self.lock();
        let transition = monitor.record(kind, now);
        self.publish(&monitor, now);
        transition
    }

    /// "Stay active" answer to the inactivity warning.
    pub fn stay_active(&self) -> Option<ActivityTransition> {
        let now = self.clock.now();
        let mut monitor = self.lock();
        let transition = monitor.stay_active(now);
        self.publish(&monitor, now);
        transition
    }

    /// Advances the monitor to the current time and publishes the result.
    ///
    /// Reaching the forced logout spawns the task that ends the learner session.
    pub fn poll(&self) -> Option<ActivityTransition> {
        let now = self.clock.now();
        let transition = {
            let mut monitor = self.lock();
            let transition = monitor.poll(now);
            self.publish(&monitor, now);
            transition
        };
        match transition {
            Some(ActivityTransition::WarningStarted) => {
                info!("learner inactive, forced logout countdown started");
            }
            Some(ActivityTransition::ForcedLogout) => {
                info!("forced logout after inactivity");
                let service = self.clone();
                tokio::spawn(async move { service.end_learner_session().await });
            }
            Some(ActivityTransition::Resumed) | None => {}
        }
        transition
    }

    async fn end_learner_session(&self) {
        let Some(mut pending) = self.flushes.close() else {
            return;
        };
        // Resolves once every registered session dropped its guard.
        while pending.recv().await.is_some() {}
        self.identity.end_session().await;
        info!("learner session ended");
    }

    fn publish(&self, monitor: &ActivityMonitor, now: chrono::DateTime<chrono::Utc>) {
        let next = monitor.state(now);
        self.state.send_if_modified(|current| {
            let changed = current.phase != next.phase
                || (next.phase == ActivityPhase::WarningWindow && *current != next);
            if changed {
                *current = next;
            }
            changed
        });
    }

    /// Feeds an interaction stream into the monitor until the stream ends or
    /// the returned disposer is dropped.
    pub fn attach(&self, mut source: mpsc::Receiver<InteractionKind>) -> Disposer {
        let service = self.clone();
        Disposer::new(tokio::spawn(async move {
            while let Some(kind) = source.recv().await {
                if service.record(kind) == Some(ActivityTransition::Resumed) {
                    debug!(?kind, "activity resumed");
                }
            }
        }))
    }

    /// Drives the inactivity timer: sleeps until the warning is due, counts
    /// down once per second inside the warning window, and stops after the
    /// forced logout.
    pub fn spawn_countdown(&self) -> Disposer {
        let service = self.clone();
        Disposer::new(tokio::spawn(async move {
            loop {
                let delay = {
                    let monitor = service.lock();
                    match monitor.phase() {
                        ActivityPhase::ForcedLogout => break,
                        ActivityPhase::Active => service.clock.until(monitor.warning_at()),
                        ActivityPhase::WarningWindow => COUNTDOWN_STEP
                            .min(service.clock.until(monitor.forced_logout_at())),
                    }
                };
                tokio::time::sleep(delay).await;
                // An interaction during the sleep moves the deadline; poll is a no-op then.
                service.poll();
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentity;
    use coursetime_core::model::LearnerId;
    use coursetime_core::time::fixed_clock;

    fn service_with(identity: Arc<StaticIdentity>) -> ActivityService {
        let settings = ActivitySettings::new(60, 30).unwrap();
        ActivityService::new(settings, SessionClock::anchored(&fixed_clock()), identity)
    }

    fn service() -> ActivityService {
        service_with(Arc::new(StaticIdentity::new(LearnerId::new(7))))
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_warns_then_logs_out() {
        let activity = service();
        let mut rx = activity.subscribe();
        let _countdown = activity.spawn_countdown();

        rx.wait_for(|s| s.phase == ActivityPhase::WarningWindow)
            .await
            .unwrap();
        assert!(!activity.state().is_active);

        rx.wait_for(|s| s.phase == ActivityPhase::ForcedLogout)
            .await
            .unwrap();
        assert_eq!(activity.state().time_until_forced_logout_ms, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn interaction_during_warning_restores_active() {
        let activity = service();
        let mut rx = activity.subscribe();
        let _countdown = activity.spawn_countdown();

        rx.wait_for(|s| s.phase == ActivityPhase::WarningWindow)
            .await
            .unwrap();
        assert_eq!(
            activity.record(InteractionKind::Click),
            Some(ActivityTransition::Resumed)
        );
        assert_eq!(rx.borrow_and_update().phase, ActivityPhase::Active);

        // Still active just before a fresh 30 s delay elapses.
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(activity.state().phase, ActivityPhase::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn attached_source_is_detached_by_disposer() {
        let activity = service();
        let (tx, rx) = mpsc::channel(8);
        let disposer = activity.attach(rx);

        tokio::time::sleep(Duration::from_secs(20)).await;
        tx.send(InteractionKind::KeyDown).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let after_event = activity.state().last_activity_at;
        assert!(after_event > activity.subscribe().borrow().last_activity_at);

        disposer.dispose();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(tx.send(InteractionKind::KeyDown).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn forced_logout_without_open_session_ends_the_learner_session() {
        let identity = Arc::new(StaticIdentity::new(LearnerId::new(7)));
        let activity = service_with(Arc::clone(&identity));
        let mut rx = activity.subscribe();
        let _countdown = activity.spawn_countdown();

        rx.wait_for(|s| s.phase == ActivityPhase::ForcedLogout)
            .await
            .unwrap();
        identity.wait_ended().await;
        assert_eq!(identity.current_learner_id(), None);
        assert!(activity.register_session().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn forced_logout_waits_for_open_sessions() {
        let identity = Arc::new(StaticIdentity::new(LearnerId::new(7)));
        let activity = service_with(Arc::clone(&identity));
        let guard = activity.register_session().unwrap();
        let mut rx = activity.subscribe();
        let _countdown = activity.spawn_countdown();

        rx.wait_for(|s| s.phase == ActivityPhase::ForcedLogout)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!identity.is_ended());

        drop(guard);
        identity.wait_ended().await;
        assert!(identity.is_ended());
    }
}
