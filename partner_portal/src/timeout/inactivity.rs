//! Hard idle timeout.

use super::{
    ActivityEvent, InactivityConfig, Navigator, SessionControl,
    scheduler::{Scheduler, TimerHandle},
};
use crate::{
    audit::{SecurityEvent, log_security_event},
    guard::LOGIN_PATH,
};
use log::{debug, trace};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

#[derive(Debug, Default)]
struct InactivityState {
    running: bool,
    timer: Option<TimerHandle>,
    /// Identifies the armed timer; a callback from an older arm is ignored
    generation: u64,
    /// Sign-in being watched
    session: Option<u64>,
}

struct Shared {
    config: InactivityConfig,
    session: Arc<dyn SessionControl>,
    navigator: Arc<dyn Navigator>,
    scheduler: Arc<dyn Scheduler>,
    state: Mutex<InactivityState>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, InactivityState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm(self: &Arc<Self>, state: &mut InactivityState) {
        if let Some(handle) = state.timer.take() {
            self.scheduler.cancel(handle);
        }
        state.generation += 1;

        let generation = state.generation;
        let weak: Weak<Shared> = Arc::downgrade(self);
        state.timer = Some(self.scheduler.schedule(
            self.config.idle_timeout,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.expire(generation);
                }
            }),
        ));
    }

    /// Whether the sign-in this run started with is still the live one
    fn watching_live_session(&self, state: &InactivityState) -> bool {
        state.session.is_some() && self.session.current_session() == state.session
    }

    fn expire(&self, generation: u64) {
        {
            let mut state = self.state();
            if !state.running || state.generation != generation {
                return;
            }
            state.running = false;
            state.timer = None;

            if !self.watching_live_session(&state) {
                debug!("Idle timer fired after the session it watched ended");
                return;
            }
        }

        log_security_event(
            SecurityEvent::SessionExpired,
            None,
            &format!("Logged out after {:?} of inactivity", self.config.idle_timeout),
        );
        self.session.logout();
        self.navigator.navigate(LOGIN_PATH);
    }
}

/// Logs the user out after a fixed period without activity.
///
/// The monitor only runs while the session is authenticated. Once it has forced
/// a logout it stays stopped; call [`start`](Self::start) again after the next login.
pub struct InactivityMonitor {
    shared: Arc<Shared>,
}

impl InactivityMonitor {
    pub fn new(
        config: InactivityConfig,
        session: Arc<dyn SessionControl>,
        navigator: Arc<dyn Navigator>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                session,
                navigator,
                scheduler,
                state: Mutex::new(InactivityState::default()),
            }),
        }
    }

    /// Begin watching; returns `false` when there is no authenticated session
    pub fn start(&self) -> bool {
        let Some(session) = self.shared.session.current_session() else {
            return false;
        };

        let mut state = self.shared.state();
        state.running = true;
        state.session = Some(session);
        self.shared.arm(&mut state);
        debug!("Inactivity monitor started ({:?})", self.shared.config.idle_timeout);
        true
    }

    /// Any qualifying input restarts the idle countdown
    pub fn record_activity(&self, event: ActivityEvent) {
        trace!("Activity: {}", event);
        self.reset_timer();
    }

    pub fn reset_timer(&self) {
        let mut state = self.shared.state();
        if !state.running {
            return;
        }
        if !self.shared.watching_live_session(&state) {
            Self::halt(&self.shared, &mut state);
            return;
        }
        self.shared.arm(&mut state);
    }

    /// Cancel the timer; safe to call repeatedly
    pub fn stop(&self) {
        let mut state = self.shared.state();
        Self::halt(&self.shared, &mut state);
    }

    pub fn is_running(&self) -> bool {
        self.shared.state().running
    }

    fn halt(shared: &Shared, state: &mut InactivityState) {
        state.running = false;
        state.session = None;
        state.generation += 1;
        if let Some(handle) = state.timer.take() {
            shared.scheduler.cancel(handle);
        }
    }
}

impl Drop for InactivityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
