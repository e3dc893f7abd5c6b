//! Session timeout with a visible countdown before expiry.

use super::{
    ActivityEvent, Navigator, SessionControl, SessionTimeoutConfig,
    scheduler::{Scheduler, TimerHandle},
};
use crate::{
    audit::{SecurityEvent, log_security_event},
    guard::LOGIN_PATH,
};
use chrono::{DateTime, Utc};
use log::{debug, info, trace};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

const TICK: Duration = Duration::from_secs(1);

/// Called when the warning appears, with the time left
pub type WarningHook = Box<dyn Fn(Duration) + Send + Sync>;

/// Called after a timeout forced the logout
pub type TimeoutHook = Box<dyn Fn() + Send + Sync>;

/// Optional callbacks for presentation layers
#[derive(Default)]
pub struct TimeoutHooks {
    pub on_warning: Option<WarningHook>,
    pub on_timeout: Option<TimeoutHook>,
}

/// What a warning dialog needs to render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutStatus {
    pub show_warning: bool,
    /// Seconds left on the countdown; zero outside the warning window
    pub time_remaining_secs: u64,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug)]
struct TimeoutState {
    running: bool,
    generation: u64,
    /// Sign-in being watched
    session: Option<u64>,
    show_warning: bool,
    time_remaining_secs: u64,
    last_activity: DateTime<Utc>,
    warning_timer: Option<TimerHandle>,
    countdown_timer: Option<TimerHandle>,
    logout_timer: Option<TimerHandle>,
}

impl TimeoutState {
    fn new() -> Self {
        Self {
            running: false,
            generation: 0,
            session: None,
            show_warning: false,
            time_remaining_secs: 0,
            last_activity: Utc::now(),
            warning_timer: None,
            countdown_timer: None,
            logout_timer: None,
        }
    }

    fn take_timers(&mut self) -> [Option<TimerHandle>; 3] {
        [
            self.warning_timer.take(),
            self.countdown_timer.take(),
            self.logout_timer.take(),
        ]
    }
}

struct Shared {
    config: SessionTimeoutConfig,
    session: Arc<dyn SessionControl>,
    navigator: Arc<dyn Navigator>,
    scheduler: Arc<dyn Scheduler>,
    hooks: TimeoutHooks,
    state: Mutex<TimeoutState>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, TimeoutState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the sign-in this run started with is still the live one
    fn watching_live_session(&self, state: &TimeoutState) -> bool {
        state.session.is_some() && self.session.current_session() == state.session
    }

    /// Stop the run for good: no timers, no warning, no session
    fn halt(&self, state: &mut TimeoutState) {
        state.running = false;
        state.session = None;
        self.clear(state);
    }

    /// Cancel every timer and hide the warning; bumps the generation
    fn clear(&self, state: &mut TimeoutState) {
        for handle in state.take_timers().into_iter().flatten() {
            self.scheduler.cancel(handle);
        }
        state.generation += 1;
        state.show_warning = false;
        state.time_remaining_secs = 0;
    }

    fn arm(self: &Arc<Self>, state: &mut TimeoutState) {
        self.clear(state);
        state.last_activity = Utc::now();
        let generation = state.generation;

        if !self.config.warning_window.is_zero() {
            let weak = Arc::downgrade(self);
            state.warning_timer = Some(self.scheduler.schedule(
                self.config.warning_delay(),
                Box::new(move || {
                    if let Some(shared) = weak.upgrade() {
                        shared.show_warning(generation);
                    }
                }),
            ));
        }

        let weak = Arc::downgrade(self);
        state.logout_timer = Some(self.scheduler.schedule(
            self.config.session_timeout,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.expire(generation);
                }
            }),
        ));
    }

    fn show_warning(self: &Arc<Self>, generation: u64) {
        let remaining = {
            let mut state = self.state();
            if !state.running || state.generation != generation {
                return;
            }
            if !self.watching_live_session(&state) {
                debug!("Warning timer fired after the session it watched ended");
                self.halt(&mut state);
                return;
            }
            state.warning_timer = None;
            state.show_warning = true;
            state.time_remaining_secs = self.config.warning_window.as_secs();
            self.schedule_tick(&mut state, generation);
            self.config.warning_window
        };

        info!("Session expires in {}s without activity", remaining.as_secs());
        if let Some(hook) = &self.hooks.on_warning {
            hook(remaining);
        }
    }

    fn schedule_tick(self: &Arc<Self>, state: &mut TimeoutState, generation: u64) {
        let weak: Weak<Shared> = Arc::downgrade(self);
        state.countdown_timer = Some(self.scheduler.schedule(
            TICK,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.tick(generation);
                }
            }),
        ));
    }

    fn tick(self: &Arc<Self>, generation: u64) {
        {
            let mut state = self.state();
            if !state.running || state.generation != generation {
                return;
            }
            state.countdown_timer = None;
            if !self.watching_live_session(&state) {
                self.halt(&mut state);
                return;
            }
            if state.time_remaining_secs > 1 {
                state.time_remaining_secs -= 1;
                trace!("Session countdown: {}s", state.time_remaining_secs);
                self.schedule_tick(&mut state, generation);
                return;
            }
        }
        self.expire(generation);
    }

    fn expire(&self, generation: u64) {
        {
            let mut state = self.state();
            if !state.running || state.generation != generation {
                return;
            }
            let live = self.watching_live_session(&state);
            self.halt(&mut state);
            if !live {
                debug!("Session timer fired after the session it watched ended");
                return;
            }
        }

        log_security_event(
            SecurityEvent::SessionExpired,
            None,
            &format!(
                "Logged out after {:?} without activity",
                self.config.session_timeout
            ),
        );
        self.session.logout();
        self.navigator.navigate(LOGIN_PATH);
        if let Some(hook) = &self.hooks.on_timeout {
            hook();
        }
    }
}

/// Ends the session after a period without activity, warning the user first.
///
/// During the last `warning_window` of the session a countdown is exposed via
/// [`status`](Self::status). Activity or [`handle_extend_session`](Self::handle_extend_session)
/// restarts the full window; [`handle_logout_now`](Self::handle_logout_now) ends the
/// session immediately. When the countdown reaches zero the session is logged out
/// once and the user is sent to the login page.
pub struct SessionTimeoutMonitor {
    shared: Arc<Shared>,
}

impl SessionTimeoutMonitor {
    pub fn new(
        config: SessionTimeoutConfig,
        session: Arc<dyn SessionControl>,
        navigator: Arc<dyn Navigator>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self::with_hooks(config, session, navigator, scheduler, TimeoutHooks::default())
    }

    pub fn with_hooks(
        config: SessionTimeoutConfig,
        session: Arc<dyn SessionControl>,
        navigator: Arc<dyn Navigator>,
        scheduler: Arc<dyn Scheduler>,
        hooks: TimeoutHooks,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                session,
                navigator,
                scheduler,
                hooks,
                state: Mutex::new(TimeoutState::new()),
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
        debug!(
            "Session timeout monitor started ({:?}, warning {:?})",
            self.shared.config.session_timeout, self.shared.config.warning_window
        );
        true
    }

    pub fn record_activity(&self, event: ActivityEvent) {
        trace!("Activity: {}", event);
        self.reset_timer();
    }

    /// Restart the full session window and hide any warning
    pub fn reset_timer(&self) {
        let mut state = self.shared.state();
        if !state.running {
            return;
        }
        if !self.shared.watching_live_session(&state) {
            self.shared.halt(&mut state);
            return;
        }
        self.shared.arm(&mut state);
    }

    /// The user chose to stay signed in
    pub fn handle_extend_session(&self) {
        self.reset_timer();
    }

    /// The user chose to leave now
    pub fn handle_logout_now(&self) {
        self.stop();
        self.shared.session.logout();
        self.shared.navigator.navigate(LOGIN_PATH);
    }

    /// Cancel all timers; safe to call repeatedly
    pub fn stop(&self) {
        let mut state = self.shared.state();
        self.shared.halt(&mut state);
    }

    pub fn is_running(&self) -> bool {
        self.shared.state().running
    }

    pub fn status(&self) -> TimeoutStatus {
        let state = self.shared.state();
        TimeoutStatus {
            show_warning: state.show_warning,
            time_remaining_secs: state.time_remaining_secs,
            last_activity: state.last_activity,
        }
    }
}

impl Drop for SessionTimeoutMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
