//! Decides which top-level surface is active.
//!
//! Session events are the primary signal; a periodic re-check of the stored
//! session is the fallback that catches a host going away silently.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use events::{EventHandler, SessionEvent};
use log::*;
use service::config::RedirectMode;
use session::SessionState;
use tokio::task::JoinHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Surface {
    Home,
    Login,
}

/// Performs the actual navigation. Only called when the target changes.
pub trait Navigator: Send + Sync {
    fn navigate(&self, to: Surface);
}

pub struct RedirectController {
    session: Arc<SessionState>,
    navigator: Arc<dyn Navigator>,
    mode: RedirectMode,
    interval: Duration,
    current: Mutex<Option<Surface>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl RedirectController {
    pub fn new(
        session: Arc<SessionState>,
        navigator: Arc<dyn Navigator>,
        mode: RedirectMode,
        interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            session,
            navigator,
            mode,
            interval,
            current: Mutex::new(None),
            ticker: Mutex::new(None),
        })
    }

    pub fn mode(&self) -> RedirectMode {
        self.mode
    }

    pub fn current(&self) -> Option<Surface> {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers for session events. The subscription does not keep the controller alive.
    pub fn subscribe(self: &Arc<Self>) {
        self.session
            .publisher()
            .subscribe(Arc::new(RedirectSessionHandler {
                controller: Arc::downgrade(self),
            }));
    }

    /// Re-checks the stored session and navigates accordingly.
    pub async fn validate_auth(&self, mode: RedirectMode) -> Option<Surface> {
        self.session.hydrate().await;

        if self.session.has_saved_session() {
            if mode == RedirectMode::LastAvailable {
                self.go(Surface::Home);
            } else if self.session.try_reauthenticate_with_saved_host().await {
                self.go(Surface::Home);
            } else if mode == RedirectMode::ForceRelogin {
                self.go(Surface::Login);
            } else {
                debug!("Re-authentication failed, staying put ({mode})");
            }
        } else if mode != RedirectMode::Preserve {
            self.go(Surface::Login);
        }

        self.current()
    }

    /// Starts the periodic re-check. The first check runs immediately.
    pub fn start(self: &Arc<Self>) {
        let mut ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if ticker.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let controller = Arc::downgrade(self);
        let period = self.interval;
        *ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                controller.validate_auth(controller.mode).await;
            }
        }));
        info!("Redirect re-check running every {period:?} ({})", self.mode);
    }

    pub fn stop(&self) {
        if let Some(task) = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
            debug!("Redirect re-check stopped");
        }
    }

    fn on_session_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::AuthChanged {
                is_authenticated: true,
                ..
            } => self.go(Surface::Home),
            SessionEvent::LoggedOut if self.mode != RedirectMode::Preserve => {
                self.go(Surface::Login)
            }
            SessionEvent::AuthChanged { .. } if self.mode == RedirectMode::ForceRelogin => {
                self.go(Surface::Login)
            }
            _ => {}
        }
    }

    fn go(&self, target: Surface) {
        {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            if *current == Some(target) {
                return;
            }
            *current = Some(target);
        }
        info!("Navigating to {target:?}");
        self.navigator.navigate(target);
    }
}

impl Drop for RedirectController {
    fn drop(&mut self) {
        self.stop();
    }
}

struct RedirectSessionHandler {
    controller: Weak<RedirectController>,
}

#[async_trait]
impl EventHandler for RedirectSessionHandler {
    async fn handle(&self, event: &SessionEvent) {
        if let Some(controller) = self.controller.upgrade() {
            controller.on_session_event(event);
        }
    }
}
