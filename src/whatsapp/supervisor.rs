//! Connection supervisor
//!
//! Owns the live [`Session`], runs the single dispatch loop over its events
//! and decides what happens when the connection closes: reconnect with
//! exponential backoff, give up after too many consecutive failures, or stop
//! for good when the account logged the bot out. The previous connection is
//! always closed before a new one is opened.

use super::bootstrap::{Bootstrapped, Bootstrapper, PersistenceHook};
use super::connection::Session;
use super::dispatcher::{Dispatcher, LifecycleAction};
use super::qr::render_qr;
use super::types::SessionEvent;
use crate::config::ReconnectConfig;
use crate::error::{BotError, Result};
use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Retry limits and backoff curve.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Consecutive failed cycles allowed; `None` retries forever.
    pub max_attempts: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Proportional jitter, clamped to `[0.0, 1.0]`. Non-finite means none.
    pub jitter: f64,
}

fn sanitize_jitter(jitter: f64) -> f64 {
    if jitter.is_finite() {
        jitter.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: (config.max_attempts > 0).then_some(config.max_attempts),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            jitter: sanitize_jitter(config.jitter),
        }
    }

    /// Whether another attempt may follow `failures` consecutive failures.
    pub fn allows(&self, failures: u32) -> bool {
        self.max_attempts.is_none_or(|max| failures < max)
    }

    /// Un-jittered delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1_u32 << shift)
            .min(self.max_delay)
    }

    /// [`Self::backoff`] with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        let jitter = sanitize_jitter(self.jitter);
        if jitter == 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);
        delay.mul_f64(factor)
    }
}

/// Where the supervisor is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Connecting { attempt: u32 },
    Open,
    Backoff { attempt: u32, delay: Duration },
    LoggedOut,
    Exhausted { attempts: u32 },
    Stopped,
}

/// Why [`Supervisor::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    LoggedOut,
    Exhausted { attempts: u32 },
    /// Cancelled by the caller.
    Stopped,
}

/// How one connection cycle ended.
enum CycleEnd {
    Reconnect { was_open: bool },
    LoggedOut,
    Stopped,
}

pub struct Supervisor {
    bootstrapper: Bootstrapper,
    dispatcher: Dispatcher,
    policy: ReconnectPolicy,
    cancel: CancellationToken,
    state: watch::Sender<SupervisorState>,
    print_qr: bool,
    clear_session_on_logout: bool,
}

impl Supervisor {
    pub fn new(bootstrapper: Bootstrapper, dispatcher: Dispatcher, policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(SupervisorState::Idle);
        Self {
            bootstrapper,
            dispatcher,
            policy,
            cancel: CancellationToken::new(),
            state,
            print_qr: false,
            clear_session_on_logout: true,
        }
    }

    /// Stop on an externally owned token instead of a private one.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn print_qr(mut self, enabled: bool) -> Self {
        self.print_qr = enabled;
        self
    }

    pub fn clear_session_on_logout(mut self, enabled: bool) -> Self {
        self.clear_session_on_logout = enabled;
        self
    }

    /// Token that stops [`Self::run`] when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SupervisorState) {
        tracing::debug!("WhatsApp: supervisor -> {:?}", state);
        self.state.send_replace(state);
    }

    /// Connect and dispatch until logged out, out of retries, or cancelled.
    ///
    /// Errors only when the operator cannot supply a phone number for pairing
    /// or the credentials directory cannot be cleared after logout.
    pub async fn run(mut self) -> Result<Outcome> {
        let mut failures: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(self.finish(Outcome::Stopped));
            }

            self.set_state(SupervisorState::Connecting {
                attempt: failures + 1,
            });

            let started = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(self.finish(Outcome::Stopped)),
                started = self.bootstrapper.start() => started,
            };

            let end = match started {
                Ok(Bootstrapped { session, hook }) => self.drive(session, hook).await,
                Err(e @ BotError::Prompt(_)) => {
                    self.set_state(SupervisorState::Stopped);
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!("WhatsApp: failed to start session: {}", e);
                    CycleEnd::Reconnect { was_open: false }
                }
            };

            match end {
                CycleEnd::Stopped => return Ok(self.finish(Outcome::Stopped)),
                CycleEnd::LoggedOut => {
                    if self.clear_session_on_logout {
                        self.bootstrapper.store().clear().await?;
                    }
                    return Ok(self.finish(Outcome::LoggedOut));
                }
                CycleEnd::Reconnect { was_open } => {
                    if was_open {
                        failures = 0;
                    }
                    failures += 1;

                    if !self.policy.allows(failures) {
                        tracing::error!(
                            "WhatsApp: giving up after {} consecutive failed connection(s)",
                            failures
                        );
                        return Ok(self.finish(Outcome::Exhausted { attempts: failures }));
                    }

                    let delay = self.policy.delay_for(failures);
                    tracing::info!(
                        "WhatsApp: reconnecting in {:?} (attempt {})",
                        delay,
                        failures + 1
                    );
                    self.set_state(SupervisorState::Backoff {
                        attempt: failures,
                        delay,
                    });

                    tokio::select! {
                        _ = self.cancel.cancelled() => return Ok(self.finish(Outcome::Stopped)),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn finish(&self, outcome: Outcome) -> Outcome {
        self.set_state(match outcome {
            Outcome::LoggedOut => SupervisorState::LoggedOut,
            Outcome::Exhausted { attempts } => SupervisorState::Exhausted { attempts },
            Outcome::Stopped => SupervisorState::Stopped,
        });
        outcome
    }

    /// Dispatch loop for one session. Always closes the connection on exit.
    async fn drive(&self, session: Session, mut hook: PersistenceHook) -> CycleEnd {
        let Session {
            connection,
            mut events,
        } = session;
        let mut was_open = false;

        let end = loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break CycleEnd::Stopped,
                event = events.recv() => event,
            };

            let Some(event) = event else {
                tracing::warn!("WhatsApp: event stream ended without a close event");
                break CycleEnd::Reconnect { was_open };
            };

            match event {
                SessionEvent::CredentialsUpdate(update) => {
                    if let Err(e) = hook.persist(&update).await {
                        tracing::error!("WhatsApp: failed to persist credentials: {}", e);
                    }
                }
                SessionEvent::PairingQr(code) => {
                    if self.print_qr
                        && let Some(rendered) = render_qr(&code)
                    {
                        println!("\nScan this QR code with WhatsApp > Linked Devices:\n{rendered}");
                    } else {
                        tracing::info!("WhatsApp: QR code available (scan with your phone)");
                        tracing::debug!("WhatsApp QR: {}", code);
                    }
                }
                SessionEvent::Connection(update) => {
                    match self.dispatcher.on_connection_update(&update) {
                        LifecycleAction::Ready => {
                            was_open = true;
                            self.set_state(SupervisorState::Open);
                        }
                        LifecycleAction::Reconnect(_) => break CycleEnd::Reconnect { was_open },
                        LifecycleAction::LoggedOut => break CycleEnd::LoggedOut,
                        LifecycleAction::None => {}
                    }
                }
                SessionEvent::MessagesUpsert(messages) => {
                    if let Err(e) = self
                        .dispatcher
                        .on_messages(connection.as_ref(), &messages)
                        .await
                    {
                        tracing::error!("WhatsApp: failed to handle message: {}", e);
                    }
                }
            }
        };

        drop(events);
        if let Err(e) = connection.close().await {
            tracing::warn!("WhatsApp: error while closing connection: {}", e);
        }
        end
    }
}
