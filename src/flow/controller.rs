//! FlowController: drives one visa application from email submission to a
//! payment reference.
//!
//! State lives behind a short-lived lock that is never held across a backend
//! call. Each operation:
//!
//! 1. Checks the current stage and captures what the request needs.
//! 2. Marks itself in flight (one backend action at a time).
//! 3. Calls the backend with the lock released.
//! 4. Re-locks and applies the result, unless a reset happened meanwhile.
//!
//! The OTP countdown is a spawned task ticking once per second. Verification
//! success always wins over expiry: a success for the window that just lapsed
//! is still accepted.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::countdown::{Countdown, CountdownTick};
use super::events::{FlowEvent, Notice};
use super::stage::{FlowStage, StageKind, SubmissionReceipt, TokenSession};
use crate::api::{ApplicationData, VisaApi};
use crate::config::ConsoleConfig;
use crate::error::{ApiError, FlowError};

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

const SUBMIT_EMAIL: &str = "submit email";
const REQUEST_OTP: &str = "request OTP";
const VERIFY_OTP: &str = "verify OTP";
const SUBMIT_APPLICATION: &str = "submit application";

const TOKEN_RECEIVED: &str = "Token received. You can now request OTP.";
const OTP_SENT: &str = "OTP sent. Please check your mobile.";
const OTP_VERIFIED: &str = "OTP verified successfully.";
const OTP_EXPIRED: &str = "OTP expired. Please request a new OTP.";
const APPLICATION_SUBMITTED: &str = "Visa application submitted successfully.";

/// What happened in the best-effort calls that follow a verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostVerification {
    pub stored_otp_updated: bool,
    pub application_refreshed: bool,
}

/// Read-only view of the controller for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct FlowSnapshot {
    pub stage: StageKind,
    pub email: Option<String>,
    pub countdown_remaining: Option<u32>,
    pub countdown_display: Option<String>,
    /// The previous OTP window lapsed and a new OTP must be requested.
    pub otp_expired: bool,
    pub application: Option<ApplicationData>,
    pub token_expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub receipt: Option<SubmissionReceipt>,
    pub notices: Vec<Notice>,
    pub in_flight: Option<&'static str>,
}

struct FlowState {
    stage: FlowStage,
    /// Bumped by every reset; results from an older generation are dropped.
    generation: u64,
    /// Last OTP window number handed out.
    last_window: u64,
    in_flight: Option<&'static str>,
    notices: Vec<Notice>,
    ticker: Option<JoinHandle<()>>,
}

impl FlowState {
    fn transition(&mut self, next: FlowStage) -> Option<FlowEvent> {
        let from = self.stage.kind();
        let to = next.kind();
        if from != to && to != StageKind::AwaitingEmail && !from.can_transition_to(to) {
            warn!(%from, %to, "Unexpected stage transition");
        }
        self.stage = next;
        (from != to).then_some(FlowEvent::StageChanged { from, to })
    }

    fn stop_ticker(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }
}

struct Shared {
    state: Mutex<FlowState>,
    events: broadcast::Sender<FlowEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, FlowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: FlowEvent) {
        // ok if nobody is listening
        let _ = self.events.send(event);
    }

    fn transition(&self, state: &mut FlowState, next: FlowStage) {
        if let Some(event) = state.transition(next) {
            self.emit(event);
        }
    }

    fn push_notice(&self, state: &mut FlowState, notice: Notice) {
        state.notices.push(notice.clone());
        self.emit(FlowEvent::Notice(notice));
    }

    fn fail(&self, state: &mut FlowState, err: FlowError) -> FlowError {
        self.push_notice(state, Notice::error(err.user_message()));
        err
    }

    /// Countdown reached zero for `window`: fall back to requesting a new OTP.
    fn expire(&self, state: &mut FlowState, window: u64) {
        let session = match std::mem::take(&mut state.stage) {
            FlowStage::AwaitingOtpEntry { session, .. } => session,
            other => {
                state.stage = other;
                return;
            }
        };
        // This runs on the ticker itself; detach rather than abort.
        state.ticker = None;
        info!(window, "OTP window lapsed without verification");
        self.transition(
            state,
            FlowStage::AwaitingOtpRequest {
                session,
                expired_window: Some(window),
            },
        );
        self.emit(FlowEvent::OtpExpired);
        state.notices.clear();
        self.push_notice(state, Notice::error(OTP_EXPIRED));
    }
}

/// Clears the in-flight marker when the owning operation finishes, even if a
/// reset happened meanwhile.
struct InFlight<'a> {
    shared: &'a Shared,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.shared.lock().in_flight = None;
    }
}

struct Attempt<'a, T> {
    _guard: InFlight<'a>,
    generation: u64,
    captured: T,
}

fn invalid(operation: &'static str, stage: &FlowStage) -> FlowError {
    FlowError::InvalidStage {
        operation,
        stage: stage.kind().to_string(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Drives the visa application workflow against a `VisaApi`.
pub struct FlowController {
    api: Arc<dyn VisaApi>,
    config: ConsoleConfig,
    shared: Arc<Shared>,
}

impl FlowController {
    pub fn new(api: Arc<dyn VisaApi>, config: ConsoleConfig) -> Self {
        let (events, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Self {
            api,
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(FlowState {
                    stage: FlowStage::AwaitingEmail,
                    generation: 0,
                    last_window: 0,
                    in_flight: None,
                    notices: Vec::new(),
                    ticker: None,
                }),
                events,
            }),
        }
    }

    /// Subscribe to flow events.
    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.shared.events.subscribe()
    }

    pub fn stage(&self) -> StageKind {
        self.shared.lock().stage.kind()
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        let state = self.shared.lock();
        let stage = &state.stage;
        FlowSnapshot {
            stage: stage.kind(),
            email: stage.email().map(String::from),
            countdown_remaining: stage.countdown().map(Countdown::remaining),
            countdown_display: stage.countdown().map(Countdown::display),
            otp_expired: matches!(
                stage,
                FlowStage::AwaitingOtpRequest {
                    expired_window: Some(_),
                    ..
                }
            ),
            application: stage.session().and_then(|s| s.application.clone()),
            token_expires_at: stage.session().and_then(|s| s.token_expires_at),
            receipt: stage.receipt().cloned(),
            notices: state.notices.clone(),
            in_flight: state.in_flight,
        }
    }

    /// Exchange an email for a session token and application snapshot.
    ///
    /// Also accepted while awaiting an OTP request, which re-issues the token.
    pub async fn submit_email(&self, email: &str) -> Result<(), FlowError> {
        let email = email.trim().to_string();
        if email.is_empty() {
            return Err(self.reject(FlowError::Validation { field: "email" }));
        }

        let Attempt {
            _guard,
            generation,
            captured: (),
        } = self.begin(SUBMIT_EMAIL, |stage| match stage {
            FlowStage::AwaitingEmail | FlowStage::AwaitingOtpRequest { .. } => Ok(()),
            other => Err(invalid(SUBMIT_EMAIL, other)),
        })?;

        let result = self.api.issue_token(&email).await.and_then(|resp| {
            if resp.token.trim().is_empty() {
                Err(ApiError::InvalidResponse {
                    endpoint: "/visa-application".to_string(),
                    reason: "backend issued an empty token".to_string(),
                })
            } else {
                Ok(resp)
            }
        });

        let mut state = self.current(generation, SUBMIT_EMAIL)?;
        let response = match result {
            Ok(response) => response,
            Err(e) => return Err(self.shared.fail(&mut state, e.into())),
        };

        info!(
            email = %email,
            has_application = response.visa_application_data.is_some(),
            "Session token issued"
        );
        let session = TokenSession {
            email,
            token: Arc::new(SecretString::from(response.token)),
            token_expires_at: response.token_expires_at,
            application: response.visa_application_data,
        };
        state.stop_ticker();
        self.shared.transition(
            &mut state,
            FlowStage::AwaitingOtpRequest {
                session,
                expired_window: None,
            },
        );
        self.shared
            .push_notice(&mut state, Notice::success(TOKEN_RECEIVED));
        Ok(())
    }

    /// Ask the backend to send an OTP and start a fresh countdown.
    pub async fn request_otp(&self) -> Result<(), FlowError> {
        let Attempt {
            _guard,
            generation,
            captured: token,
        } = self.begin(REQUEST_OTP, |stage| match stage {
            FlowStage::AwaitingOtpRequest { session, .. } => Ok(Arc::clone(&session.token)),
            other => Err(invalid(REQUEST_OTP, other)),
        })?;

        let result = self.api.send_otp(&token).await;

        let mut state = self.current(generation, REQUEST_OTP)?;
        if let Err(e) = result {
            return Err(self.shared.fail(&mut state, e.into()));
        }

        let session = match std::mem::take(&mut state.stage) {
            FlowStage::AwaitingOtpRequest { session, .. } => session,
            other => {
                let err = invalid(REQUEST_OTP, &other);
                state.stage = other;
                return Err(err);
            }
        };

        state.last_window += 1;
        let window = state.last_window;
        let countdown = Countdown::start(self.config.otp_window);
        info!(window, secs = countdown.remaining(), "OTP sent; countdown started");

        self.shared.transition(
            &mut state,
            FlowStage::AwaitingOtpEntry {
                session,
                window,
                countdown,
            },
        );
        state.stop_ticker();
        state.ticker = Some(spawn_countdown(Arc::clone(&self.shared), window));
        self.shared.push_notice(&mut state, Notice::success(OTP_SENT));
        Ok(())
    }

    /// Verify an OTP. On success, records the OTP on the backend and refreshes
    /// the application data; failures of those two calls are reported but
    /// never undo the verification.
    pub async fn verify_otp(&self, code: &str) -> Result<PostVerification, FlowError> {
        let code = code.trim().to_string();
        if code.is_empty() {
            return Err(self.reject(FlowError::Validation { field: "otp" }));
        }

        let Attempt {
            _guard,
            generation,
            captured: (email, token, window),
        } = self.begin(VERIFY_OTP, |stage| match stage {
            FlowStage::AwaitingOtpEntry {
                session, window, ..
            } => Ok((session.email.clone(), Arc::clone(&session.token), *window)),
            FlowStage::AwaitingOtpRequest {
                expired_window: Some(_),
                ..
            } => Err(FlowError::Expired),
            other => Err(invalid(VERIFY_OTP, other)),
        })?;

        let result = self.api.verify_otp(&token, &code).await;

        {
            let mut state = self.current(generation, VERIFY_OTP)?;
            let response = match result {
                Ok(response) => response,
                Err(e) => return Err(self.shared.fail(&mut state, e.into())),
            };
            if !response.is_verified() {
                warn!(window, "OTP rejected by backend");
                return Err(self.shared.fail(&mut state, FlowError::VerificationFailed));
            }

            let session = match std::mem::take(&mut state.stage) {
                FlowStage::AwaitingOtpEntry {
                    session, window: w, ..
                } if w == window => session,
                FlowStage::AwaitingOtpRequest {
                    session,
                    expired_window: Some(w),
                } if w == window => {
                    info!(window, "Verification arrived after the countdown lapsed; accepting it");
                    session
                }
                // No other stage can be current: this verify holds the
                // in-flight marker and a reset is caught by `current`.
                other => {
                    warn!(window, stage = %other.kind(), "Verification result does not match the current stage");
                    state.stage = other;
                    return Err(FlowError::Superseded {
                        operation: VERIFY_OTP,
                    });
                }
            };

            state.stop_ticker();
            self.shared
                .transition(&mut state, FlowStage::Verified { session });
            state.notices.clear();
            self.shared
                .push_notice(&mut state, Notice::success(OTP_VERIFIED));
            info!(window, "OTP verified");
        }

        self.ensure_current(generation, VERIFY_OTP)?;
        let stored_otp_updated = match self.api.update_stored_otp(&email, &code).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to record verified OTP");
                self.warn_current(generation, e.user_message());
                false
            }
        };

        self.ensure_current(generation, VERIFY_OTP)?;
        let application_refreshed = match self.api.fetch_application(&email).await {
            Ok(Some(data)) => {
                self.cache_application(generation, data);
                true
            }
            Ok(None) => {
                debug!("No application data returned after verification");
                false
            }
            Err(e) => {
                warn!(error = %e, "Failed to refresh application data");
                self.warn_current(generation, e.user_message());
                false
            }
        };

        Ok(PostVerification {
            stored_otp_updated,
            application_refreshed,
        })
    }

    /// Submit the verified application. Safe to retry after a failure.
    pub async fn submit_application(&self) -> Result<SubmissionReceipt, FlowError> {
        let Attempt {
            _guard,
            generation,
            captured: (email, token, cached),
        } = self.begin(SUBMIT_APPLICATION, |stage| match stage {
            FlowStage::Verified { session } => Ok((
                session.email.clone(),
                Arc::clone(&session.token),
                session.application.clone(),
            )),
            other => Err(invalid(SUBMIT_APPLICATION, other)),
        })?;

        let captcha = match self.api.captcha().await {
            Ok(captcha) => captcha,
            Err(e) => return Err(self.fail_current(generation, e.into())),
        };
        self.ensure_current(generation, SUBMIT_APPLICATION)?;

        let application = match cached {
            Some(application) => application,
            None => match self.api.fetch_application(&email).await {
                Ok(Some(data)) => {
                    self.cache_application(generation, data.clone());
                    data
                }
                Ok(None) => {
                    let err = ApiError::InvalidResponse {
                        endpoint: "/visa-application".to_string(),
                        reason: "no application data on file".to_string(),
                    };
                    return Err(self.fail_current(generation, err.into()));
                }
                Err(e) => return Err(self.fail_current(generation, e.into())),
            },
        };

        self.ensure_current(generation, SUBMIT_APPLICATION)?;
        let result = self.api.submit(&token, &application, &captcha).await;

        let mut state = self.current(generation, SUBMIT_APPLICATION)?;
        let response = match result {
            Ok(response) => response,
            Err(e) => return Err(self.shared.fail(&mut state, e.into())),
        };

        let (session_id, reservation_link) = match (
            non_empty(response.session_id),
            non_empty(response.reservation_link),
        ) {
            (Some(session_id), Some(reservation_link)) => (session_id, reservation_link),
            _ => {
                let err = ApiError::InvalidResponse {
                    endpoint: "/api/submit-visa".to_string(),
                    reason: "missing sessionId or reservationLink".to_string(),
                };
                return Err(self.shared.fail(&mut state, err.into()));
            }
        };

        let receipt = SubmissionReceipt {
            payment_url: self.config.payment_url(&session_id),
            session_id,
            reservation_link,
        };
        info!(session_id = %receipt.session_id, "Visa application submitted");

        state.stop_ticker();
        self.shared.transition(
            &mut state,
            FlowStage::Submitted {
                email,
                receipt: receipt.clone(),
            },
        );
        self.shared
            .push_notice(&mut state, Notice::success(APPLICATION_SUBMITTED));
        Ok(receipt)
    }

    /// Drop the whole session and start over from the email step.
    ///
    /// A request already in flight keeps the in-flight marker until it
    /// returns; it makes no further backend calls and its result is dropped.
    pub fn reset(&self) {
        let mut state = self.shared.lock();
        state.stop_ticker();
        state.generation += 1;
        state.notices.clear();
        self.shared.transition(&mut state, FlowStage::AwaitingEmail);
        info!("Application session reset");
    }

    fn begin<T>(
        &self,
        operation: &'static str,
        capture: impl FnOnce(&FlowStage) -> Result<T, FlowError>,
    ) -> Result<Attempt<'_, T>, FlowError> {
        let mut state = self.shared.lock();
        if let Some(pending) = state.in_flight {
            debug!(operation, pending, "Rejecting action while another is in flight");
            let err = FlowError::RequestInFlight { operation: pending };
            return Err(self.shared.fail(&mut state, err));
        }
        let captured = match capture(&state.stage) {
            Ok(captured) => captured,
            Err(e) => return Err(self.shared.fail(&mut state, e)),
        };

        state.in_flight = Some(operation);
        state.notices.clear();
        let generation = state.generation;
        Ok(Attempt {
            _guard: InFlight {
                shared: &self.shared,
            },
            generation,
            captured,
        })
    }

    /// Re-lock after a backend call, unless a reset superseded it.
    fn current(
        &self,
        generation: u64,
        operation: &'static str,
    ) -> Result<MutexGuard<'_, FlowState>, FlowError> {
        let mut state = self.shared.lock();
        if state.generation != generation {
            debug!(operation, "Discarding result from before a reset");
            let err = FlowError::Superseded { operation };
            self.shared
                .push_notice(&mut state, Notice::warning(err.user_message()));
            return Err(err);
        }
        Ok(state)
    }

    /// Stop a multi-call operation between calls once a reset superseded it.
    fn ensure_current(&self, generation: u64, operation: &'static str) -> Result<(), FlowError> {
        self.current(generation, operation).map(drop)
    }

    fn reject(&self, err: FlowError) -> FlowError {
        let mut state = self.shared.lock();
        state.notices.clear();
        self.shared.fail(&mut state, err)
    }

    fn fail_current(&self, generation: u64, err: FlowError) -> FlowError {
        let mut state = self.shared.lock();
        if state.generation == generation {
            self.shared.fail(&mut state, err)
        } else {
            err
        }
    }

    fn warn_current(&self, generation: u64, text: String) {
        let mut state = self.shared.lock();
        if state.generation == generation {
            self.shared.push_notice(&mut state, Notice::warning(text));
        }
    }

    fn cache_application(&self, generation: u64, data: ApplicationData) {
        let mut state = self.shared.lock();
        if state.generation != generation {
            return;
        }
        if let FlowStage::Verified { session } = &mut state.stage {
            session.application = Some(data);
        }
    }
}

impl Drop for FlowController {
    fn drop(&mut self) {
        self.shared.lock().stop_ticker();
    }
}

/// Tick the countdown for `window` once per second until it lapses or the
/// stage moves on.
fn spawn_countdown(shared: Arc<Shared>, window: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            let mut state = shared.lock();
            let tick = match &mut state.stage {
                FlowStage::AwaitingOtpEntry {
                    window: current,
                    countdown,
                    ..
                } if *current == window => countdown.tick(),
                _ => break,
            };
            match tick {
                CountdownTick::Running(remaining_secs) => {
                    shared.emit(FlowEvent::Countdown { remaining_secs });
                }
                CountdownTick::Expired => {
                    shared.emit(FlowEvent::Countdown { remaining_secs: 0 });
                    shared.expire(&mut state, window);
                    break;
                }
            }
        }
    })
}
