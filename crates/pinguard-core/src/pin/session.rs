//! PIN entry state machine
//!
//! [`PinSession`] is pure: it consumes [`PinEvent`]s and returns the
//! [`Effect`]s to run and the [`PinOutput`]s to show. It never calls the
//! verifier or the throttle itself; [`PinVerificationMachine`] does that.
//!
//! Throttle status is the source of truth for attempt counts. A verdict only
//! decides which throttle operation runs; the error the user sees after an
//! incorrect PIN comes from the status that operation publishes.
//!
//! [`PinVerificationMachine`]: super::PinVerificationMachine

use chrono::{DateTime, Utc};
use tracing::debug;

use super::secret::{PinBuffer, Secret};
use super::verifier::VerificationVerdict;
use super::PinError;
use crate::config::PinEntryConfig;
use crate::throttle::ProtectionStatus;

/// Where a session is in the entry flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Collecting digits
    Entering {
        /// Digits typed so far
        partial: PinBuffer,
    },
    /// Waiting for the verifier
    Verifying {
        /// The submitted PIN
        candidate: PinBuffer,
    },
    /// Attempts refused until `until`
    Locked {
        /// End of the lockout window
        until: DateTime<Utc>,
    },
    /// The PIN was accepted; the session is over
    Verified {
        /// Value released by the verifier
        secret: Secret,
    },
}

impl SessionState {
    fn entering() -> Self {
        SessionState::Entering {
            partial: PinBuffer::new(),
        }
    }
}

/// Input from the PIN widget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinInput {
    /// A character was typed; anything but an ASCII digit is ignored
    DigitEntered(char),
    /// The last digit was deleted
    DigitRemoved,
}

/// Everything a session reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinEvent {
    /// A character was typed
    DigitEntered(char),
    /// The last digit was deleted
    DigitRemoved,
    /// The verifier answered
    VerdictReceived(VerificationVerdict),
    /// The throttle published a status
    StatusObserved(ProtectionStatus),
}

impl From<PinInput> for PinEvent {
    fn from(input: PinInput) -> Self {
        match input {
            PinInput::DigitEntered(c) => PinEvent::DigitEntered(c),
            PinInput::DigitRemoved => PinEvent::DigitRemoved,
        }
    }
}

/// Work requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Check the candidate with the verifier
    Verify(PinBuffer),
    /// Reset the throttle after a correct PIN
    RecordSuccess,
    /// Count a failed attempt
    RecordFailure,
}

/// How the PIN widget should present itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMode {
    /// Accepting digits
    PinEntry,
    /// Verification in progress
    Progress,
    /// Locked out; show a timer counting down to `until`
    Locked {
        /// End of the lockout window
        until: DateTime<Utc>,
    },
}

/// Change for the UI to render
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinOutput {
    /// Switch widget mode
    ModeChanged(EntryMode),
    /// Show an error message
    ErrorShown(PinError),
    /// Remove any error message
    ErrorHidden,
    /// Clear the digits shown in the widget
    PinCleared,
    /// The PIN was accepted
    Verified(Secret),
}

/// Effects and outputs produced by one event
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Transition {
    /// Work to run, in order
    pub effects: Vec<Effect>,
    /// UI changes, in order
    pub outputs: Vec<PinOutput>,
}

impl Transition {
    fn output(mut self, output: PinOutput) -> Self {
        self.outputs.push(output);
        self
    }

    fn effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// One run of the PIN entry flow
#[derive(Debug)]
pub struct PinSession {
    config: PinEntryConfig,
    state: SessionState,
}

impl PinSession {
    /// Start a session from the throttle status at subscription time
    ///
    /// A session started while locked begins in [`SessionState::Locked`].
    pub fn start(config: PinEntryConfig, status: ProtectionStatus) -> (Self, Transition) {
        let mut session = Self {
            config,
            state: SessionState::entering(),
        };
        let transition = session.handle(PinEvent::StatusObserved(status));
        (session, transition)
    }

    /// Current state
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Whether a verification is outstanding
    pub fn is_verifying(&self) -> bool {
        matches!(self.state, SessionState::Verifying { .. })
    }

    /// The released secret once the session has finished
    pub fn verified_secret(&self) -> Option<&Secret> {
        match &self.state {
            SessionState::Verified { secret } => Some(secret),
            _ => None,
        }
    }

    /// Apply one event
    pub fn handle(&mut self, event: PinEvent) -> Transition {
        if self.verified_secret().is_some() {
            debug!("Ignoring {:?} after verification", event);
            return Transition::default();
        }

        match event {
            PinEvent::DigitEntered(digit) => self.digit_entered(digit),
            PinEvent::DigitRemoved => {
                if let SessionState::Entering { partial } = &mut self.state {
                    partial.pop();
                }
                Transition::default()
            }
            PinEvent::VerdictReceived(verdict) => self.verdict_received(verdict),
            PinEvent::StatusObserved(status) => self.status_observed(status),
        }
    }

    fn digit_entered(&mut self, digit: char) -> Transition {
        let submit_length = self.config.submit_length();
        let SessionState::Entering { partial } = &mut self.state else {
            return Transition::default();
        };

        if !digit.is_ascii_digit() || partial.len() >= submit_length {
            return Transition::default();
        }

        partial.push(digit);
        if partial.len() < submit_length {
            return Transition::default();
        }

        let candidate = partial.take();
        self.state = SessionState::Verifying {
            candidate: candidate.clone(),
        };

        Transition::default()
            .output(PinOutput::ErrorHidden)
            .output(PinOutput::ModeChanged(EntryMode::Progress))
            .effect(Effect::Verify(candidate))
    }

    fn verdict_received(&mut self, verdict: VerificationVerdict) -> Transition {
        if !self.is_verifying() {
            // Late verdict after a lock took over
            debug!("Discarding verdict outside verification");
            return Transition::default();
        }

        let error = match verdict {
            VerificationVerdict::Correct(secret) => {
                self.state = SessionState::Verified {
                    secret: secret.clone(),
                };
                return Transition::default()
                    .output(PinOutput::Verified(secret))
                    .effect(Effect::RecordSuccess);
            }
            VerificationVerdict::Incorrect => None,
            VerificationVerdict::NetworkError => Some(PinError::Network),
            VerificationVerdict::ServerError => Some(PinError::Server),
            VerificationVerdict::OtherError(cause) => Some(PinError::Unexpected(cause)),
        };

        self.state = SessionState::entering();
        let transition = Transition::default()
            .output(PinOutput::PinCleared)
            .output(PinOutput::ModeChanged(EntryMode::PinEntry));

        match error {
            Some(error) => transition.output(PinOutput::ErrorShown(error)),
            None => transition.effect(Effect::RecordFailure),
        }
    }

    fn status_observed(&mut self, status: ProtectionStatus) -> Transition {
        match status {
            ProtectionStatus::Locked {
                attempts_made,
                locked_until,
            } => {
                let mut transition = Transition::default();
                let already_locked =
                    matches!(self.state, SessionState::Locked { until } if until == locked_until);
                if !already_locked {
                    self.state = SessionState::Locked {
                        until: locked_until,
                    };
                    transition = transition
                        .output(PinOutput::PinCleared)
                        .output(PinOutput::ModeChanged(EntryMode::Locked {
                            until: locked_until,
                        }));
                }
                transition.output(PinOutput::ErrorShown(PinError::AttemptsExhausted {
                    attempts_made,
                    locked_until,
                }))
            }
            ProtectionStatus::Allowed {
                attempts_made,
                attempts_remaining,
            } => {
                let mut transition = Transition::default();
                if matches!(self.state, SessionState::Locked { .. }) {
                    self.state = SessionState::entering();
                    transition = transition.output(PinOutput::ModeChanged(EntryMode::PinEntry));
                }

                let error = match attempts_made {
                    0 => return transition.output(PinOutput::ErrorHidden),
                    1 => PinError::IncorrectFirstAttempt,
                    _ => PinError::IncorrectAttemptsRemaining {
                        remaining: attempts_remaining,
                    },
                };
                transition.output(PinOutput::ErrorShown(error))
            }
        }
    }
}
