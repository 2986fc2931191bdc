//! Async driver connecting a [`PinSession`] to its collaborators

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::secret::Secret;
use super::session::{Effect, PinEvent, PinInput, PinOutput, PinSession, Transition};
use super::verifier::{VerificationVerdict, Verifier};
use crate::config::PinEntryConfig;
use crate::error::Result;
use crate::throttle::AttemptThrottle;

type PendingVerdict = Option<BoxFuture<'static, VerificationVerdict>>;

/// How a PIN entry session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The PIN was accepted
    Verified(Secret),
    /// The input channel closed before a PIN was accepted
    Abandoned,
}

enum Step {
    Event(PinEvent),
    InputClosed,
    StatusClosed,
}

/// Runs PIN entry sessions against a throttle and a verifier
#[derive(Clone)]
pub struct PinVerificationMachine {
    throttle: AttemptThrottle,
    verifier: Arc<dyn Verifier>,
    config: PinEntryConfig,
}

impl PinVerificationMachine {
    /// Create a machine
    pub fn new(
        throttle: AttemptThrottle,
        verifier: Arc<dyn Verifier>,
        config: PinEntryConfig,
    ) -> Self {
        Self {
            throttle,
            verifier,
            config,
        }
    }

    /// Throttle shared with this machine
    pub fn throttle(&self) -> &AttemptThrottle {
        &self.throttle
    }

    /// Run one session until the PIN is accepted or `input` closes
    ///
    /// Outputs are sent on `output` in the order the session produces them,
    /// once the throttle has applied the transition's effects.
    /// Throttle status is polled before the pending verdict, and a lock drops
    /// the in-flight verification, so a verdict that arrives after a lock is
    /// never acted on.
    ///
    /// Throttle failures end the session with the error unchanged.
    pub async fn run(
        &self,
        mut input: mpsc::UnboundedReceiver<PinInput>,
        output: mpsc::UnboundedSender<PinOutput>,
    ) -> Result<SessionOutcome> {
        let mut statuses = self.throttle.status_changes()?;
        let initial = match statuses.try_recv() {
            Some(status) => status,
            None => self.throttle.status()?,
        };

        let (mut session, transition) = PinSession::start(self.config, initial);
        let mut pending: PendingVerdict = None;
        self.apply(transition, &mut pending, &output)?;

        loop {
            let step = tokio::select! {
                biased;

                status = statuses.recv() => match status {
                    Some(status) => Step::Event(PinEvent::StatusObserved(status)),
                    None => Step::StatusClosed,
                },
                verdict = wait_verdict(&mut pending), if pending.is_some() => {
                    Step::Event(PinEvent::VerdictReceived(verdict))
                }
                digit = input.recv() => match digit {
                    Some(digit) => Step::Event(digit.into()),
                    None => Step::InputClosed,
                },
            };

            let event = match step {
                Step::Event(event) => event,
                Step::InputClosed => {
                    debug!("PIN input closed, abandoning session");
                    return Ok(SessionOutcome::Abandoned);
                }
                Step::StatusClosed => {
                    warn!("Throttle status stream closed, abandoning session");
                    return Ok(SessionOutcome::Abandoned);
                }
            };

            let transition = session.handle(event);
            if !session.is_verifying() && pending.take().is_some() {
                debug!("Dropped in-flight verification");
            }
            self.apply(transition, &mut pending, &output)?;

            if let Some(secret) = session.verified_secret() {
                info!("PIN verified");
                return Ok(SessionOutcome::Verified(secret.clone()));
            }
        }
    }

    fn apply(
        &self,
        transition: Transition,
        pending: &mut PendingVerdict,
        output: &mpsc::UnboundedSender<PinOutput>,
    ) -> Result<()> {
        for effect in transition.effects {
            match effect {
                Effect::Verify(candidate) => {
                    debug!("Submitting PIN for verification");
                    let verifier = Arc::clone(&self.verifier);
                    *pending = Some(Box::pin(async move {
                        verifier.verify(candidate.as_str()).await
                    }));
                }
                Effect::RecordSuccess => {
                    self.throttle.record_successful_authentication()?;
                }
                Effect::RecordFailure => {
                    self.throttle.increment_failed_attempt()?;
                }
            }
        }

        // Outputs only follow effects that succeeded; a failed reset must not
        // show as an accepted PIN
        for out in transition.outputs {
            if output.send(out).is_err() {
                debug!("PIN output receiver dropped");
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for PinVerificationMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinVerificationMachine")
            .field("throttle", &self.throttle)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn wait_verdict(pending: &mut PendingVerdict) -> VerificationVerdict {
    match pending.as_mut() {
        Some(verify) => {
            let verdict = verify.await;
            *pending = None;
            verdict
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ThrottleConfig;
    use crate::error::GuardError;
    use crate::pin::PinError;
    use crate::store::{AttemptStore, MemoryAttemptStore};
    use crate::throttle::ProtectionStatus;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    /// Answers with queued verdicts and records every candidate
    #[derive(Default)]
    struct ScriptedVerifier {
        verdicts: Mutex<VecDeque<VerificationVerdict>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedVerifier {
        fn new(verdicts: impl IntoIterator<Item = VerificationVerdict>) -> Arc<Self> {
            Arc::new(Self {
                verdicts: Mutex::new(verdicts.into_iter().collect()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Verifier for ScriptedVerifier {
        async fn verify(&self, candidate: &str) -> VerificationVerdict {
            self.calls.lock().unwrap().push(candidate.to_string());
            self.verdicts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(VerificationVerdict::Incorrect)
        }
    }

    struct Harness {
        input: mpsc::UnboundedSender<PinInput>,
        output: mpsc::UnboundedReceiver<PinOutput>,
        session: JoinHandle<Result<SessionOutcome>>,
        throttle: AttemptThrottle,
    }

    impl Harness {
        fn start(verifier: Arc<ScriptedVerifier>) -> Self {
            let clock = ManualClock::default();
            let throttle = AttemptThrottle::new(
                ThrottleConfig::new(5, Duration::from_secs(1200)).unwrap(),
                Arc::new(MemoryAttemptStore::new()) as Arc<dyn AttemptStore>,
                Arc::new(clock.clone()),
                Arc::new(clock),
            )
            .unwrap();
            let machine =
                PinVerificationMachine::new(throttle.clone(), verifier, PinEntryConfig::default());

            let (input, input_rx) = mpsc::unbounded_channel();
            let (output_tx, output) = mpsc::unbounded_channel();
            let session = tokio::spawn(async move { machine.run(input_rx, output_tx).await });

            Self {
                input,
                output,
                session,
                throttle,
            }
        }

        fn type_pin(&self, digits: &str) {
            for digit in digits.chars() {
                self.input.send(PinInput::DigitEntered(digit)).unwrap();
            }
        }

        /// Collect outputs up to and including the first one matching `until`
        async fn outputs_until(&mut self, until: impl Fn(&PinOutput) -> bool) -> Vec<PinOutput> {
            let mut seen = Vec::new();
            while let Some(out) = self.output.recv().await {
                let done = until(&out);
                seen.push(out);
                if done {
                    break;
                }
            }
            seen
        }
    }

    #[tokio::test]
    async fn test_correct_pin_verifies_once_and_resets() {
        let verifier = ScriptedVerifier::new([VerificationVerdict::Correct(Secret::new("1234"))]);
        let mut harness = Harness::start(Arc::clone(&verifier));
        harness.throttle.increment_failed_attempt().unwrap();

        harness.type_pin("1234");
        let outputs = harness
            .outputs_until(|out| matches!(out, PinOutput::Verified(_)))
            .await;

        assert_eq!(
            outputs.last(),
            Some(&PinOutput::Verified(Secret::new("1234")))
        );
        assert_eq!(verifier.calls(), vec!["1234".to_string()]);
        assert_eq!(
            harness.session.await.unwrap().unwrap(),
            SessionOutcome::Verified(Secret::new("1234"))
        );
        assert_eq!(harness.throttle.status().unwrap().attempts_made(), 0);
    }

    #[tokio::test]
    async fn test_incorrect_pin_shows_first_attempt_error() {
        let verifier = ScriptedVerifier::new([VerificationVerdict::Incorrect]);
        let mut harness = Harness::start(verifier);

        harness.type_pin("9999");
        let outputs = harness
            .outputs_until(|out| matches!(out, PinOutput::ErrorShown(_)))
            .await;

        assert_eq!(
            outputs.last(),
            Some(&PinOutput::ErrorShown(PinError::IncorrectFirstAttempt))
        );
        assert!(outputs.contains(&PinOutput::PinCleared));
        assert_eq!(
            harness.throttle.status().unwrap(),
            ProtectionStatus::Allowed {
                attempts_made: 1,
                attempts_remaining: 4
            }
        );
    }

    #[tokio::test]
    async fn test_network_error_not_counted() {
        let verifier = ScriptedVerifier::new([VerificationVerdict::NetworkError]);
        let mut harness = Harness::start(verifier);

        harness.type_pin("1234");
        let outputs = harness
            .outputs_until(|out| matches!(out, PinOutput::ErrorShown(_)))
            .await;

        assert_eq!(outputs.last(), Some(&PinOutput::ErrorShown(PinError::Network)));
        assert_eq!(harness.throttle.status().unwrap().attempts_made(), 0);
    }

    /// Loads fine but refuses every write
    struct ReadOnlyStore;

    impl AttemptStore for ReadOnlyStore {
        fn load(&self) -> Result<Option<crate::throttle::FailedAttemptState>> {
            Ok(None)
        }

        fn save(&self, _state: &crate::throttle::FailedAttemptState) -> Result<()> {
            Err(GuardError::Store("read-only".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_reset_never_reports_verified() {
        let clock = ManualClock::default();
        let throttle = AttemptThrottle::new(
            ThrottleConfig::default(),
            Arc::new(ReadOnlyStore),
            Arc::new(clock.clone()),
            Arc::new(clock),
        )
        .unwrap();
        let verifier = ScriptedVerifier::new([VerificationVerdict::Correct(Secret::new("1234"))]);
        let machine = PinVerificationMachine::new(throttle, verifier, PinEntryConfig::default());

        let (input, input_rx) = mpsc::unbounded_channel();
        let (output_tx, mut output) = mpsc::unbounded_channel();
        for digit in "1234".chars() {
            input.send(PinInput::DigitEntered(digit)).unwrap();
        }

        let result = machine.run(input_rx, output_tx).await;
        assert!(matches!(result, Err(GuardError::Store(_))));

        while let Some(out) = output.recv().await {
            assert!(!matches!(out, PinOutput::Verified(_)));
        }
    }

    #[tokio::test]
    async fn test_closing_input_abandons() {
        let verifier = Arc::new(ScriptedVerifier::default());
        let harness = Harness::start(Arc::clone(&verifier));

        harness.type_pin("12");
        drop(harness.input);

        assert_eq!(
            harness.session.await.unwrap().unwrap(),
            SessionOutcome::Abandoned
        );
        assert!(verifier.calls().is_empty());
    }
}
