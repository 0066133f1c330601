//! Public entry point for admission decisions.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::events::{AdmissionEvents, SpamFlag, TracingEvents};
use super::key::Context;
use super::registry::Registry;
use super::result::AdmissionResult;
use super::rules::{Action, ConfigOverride};
use crate::error::{AdmissionError, GuardedError, Result};
use crate::spam::{SpamClassifier, SpamVerdict};

/// Decides whether operations may proceed and reports each decision.
///
/// The controller is cheap to share behind an `Arc`; all state lives in the
/// injected [`Registry`].
pub struct AdmissionController {
    registry: Arc<Registry>,
    classifier: SpamClassifier,
    events: Arc<dyn AdmissionEvents>,
    enabled: AtomicBool,
}

impl AdmissionController {
    /// Create a controller over `registry`, logging through `tracing` and
    /// classifying spam with default settings and the registry's activity index.
    pub fn new(registry: Arc<Registry>) -> Self {
        let classifier = SpamClassifier::default().with_activity(registry.clone());
        Self {
            registry,
            classifier,
            events: Arc::new(TracingEvents),
            enabled: AtomicBool::new(true),
        }
    }

    /// Send events to a different sink.
    pub fn with_events(mut self, events: Arc<dyn AdmissionEvents>) -> Self {
        self.events = events;
        self
    }

    /// Use a differently tuned classifier.
    pub fn with_classifier(mut self, classifier: SpamClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Turn admission control on or off globally.
    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            info!(enabled = enabled, "Admission control toggled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Decide whether `action` may proceed for `context`.
    ///
    /// A denial is a normal `Ok` result with `success == false`.
    pub fn check(
        &self,
        action: Action,
        context: &Context,
        overrides: Option<&ConfigOverride>,
    ) -> Result<AdmissionResult> {
        if !self.is_enabled() {
            return Ok(AdmissionResult::unlimited(self.registry.now_ms()));
        }

        let result = self.registry.check(action, context, overrides)?;

        if result.success {
            self.events.record_allowed(action, context, &result);
        } else {
            self.events.record_denied(action, context, &result);
        }

        Ok(result)
    }

    /// [`check`](Self::check) for an action given by name.
    pub fn check_named(
        &self,
        action: &str,
        context: &Context,
        overrides: Option<&ConfigOverride>,
    ) -> Result<AdmissionResult> {
        self.check(action.parse()?, context, overrides)
    }

    /// Whether `action` may proceed, without the detail.
    pub fn is_allowed(
        &self,
        action: Action,
        context: &Context,
        overrides: Option<&ConfigOverride>,
    ) -> Result<bool> {
        Ok(self.check(action, context, overrides)?.success)
    }

    /// Run `operation` only if `action` is admitted.
    ///
    /// A denial returns [`AdmissionError::Denied`] without running the
    /// operation. Once admitted, the operation's own result is returned
    /// untouched; its failure does not charge any further quota.
    pub async fn run_guarded<T, E, F, Fut>(
        &self,
        action: Action,
        context: &Context,
        overrides: Option<&ConfigOverride>,
        operation: F,
    ) -> std::result::Result<T, GuardedError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let result = self.check(action, context, overrides)?;
        if !result.success {
            debug!(action = %action, "Guarded operation skipped");
            return Err(GuardedError::Admission(AdmissionError::Denied { action, result }));
        }

        operation().await.map_err(GuardedError::Operation)
    }

    /// Forget a caller's state for one action.
    pub fn reset(&self, action: Action, context: &Context) -> Result<bool> {
        self.registry.reset(action, context)
    }

    /// Score `content` and report it when it looks like spam.
    pub fn classify(&self, content: &str, context: &Context) -> SpamVerdict {
        let verdict = self.classifier.classify(content, context);

        if verdict.is_spam {
            self.events.record_spam_flag(&SpamFlag {
                content_preview: self.classifier.preview(content),
                context: context.clone(),
                score: verdict.score,
                confidence: verdict.confidence,
                reasons: verdict.reasons.clone(),
            });
        }

        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::key::KeyComposer;
    use crate::admission::rules::RuleSet;
    use crate::clock::ManualClock;
    use parking_lot::Mutex;
    use tokio_test::{assert_err, assert_ok};

    #[derive(Default)]
    struct RecordingEvents {
        allowed: Mutex<Vec<(Action, u64)>>,
        denied: Mutex<Vec<(Action, Option<u64>)>>,
        flags: Mutex<Vec<SpamFlag>>,
    }

    impl AdmissionEvents for RecordingEvents {
        fn record_allowed(&self, action: Action, _context: &Context, result: &AdmissionResult) {
            self.allowed.lock().push((action, result.remaining));
        }

        fn record_denied(&self, action: Action, _context: &Context, result: &AdmissionResult) {
            self.denied.lock().push((action, result.retry_after));
        }

        fn record_spam_flag(&self, flag: &SpamFlag) {
            self.flags.lock().push(flag.clone());
        }
    }

    #[derive(Debug, PartialEq)]
    struct BusinessError;

    impl std::fmt::Display for BusinessError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "business rule failed")
        }
    }

    impl std::error::Error for BusinessError {}

    fn setup() -> (AdmissionController, Arc<RecordingEvents>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let registry = Arc::new(
            Registry::with_clock(RuleSet::defaults(), clock.clone())
                .with_key_composer(KeyComposer::with_session("test")),
        );
        let events = Arc::new(RecordingEvents::default());
        let controller = AdmissionController::new(registry).with_events(events.clone());
        (controller, events, clock)
    }

    fn three_per_minute() -> ConfigOverride {
        ConfigOverride {
            max_requests: Some(3),
            window_ms: Some(60_000),
            ..Default::default()
        }
    }

    #[test]
    fn test_check_emits_events() {
        let (controller, events, _) = setup();
        let ctx = Context::new().with_user("alice");
        let o = three_per_minute();

        for _ in 0..3 {
            assert!(controller.check(Action::MessageSend, &ctx, Some(&o)).unwrap().success);
        }
        let denied = controller.check(Action::MessageSend, &ctx, Some(&o)).unwrap();
        assert!(!denied.success);

        assert_eq!(
            *events.allowed.lock(),
            vec![
                (Action::MessageSend, 2),
                (Action::MessageSend, 1),
                (Action::MessageSend, 0)
            ]
        );
        assert_eq!(*events.denied.lock(), vec![(Action::MessageSend, Some(60))]);
    }

    #[test]
    fn test_check_named_unknown_action() {
        let (controller, events, _) = setup();
        let err = controller
            .check_named("message:delete", &Context::new(), None)
            .unwrap_err();
        assert!(matches!(err, AdmissionError::Configuration(_)));
        assert!(events.allowed.lock().is_empty());
    }

    #[test]
    fn test_is_allowed() {
        let (controller, _, _) = setup();
        let ctx = Context::new().with_ip("10.0.0.1");
        let o = ConfigOverride {
            max_requests: Some(1),
            ..Default::default()
        };

        assert!(controller.is_allowed(Action::Login, &ctx, Some(&o)).unwrap());
        assert!(!controller.is_allowed(Action::Login, &ctx, Some(&o)).unwrap());
    }

    #[test]
    fn test_disabled_mode_always_allows() {
        let (controller, events, _) = setup();
        let ctx = Context::new().with_user("alice");
        let o = ConfigOverride {
            max_requests: Some(1),
            ..Default::default()
        };

        controller.set_enabled(false);
        assert!(!controller.is_enabled());

        for _ in 0..100 {
            let result = controller.check(Action::MessageSend, &ctx, Some(&o)).unwrap();
            assert!(result.success);
            assert!(result.is_unlimited());
        }
        assert_eq!(controller.registry().entry_count(), 0);
        assert!(events.allowed.lock().is_empty());

        controller.set_enabled(true);
        assert!(controller.check(Action::MessageSend, &ctx, Some(&o)).unwrap().success);
        assert!(!controller.check(Action::MessageSend, &ctx, Some(&o)).unwrap().success);
    }

    #[test]
    fn test_window_recovers_with_time() {
        let (controller, _, clock) = setup();
        let ctx = Context::new().with_user("alice");
        let o = three_per_minute();

        for _ in 0..3 {
            controller.check(Action::MessageSend, &ctx, Some(&o)).unwrap();
        }
        assert!(!controller.is_allowed(Action::MessageSend, &ctx, Some(&o)).unwrap());

        clock.advance(60_000);
        assert!(controller.is_allowed(Action::MessageSend, &ctx, Some(&o)).unwrap());
    }

    #[tokio::test]
    async fn test_run_guarded_runs_when_allowed() {
        let (controller, _, _) = setup();
        let ctx = Context::new().with_user("alice");

        let value = controller
            .run_guarded(Action::FileUpload, &ctx, None, || async {
                Ok::<_, BusinessError>(42)
            })
            .await;
        assert_eq!(assert_ok!(value), 42);
    }

    #[tokio::test]
    async fn test_run_guarded_skips_when_denied() {
        let (controller, _, _) = setup();
        let ctx = Context::new().with_user("alice");
        let o = ConfigOverride {
            max_requests: Some(1),
            ..Default::default()
        };
        let runs = Arc::new(Mutex::new(0));

        for _ in 0..2 {
            let runs = runs.clone();
            let _ = controller
                .run_guarded(Action::FileUpload, &ctx, Some(&o), || async move {
                    *runs.lock() += 1;
                    Ok::<_, BusinessError>(())
                })
                .await;
        }

        let err = assert_err!(
            controller
                .run_guarded(Action::FileUpload, &ctx, Some(&o), || async {
                    Ok::<_, BusinessError>(())
                })
                .await
        );
        assert!(err.is_denied());
        assert_eq!(*runs.lock(), 1);

        match err {
            GuardedError::Admission(e) => {
                assert_eq!(e.retry_after(), Some(60));
                assert!(e.to_string().contains("file:upload"));
            }
            GuardedError::Operation(_) => panic!("operation must not run"),
        }
    }

    #[tokio::test]
    async fn test_run_guarded_propagates_operation_error() {
        let (controller, _, _) = setup();
        let ctx = Context::new().with_user("alice");
        let o = ConfigOverride {
            max_requests: Some(2),
            ..Default::default()
        };

        let err = controller
            .run_guarded(Action::FileUpload, &ctx, Some(&o), || async {
                Err::<(), _>(BusinessError)
            })
            .await
            .unwrap_err();
        assert!(!err.is_denied());
        assert_eq!(err.into_operation(), Some(BusinessError));

        // The failure consumed exactly the one unit charged by the check.
        let result = controller.check(Action::FileUpload, &ctx, Some(&o)).unwrap();
        assert!(result.success);
        assert_eq!(result.remaining, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_guarded_calls_never_over_admit() {
        let (controller, events, _) = setup();
        let controller = Arc::new(controller);
        let o = ConfigOverride {
            max_requests: Some(10),
            ..Default::default()
        };

        let tasks = (0..40).map(|_| {
            let controller = controller.clone();
            let o = o.clone();
            tokio::spawn(async move {
                let ctx = Context::new().with_user("alice");
                controller
                    .run_guarded(Action::FileUpload, &ctx, Some(&o), || async {
                        Ok::<_, BusinessError>(())
                    })
                    .await
                    .is_ok()
            })
        });

        let outcomes = futures::future::join_all(tasks).await;
        let granted = outcomes
            .into_iter()
            .map(|joined| joined.unwrap())
            .filter(|&ok| ok)
            .count();

        assert_eq!(granted, 10);
        assert_eq!(events.allowed.lock().len(), 10);
        assert_eq!(events.denied.lock().len(), 30);
    }

    #[test]
    fn test_classify_flags_spam() {
        let (controller, events, _) = setup();
        let ctx = Context::new().with_user("alice");

        let clean = controller.classify("lunch at noon?", &ctx);
        assert!(!clean.is_spam);
        assert!(events.flags.lock().is_empty());

        let verdict = controller.classify("BUY NOW!!! click here https://x.test", &ctx);
        assert!(verdict.is_spam);

        let flags = events.flags.lock();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].score, verdict.score);
        assert_eq!(flags[0].content_preview, "BUY NOW!!! click here https://x.test");
    }

    #[test]
    fn test_classify_uses_message_velocity() {
        let (controller, _, clock) = setup();
        let ctx = Context::new().with_user("alice").with_resource("general");

        for _ in 0..11 {
            clock.advance(100);
            assert!(controller.is_allowed(Action::MessageSend, &ctx, None).unwrap());
        }

        let verdict = controller.classify("hi", &ctx);
        assert!(verdict.is_spam);
        assert_eq!(verdict.score, 11);

        // Another user on the same channel is unaffected.
        let bob = Context::new().with_user("bob").with_resource("general");
        assert_eq!(controller.classify("hi", &bob).score, 0);
    }
}
