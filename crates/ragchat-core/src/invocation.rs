//! Bounded bot invocation — deadline, one retry per conversation, canned fallback.
//!
//! The bot runs on tokio's blocking pool and the controller waits on it with
//! `tokio::time::timeout`. A worker that misses its deadline is abandoned:
//! the synchronous bot call cannot be interrupted, so it keeps running until
//! it returns on its own. `workers_in_flight` exposes how many are still out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::bot::Bot;
use crate::config::{FallbackMode, InvocationConfig};
use crate::types::{AnswerSource, RetryBudget};

/// Default per-attempt deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Fed to the bot in place of the retrieved context once the budget is spent.
pub const FALLBACK_INSTRUCTION: &str = "Say \"I'm sorry, I haven't been able to generate an answer yet. Is there anything else I can assist you with?\" In the same language as the user's question";

/// Returned verbatim when the bot can't even phrase the apology.
pub const FALLBACK_MESSAGE: &str =
    "I'm sorry, I haven't been able to generate an answer yet. Is there anything else I can assist you with?";

#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("bot did not answer within {0:?}")]
    Timeout(Duration),

    #[error("bot failed: {0:#}")]
    Generator(anyhow::Error),

    #[error("bot worker panicked")]
    WorkerPanicked,
}

/// An answer plus the path that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub source: AnswerSource,
}

impl Answer {
    fn new(text: impl Into<String>, source: AnswerSource) -> Self {
        Self {
            text: text.into(),
            source,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(
            self.source,
            AnswerSource::FallbackInstruction | AnswerSource::FallbackLiteral
        )
    }
}

/// Decrements the in-flight counter when a worker returns or unwinds.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct InvocationController {
    timeout: Duration,
    reset_budget_on_retry_success: bool,
    fallback: FallbackMode,
    in_flight: Arc<AtomicUsize>,
}

impl Default for InvocationController {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            reset_budget_on_retry_success: false,
            fallback: FallbackMode::Instruction,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl InvocationController {
    pub fn new(config: &InvocationConfig) -> Self {
        Self {
            timeout: config.timeout(),
            reset_budget_on_retry_success: config.reset_budget_on_retry_success,
            fallback: config.fallback,
            ..Default::default()
        }
    }

    /// Same worker gauge, new policy from `config`.
    pub fn reconfigured(&self, config: &InvocationConfig) -> Self {
        Self {
            in_flight: Arc::clone(&self.in_flight),
            ..Self::new(config)
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackMode) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_reset_on_retry_success(mut self, reset: bool) -> Self {
        self.reset_budget_on_retry_success = reset;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Bot workers that have not returned yet, abandoned ones included.
    pub fn workers_in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// One deadline-bounded bot call on the blocking pool.
    pub async fn invoke_bounded(
        &self,
        bot: Arc<dyn Bot>,
        context: Option<String>,
        question: &str,
        timeout: Duration,
    ) -> Result<String, InvocationError> {
        let question = question.to_string();
        let guard = InFlight::enter(&self.in_flight);
        let worker = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            bot.answer(context.as_deref(), &question)
        });

        match tokio::time::timeout(timeout, worker).await {
            Ok(Ok(Ok(answer))) => Ok(answer),
            Ok(Ok(Err(e))) => Err(InvocationError::Generator(e)),
            Ok(Err(e)) => {
                warn!("Bot worker failed: {}", e);
                Err(InvocationError::WorkerPanicked)
            }
            Err(_) => {
                warn!(
                    "Bot did not answer within {:?}, abandoning worker ({} in flight)",
                    timeout,
                    self.workers_in_flight()
                );
                Err(InvocationError::Timeout(timeout))
            }
        }
    }

    /// Answer `question` with the controller's default deadline.
    pub async fn respond(
        &self,
        bot: Arc<dyn Bot>,
        context: Option<String>,
        question: &str,
        budget: &mut RetryBudget,
    ) -> Result<Answer, InvocationError> {
        self.respond_with_timeout(bot, context, question, budget, self.timeout)
            .await
    }

    /// Answer `question`, never surfacing a timeout.
    ///
    /// Bot errors and panics are returned as-is. One on the first attempt
    /// leaves `budget` untouched; one on the retry comes after it was spent.
    pub async fn respond_with_timeout(
        &self,
        bot: Arc<dyn Bot>,
        context: Option<String>,
        question: &str,
        budget: &mut RetryBudget,
        timeout: Duration,
    ) -> Result<Answer, InvocationError> {
        match self
            .invoke_bounded(Arc::clone(&bot), context.clone(), question, timeout)
            .await
        {
            Ok(text) => {
                *budget = RetryBudget::Ready;
                return Ok(Answer::new(text, AnswerSource::FirstAttempt));
            }
            Err(InvocationError::Timeout(_)) => {}
            Err(e) => return Err(e),
        }

        if budget.is_exhausted() {
            info!("Retry budget already spent, falling back");
            return Ok(self.fallback(bot, question, timeout).await);
        }

        *budget = RetryBudget::Exhausted;
        info!("Retrying once after timeout");
        match self
            .invoke_bounded(Arc::clone(&bot), context, question, timeout)
            .await
        {
            Ok(text) => {
                if self.reset_budget_on_retry_success {
                    *budget = RetryBudget::Ready;
                }
                Ok(Answer::new(text, AnswerSource::Retry))
            }
            Err(InvocationError::Timeout(_)) => Ok(self.fallback(bot, question, timeout).await),
            Err(e) => Err(e),
        }
    }

    async fn fallback(&self, bot: Arc<dyn Bot>, question: &str, timeout: Duration) -> Answer {
        if self.fallback == FallbackMode::Literal {
            return Answer::new(FALLBACK_MESSAGE, AnswerSource::FallbackLiteral);
        }

        match self
            .invoke_bounded(bot, Some(FALLBACK_INSTRUCTION.to_string()), question, timeout)
            .await
        {
            Ok(text) => Answer::new(text, AnswerSource::FallbackInstruction),
            Err(e) => {
                warn!("Fallback apology failed ({}), using canned message", e);
                Answer::new(FALLBACK_MESSAGE, AnswerSource::FallbackLiteral)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    /// Records every context it sees; sleeps `delay` on calls whose index is in `slow`.
    struct ScriptedBot {
        reply: &'static str,
        delay: Duration,
        slow: fn(u32, Option<&str>) -> bool,
        calls: AtomicU32,
        contexts: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedBot {
        fn new(reply: &'static str, delay: Duration, slow: fn(u32, Option<&str>) -> bool) -> Arc<Self> {
            Arc::new(Self {
                reply,
                delay,
                slow,
                calls: AtomicU32::new(0),
                contexts: Mutex::new(Vec::new()),
            })
        }

        fn contexts(&self) -> Vec<Option<String>> {
            self.contexts.lock().unwrap().clone()
        }
    }

    impl Bot for ScriptedBot {
        fn answer(&self, context: Option<&str>, _question: &str) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.contexts.lock().unwrap().push(context.map(String::from));
            if (self.slow)(n, context) {
                std::thread::sleep(self.delay);
            }
            Ok(self.reply.to_string())
        }
    }

    fn always(_: u32, _: Option<&str>) -> bool {
        true
    }
    fn never(_: u32, _: Option<&str>) -> bool {
        false
    }
    fn first_only(n: u32, _: Option<&str>) -> bool {
        n == 0
    }
    fn except_apology(_: u32, ctx: Option<&str>) -> bool {
        ctx != Some(FALLBACK_INSTRUCTION)
    }

    const SHORT: Duration = Duration::from_millis(40);
    const SLOW: Duration = Duration::from_millis(300);

    async fn drain(controller: &InvocationController) {
        for _ in 0..50 {
            if controller.workers_in_flight() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_fast_answer_is_returned_and_budget_stays_ready() {
        let bot = ScriptedBot::new("Paris", SLOW, never);
        let controller = InvocationController::default();
        let mut budget = RetryBudget::Ready;

        let answer = controller
            .respond(bot.clone(), Some("France facts".into()), "Capital of France?", &mut budget)
            .await
            .unwrap();

        assert_eq!(answer.text, "Paris");
        assert_eq!(answer.source, AnswerSource::FirstAttempt);
        assert_eq!(budget, RetryBudget::Ready);
        assert_eq!(bot.contexts(), vec![Some("France facts".to_string())]);
    }

    #[tokio::test]
    async fn test_always_slow_bot_gets_two_timed_attempts_then_fallback() {
        let bot = ScriptedBot::new("late", SLOW, always);
        let controller = InvocationController::default().with_timeout(SHORT);
        let mut budget = RetryBudget::Ready;

        let answer = controller
            .respond(bot.clone(), Some("ctx".into()), "q", &mut budget)
            .await
            .unwrap();

        // The apology call times out as well, so the canned text wins
        assert_eq!(answer.text, FALLBACK_MESSAGE);
        assert_eq!(answer.source, AnswerSource::FallbackLiteral);
        assert_eq!(budget, RetryBudget::Exhausted);

        drain(&controller).await;
        assert_eq!(
            bot.contexts(),
            vec![
                Some("ctx".to_string()),
                Some("ctx".to_string()),
                Some(FALLBACK_INSTRUCTION.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_fallback_instruction_answer_is_returned() {
        let bot = ScriptedBot::new("Lo siento, todavía no tengo respuesta.", SLOW, except_apology);
        let controller = InvocationController::default().with_timeout(SHORT);
        let mut budget = RetryBudget::Ready;

        let answer = controller
            .respond(bot.clone(), None, "¿Cuál es la capital?", &mut budget)
            .await
            .unwrap();

        assert_eq!(answer.text, "Lo siento, todavía no tengo respuesta.");
        assert_eq!(answer.source, AnswerSource::FallbackInstruction);
        assert!(answer.is_fallback());
    }

    #[tokio::test]
    async fn test_exhausted_budget_skips_the_retry() {
        let bot = ScriptedBot::new("late", SLOW, always);
        let controller = InvocationController::default()
            .with_timeout(SHORT)
            .with_fallback(FallbackMode::Literal);
        let mut budget = RetryBudget::Exhausted;

        for _ in 0..2 {
            let answer = controller
                .respond(bot.clone(), None, "q", &mut budget)
                .await
                .unwrap();
            assert_eq!(answer.text, FALLBACK_MESSAGE);
            assert_eq!(budget, RetryBudget::Exhausted);
        }

        drain(&controller).await;
        // One timed attempt per turn, no retries, literal fallback never calls the bot
        assert_eq!(bot.contexts().len(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_budget_goes_straight_to_apology_instruction() {
        let bot = ScriptedBot::new("Sorry, no answer yet.", SLOW, except_apology);
        let controller = InvocationController::default().with_timeout(SHORT);
        let mut budget = RetryBudget::Exhausted;

        for _ in 0..2 {
            let answer = controller
                .respond(bot.clone(), Some("ctx".into()), "q", &mut budget)
                .await
                .unwrap();
            assert_eq!(answer.text, "Sorry, no answer yet.");
            assert_eq!(answer.source, AnswerSource::FallbackInstruction);
            assert_eq!(budget, RetryBudget::Exhausted);
        }

        drain(&controller).await;
        // Per turn: one timed attempt, no retry, then the apology call
        assert_eq!(
            bot.contexts(),
            vec![
                Some("ctx".to_string()),
                Some(FALLBACK_INSTRUCTION.to_string()),
                Some("ctx".to_string()),
                Some(FALLBACK_INSTRUCTION.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_success_after_exhaustion_restores_budget() {
        let controller = InvocationController::default().with_timeout(SHORT);
        let mut budget = RetryBudget::Ready;

        let slow = ScriptedBot::new("late", SLOW, always);
        controller.respond(slow, None, "q1", &mut budget).await.unwrap();
        assert_eq!(budget, RetryBudget::Exhausted);

        let fast = ScriptedBot::new("Hello", SLOW, never);
        let answer = controller.respond(fast, None, "q2", &mut budget).await.unwrap();
        assert_eq!(answer.text, "Hello");
        assert_eq!(budget, RetryBudget::Ready);
    }

    #[tokio::test]
    async fn test_retry_success_keeps_budget_spent_by_default() {
        let bot = ScriptedBot::new("second time lucky", SLOW, first_only);
        let controller = InvocationController::default().with_timeout(SHORT);
        let mut budget = RetryBudget::Ready;

        let answer = controller.respond(bot, None, "q", &mut budget).await.unwrap();
        assert_eq!(answer.text, "second time lucky");
        assert_eq!(answer.source, AnswerSource::Retry);
        assert_eq!(budget, RetryBudget::Exhausted);
    }

    #[tokio::test]
    async fn test_retry_success_can_restore_budget() {
        let bot = ScriptedBot::new("second time lucky", SLOW, first_only);
        let controller = InvocationController::default()
            .with_timeout(SHORT)
            .with_reset_on_retry_success(true);
        let mut budget = RetryBudget::Ready;

        let answer = controller.respond(bot, None, "q", &mut budget).await.unwrap();
        assert_eq!(answer.source, AnswerSource::Retry);
        assert_eq!(budget, RetryBudget::Ready);
    }

    #[tokio::test]
    async fn test_absent_context_is_passed_as_none() {
        let bot = ScriptedBot::new("ok", SLOW, never);
        let controller = InvocationController::default();
        let mut budget = RetryBudget::Ready;

        controller.respond(bot.clone(), None, "q", &mut budget).await.unwrap();
        assert_eq!(bot.contexts(), vec![None]);
    }

    #[tokio::test]
    async fn test_tiny_timeout_override_returns_fallback() {
        let bot = ScriptedBot::new("real answer", Duration::from_millis(50), always);
        let controller = InvocationController::default().with_fallback(FallbackMode::Literal);
        let mut budget = RetryBudget::Ready;

        let answer = controller
            .respond_with_timeout(bot, None, "q", &mut budget, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(answer.text, FALLBACK_MESSAGE);
        assert_ne!(answer.text, "real answer");
    }

    #[tokio::test]
    async fn test_generator_error_propagates_and_keeps_budget() {
        let bot: Arc<dyn Bot> = Arc::new(|_: Option<&str>, _: &str| -> Result<String> {
            anyhow::bail!("provider returned HTTP 503")
        });
        let controller = InvocationController::default();
        let mut budget = RetryBudget::Exhausted;

        let err = controller.respond(bot, None, "q", &mut budget).await.unwrap_err();
        assert!(matches!(err, InvocationError::Generator(_)));
        assert!(err.to_string().contains("503"));
        assert_eq!(budget, RetryBudget::Exhausted);
    }

    #[tokio::test]
    async fn test_panicking_bot_is_reported() {
        let bot: Arc<dyn Bot> =
            Arc::new(|_: Option<&str>, _: &str| -> Result<String> { panic!("boom") });
        let controller = InvocationController::default();
        let mut budget = RetryBudget::Ready;

        let err = controller.respond(bot, None, "q", &mut budget).await.unwrap_err();
        assert!(matches!(err, InvocationError::WorkerPanicked));
        assert_eq!(controller.workers_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_workers_are_counted_until_they_finish() {
        let bot = ScriptedBot::new("late", SLOW, always);
        let controller = InvocationController::default().with_timeout(SHORT);

        let result = controller
            .invoke_bounded(bot, None, "q", SHORT)
            .await;
        assert!(matches!(result, Err(InvocationError::Timeout(_))));
        assert_eq!(controller.workers_in_flight(), 1);

        drain(&controller).await;
        assert_eq!(controller.workers_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_reconfigured_controller_shares_the_worker_gauge() {
        let bot = ScriptedBot::new("late", SLOW, always);
        let controller = InvocationController::default().with_timeout(SHORT);

        let result = controller.invoke_bounded(bot, None, "q", SHORT).await;
        assert!(matches!(result, Err(InvocationError::Timeout(_))));

        let config = InvocationConfig {
            timeout_secs: 5,
            ..Default::default()
        };
        let next = controller.reconfigured(&config);
        assert_eq!(next.timeout(), Duration::from_secs(5));
        assert_eq!(next.workers_in_flight(), 1);

        drain(&next).await;
        assert_eq!(next.workers_in_flight(), 0);
    }
}
