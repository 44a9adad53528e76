//! Error classification
//!
//! The same remote error code means different things depending on the call in
//! flight: "cluster not found" is success while deleting a cluster and fatal
//! while modifying one. A [`Classifier`] is an ordered rule table; the first
//! matching rule wins and anything unmatched is fatal. Call sites pick a
//! profile and may prepend their own rules with [`Classifier::with_rule`].

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use tke_common::retry::RetryConfig;
use tke_common::{Error, RemoteError};

/// What a remote error means for the call that produced it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Try again within the step budget
    Retryable,
    /// The call's goal already holds; treat as success
    AlreadySatisfied,
    /// Give up immediately
    Fatal,
}

/// Which errors a rule applies to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Matcher {
    /// Exact error code
    Code(String),
    /// Error code prefix, e.g. `InternalError`
    Prefix(String),
    /// Error code with both a prefix and a suffix
    Affixes {
        /// Leading part of the code
        prefix: String,
        /// Trailing part of the code
        suffix: String,
    },
    /// Any error reporting that the addressed object does not exist
    NotFound,
}

impl Matcher {
    fn matches(&self, err: &RemoteError) -> bool {
        match self {
            Matcher::Code(code) => err.code == *code,
            Matcher::Prefix(prefix) => err.code.starts_with(prefix.as_str()),
            Matcher::Affixes { prefix, suffix } => {
                err.code.starts_with(prefix.as_str()) && err.code.ends_with(suffix.as_str())
            }
            Matcher::NotFound => err.is_not_found(),
        }
    }
}

/// One row of a classification table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    /// Which errors the rule covers
    pub matcher: Matcher,
    /// Outcome for matching errors
    pub outcome: Outcome,
    /// When set, the outcome only holds for this long; afterwards the error is fatal
    pub grace: Option<Duration>,
}

impl Rule {
    /// Rule for an exact error code
    pub fn code(code: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            matcher: Matcher::Code(code.into()),
            outcome,
            grace: None,
        }
    }

    /// Rule for an error code prefix
    pub fn prefix(prefix: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            matcher: Matcher::Prefix(prefix.into()),
            outcome,
            grace: None,
        }
    }

    /// Rule for codes starting with `prefix` and ending with `suffix`
    pub fn affixes(prefix: impl Into<String>, suffix: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            matcher: Matcher::Affixes {
                prefix: prefix.into(),
                suffix: suffix.into(),
            },
            outcome,
            grace: None,
        }
    }

    /// Rule for "object not found" errors
    pub fn not_found(outcome: Outcome) -> Self {
        Self {
            matcher: Matcher::NotFound,
            outcome,
            grace: None,
        }
    }

    /// Limit the rule to the first `grace` of a step
    pub fn within(mut self, grace: Duration) -> Self {
        self.grace = Some(grace);
        self
    }
}

/// Ordered rule table mapping remote errors to outcomes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classifier {
    rules: Vec<Rule>,
}

impl Classifier {
    /// The table shared by every profile
    pub fn base() -> Self {
        use Outcome::*;
        Self {
            rules: vec![
                Rule::code("RequestLimitExceeded", Retryable),
                Rule::code("ClientError.NetworkError", Retryable),
                Rule::code("ClientError.HttpStatusCodeError", Retryable),
                Rule::prefix("InternalError", Retryable),
                Rule::prefix("ResourceInUse", Retryable),
                Rule::prefix("ResourceUnavailable", Retryable),
                Rule::prefix("FailedOperation.ClusterStateNotSupport", Retryable),
                // another operation on the same object is still running
                Rule::affixes("FailedOperation", "InProgress", Retryable),
                Rule::prefix("InvalidParameter", Fatal),
                Rule::prefix("MissingParameter", Fatal),
                Rule::prefix("UnknownParameter", Fatal),
                Rule::prefix("UnsupportedOperation", Fatal),
                Rule::prefix("AuthFailure", Fatal),
                Rule::prefix("UnauthorizedOperation", Fatal),
                Rule::prefix("LimitExceeded", Fatal),
            ],
        }
    }

    /// Describing an object that should exist
    pub fn for_read() -> Self {
        Self::base().with_rule(Rule::not_found(Outcome::Fatal))
    }

    /// Mutating an object that should exist
    pub fn for_write() -> Self {
        Self::base().with_rule(Rule::not_found(Outcome::Fatal))
    }

    /// Deleting, or waiting for a delete: absence is success
    pub fn for_delete() -> Self {
        Self::base().with_rule(Rule::not_found(Outcome::AlreadySatisfied))
    }

    /// Describing an object right after creating it: absence is propagation
    /// delay for `grace`, then fatal
    pub fn for_read_after_create(grace: Duration) -> Self {
        Self::base().with_rule(Rule::not_found(Outcome::Retryable).within(grace))
    }

    /// Prepend a rule so it takes precedence over the existing table
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.insert(0, rule);
        self
    }

    /// Classify an error seen `elapsed` into the current step
    pub fn classify(&self, err: &RemoteError, elapsed: Duration) -> Outcome {
        for rule in &self.rules {
            if !rule.matcher.matches(err) {
                continue;
            }
            if let Some(grace) = rule.grace {
                if elapsed >= grace {
                    debug!(code = %err.code, ?grace, "grace period over, error is fatal");
                    return Outcome::Fatal;
                }
            }
            return rule.outcome;
        }
        Outcome::Fatal
    }
}

/// Result of a mutating call that went through [`retry_call`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Applied<T> {
    /// The call succeeded
    Done(T),
    /// The call failed with an error that means its goal already holds
    AlreadySatisfied,
}

impl<T> Applied<T> {
    /// The call's result, if it ran
    pub fn done(self) -> Option<T> {
        match self {
            Applied::Done(value) => Some(value),
            Applied::AlreadySatisfied => None,
        }
    }
}

/// Issue a mutating call, retrying transient failures with jittered backoff.
///
/// Gives up once the next delay would overrun `budget`, when the backoff
/// policy runs out of attempts, or on the first fatal error.
pub async fn retry_call<T, F, Fut>(
    step: &str,
    classifier: &Classifier,
    budget: Duration,
    retry: &RetryConfig,
    cancel: &CancellationToken,
    mut call: F,
) -> Result<Applied<T>, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let start = Instant::now();
    let mut backoff = retry.backoff();

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled {
                step: step.to_string(),
            });
        }

        let err = match call().await {
            Ok(value) => return Ok(Applied::Done(value)),
            Err(err) => err,
        };

        match classifier.classify(&err, start.elapsed()) {
            Outcome::AlreadySatisfied => {
                debug!(step = %step, code = %err.code, "call already satisfied");
                return Ok(Applied::AlreadySatisfied);
            }
            Outcome::Fatal => return Err(Error::remote(step, err)),
            Outcome::Retryable => {}
        }

        let delay = backoff.next_delay();
        if backoff.exhausted() || start.elapsed() + delay > budget {
            error!(
                step = %step,
                attempt = backoff.attempts(),
                error = %err,
                "call failed after retries"
            );
            return Err(Error::remote(step, err));
        }

        warn!(
            step = %step,
            attempt = backoff.attempts(),
            error = %err,
            delay_ms = delay.as_millis(),
            "call failed, retrying"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled { step: step.to_string() });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
