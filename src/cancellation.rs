//! Per-request cancellation and deadline boundary.
//! Every store or provider call made on behalf of a request runs inside one of these.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{QuizError, QuizResult};

/// Caller-supplied boundary for one operation: a cancellation token plus an optional
/// deadline. Cheap to clone; clones share the token.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Context with no deadline; only explicit cancellation stops it.
    pub fn background() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Attach an externally owned token (e.g. one cancelled when the client disconnects).
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Child context: cancelled with the parent, never outlives the parent's deadline.
    pub fn child(&self, timeout: Option<Duration>) -> Self {
        let deadline = match (self.deadline, timeout.map(|t| Instant::now() + t)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            request_id: self.request_id.clone(),
            token: self.token.child_token(),
            deadline,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fails if the request was cancelled or its deadline has passed. Called before every
    /// blocking store call.
    pub fn ensure_active(&self) -> QuizResult<()> {
        if self.token.is_cancelled() {
            return Err(QuizError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(QuizError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Race `fut` against cancellation and the deadline.
    pub async fn run<F, T>(&self, fut: F) -> QuizResult<T>
    where
        F: Future<Output = QuizResult<T>>,
    {
        self.ensure_active()?;
        let deadline = self.deadline;
        tokio::select! {
            res = fut => res,
            _ = self.token.cancelled() => {
                debug!(request_id = %self.request_id, "request cancelled");
                Err(QuizError::Cancelled)
            }
            _ = sleep_until_opt(deadline) => {
                debug!(request_id = %self.request_id, "request deadline exceeded");
                Err(QuizError::DeadlineExceeded)
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_returns_inner_result() {
        let ctx = RequestContext::with_timeout(Duration::from_secs(5));
        let out = ctx.run(async { Ok::<_, QuizError>(7) }).await.unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test]
    async fn cancellation_wins_over_slow_future() {
        let ctx = RequestContext::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let res = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, QuizError>(())
            })
            .await;
        assert!(matches!(res, Err(QuizError::Cancelled)));
    }

    #[tokio::test]
    async fn deadline_bounds_slow_future() {
        let ctx = RequestContext::with_timeout(Duration::from_millis(20));
        let res = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, QuizError>(())
            })
            .await;
        assert!(matches!(res, Err(QuizError::DeadlineExceeded)));
        assert!(matches!(ctx.ensure_active(), Err(QuizError::DeadlineExceeded)));
    }

    #[test]
    fn child_follows_parent_cancellation() {
        let parent = RequestContext::with_timeout(Duration::from_secs(60));
        let child = parent.child(Some(Duration::from_secs(600)));
        assert!(child.remaining().unwrap() <= Duration::from_secs(60));
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(matches!(child.ensure_active(), Err(QuizError::Cancelled)));
    }
}
