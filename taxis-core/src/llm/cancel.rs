//! Cancellation decorator for model invokers

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TaxisError};

use super::{Completion, InvocationRequest, ModelInfo, ModelInvoker};

/// Wraps an invoker so that cancelling one token aborts every in-flight call.
///
/// Calls started after cancellation fail immediately with
/// [`TaxisError::Cancelled`].
#[derive(Debug, Clone)]
pub struct CancellableInvoker<I> {
    inner: I,
    token: CancellationToken,
}

impl<I: ModelInvoker> CancellableInvoker<I> {
    pub fn new(inner: I, token: CancellationToken) -> Self {
        Self { inner, token }
    }

    /// Token controlling this invoker
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn inner(&self) -> &I {
        &self.inner
    }
}

#[async_trait]
impl<I: ModelInvoker> ModelInvoker for CancellableInvoker<I> {
    async fn invoke(&self, request: &InvocationRequest) -> Result<Completion> {
        if self.token.is_cancelled() {
            return Err(TaxisError::Cancelled);
        }

        tokio::select! {
            _ = self.token.cancelled() => Err(TaxisError::Cancelled),
            result = self.inner.invoke(request) => result,
        }
    }

    fn model_info(&self) -> ModelInfo {
        self.inner.model_info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ScriptedInvoker, ScriptedReply};
    use std::time::Duration;

    #[tokio::test]
    async fn test_passes_through() {
        let invoker = CancellableInvoker::new(
            ScriptedInvoker::new().with_reply("ok"),
            CancellationToken::new(),
        );
        let reply = invoker
            .invoke(&InvocationRequest::from_prompt("a"))
            .await
            .unwrap();
        assert_eq!(reply.content, "ok");
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let token = CancellationToken::new();
        let invoker = CancellableInvoker::new(ScriptedInvoker::new().with_reply("ok"), token.clone());
        token.cancel();

        let err = invoker
            .invoke(&InvocationRequest::from_prompt("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, TaxisError::Cancelled));
        assert_eq!(invoker.inner().call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_in_flight() {
        let token = CancellationToken::new();
        let invoker = CancellableInvoker::new(
            ScriptedInvoker::new().with_scripted(ScriptedReply::text("late").with_delay(10_000)),
            token.clone(),
        );

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = invoker
            .invoke(&InvocationRequest::from_prompt("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, TaxisError::Cancelled));
    }
}
