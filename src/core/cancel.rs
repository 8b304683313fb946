use super::{RepoError, Result};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Runs `operation` until it finishes or `cancel` fires.
///
/// On cancellation the operation future is dropped, and with it any lock
/// guard it was holding.
pub async fn cancellable<F, T>(cancel: Option<&CancellationToken>, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let Some(cancel) = cancel else {
        return operation.await;
    };
    if cancel.is_cancelled() {
        return Err(RepoError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RepoError::Cancelled),
        result = operation => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn completes_without_token() {
        let value = cancellable(None, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn already_cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<()> = cancellable(Some(&token), async { Ok(()) }).await;
        assert!(matches!(result, Err(RepoError::Cancelled)));
    }

    #[tokio::test]
    async fn cancel_interrupts_pending_operation() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let result: Result<()> = cancellable(Some(&token), async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(RepoError::Cancelled)));
    }
}
