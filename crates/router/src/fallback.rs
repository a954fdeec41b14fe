//! Ordered bucket fallback.

use depot_core::Bucket;
use depot_storage::StorageResult;
use std::future::Future;

/// Try `attempt` against each bucket in `order`, returning the first success.
///
/// A failing bucket is logged and skipped. `None` means every bucket failed;
/// callers decide what exhaustion means for their operation.
pub(crate) async fn first_success<T, F, Fut>(
    order: &[Bucket],
    key: &str,
    operation: &'static str,
    mut attempt: F,
) -> Option<(Bucket, T)>
where
    F: FnMut(Bucket) -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    for &bucket in order {
        match attempt(bucket).await {
            Ok(value) => return Some((bucket, value)),
            Err(err) => {
                tracing::debug!(
                    bucket = %bucket,
                    key = %key,
                    operation,
                    error = %err,
                    "Bucket attempt failed, trying next"
                );
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_storage::StorageError;
    use std::cell::RefCell;

    #[tokio::test]
    async fn test_returns_first_successful_bucket() {
        let tried = RefCell::new(Vec::new());
        let result = first_success(&[Bucket::Stable, Bucket::Working], "k", "test", |bucket| {
            tried.borrow_mut().push(bucket);
            async move {
                match bucket {
                    Bucket::Stable => Err(StorageError::NotFound("k".to_string())),
                    Bucket::Working => Ok(42),
                }
            }
        })
        .await;

        assert_eq!(result, Some((Bucket::Working, 42)));
        assert_eq!(*tried.borrow(), vec![Bucket::Stable, Bucket::Working]);
    }

    #[tokio::test]
    async fn test_short_circuits_on_first_success() {
        let tried = RefCell::new(Vec::new());
        let result = first_success(&[Bucket::Stable, Bucket::Working], "k", "test", |bucket| {
            tried.borrow_mut().push(bucket);
            async move { Ok::<_, StorageError>(bucket) }
        })
        .await;

        assert_eq!(result, Some((Bucket::Stable, Bucket::Stable)));
        assert_eq!(*tried.borrow(), vec![Bucket::Stable]);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_none() {
        let result: Option<(Bucket, ())> =
            first_success(&[Bucket::Working], "k", "test", |_| async {
                Err(StorageError::Io(std::io::Error::other("unreachable")))
            })
            .await;
        assert!(result.is_none());
    }
}
