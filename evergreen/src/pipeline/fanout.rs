//! Concurrent branch execution with parallel usage aggregation.
//!
//! Used at two levels: the phase scheduler fans out the stages of a phase,
//! and individual stages fan out per-platform or per-angle branches.

use crate::errors::EvergreenError;
use crate::ledger::{self, Usage};
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;

/// Anything that carries a usage total.
pub trait Metered {
    /// The usage of this unit of work.
    fn usage(&self) -> Usage;
}

impl Metered for crate::core::StageResult {
    fn usage(&self) -> Usage {
        self.usage
    }
}

/// Results of a successful fan-out.
#[derive(Debug, Clone)]
pub struct Joined<T> {
    /// Branch results in branch order.
    pub items: Vec<T>,
    /// Parallel aggregate of the branch usages.
    pub usage: Usage,
}

/// The first branch that failed.
#[derive(Debug)]
pub struct BranchFailure {
    /// Index of the failing branch.
    pub index: usize,
    /// The branch's error.
    pub error: EvergreenError,
}

/// Runs every branch concurrently and waits for all of them.
///
/// Fails as soon as any branch fails. Siblings still in flight keep running
/// on their detached tasks but their results are dropped.
pub async fn fan_out<T, F>(branches: Vec<F>) -> Result<Joined<T>, BranchFailure>
where
    T: Metered + Send + 'static,
    F: Future<Output = Result<T, EvergreenError>> + Send + 'static,
{
    let count = branches.len();
    let mut tasks: FuturesUnordered<_> = branches
        .into_iter()
        .enumerate()
        .map(|(index, branch)| {
            let handle = tokio::spawn(branch);
            async move { (index, handle.await) }
        })
        .collect();

    let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(count).collect();
    while let Some((index, joined)) = tasks.next().await {
        match joined {
            Ok(Ok(item)) => slots[index] = Some(item),
            Ok(Err(error)) => return Err(BranchFailure { index, error }),
            Err(join_error) => {
                return Err(BranchFailure {
                    index,
                    error: EvergreenError::Internal(format!(
                        "branch {index} panicked: {join_error}"
                    )),
                })
            }
        }
    }

    let items: Vec<T> = slots.into_iter().flatten().collect();
    let usage = ledger::parallel(items.iter().map(Metered::usage));
    Ok(Joined { items, usage })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[derive(Debug)]
    struct Branch {
        name: &'static str,
        usage: Usage,
    }

    impl Metered for Branch {
        fn usage(&self) -> Usage {
            self.usage
        }
    }

    async fn branch(
        name: &'static str,
        delay_ms: u64,
        cost: f64,
    ) -> Result<Branch, EvergreenError> {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        Ok(Branch {
            name,
            usage: Usage::new(10, 5, cost, delay_ms),
        })
    }

    #[tokio::test]
    async fn test_results_keep_branch_order() {
        let joined = fan_out(vec![
            Box::pin(branch("slow", 30, 0.01)) as std::pin::Pin<Box<dyn Future<Output = _> + Send>>,
            Box::pin(branch("fast", 1, 0.02)),
        ])
        .await
        .unwrap();

        let names: Vec<_> = joined.items.iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["slow", "fast"]);
        assert_eq!(joined.usage.input_tokens, 20);
        assert_eq!(joined.usage.duration_ms, 30);
        assert!((joined.usage.cost_usd - 0.03).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_first_failure_is_reported() {
        let ok =
            Box::pin(branch("ok", 50, 0.0)) as std::pin::Pin<Box<dyn Future<Output = _> + Send>>;
        let failing = Box::pin(async {
            Err::<Branch, _>(EvergreenError::Internal("boom".to_string()))
        });

        let failure = fan_out(vec![ok, failing]).await.unwrap_err();
        assert_eq!(failure.index, 1);
        assert!(failure.error.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_empty_fan_out() {
        let branches: Vec<std::future::Ready<Result<Branch, EvergreenError>>> = Vec::new();
        let joined = fan_out(branches).await.unwrap();
        assert!(joined.items.is_empty());
        assert_eq!(joined.usage, Usage::default());
    }
}
