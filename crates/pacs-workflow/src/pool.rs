//! 有界并发执行

use pacs_core::{PacsError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

/// 以最多 `workers` 个并发任务处理条目，输出按输入顺序排列
///
/// 每个输入位置都有一个输出；任务panic或被取消时，该位置为 `PacsError::Internal`，
/// 由调用方按条目记录失败。
pub(crate) async fn run_bounded<T, F, Fut>(
    items: Vec<T>,
    workers: usize,
    task: F,
) -> Vec<Result<Fut::Output>>
where
    T: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut set = JoinSet::new();
    let mut positions = HashMap::with_capacity(items.len());
    let mut outputs: Vec<Option<Result<Fut::Output>>> = items.iter().map(|_| None).collect();

    for (position, item) in items.into_iter().enumerate() {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!("并发控制信号量已关闭: {}", e);
                break;
            }
        };
        let future = task(item);
        let handle = set.spawn(async move {
            let output = future.await;
            drop(permit);
            output
        });
        positions.insert(handle.id(), position);
    }

    while let Some(joined) = set.join_next_with_id().await {
        let (id, output) = match joined {
            Ok((id, output)) => (id, Ok(output)),
            Err(e) => {
                error!("批处理任务执行失败: {}", e);
                (e.id(), Err(PacsError::Internal(format!("任务异常终止: {}", e))))
            }
        };
        if let Some(slot) = positions.get(&id).and_then(|position| outputs.get_mut(*position)) {
            *slot = Some(output);
        }
    }

    outputs
        .into_iter()
        .map(|output| {
            output.unwrap_or_else(|| Err(PacsError::Internal("任务未执行".to_string())))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_outputs_keep_input_order() {
        let outputs = run_bounded(vec![3u64, 1, 2], 3, |n| async move {
            tokio::time::sleep(std::time::Duration::from_millis(n * 5)).await;
            n * 10
        })
        .await;
        let outputs: Vec<u64> = outputs.into_iter().map(|o| o.unwrap()).collect();
        assert_eq!(outputs, vec![30, 10, 20]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        run_bounded((0..8).collect::<Vec<_>>(), 2, |_| {
            let active = active.clone();
            let peak = peak.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panicking_task_keeps_its_position() {
        let outputs = run_bounded(vec![1u64, 2, 3], 2, |n| async move {
            if n == 2 {
                panic!("task {} failed", n);
            }
            n * 10
        })
        .await;

        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[0].as_ref().unwrap(), &10);
        assert!(matches!(outputs[1], Err(PacsError::Internal(_))));
        assert_eq!(outputs[2].as_ref().unwrap(), &30);
    }
}
