//! Presents long-running server operations as one blocking call with a
//! spinner on stderr.

use std::{future::Future, sync::Arc, time::Duration};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{cancel::CancelToken, cli::error::ExoError};

const TICK_INTERVAL: Duration = Duration::from_millis(160);
const SPINNER_TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "✔"];
const MAX_CONCURRENT_OPERATIONS: usize = 10;

#[derive(Clone, Debug)]
pub(crate) struct Driver {
    draw: bool,
    cancel: CancelToken,
}

impl Driver {
    /// Progress is drawn only when not quiet and stderr is a terminal.
    pub(crate) fn new(quiet: bool, stderr_is_terminal: bool, cancel: CancelToken) -> Self {
        Self {
            draw: !quiet && stderr_is_terminal,
            cancel,
        }
    }

    fn spinner(&self, message: String) -> ProgressBar {
        let pb = if self.draw {
            ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr())
        } else {
            ProgressBar::hidden()
        };

        let style = ProgressStyle::with_template("{spinner} {msg} {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(SPINNER_TICKS);
        pb.set_style(style);
        pb.set_message(message);
        pb.enable_steady_tick(TICK_INTERVAL);
        pb
    }

    /// Runs one operation in its own task until it returns or the process is cancelled.
    #[tracing::instrument(skip_all, fields(message = %message))]
    pub(crate) async fn drive<T, F>(&self, message: &str, task: F) -> Result<T, ExoError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, ExoError>> + Send + 'static,
    {
        let pb = self.spinner(message.to_string());
        let mut handle = tokio::spawn(task);

        let result = tokio::select! {
            joined = &mut handle => joined.unwrap_or_else(|e| Err(e.into())),
            () = self.cancel.cancelled() => {
                handle.abort();
                Err(ExoError::Cancelled)
            }
        };

        match &result {
            Err(ExoError::Cancelled) => pb.abandon(),
            _ => pb.finish(),
        }

        result
    }

    /// Runs every operation concurrently behind one progress line.
    ///
    /// Returns once all of them have finished. The surfaced error is the first
    /// one by argument order; later ones are only logged.
    #[tracing::instrument(skip_all, fields(message = %message, count = tasks.len()))]
    pub(crate) async fn drive_many<T, F>(&self, message: &str, tasks: Vec<F>) -> Result<Vec<T>, ExoError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, ExoError>> + Send + 'static,
    {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        let total = tasks.len();
        let pb = self.spinner(message.to_string());
        let permits = Arc::new(Semaphore::new(MAX_CONCURRENT_OPERATIONS));

        let mut set = JoinSet::new();
        for (index, task) in tasks.into_iter().enumerate() {
            let permits = Arc::clone(&permits);
            set.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (index, task.await)
            });
        }

        let mut results: Vec<Option<Result<T, ExoError>>> = (0..total).map(|_| None).collect();
        loop {
            tokio::select! {
                joined = set.join_next() => match joined {
                    Some(Ok((index, result))) => results[index] = Some(result),
                    Some(Err(e)) => tracing::debug!(error = %e, "operation task failed to complete"),
                    None => break,
                },
                () = self.cancel.cancelled() => {
                    set.abort_all();
                    while set.join_next().await.is_some() {}
                    pb.abandon();
                    return Err(ExoError::Cancelled);
                }
            }
        }
        pb.finish();

        let mut values = Vec::with_capacity(total);
        let mut first_error = None;
        for (index, result) in results.into_iter().enumerate() {
            let result = result.unwrap_or_else(|| {
                Err(ExoError::Implementation(format!(
                    "operation #{index} ended without a result"
                )))
            });

            match result {
                Ok(value) => values.push(value),
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(e) => tracing::debug!(index, error = %e, "additional operation failure"),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(values),
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use super::Driver;
    use crate::{cancel::CancelToken, cli::error::ExoError};

    fn driver(cancel: &CancelToken) -> Driver {
        Driver::new(false, false, cancel.clone())
    }

    #[tokio::test]
    async fn drive_returns_the_value() {
        let cancel = CancelToken::new();
        let value = driver(&cancel)
            .drive("Creating instance \"a\"...", async { Ok(42) })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn drive_propagates_the_error() {
        let cancel = CancelToken::new();
        let res: Result<(), _> = driver(&cancel)
            .drive("Deleting...", async { Err(ExoError::NotFound("instance".into())) })
            .await;
        assert!(matches!(res, Err(ExoError::NotFound(_))));
    }

    #[tokio::test]
    async fn drive_many_waits_for_every_task() {
        let cancel = CancelToken::new();
        let done = Arc::new(AtomicUsize::new(0));

        let tasks = (0..5u64)
            .map(|i| {
                let done = Arc::clone(&done);
                async move {
                    tokio::time::sleep(Duration::from_millis(10 * (5 - i))).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(i)
                }
            })
            .collect();

        let values = driver(&cancel).drive_many("Working...", tasks).await.unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 5);
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn drive_many_reports_the_first_error_by_argument_order() {
        let cancel = CancelToken::new();

        // The second target fails last but comes first in argument order.
        let tasks: Vec<_> = [(0u64, None), (60, Some("b")), (5, Some("c"))]
            .into_iter()
            .map(|(delay, failure)| async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                match failure {
                    Some(name) => Err(ExoError::NotFound(name.to_string())),
                    None => Ok(()),
                }
            })
            .collect();

        let err = driver(&cancel).drive_many("Deleting...", tasks).await.unwrap_err();
        assert!(matches!(err, ExoError::NotFound(name) if name == "b"));
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_tasks() {
        let cancel = CancelToken::new();
        let finished = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let finished = Arc::clone(&finished);
                async move {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .collect();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let res = tokio::time::timeout(
            Duration::from_secs(5),
            driver(&cancel).drive_many("Waiting...", tasks),
        )
        .await
        .expect("drive_many did not observe cancellation");

        assert!(matches!(res, Err(ExoError::Cancelled)));
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }
}
