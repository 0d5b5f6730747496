use std::{fmt, future::Future};

use serde::{Deserialize, Serialize};

use crate::{api::ApiClient, cli::error::ExoError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum OperationState {
    Pending,
    Running,
    Success,
    Failure,
    Timeout,
}

impl OperationState {
    pub(crate) fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationState::Success | OperationState::Failure | OperationState::Timeout
        )
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            OperationState::Pending => "pending",
            OperationState::Running => "running",
            OperationState::Success => "success",
            OperationState::Failure => "failure",
            OperationState::Timeout => "timeout",
        };
        f.write_str(state)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Reference {
    #[serde(default)]
    pub(crate) id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) link: Option<String>,
}

/// Server-side handle for a change that completes asynchronously.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Operation {
    pub(crate) id: String,
    pub(crate) state: OperationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) reference: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) reason: Option<String>,
}

impl Operation {
    /// ID of the resource the operation acted on.
    pub(crate) fn reference_id(&self) -> Result<&str, ExoError> {
        self.reference
            .as_ref()
            .map(|reference| reference.id.as_str())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ExoError::Api {
                status: 200,
                message: format!("operation {} carries no resource reference", self.id),
            })
    }

    fn failure_reason(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.reason.clone())
            .unwrap_or_else(|| "no reason given".into())
    }
}

/// What a mutating call hands back: the settled resource, or a handle to poll.
#[derive(Debug)]
pub(crate) enum AsyncResult<T> {
    Immediate(T),
    Pending(Operation),
}

impl<T> AsyncResult<T> {
    /// Waits out a pending operation, then loads the resource with `fetch`.
    pub(crate) async fn settle<F, Fut>(self, client: &ApiClient, fetch: F) -> Result<T, ExoError>
    where
        F: FnOnce(Operation) -> Fut,
        Fut: Future<Output = Result<T, ExoError>>,
    {
        match self {
            AsyncResult::Immediate(value) => Ok(value),
            AsyncResult::Pending(operation) => {
                let done = client.wait_for(operation, OperationState::Success).await?;
                fetch(done).await
            }
        }
    }
}

impl ApiClient {
    pub(crate) async fn operation(&self, id: &str) -> Result<Operation, ExoError> {
        self.get(&["operation", id], &[]).await
    }

    /// Polls until `operation` is terminal, failing unless it ends in `target`.
    #[tracing::instrument(skip_all, fields(operation = %operation.id))]
    pub(crate) async fn wait_for(
        &self,
        operation: Operation,
        target: OperationState,
    ) -> Result<Operation, ExoError> {
        let mut operation = operation;
        while !operation.state.is_terminal() {
            tokio::select! {
                () = tokio::time::sleep(self.poll_interval) => {}
                () = self.cancel.cancelled() => return Err(ExoError::Cancelled),
            }
            operation = self.operation(&operation.id).await?;
            tracing::trace!(state = %operation.state, "operation polled");
        }

        match operation.state {
            state if state == target => Ok(operation),
            OperationState::Timeout => Err(ExoError::OperationTimeout(operation.id)),
            OperationState::Failure => Err(ExoError::OperationFailed {
                reason: operation.failure_reason(),
                id: operation.id,
            }),
            state => Err(ExoError::OperationFailed {
                reason: format!("ended in state {state}, expected {target}"),
                id: operation.id,
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use axum::{Json, Router, extract::State, routing::get};

    use super::{AsyncResult, Operation, OperationState};
    use crate::{
        api::test::{client_for, serve},
        cancel::CancelToken,
        cli::error::ExoError,
    };

    fn pending(id: &str) -> Operation {
        Operation {
            id: id.into(),
            state: OperationState::Pending,
            reference: None,
            message: None,
            reason: None,
        }
    }

    /// Operations become `final_state` after `polls` lookups.
    async fn operation_server(polls: usize, final_state: &'static str) -> (String, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/operation/:id",
                get(
                    move |State(count): State<Arc<AtomicUsize>>,
                          axum::extract::Path(id): axum::extract::Path<String>| async move {
                        let seen = count.fetch_add(1, Ordering::SeqCst) + 1;
                        let state = if seen >= polls { final_state } else { "running" };
                        Json(serde_json::json!({
                            "id": id,
                            "state": state,
                            "reference": {"id": "resource-1"},
                            "message": "quota exceeded",
                        }))
                    },
                ),
            )
            .with_state(Arc::clone(&count));
        (serve(router).await, count)
    }

    #[tokio::test]
    async fn wait_for_polls_until_success() {
        let (endpoint, count) = operation_server(3, "success").await;
        let client = client_for(&endpoint, CancelToken::new());

        let done = client
            .wait_for(pending("op-1"), OperationState::Success)
            .await
            .unwrap();
        assert_eq!(done.state, OperationState::Success);
        assert_eq!(done.reference_id().unwrap(), "resource-1");
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failed_operations_are_errors() {
        let (endpoint, _) = operation_server(1, "failure").await;
        let client = client_for(&endpoint, CancelToken::new());
        let err = client
            .wait_for(pending("op-2"), OperationState::Success)
            .await
            .unwrap_err();
        assert!(matches!(err, ExoError::OperationFailed { reason, .. } if reason == "quota exceeded"));

        let (endpoint, _) = operation_server(1, "timeout").await;
        let client = client_for(&endpoint, CancelToken::new());
        let err = client
            .wait_for(pending("op-3"), OperationState::Success)
            .await
            .unwrap_err();
        assert!(matches!(err, ExoError::OperationTimeout(id) if id == "op-3"));
    }

    #[tokio::test]
    async fn wait_for_observes_cancellation() {
        let (endpoint, _) = operation_server(usize::MAX, "success").await;
        let cancel = CancelToken::new();
        let client = client_for(&endpoint, cancel.clone());
        cancel.cancel();

        let err = client
            .wait_for(pending("op-4"), OperationState::Success)
            .await
            .unwrap_err();
        assert!(matches!(err, ExoError::Cancelled));
    }

    #[tokio::test]
    async fn immediate_results_skip_polling() {
        let (endpoint, count) = operation_server(1, "success").await;
        let client = client_for(&endpoint, CancelToken::new());

        let value = AsyncResult::Immediate(7)
            .settle(&client, |_| async { Ok(0) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let value = AsyncResult::<usize>::Pending(pending("op-5"))
            .settle(&client, |op| async move { Ok(op.reference_id()?.len()) })
            .await
            .unwrap();
        assert_eq!(value, "resource-1".len());
    }
}
