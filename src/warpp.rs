//! Parallel-gated workflows: authenticate and personalize, then fulfill.
//!
//! A WARPP workflow runs its Authenticator and Personalizer concurrently on
//! one cancellable context. The rendezvous waits for both results; any error
//! on either side, or a failed authentication, returns without running
//! fulfillment and cancels the peer. Only when both succeed does fulfillment
//! run, against the trimmed workflow and toolset the personalizer produced.

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};

/// One workflow step: a tool, a guard, or both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarppStep {
    /// Step name.
    pub name: String,
    /// Tool to invoke, when the step executes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Guard expression evaluated before the step runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
}

/// A persisted workflow definition, unique by `(user_id, intent)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarppWorkflow {
    /// Owning user.
    pub user_id: String,
    /// Intent the workflow fulfils.
    pub intent: String,
    /// Human description.
    #[serde(default)]
    pub description: String,
    /// Keywords used for intent detection.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Steps in execution order.
    #[serde(default)]
    pub steps: Vec<WarppStep>,
    /// Optional UI hints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui: Option<Value>,
    /// Concurrency bound for step execution.
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,
    /// Stop at the first failing step.
    #[serde(default)]
    pub fail_fast: bool,
}

fn default_concurrency() -> usize {
    1
}

/// The personalizer's output: the workflow and toolset trimmed to what this
/// user actually needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrimmedWorkflow {
    /// Step names retained.
    pub steps: Vec<String>,
    /// Tools retained.
    pub tools: Vec<String>,
}

/// Detect the workflow matching a query by keyword, skipping none on miss.
#[must_use]
pub fn detect_intent<'a>(workflows: &'a [WarppWorkflow], query: &str) -> Option<&'a WarppWorkflow> {
    let lowered = query.to_lowercase();
    workflows.iter().find(|workflow| {
        workflow
            .keywords
            .iter()
            .any(|k| lowered.contains(&k.to_lowercase()))
    })
}

/// Run the authenticate and personalize gate, then fulfill.
///
/// Both gate tasks share one cancellable context derived from `cancel`:
/// parent cancellation, or a failure on either side, is observed promptly by
/// the peer. The authenticator resolves to `ok`; `false` yields
/// [`Error::AuthRequired`] and fulfillment never runs.
pub async fn run_gate<A, AFut, P, PFut, F, FFut, T>(
    cancel: &CancelToken,
    authenticate: A,
    personalize: P,
    fulfill: F,
) -> Result<T>
where
    A: FnOnce(CancelToken) -> AFut,
    AFut: Future<Output = Result<bool>>,
    P: FnOnce(CancelToken) -> PFut,
    PFut: Future<Output = Result<TrimmedWorkflow>>,
    F: FnOnce(TrimmedWorkflow) -> FFut,
    FFut: Future<Output = Result<T>>,
{
    let gate = CancelToken::new();

    let auth_task = {
        let gate = gate.clone();
        let fut = authenticate(gate.clone());
        async move {
            let result = tokio::select! {
                () = gate.cancelled() => Err(Error::Cancelled),
                result = fut => result,
            };
            if !matches!(result, Ok(true)) {
                // Failed or denied auth makes personalization pointless.
                gate.cancel();
            }
            result
        }
    };

    let personalize_task = {
        let gate = gate.clone();
        let fut = personalize(gate.clone());
        async move {
            let result = tokio::select! {
                () = gate.cancelled() => Err(Error::Cancelled),
                result = fut => result,
            };
            if result.is_err() {
                gate.cancel();
            }
            result
        }
    };

    // Rendezvous: both results are awaited before any decision.
    let joined = futures::future::join(auth_task, personalize_task);
    let (auth, trimmed) = tokio::select! {
        () = cancel.cancelled() => {
            gate.cancel();
            return Err(Error::Cancelled);
        }
        pair = joined => pair,
    };

    let ok = auth?;
    let trimmed = trimmed?;
    if !ok {
        return Err(Error::AuthRequired("auth required".to_owned()));
    }
    fulfill(trimmed).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn workflow(intent: &str, keywords: &[&str]) -> WarppWorkflow {
        WarppWorkflow {
            user_id: "u1".into(),
            intent: intent.into(),
            description: String::new(),
            keywords: keywords.iter().map(|k| (*k).to_owned()).collect(),
            steps: vec![
                WarppStep {
                    name: "s1".into(),
                    tool: Some("exec:Lookup".into()),
                    guard: None,
                },
                WarppStep {
                    name: "s2".into(),
                    tool: Some("exec:Verify".into()),
                    guard: Some("verified".into()),
                },
                WarppStep {
                    name: "s3".into(),
                    tool: Some("exec:Submit".into()),
                    guard: None,
                },
            ],
            ui: None,
            max_concurrency: 1,
            fail_fast: true,
        }
    }

    #[test]
    fn intent_detection_by_keyword() {
        let workflows = vec![
            workflow("updateAddress", &["address", "move"]),
            workflow("cancelOrder", &["cancel"]),
        ];
        assert_eq!(
            detect_intent(&workflows, "I need to update my Address").unwrap().intent,
            "updateAddress"
        );
        assert_eq!(
            detect_intent(&workflows, "please CANCEL it").unwrap().intent,
            "cancelOrder"
        );
        assert!(detect_intent(&workflows, "unrelated").is_none());
    }

    #[tokio::test]
    async fn gate_success_runs_fulfillment_with_trimmed_artifacts() {
        let cancel = CancelToken::new();
        let auth_done = Arc::new(AtomicBool::new(false));
        let trim_done = Arc::new(AtomicBool::new(false));

        let result = run_gate(
            &cancel,
            {
                let auth_done = Arc::clone(&auth_done);
                move |_gate| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    auth_done.store(true, Ordering::SeqCst);
                    Ok(true)
                }
            },
            {
                let trim_done = Arc::clone(&trim_done);
                move |_gate| async move {
                    trim_done.store(true, Ordering::SeqCst);
                    Ok(TrimmedWorkflow {
                        steps: vec!["s1".into(), "s3".into()],
                        tools: vec!["exec:Submit".into()],
                    })
                }
            },
            {
                let auth_done = Arc::clone(&auth_done);
                let trim_done = Arc::clone(&trim_done);
                move |trimmed: TrimmedWorkflow| async move {
                    // Fulfillment observes both sides finished first.
                    assert!(auth_done.load(Ordering::SeqCst));
                    assert!(trim_done.load(Ordering::SeqCst));
                    assert_eq!(trimmed.steps, vec!["s1", "s3"]);
                    assert_eq!(trimmed.tools, vec!["exec:Submit"]);
                    Ok("fulfilled")
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(result, "fulfilled");
    }

    #[tokio::test]
    async fn auth_denied_skips_fulfillment() {
        let cancel = CancelToken::new();
        let fulfilled = Arc::new(AtomicBool::new(false));

        let err = run_gate(
            &cancel,
            |_gate| async { Ok(false) },
            |_gate| async {
                Ok(TrimmedWorkflow::default())
            },
            {
                let fulfilled = Arc::clone(&fulfilled);
                move |_trimmed| async move {
                    fulfilled.store(true, Ordering::SeqCst);
                    Ok(())
                }
            },
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), "auth_required");
        assert_eq!(err.to_string(), "auth required: auth required");
        assert!(!fulfilled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn personalize_error_cancels_auth_peer() {
        let cancel = CancelToken::new();

        let err = run_gate(
            &cancel,
            |gate: CancelToken| async move {
                // A slow authenticator that honors the shared gate.
                tokio::select! {
                    () = gate.cancelled() => Err(Error::Cancelled),
                    () = tokio::time::sleep(Duration::from_secs(30)) => Ok(true),
                }
            },
            |_gate| async { Err(Error::backend("attribute fetch failed")) },
            |_trimmed| async { Ok(()) },
        )
        .await
        .unwrap_err();

        // The rendezvous returned promptly instead of waiting 30 s; the
        // surviving error is the auth task's cancellation or the backend
        // failure depending on completion order, but never success.
        assert!(matches!(err.kind(), "cancelled" | "backend_unavailable"));
    }

    #[tokio::test]
    async fn parent_cancellation_is_observed() {
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = run_gate(
            &cancel,
            |_gate| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(true)
            },
            |_gate| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(TrimmedWorkflow::default())
            },
            |_trimmed| async { Ok(()) },
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), "cancelled");
    }

    #[test]
    fn workflow_serde_defaults() {
        let parsed: WarppWorkflow = serde_json::from_str(
            r#"{"user_id": "u1", "intent": "x"}"#,
        )
        .unwrap();
        assert_eq!(parsed.max_concurrency, 1);
        assert!(!parsed.fail_fast);
        assert!(parsed.steps.is_empty());
    }
}
