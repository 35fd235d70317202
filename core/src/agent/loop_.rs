use crate::agent::{ConversationState, LoopEvent, LoopObserver, LoopRequest, LoopResult};
use crate::traits::{
    CompletionRequest, ConversationTurn, Provider, ToolCallRequest, ToolDescriptor,
    ToolRegistryAdapter,
};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why an adapter call did not produce a value.
enum Interrupt {
    TimedOut,
    Cancelled,
}

/// Drives one bounded tool-use conversation.
///
/// `run` consumes the loop, so every invocation works on its own
/// transcript. The provider and registry are shared and may serve many
/// loops concurrently.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    tool_registry: Arc<dyn ToolRegistryAdapter>,
    cancel: CancellationToken,
    observer: Option<Arc<dyn LoopObserver>>,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn Provider>, tool_registry: Arc<dyn ToolRegistryAdapter>) -> Self {
        Self {
            provider,
            tool_registry,
            cancel: CancellationToken::new(),
            observer: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn LoopObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn take_observer(&mut self) -> Option<Arc<dyn LoopObserver>> {
        self.observer.take()
    }

    pub async fn run(self, request: LoopRequest) -> LoopResult {
        let mut state = match request.validated_state() {
            Ok(state) => state,
            Err(e) => {
                warn!("Rejecting loop request: {}", e);
                return LoopResult::ProviderFailed {
                    reason: format!("invalid request: {}", e),
                    turns: request.messages,
                };
            }
        };

        let tools = self.resolve_tools(&request);
        let permitted: HashSet<String> = tools.iter().map(|t| t.name.clone()).collect();
        let deadline = Instant::now() + Duration::from_millis(request.timeout_ms);
        let mut iterations: u32 = 0;

        info!(
            provider = self.provider.name(),
            tools = tools.len(),
            max_iterations = request.max_iterations,
            timeout_ms = request.timeout_ms,
            "Starting tool loop"
        );

        let result = loop {
            if Instant::now() >= deadline {
                break LoopResult::TimedOut {
                    turns: state.into_turns(),
                };
            }
            if iterations >= request.max_iterations {
                break LoopResult::IterationLimitExceeded {
                    turns: state.into_turns(),
                };
            }
            if self.cancel.is_cancelled() {
                break LoopResult::Cancelled {
                    turns: state.into_turns(),
                };
            }

            iterations += 1;
            self.emit(LoopEvent::IterationStarted { iteration: iterations });
            debug!(iteration = iterations, turns = state.len(), "Requesting completion");

            let transcript = state.snapshot();
            let completion = self.provider.complete(CompletionRequest {
                transcript: &transcript,
                max_tokens: request.max_tokens_per_turn,
                tools: &tools,
            });

            let assistant = match self.guard(deadline, completion).await {
                Ok(Ok(turn)) => turn,
                Ok(Err(e)) => {
                    error!(iteration = iterations, "Provider failed: {:#}", e);
                    break LoopResult::ProviderFailed {
                        reason: format!("{:#}", e),
                        turns: state.into_turns(),
                    };
                }
                Err(interrupt) => break interrupted(interrupt, state),
            };

            let tool_calls = assistant.tool_calls.clone();
            let final_content = assistant.content.clone();
            self.emit(LoopEvent::AssistantReplied {
                iteration: iterations,
                tool_calls: tool_calls.len(),
            });

            if let Err(e) = state.append(ConversationTurn::Assistant(assistant)) {
                error!(iteration = iterations, "Provider broke transcript invariants: {}", e);
                break LoopResult::ProviderFailed {
                    reason: format!("invalid assistant turn: {}", e),
                    turns: state.into_turns(),
                };
            }

            if tool_calls.is_empty() {
                break LoopResult::Completed {
                    final_content,
                    turns: state.into_turns(),
                };
            }

            if let Some(result) = self
                .execute_tool_calls(tool_calls, &permitted, deadline, &mut state)
                .await
            {
                break result;
            }
        };

        info!(outcome = result.label(), iterations, "Tool loop finished");
        self.emit(LoopEvent::Finished {
            outcome: result.label(),
            iterations,
        });
        result
    }

    fn resolve_tools(&self, request: &LoopRequest) -> Vec<ToolDescriptor> {
        let tools = self
            .tool_registry
            .list_descriptors(&request.allowed_tool_names);

        for name in &request.allowed_tool_names {
            if !tools.iter().any(|t| &t.name == name) {
                warn!(tool = %name, "Allowed tool is not registered; it will not be offered");
            }
        }

        tools
    }

    /// Runs the calls of one assistant turn in emitted order. Returns a
    /// terminal result when the loop must stop.
    async fn execute_tool_calls(
        &self,
        tool_calls: Vec<ToolCallRequest>,
        permitted: &HashSet<String>,
        deadline: Instant,
        state: &mut ConversationState,
    ) -> Option<LoopResult> {
        for call in tool_calls {
            if !permitted.contains(&call.name) {
                warn!(tool = %call.name, id = %call.id, "Rejecting call to tool that is not permitted");
                self.emit(LoopEvent::ToolRejected {
                    tool_call_id: call.id.clone(),
                    name: call.name.clone(),
                });
                let message = format!("Tool '{}' is not permitted in this conversation", call.name);
                if let Some(result) = append_result(state, &call.id, message, true) {
                    return Some(result);
                }
                continue;
            }

            self.emit(LoopEvent::ToolStarted {
                tool_call_id: call.id.clone(),
                name: call.name.clone(),
            });
            debug!(tool = %call.name, id = %call.id, "Executing tool");

            let execution = self.tool_registry.execute(&call.name, call.arguments);
            let output = match self.guard(deadline, execution).await {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    error!(tool = %call.name, id = %call.id, "Tool registry failed: {:#}", e);
                    return Some(LoopResult::ToolFailed {
                        tool_call_id: call.id,
                        reason: format!("{:#}", e),
                        turns: std::mem::take(state).into_turns(),
                    });
                }
                Err(interrupt) => return Some(interrupted(interrupt, std::mem::take(state))),
            };

            if output.is_error {
                debug!(tool = %call.name, id = %call.id, "Tool reported an error");
            }
            self.emit(LoopEvent::ToolFinished {
                tool_call_id: call.id.clone(),
                name: call.name.clone(),
                is_error: output.is_error,
            });
            if let Some(result) = append_result(state, &call.id, output.content, output.is_error) {
                return Some(result);
            }
        }

        None
    }

    /// Awaits an adapter call under the run's deadline and cancellation token.
    /// An interrupted call is dropped, so its output never reaches the transcript.
    async fn guard<F, T>(&self, deadline: Instant, call: F) -> Result<T, Interrupt>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupt::Cancelled),
            outcome = tokio::time::timeout_at(deadline, call) => {
                outcome.map_err(|_| Interrupt::TimedOut)
            }
        }
    }

    fn emit(&self, event: LoopEvent) {
        if let Some(observer) = &self.observer {
            observer.on_event(&event);
        }
    }
}

fn interrupted(interrupt: Interrupt, state: ConversationState) -> LoopResult {
    match interrupt {
        Interrupt::TimedOut => {
            warn!("Tool loop deadline elapsed during an adapter call");
            LoopResult::TimedOut {
                turns: state.into_turns(),
            }
        }
        Interrupt::Cancelled => {
            info!("Tool loop cancelled during an adapter call");
            LoopResult::Cancelled {
                turns: state.into_turns(),
            }
        }
    }
}

fn append_result(
    state: &mut ConversationState,
    tool_call_id: &str,
    content: String,
    is_error: bool,
) -> Option<LoopResult> {
    let turn = ConversationTurn::tool_result(tool_call_id, content, is_error);
    match state.append(turn) {
        Ok(()) => None,
        Err(e) => {
            // Results are only built for calls of the turn just appended.
            error!("Failed to record tool result: {}", e);
            Some(LoopResult::ToolFailed {
                tool_call_id: tool_call_id.to_string(),
                reason: e.to_string(),
                turns: std::mem::take(state).into_turns(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::{RecordingRegistry, Script, ScriptedProvider};
    use crate::traits::{AssistantTurn, ToolOutput};
    use serde_json::json;
    use std::sync::Mutex;

    fn call(id: &str, name: &str) -> ToolCallRequest {
        ToolCallRequest::new(id, name, json!({}))
    }

    fn agent(provider: &Arc<ScriptedProvider>, registry: &Arc<RecordingRegistry>) -> AgentLoop {
        AgentLoop::new(provider.clone(), registry.clone())
    }

    #[tokio::test]
    async fn empty_messages_fail_validation_without_adapter_calls() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Reply(
            AssistantTurn::text("unused"),
        )]));
        let registry = Arc::new(RecordingRegistry::new(&["calculator"]));

        let result = agent(&provider, &registry)
            .run(LoopRequest::new(vec![]))
            .await;

        match result {
            LoopResult::ProviderFailed { reason, turns } => {
                assert!(reason.starts_with("invalid request"));
                assert!(turns.is_empty());
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(provider.calls(), 0);
        assert!(registry.executed().is_empty());
        assert_eq!(registry.list_calls(), 0);
    }

    #[tokio::test]
    async fn plain_answer_completes_after_one_call() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Reply(
            AssistantTurn::text("hello"),
        )]));
        let registry = Arc::new(RecordingRegistry::new(&[]));

        let result = agent(&provider, &registry)
            .run(LoopRequest::user("hi"))
            .await;

        assert_eq!(result.final_content(), Some("hello"));
        assert_eq!(result.turns().len(), 2);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn calculator_round_trip() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::Reply(AssistantTurn::with_tool_calls(
                "",
                vec![ToolCallRequest::new(
                    "call_1",
                    "calculator",
                    json!({"expr": "2+2"}),
                )],
            )),
            Script::Reply(AssistantTurn::text("4")),
        ]));
        let registry = Arc::new(
            RecordingRegistry::new(&["calculator"])
                .with_output("calculator", ToolOutput::success("4")),
        );

        let request = LoopRequest::user("what is 2+2, use the calculator")
            .with_allowed_tools(["calculator"])
            .with_max_iterations(3);
        let result = agent(&provider, &registry).run(request).await;

        match &result {
            LoopResult::Completed {
                final_content,
                turns,
            } => {
                assert_eq!(final_content, "4");
                assert_eq!(turns.len(), 4);
                assert_eq!(turns[2], ConversationTurn::tool_result("call_1", "4", false));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(provider.calls(), 2);
        assert_eq!(registry.executed(), vec!["calculator".to_string()]);
        assert_eq!(provider.offered_tools(0), vec!["calculator".to_string()]);
    }

    #[tokio::test]
    async fn endless_tool_requests_hit_iteration_limit() {
        let provider = Arc::new(ScriptedProvider::repeating(|n| {
            AssistantTurn::with_tool_calls("", vec![call(&format!("call_{n}"), "calculator")])
        }));
        let registry = Arc::new(RecordingRegistry::new(&["calculator"]));

        let request = LoopRequest::user("loop forever")
            .with_allowed_tools(["calculator"])
            .with_max_iterations(3);
        let result = agent(&provider, &registry).run(request).await;

        assert!(matches!(result, LoopResult::IterationLimitExceeded { .. }));
        assert_eq!(provider.calls(), 3);
        assert_eq!(registry.executed().len(), 3);
        // user + 3 * (assistant + tool result)
        assert_eq!(result.turns().len(), 7);
    }

    #[tokio::test]
    async fn tool_calls_run_in_emitted_order() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::Reply(AssistantTurn::with_tool_calls(
                "",
                vec![call("a", "first"), call("b", "second")],
            )),
            Script::Reply(AssistantTurn::text("done")),
        ]));
        let registry = Arc::new(RecordingRegistry::new(&["first", "second"]));

        let request = LoopRequest::user("go").with_allowed_tools(["first", "second"]);
        let result = agent(&provider, &registry).run(request).await;

        assert_eq!(
            registry.executed(),
            vec!["first".to_string(), "second".to_string()]
        );
        let result_ids: Vec<&str> = result
            .turns()
            .iter()
            .filter_map(|t| match t {
                ConversationTurn::ToolResult { tool_call_id, .. } => Some(tool_call_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(result_ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn disallowed_tool_never_reaches_registry() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::Reply(AssistantTurn::with_tool_calls(
                "",
                vec![call("x", "shell")],
            )),
            Script::Reply(AssistantTurn::text("ok")),
        ]));
        let registry = Arc::new(RecordingRegistry::new(&["calculator", "shell"]));

        let request = LoopRequest::user("go").with_allowed_tools(["calculator"]);
        let result = agent(&provider, &registry).run(request).await;

        assert!(result.is_completed());
        assert!(registry.executed().is_empty());
        match &result.turns()[2] {
            ConversationTurn::ToolResult {
                tool_call_id,
                is_error,
                content,
            } => {
                assert_eq!(tool_call_id, "x");
                assert!(is_error);
                assert!(content.contains("not permitted"));
            }
            other => panic!("unexpected turn: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_call_does_not_stop_permitted_calls_in_same_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::Reply(AssistantTurn::with_tool_calls(
                "",
                vec![call("x", "shell"), call("y", "calculator")],
            )),
            Script::Reply(AssistantTurn::text("4")),
        ]));
        let registry = Arc::new(
            RecordingRegistry::new(&["calculator", "shell"])
                .with_output("calculator", ToolOutput::success("4")),
        );

        let request = LoopRequest::user("go").with_allowed_tools(["calculator"]);
        let result = agent(&provider, &registry).run(request).await;

        assert!(result.is_completed());
        assert_eq!(registry.executed(), vec!["calculator".to_string()]);
        let turns = result.turns();
        match &turns[2] {
            ConversationTurn::ToolResult {
                tool_call_id,
                is_error,
                ..
            } => {
                assert_eq!(tool_call_id, "x");
                assert!(is_error);
            }
            other => panic!("unexpected turn: {other:?}"),
        }
        assert_eq!(turns[3], ConversationTurn::tool_result("y", "4", false));
    }

    #[tokio::test]
    async fn unknown_allowed_names_are_not_offered() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Reply(
            AssistantTurn::text("ok"),
        )]));
        let registry = Arc::new(RecordingRegistry::new(&["calculator"]));

        let request = LoopRequest::user("go").with_allowed_tools(["calculator", "ghost"]);
        let result = agent(&provider, &registry).run(request).await;

        assert!(result.is_completed());
        assert_eq!(provider.offered_tools(0), vec!["calculator".to_string()]);
    }

    #[tokio::test]
    async fn ordinary_tool_error_is_fed_back() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::Reply(AssistantTurn::with_tool_calls(
                "",
                vec![call("a", "calculator")],
            )),
            Script::Reply(AssistantTurn::text("sorry")),
        ]));
        let registry = Arc::new(
            RecordingRegistry::new(&["calculator"])
                .with_output("calculator", ToolOutput::error("division by zero")),
        );

        let request = LoopRequest::user("1/0").with_allowed_tools(["calculator"]);
        let result = agent(&provider, &registry).run(request).await;

        assert_eq!(result.final_content(), Some("sorry"));
        assert_eq!(
            result.turns()[2],
            ConversationTurn::tool_result("a", "division by zero", true)
        );
    }

    #[tokio::test]
    async fn registry_fault_is_fatal() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Reply(
            AssistantTurn::with_tool_calls("", vec![call("a", "calculator"), call("b", "calculator")]),
        )]));
        let registry = Arc::new(RecordingRegistry::new(&["calculator"]).failing("calculator"));

        let request = LoopRequest::user("go").with_allowed_tools(["calculator"]);
        let result = agent(&provider, &registry).run(request).await;

        match result {
            LoopResult::ToolFailed {
                tool_call_id,
                reason,
                turns,
            } => {
                assert_eq!(tool_call_id, "a");
                assert!(reason.contains("registry offline"));
                assert_eq!(turns.len(), 2);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(registry.executed().len(), 1);
    }

    #[tokio::test]
    async fn provider_fault_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::Fail("connection refused".into()),
            Script::Reply(AssistantTurn::text("unused")),
        ]));
        let registry = Arc::new(RecordingRegistry::new(&[]));

        let result = agent(&provider, &registry)
            .run(LoopRequest::user("hi"))
            .await;

        match result {
            LoopResult::ProviderFailed { reason, turns } => {
                assert!(reason.contains("connection refused"));
                assert_eq!(turns.len(), 1);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn duplicate_call_ids_from_provider_fail_the_loop() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Reply(
            AssistantTurn::with_tool_calls("", vec![call("a", "calculator"), call("a", "calculator")]),
        )]));
        let registry = Arc::new(RecordingRegistry::new(&["calculator"]));

        let request = LoopRequest::user("go").with_allowed_tools(["calculator"]);
        let result = agent(&provider, &registry).run(request).await;

        assert!(matches!(result, LoopResult::ProviderFailed { .. }));
        assert!(registry.executed().is_empty());
        assert_eq!(result.turns().len(), 1);
    }

    #[tokio::test]
    async fn slow_provider_times_out_without_appending() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Delayed(
            Duration::from_secs(5),
            AssistantTurn::text("too late"),
        )]));
        let registry = Arc::new(RecordingRegistry::new(&[]));

        let started = std::time::Instant::now();
        let result = agent(&provider, &registry)
            .run(LoopRequest::user("hi").with_timeout_ms(50))
            .await;

        assert!(matches!(result, LoopResult::TimedOut { .. }));
        assert_eq!(result.turns().len(), 1);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(provider.completed_calls(), 0);
    }

    #[tokio::test]
    async fn cancellation_interrupts_inflight_call() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Delayed(
            Duration::from_secs(5),
            AssistantTurn::text("too late"),
        )]));
        let registry = Arc::new(RecordingRegistry::new(&[]));
        let cancel = CancellationToken::new();

        let agent_loop = agent(&provider, &registry).with_cancellation(cancel.clone());
        let run = tokio::spawn(agent_loop.run(LoopRequest::user("hi")));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = run.await.unwrap();
        assert!(matches!(result, LoopResult::Cancelled { .. }));
        assert_eq!(result.turns().len(), 1);
    }

    fn has_result_for(turns: &[ConversationTurn], id: &str) -> bool {
        turns.iter().any(|t| {
            matches!(t, ConversationTurn::ToolResult { tool_call_id, .. } if tool_call_id == id)
        })
    }

    #[tokio::test]
    async fn slow_tool_times_out_without_appending() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Reply(
            AssistantTurn::with_tool_calls("", vec![call("slow", "calculator")]),
        )]));
        let registry = Arc::new(
            RecordingRegistry::new(&["calculator"])
                .with_delay("calculator", Duration::from_secs(5)),
        );

        let started = std::time::Instant::now();
        let request = LoopRequest::user("go")
            .with_allowed_tools(["calculator"])
            .with_timeout_ms(50);
        let result = agent(&provider, &registry).run(request).await;

        assert!(matches!(result, LoopResult::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(registry.executed().len(), 1);
        assert_eq!(registry.finished(), 0);
        assert!(!has_result_for(result.turns(), "slow"));
        assert_eq!(result.turns().len(), 2);
    }

    #[tokio::test]
    async fn cancellation_interrupts_inflight_tool() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Reply(
            AssistantTurn::with_tool_calls("", vec![call("slow", "calculator")]),
        )]));
        let registry = Arc::new(
            RecordingRegistry::new(&["calculator"])
                .with_delay("calculator", Duration::from_secs(5)),
        );
        let cancel = CancellationToken::new();

        let request = LoopRequest::user("go").with_allowed_tools(["calculator"]);
        let agent_loop = agent(&provider, &registry).with_cancellation(cancel.clone());
        let run = tokio::spawn(agent_loop.run(request));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = run.await.unwrap();
        assert!(matches!(result, LoopResult::Cancelled { .. }));
        assert_eq!(registry.executed().len(), 1);
        assert_eq!(registry.finished(), 0);
        assert!(!has_result_for(result.turns(), "slow"));
        assert_eq!(result.turns().len(), 2);
    }

    #[tokio::test]
    async fn cancelled_before_start_makes_no_calls() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Reply(
            AssistantTurn::text("unused"),
        )]));
        let registry = Arc::new(RecordingRegistry::new(&[]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = agent(&provider, &registry)
            .with_cancellation(cancel)
            .run(LoopRequest::user("hi"))
            .await;

        assert!(matches!(result, LoopResult::Cancelled { .. }));
        assert_eq!(provider.calls(), 0);
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<LoopEvent>>);

    impl LoopObserver for Collect {
        fn on_event(&self, event: &LoopEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[tokio::test]
    async fn observer_sees_progress_events() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::Reply(AssistantTurn::with_tool_calls(
                "",
                vec![call("a", "calculator")],
            )),
            Script::Reply(AssistantTurn::text("4")),
        ]));
        let registry = Arc::new(RecordingRegistry::new(&["calculator"]));
        let observer = Arc::new(Collect::default());

        let request = LoopRequest::user("go").with_allowed_tools(["calculator"]);
        agent(&provider, &registry)
            .with_observer(observer.clone())
            .run(request)
            .await;

        let events = observer.0.lock().unwrap();
        assert_eq!(events.first(), Some(&LoopEvent::IterationStarted { iteration: 1 }));
        assert!(events.contains(&LoopEvent::ToolFinished {
            tool_call_id: "a".into(),
            name: "calculator".into(),
            is_error: false,
        }));
        assert_eq!(
            events.last(),
            Some(&LoopEvent::Finished {
                outcome: "completed",
                iterations: 2,
            })
        );
    }
}
