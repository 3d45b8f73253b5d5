//! 编排器集成测试：规划 → 执行 → 终态的端到端场景

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use jarilo::core::{StepStatus, TaskErrorKind, TaskStatus};
    use jarilo::executor::{BackoffPolicy, ExecutorConfig};
    use jarilo::llm::{LlmClient, MockLlmClient, ScriptedLlmClient};
    use jarilo::planner::Strategy;
    use jarilo::tools::{register_builtin_tools, EchoTool, Tool, ToolDescriptor, ToolRegistry};
    use jarilo::Orchestrator;
    use serde_json::{json, Value};

    /// 记录调用次数，按配置失败或休眠
    struct StubTool {
        name: &'static str,
        fail_first: u32,
        delay: Duration,
        calls: Arc<AtomicU32>,
    }

    impl StubTool {
        fn ok(name: &'static str) -> Self {
            Self {
                name,
                fail_first: 0,
                delay: Duration::ZERO,
                calls: Arc::new(AtomicU32::new(0)),
            }
        }

        fn failing(name: &'static str, times: u32) -> Self {
            Self {
                fail_first: times,
                ..Self::ok(name)
            }
        }

        fn slow(name: &'static str, delay: Duration) -> Self {
            Self {
                delay,
                ..Self::ok(name)
            }
        }
    }

    #[async_trait]
    impl Tool for StubTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "test stub"
        }

        async fn execute(&self, _input: Value) -> Result<Value, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if n <= self.fail_first {
                return Err(format!("{} failed on call {n}", self.name));
            }
            Ok(json!(format!("{} ok", self.name)))
        }
    }

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            step_timeout: Duration::from_secs(5),
            backoff: BackoffPolicy::new(3, Duration::from_millis(1), Duration::from_millis(10)),
        }
    }

    async fn build(llm: Arc<dyn LlmClient>, tools: Vec<StubTool>, config: ExecutorConfig) -> Orchestrator {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(ToolDescriptor::from_tool(EchoTool)).await.unwrap();
        for tool in tools {
            registry.register(ToolDescriptor::from_tool(tool)).await.unwrap();
        }
        Orchestrator::new(llm, registry, config)
    }

    fn scripted(reply: &str) -> Arc<dyn LlmClient> {
        Arc::new(ScriptedLlmClient::new([reply]))
    }

    #[tokio::test]
    async fn test_list_files_prompt() {
        let workspace = tempfile::tempdir().unwrap();
        std::fs::write(workspace.path().join("notes.md"), "# notes").unwrap();
        std::fs::write(workspace.path().join("todo.txt"), "ship it").unwrap();

        let registry = Arc::new(ToolRegistry::new());
        register_builtin_tools(&registry, workspace.path()).await.unwrap();
        let orch = Orchestrator::new(Arc::new(MockLlmClient), registry, fast_config());

        let report = orch.execute("list files").await.unwrap();
        assert_eq!(report.status, TaskStatus::Succeeded);
        assert_eq!(report.strategy, Some(Strategy::SingleTool));
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.steps[0].tool_name, "list_files");
        assert_eq!(report.result, Some(json!(["notes.md", "todo.txt"])));
    }

    #[tokio::test]
    async fn test_missing_tool_never_reaches_executing() {
        let orch = build(
            scripted(r#"{"strategy":"single-tool","steps":[{"tool":"send_email","input":{}}]}"#),
            vec![],
            fast_config(),
        )
        .await;
        let report = orch.execute("email the report").await.unwrap();

        assert_eq!(report.status, TaskStatus::Failed);
        let error = report.error.unwrap();
        assert_eq!(error.kind, TaskErrorKind::Planning);
        assert!(error.message.contains("send_email"));
        assert!(report.steps.is_empty());
        assert!(report.strategy.is_none());
        assert!(report.result.is_none());
    }

    #[tokio::test]
    async fn test_sequential_fail_fast_reports_step_two() {
        let third = StubTool::ok("third");
        let third_calls = third.calls.clone();
        let orch = build(
            scripted(
                r#"{"strategy":"sequential","steps":[{"tool":"first"},{"tool":"second"},{"tool":"third"}]}"#,
            ),
            vec![StubTool::ok("first"), StubTool::failing("second", 99), third],
            fast_config(),
        )
        .await;
        let report = orch.execute("run the pipeline").await.unwrap();

        assert_eq!(report.status, TaskStatus::Failed);
        let error = report.error.unwrap();
        assert_eq!(error.kind, TaskErrorKind::ToolExecution);
        assert_eq!(error.tool.as_deref(), Some("second"));
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.steps[0].status, StepStatus::Ok);
        assert_eq!(report.steps[1].status, StepStatus::Failed);
        assert_eq!(third_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retry_keeps_originating_cause() {
        let orch = build(
            scripted(r#"{"strategy":"single-tool","steps":[{"tool":"flaky","retryable":true}]}"#),
            vec![StubTool::failing("flaky", 99)],
            fast_config(),
        )
        .await;
        let report = orch.execute("try hard").await.unwrap();

        let error = report.error.unwrap();
        assert!(error.message.contains("call 1"));
        assert_eq!(error.attempts, Some(3));
        let attempts: Vec<u32> = report.steps.iter().map(|s| s.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let orch = build(
            scripted(r#"{"strategy":"single-tool","steps":[{"tool":"flaky","retryable":true}]}"#),
            vec![StubTool::failing("flaky", 1)],
            fast_config(),
        )
        .await;
        let report = orch.execute("try again").await.unwrap();
        assert_eq!(report.status, TaskStatus::Succeeded);
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.result, Some(json!("flaky ok")));
    }

    #[tokio::test]
    async fn test_step_timeout() {
        let config = ExecutorConfig {
            step_timeout: Duration::from_millis(30),
            ..fast_config()
        };
        let orch = build(
            scripted(r#"{"strategy":"single-tool","steps":[{"tool":"slow"}]}"#),
            vec![StubTool::slow("slow", Duration::from_secs(2))],
            config,
        )
        .await;
        let report = orch.execute("wait").await.unwrap();
        assert_eq!(report.error.unwrap().kind, TaskErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_conditional_branch_selection() {
        let plan = r#"{
            "strategy": "conditional",
            "steps": [{"tool": "echo", "input": {"text": "disk usage 97%"}}],
            "decisions": [{
                "branches": [
                    {"when": {"contains": "97%"}, "steps": [{"tool": "echo", "input": {"text": "cleanup"}}]},
                    {"when": "success", "steps": [{"tool": "echo", "input": {"text": "nothing to do"}}]}
                ]
            }]
        }"#;
        let orch = build(scripted(plan), vec![], fast_config()).await;
        let report = orch.execute("check the disk").await.unwrap();

        assert_eq!(report.status, TaskStatus::Succeeded);
        assert_eq!(report.strategy, Some(Strategy::Conditional));
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.result, Some(json!("cleanup")));
    }

    #[tokio::test]
    async fn test_cancel_submitted_task() {
        let orch = Arc::new(
            build(
                scripted(r#"{"strategy":"sequential","steps":[{"tool":"slow"},{"tool":"slow"}]}"#),
                vec![StubTool::slow("slow", Duration::from_millis(200))],
                fast_config(),
            )
            .await,
        );
        let task_id = orch.submit("slow twice").await;

        // 等第一步开始后再取消
        for _ in 0..100 {
            if !orch.task(&task_id).await.unwrap().steps.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(orch.cancel(&task_id).await);

        let task = loop {
            let task = orch.task(&task_id).await.unwrap();
            if task.is_finished() {
                break task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.unwrap().kind, TaskErrorKind::Cancelled);
        // 进行中的调用不被打断，第二步不会开始
        assert_eq!(task.steps.len(), 1);
        assert_eq!(task.steps[0].status, StepStatus::Ok);
        assert!(!orch.cancel(&task_id).await);
    }

    #[tokio::test]
    async fn test_dropped_caller_still_reaches_terminal_state() {
        let orch = build(
            scripted(r#"{"strategy":"single-tool","steps":[{"tool":"slow"}]}"#),
            vec![StubTool::slow("slow", Duration::from_millis(200))],
            fast_config(),
        )
        .await;

        // 调用方超时，execute 的 future 被丢弃
        let outcome = tokio::time::timeout(Duration::from_millis(30), orch.execute("wait for it")).await;
        assert!(outcome.is_err());

        let mut finished = None;
        for _ in 0..200 {
            if let Some(task) = orch.tasks().await.into_iter().next() {
                if task.is_finished() {
                    finished = Some(task);
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let task = finished.expect("task never reached a terminal state");
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.steps[0].status, StepStatus::Ok);
        assert_eq!(orch.running().await, 0);
        assert!(!orch.cancel(&task.id).await);
    }

    #[tokio::test]
    async fn test_concurrent_executions_are_isolated() {
        let orch = Arc::new(build(Arc::new(MockLlmClient), vec![], fast_config()).await);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let orch = Arc::clone(&orch);
                tokio::spawn(async move { orch.execute(&format!("echo message {i}")).await })
            })
            .collect();
        let reports: Vec<_> = futures_util::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        let mut ids: Vec<&str> = reports.iter().map(|r| r.task_id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 16);
        for report in &reports {
            assert_eq!(report.status, TaskStatus::Succeeded);
            assert_eq!(report.steps.len(), 1);
        }
        assert_eq!(orch.tasks().await.len(), 16);
    }

    #[tokio::test]
    async fn test_terminal_tasks_carry_exactly_one_payload() {
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"strategy":"single-tool","steps":[{"tool":"echo","input":{"text":"ok"}}]}"#,
            r#"{"strategy":"single-tool","steps":[{"tool":"broken"}]}"#,
            "no plan at all",
        ]));
        let orch = build(llm, vec![StubTool::failing("broken", 99)], fast_config()).await;
        for prompt in ["a", "b", "c"] {
            orch.execute(prompt).await.unwrap();
        }

        let tasks = orch.tasks().await;
        let prompts: Vec<&str> = tasks.iter().map(|t| t.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["a", "b", "c"]);
        for task in tasks {
            assert!(task.status.is_terminal());
            assert!(task.result.is_some() ^ task.error.is_some());
            assert!(task.updated_at >= task.created_at);
        }
    }
}
