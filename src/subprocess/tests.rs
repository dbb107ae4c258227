use super::*;

#[tokio::test]
async fn test_production_runner_success() {
    let runner = TokioProcessRunner;
    let command = ProcessCommandBuilder::new("echo")
        .arg("hello world")
        .build();

    let output = runner.run(command).await.unwrap();
    assert!(output.status.success());
    assert_eq!(output.stdout.trim(), "hello world");
    assert!(output.stderr.is_empty());
}

#[tokio::test]
async fn test_production_runner_failure() {
    let runner = TokioProcessRunner;
    let command = ProcessCommandBuilder::new("false").build();

    let output = runner.run(command).await.unwrap();
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
}

#[tokio::test]
async fn test_production_runner_command_not_found() {
    let runner = TokioProcessRunner;
    let command = ProcessCommandBuilder::new("nonexistent-command-12345").build();

    let result = runner.run(command).await;
    assert!(matches!(result, Err(ProcessError::CommandNotFound(_))));
}

#[tokio::test]
async fn test_production_runner_writes_stdin() {
    let runner = TokioProcessRunner;
    let command = ProcessCommandBuilder::new("cat")
        .stdin("summary body".to_string())
        .build();

    let output = runner.run(command).await.unwrap();
    assert_eq!(output.stdout, "summary body");
}

#[tokio::test]
async fn test_mock_runner_basic() {
    let mut mock = MockProcessRunner::new();

    mock.expect_command("zmprov")
        .with_args(|args| args == ["-l", "gaa"])
        .returns_stdout("a@example.com\n")
        .returns_success()
        .finish();

    let output = mock
        .run(ProcessCommandBuilder::new("zmprov").args(["-l", "gaa"]).build())
        .await
        .unwrap();

    assert!(output.status.success());
    assert_eq!(output.stdout, "a@example.com\n");
    assert!(mock.verify_called("zmprov", 1));
}

#[tokio::test]
async fn test_mock_runner_exhausted_expectation_falls_through() {
    let mut mock = MockProcessRunner::new();

    mock.expect_command("zmmailbox")
        .returns_stderr("Internal Server Error")
        .returns_exit_code(1)
        .times(1)
        .finish();
    mock.expect_command("zmmailbox").returns_success().finish();

    let cmd = || ProcessCommandBuilder::new("zmmailbox").arg("getRestURL").build();
    let first = mock.run(cmd()).await.unwrap();
    let second = mock.run(cmd()).await.unwrap();

    assert!(!first.status.success());
    assert!(second.status.success());
    assert_eq!(mock.count_calls("zmmailbox", |_| true), 2);
}

#[tokio::test]
async fn test_mock_runner_unexpected_command() {
    let mock = MockProcessRunner::new();
    let result = mock.run(ProcessCommandBuilder::new("zmprov").build()).await;
    assert!(matches!(result, Err(ProcessError::MockExpectationNotMet(_))));
}

#[tokio::test]
async fn test_dry_run_mutation_is_not_executed() {
    let (manager, mock) = SubprocessManager::mock(true);

    let result = manager
        .mutate(ProcessCommandBuilder::new("zmprov").args(["da", "x"]).build())
        .await;

    assert!(result.succeeded);
    assert!(mock.get_call_history().is_empty());
}

#[tokio::test]
async fn test_live_mutation_captures_text() {
    let (manager, mut mock) = SubprocessManager::mock(false);
    mock.expect_command("zmprov")
        .returns_stderr("ERROR: account.NO_SUCH_ACCOUNT")
        .returns_exit_code(2)
        .finish();

    let result = manager
        .mutate(ProcessCommandBuilder::new("zmprov").args(["da", "x"]).build())
        .await;

    assert!(!result.succeeded);
    assert!(result.captured_text.contains("NO_SUCH_ACCOUNT"));
}
