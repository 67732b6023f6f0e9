//! Executor Integration Tests
//!
//! Tests for argument resolution, binding, validation and result flow.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::json;

use autoplay::actions::{register_action, ActionDeclaration, ExecutionContext, InstanceMode};
use autoplay::core::{Invocation, Playbook, PlaybookExecutor};
use autoplay::domain::ExtraArgs;
use autoplay::error::{ActionError, PlaybookError};

use common::{register_tally, test_registry, Calls};

fn executor(calls: &Calls) -> PlaybookExecutor {
    PlaybookExecutor::new(Arc::new(test_registry(calls)))
}

fn source_of(err: &PlaybookError) -> &ActionError {
    err.action_error().expect("step error")
}

#[tokio::test]
async fn test_nested_invocation_resolves_first() {
    let calls = Calls::default();
    let playbook = Playbook::from_value(&json!({
        "action": "sum",
        "args": {"a": {"action": "const", "args": {"v": 2}}, "b": 3}
    }))
    .unwrap();

    let outcome = executor(&calls).execute(&playbook).await.unwrap();

    assert_eq!(outcome.result, json!(5));
    assert_eq!(calls.names(), vec!["const", "sum"]);
    assert_eq!(calls.args_of("sum"), vec![json!({"a": 2, "b": 3})]);
}

#[tokio::test]
async fn test_literal_arguments_pass_through() {
    let calls = Calls::default();
    let playbook = Playbook::from_yaml(
        r#"
action: echo
args:
  value: "plain"
  items: [1, "two", {three: 3}]
  options: {nested: {deep: true}, empty: null}
"#,
    )
    .unwrap();

    executor(&calls).execute(&playbook).await.unwrap();

    assert_eq!(
        calls.args_of("echo"),
        vec![json!({
            "value": "plain",
            "items": [1, "two", {"three": 3}],
            "options": {"nested": {"deep": true}, "empty": null}
        })]
    );
}

#[tokio::test]
async fn test_missing_argument_does_not_invoke() {
    let calls = Calls::default();
    let playbook = Playbook::single(Invocation::new("sum").arg("a", json!(1)));

    let err = executor(&calls).execute(&playbook).await.unwrap_err();

    assert_eq!(err.path().unwrap().to_string(), "playbook/steps[0]");
    assert!(matches!(
        source_of(&err),
        ActionError::MissingArgument(names) if names == &vec!["b".to_string()]
    ));
    assert!(calls.names().is_empty());
}

#[tokio::test]
async fn test_null_counts_as_missing() {
    let calls = Calls::default();
    let playbook = Playbook::from_yaml("action: sum\nargs: {a: 1, b: null}").unwrap();

    let err = executor(&calls).execute(&playbook).await.unwrap_err();
    assert!(matches!(source_of(&err), ActionError::MissingArgument(_)));
}

#[tokio::test]
async fn test_type_mismatch_and_int_widening() {
    let calls = Calls::default();

    let widened = Playbook::from_yaml("action: sum\nargs: {a: 1, b: 2.5}").unwrap();
    let outcome = executor(&calls).execute(&widened).await.unwrap();
    assert_eq!(outcome.result, json!(3.5));

    let mismatch = Playbook::from_yaml("action: sum\nargs: {a: \"1\", b: 2}").unwrap();
    let err = executor(&calls).execute(&mismatch).await.unwrap_err();
    assert!(matches!(
        source_of(&err),
        ActionError::TypeMismatch { name, found, .. } if name == "a" && *found == "string"
    ));
}

#[tokio::test]
async fn test_positional_arguments_bind_in_order() {
    let calls = Calls::default();
    let playbook = Playbook::from_yaml("action: sum\nargs: [10, 5]").unwrap();

    let outcome = executor(&calls).execute(&playbook).await.unwrap();
    assert_eq!(outcome.result, json!(15));
}

#[tokio::test]
async fn test_output_variables_flow_between_steps() {
    let calls = Calls::default();
    let playbook = Playbook::from_yaml(
        r#"
name: flow
actions:
  - action: const
    args: {v: 4}
    output: x
  - action: sum
    args: {a: $x, b: $x}
    output: doubled
  - action: const
    args: {v: "$$x"}
output: doubled
"#,
    )
    .unwrap();

    let outcome = executor(&calls).execute(&playbook).await.unwrap();

    assert_eq!(outcome.result, json!(8));
    assert_eq!(outcome.variables.get("x"), Some(&json!(4)));
    assert_eq!(calls.args_of("const")[1], json!({"v": "$x"}));
}

#[tokio::test]
async fn test_run_uses_initial_context() {
    let calls = Calls::default();
    let playbook = Playbook::from_yaml("action: sum\nargs: {a: $seed, b: 1}\noutput: total").unwrap();

    let mut ctx = ExecutionContext::new();
    ctx.set("seed", json!(41));
    let result = executor(&calls).run(&playbook, &mut ctx).await.unwrap();

    assert_eq!(result, json!(42));
    assert_eq!(ctx.get("total"), Some(&json!(42)));
}

#[tokio::test]
async fn test_undefined_variable_is_binding_error() {
    let calls = Calls::default();
    let playbook = Playbook::from_yaml("action: sum\nargs: {a: $nope, b: 1}").unwrap();

    let err = executor(&calls).execute(&playbook).await.unwrap_err();

    assert_eq!(err.path().unwrap().to_string(), "playbook/steps[0]/args.a");
    assert!(matches!(source_of(&err), ActionError::Binding(msg) if msg.contains("nope")));
}

#[tokio::test]
async fn test_unknown_action_reports_node() {
    let calls = Calls::default();
    let playbook = Playbook::from_yaml(
        r#"
name: main
actions:
  - action: const
    args: {v: 1}
  - action: sum
    args:
      a: {action: missing.action}
      b: 1
"#,
    )
    .unwrap();

    let err = executor(&calls).execute(&playbook).await.unwrap_err();

    assert_eq!(err.path().unwrap().to_string(), "main/steps[1]/args.a");
    assert!(matches!(
        err,
        PlaybookError::Step { ref action, source: ActionError::NotFound(_), .. } if action == "missing.action"
    ));
}

#[tokio::test]
async fn test_missing_designated_output() {
    let calls = Calls::default();
    let playbook = Playbook::from_yaml(
        "name: main\nactions:\n  - action: const\n    args: {v: 1}\noutput: never",
    )
    .unwrap();

    let err = executor(&calls).execute(&playbook).await.unwrap_err();
    assert_eq!(err.path().unwrap().to_string(), "main");
    assert!(matches!(source_of(&err), ActionError::Binding(_)));
}

#[tokio::test]
async fn test_action_error_carries_arguments() {
    let calls = Calls::default();
    let playbook = Playbook::from_yaml("action: fail\nargs: {message: kaput}").unwrap();

    let err = executor(&calls).execute(&playbook).await.unwrap_err();

    match err {
        PlaybookError::Step {
            action,
            args,
            source: ActionError::Execution(e),
            ..
        } => {
            assert_eq!(action, "fail");
            assert_eq!(args, json!({"message": "kaput"}));
            assert_eq!(e.to_string(), "kaput");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_reject_policy_fails_unknown_arguments() {
    let calls = Calls::default();
    let mut registry = test_registry(&calls);
    registry.register(
        ActionDeclaration::new(
            "strict",
            &json!({
                "description": "No extras",
                "arguments": [{"name": "x", "type": "int"}],
                "extra_arguments": "reject"
            }),
        )
        .unwrap()
        .function(|args, _| Ok(args.snapshot())),
    );
    let executor = PlaybookExecutor::new(Arc::new(registry));

    let ok = Playbook::from_yaml("action: strict\nargs: {x: 1}").unwrap();
    assert_eq!(executor.execute(&ok).await.unwrap().result, json!({"x": 1}));

    let bad = Playbook::from_yaml("action: strict\nargs: {x: 1, y: 2}").unwrap();
    let err = executor.execute(&bad).await.unwrap_err();
    assert!(matches!(source_of(&err), ActionError::Binding(_)));

    // Ignore policy drops undeclared names
    let lenient = Playbook::from_yaml("action: sum\nargs: {a: 1, b: 2, c: 3}").unwrap();
    assert_eq!(executor.execute(&lenient).await.unwrap().result, json!(3));
    assert_eq!(
        executor.registry().entry("strict").unwrap().spec().extra_arguments,
        ExtraArgs::Reject
    );
}

#[tokio::test]
async fn test_per_invocation_instances_released_each_call() {
    let calls = Calls::default();
    let mut registry = test_registry(&calls);
    let released = register_tally(&mut registry, InstanceMode::PerInvocation);
    let executor = PlaybookExecutor::new(Arc::new(registry));

    let playbook = Playbook::from_yaml(
        "actions:\n  - action: tally\n  - action: tally\n  - action: tally\n",
    )
    .unwrap();
    let outcome = executor.execute(&playbook).await.unwrap();

    // Every call sees a fresh instance
    assert_eq!(outcome.result, json!(1));
    assert_eq!(released.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_per_run_instance_released_on_failure() {
    let calls = Calls::default();
    let mut registry = test_registry(&calls);
    let released = register_tally(&mut registry, InstanceMode::PerRun);
    let executor = PlaybookExecutor::new(Arc::new(registry));

    let playbook = Playbook::from_yaml(
        "actions:\n  - action: tally\n  - action: tally\n    output: n\n  - action: fail\n",
    )
    .unwrap();

    let mut ctx = ExecutionContext::new();
    assert!(executor.run(&playbook, &mut ctx).await.is_err());
    assert_eq!(ctx.get("n"), Some(&json!(2)));
    assert_eq!(released.load(Ordering::SeqCst), 0);

    drop(ctx);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_check_lists_unregistered_actions() {
    let calls = Calls::default();
    let playbook = Playbook::from_yaml(
        r#"
name: main
actions:
  - action: const
    args: {v: {action: nope.one}}
  - actions:
      - action: nope.two
"#,
    )
    .unwrap();

    let errors = executor(&calls).check(&playbook);
    let paths: Vec<String> = errors
        .iter()
        .map(|e| e.path().unwrap().to_string())
        .collect();
    assert_eq!(paths, vec!["main/steps[0]/args.v", "main/steps[1]/steps[0]"]);
    assert!(calls.names().is_empty());
}

#[tokio::test]
async fn test_global_executor_sees_registered_actions() {
    register_action(
        ActionDeclaration::new(
            "tests.executor.greet",
            &json!({
                "description": "Greet",
                "arguments": [{"name": "who", "type": "string", "required": true}]
            }),
        )
        .unwrap()
        .function(|args, _| Ok(json!(format!("hello {}", args.str("who")?)))),
    );

    let playbook = Playbook::single(Invocation::new("tests.executor.greet").arg("who", json!("bob")));
    let outcome = PlaybookExecutor::global().execute(&playbook).await.unwrap();
    assert_eq!(outcome.result, json!("hello bob"));
}
