//! Unit tests for child-process argument construction.

use std::path::PathBuf;

use session_relay::driver::command::SpawnSpec;

fn base_spec() -> SpawnSpec {
    SpawnSpec {
        cli: "claude".into(),
        base_args: vec!["--dangerously-skip-permissions".into()],
        model: String::new(),
        effort: "medium".into(),
        plan_mode: false,
        resume: None,
        upload_dir: PathBuf::from("/srv/relay/uploads"),
        agent_directive: None,
        prompt: "hello".into(),
        attachments: Vec::new(),
    }
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1).cloned())
}

#[test]
fn minimal_invocation_has_stream_output_and_prompt() {
    let args = base_spec().build_args();
    assert_eq!(args[0], "--dangerously-skip-permissions");
    assert_eq!(flag_value(&args, "-p").as_deref(), Some("hello"));
    assert_eq!(
        flag_value(&args, "--output-format").as_deref(),
        Some("stream-json")
    );
    assert!(args.contains(&"--verbose".to_string()));
    assert!(!args.contains(&"--model".to_string()));
    assert!(!args.contains(&"--resume".to_string()));
    assert!(!args.contains(&"--permission-mode".to_string()));
}

#[test]
fn effort_is_only_passed_for_higher_tier_models() {
    let mut spec = base_spec();
    spec.model = "sonnet".into();
    spec.effort = "high".into();
    let args = spec.build_args();
    assert_eq!(flag_value(&args, "--model").as_deref(), Some("sonnet"));
    assert!(!args.contains(&"--effort".to_string()));

    spec.model = "opus".into();
    let args = spec.build_args();
    assert_eq!(flag_value(&args, "--effort").as_deref(), Some("high"));
}

#[test]
fn plan_mode_and_resume_flags() {
    let mut spec = base_spec();
    spec.plan_mode = true;
    spec.resume = Some("conv-42".into());
    let args = spec.build_args();
    assert_eq!(
        flag_value(&args, "--permission-mode").as_deref(),
        Some("plan")
    );
    assert_eq!(flag_value(&args, "--resume").as_deref(), Some("conv-42"));
}

#[test]
fn attachments_become_a_path_manifest_in_the_prompt() {
    let mut spec = base_spec();
    spec.attachments = vec![
        PathBuf::from("/srv/relay/uploads/a.txt"),
        PathBuf::from("/srv/relay/uploads/b.png"),
    ];
    let prompt = spec.full_prompt();
    assert!(prompt.starts_with("hello"));
    assert!(prompt.contains("Attached files:"));
    assert!(prompt.contains("/srv/relay/uploads/a.txt"));
    assert!(prompt.contains("/srv/relay/uploads/b.png"));

    // The manifest rides inside the -p argument.
    let args = spec.build_args();
    assert_eq!(flag_value(&args, "-p"), Some(prompt));
}

#[test]
fn system_directive_names_the_upload_dir_and_appends_the_agent() {
    let mut spec = base_spec();
    let directive = spec.system_directive();
    assert!(directive.contains("/srv/relay/uploads"));

    spec.agent_directive = Some("You are a careful reviewer.".into());
    let directive = spec.system_directive();
    assert!(directive.ends_with("You are a careful reviewer."));

    let args = spec.build_args();
    assert_eq!(flag_value(&args, "--append-system-prompt"), Some(directive));
}
