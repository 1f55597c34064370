use std::process::Command;

fn run_demo(kind: &str, fail: bool) -> Vec<serde_json::Value> {
    let output = Command::new(env!("CARGO_BIN_EXE_scopes-demo-runner"))
        .env("SCOPES_DEMO_KIND", kind)
        .env("SCOPES_DEMO_DELAY_MS", "200")
        .env("SCOPES_DEMO_FAIL", if fail { "true" } else { "false" })
        .output()
        .expect("spawn demo runner");
    assert!(
        output.status.success(),
        "demo runner failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout)
        .expect("utf8 stdout")
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect()
}

fn events_for<'a>(lines: &'a [serde_json::Value], query: &str) -> Vec<&'a serde_json::Value> {
    lines.iter().filter(|line| line["query"] == query).collect()
}

fn finished_status(lines: &[serde_json::Value], query: &str) -> String {
    let finished = events_for(lines, query)
        .into_iter()
        .filter(|line| line["event"] == "finished")
        .collect::<Vec<_>>();
    assert_eq!(finished.len(), 1, "{query} must finish exactly once");
    finished[0]["status"].as_str().expect("status").to_string()
}

#[test]
fn demo_runner_streams_previews_and_cancels() {
    for kind in ["queue", "thread"] {
        let lines = run_demo(kind, false);

        let pushes = events_for(&lines, "search")
            .into_iter()
            .filter(|line| line["event"] == "push")
            .map(|line| line["uri"].as_str().expect("uri").to_string())
            .collect::<Vec<_>>();
        assert_eq!(pushes, vec!["demo:rust:0", "demo:rust:1", "demo:rust:2"]);
        assert_eq!(finished_status(&lines, "search"), "completed");

        let preview = events_for(&lines, "preview");
        assert!(preview.iter().any(|line| line["event"] == "widgets"));
        assert!(preview
            .iter()
            .any(|line| line["event"] == "attribute" && line["value"] == "demo:rust:0"));
        assert_eq!(finished_status(&lines, "preview"), "completed");

        assert!(events_for(&lines, "activate")
            .iter()
            .any(|line| line["event"] == "activated"));
        assert_eq!(finished_status(&lines, "activate"), "completed");

        assert_eq!(finished_status(&lines, "cancelled"), "cancelled");
        assert!(events_for(&lines, "cancelled")
            .iter()
            .all(|line| line["event"] != "push"));
    }
}

#[test]
fn demo_runner_reports_provider_failure() {
    let lines = run_demo("queue", true);
    assert_eq!(finished_status(&lines, "search"), "error");
    let message = events_for(&lines, "search")
        .into_iter()
        .find(|line| line["event"] == "finished")
        .and_then(|line| line["message"].as_str())
        .expect("error message")
        .to_string();
    assert!(message.contains("demo failure requested for rust"));
    assert_eq!(finished_status(&lines, "preview"), "completed");
}
