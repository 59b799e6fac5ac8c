mod test_support;

use serde_json::json;
use test_support::{error_code, request, request_ok, spawn_sidecar, temp_dir};

#[test]
fn health_workspace_and_unknown_method() {
    let workspace = temp_dir("attendanced-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert!(health.get("workspacePath").map(|v| v.is_null()).unwrap_or(false));

    // Roster and attendance methods refuse to run without a workspace.
    let no_ws = request(&mut stdin, &mut reader, "2", "classes.list", json!({}));
    assert_eq!(error_code(&no_ws), "no_workspace");

    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(
        selected.get("workspacePath").and_then(|v| v.as_str()),
        Some(workspace.to_string_lossy().as_ref())
    );

    let listed = request_ok(&mut stdin, &mut reader, "4", "classes.list", json!({}));
    assert_eq!(
        listed.get("classes").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    let unknown = request(&mut stdin, &mut reader, "5", "nope.nothing", json!({}));
    assert_eq!(error_code(&unknown), "not_implemented");

    drop(stdin);
    let _ = child.wait();
}
