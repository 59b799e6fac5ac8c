mod test_support;

use serde_json::json;
use test_support::{error_code, request, request_ok, spawn_sidecar, temp_dir};

fn open_workspace(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
    workspace: &std::path::Path,
) {
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
}

#[test]
fn export_then_import_moves_data_between_workspaces() {
    let source = temp_dir("attendanced-bundle-source");
    let target = temp_dir("attendanced-bundle-target");
    let bundle = source.join("out").join("school.zip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &source);

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "classes.create",
        json!({ "className": "Form One", "abbreviation": "F1" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.save",
        json!({ "entityType": "students", "date": "2026-03-02", "classId": "c1",
                "subjectId": "sub1", "time": "08:00", "marks": { "s1": "P" } }),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "backup.export",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(
        exported.get("bundleFormat").and_then(|v| v.as_str()),
        Some("attendance-workspace-v1")
    );
    assert!(bundle.is_file());

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "backup.import",
        json!({ "inPath": bundle.to_string_lossy(),
                "workspacePath": target.to_string_lossy() }),
    );
    assert_eq!(
        imported.get("workspacePath").and_then(|v| v.as_str()),
        Some(target.to_string_lossy().as_ref())
    );

    // The daemon now points at the target workspace with the restored data.
    let records = request_ok(&mut stdin, &mut reader, "5", "attendance.records", json!({}));
    let rows = records.get("records").and_then(|v| v.as_array()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("date").and_then(|v| v.as_str()), Some("2026-03-02"));
    let classes = request_ok(&mut stdin, &mut reader, "6", "classes.list", json!({}));
    let rows = classes.get("classes").and_then(|v| v.as_array()).unwrap();
    assert_eq!(rows.len(), 1);
}

#[test]
fn import_rejects_a_bundle_that_is_not_a_workspace() {
    let workspace = temp_dir("attendanced-bundle-bad");
    let bogus = workspace.join("not-a-bundle.zip");
    std::fs::write(&bogus, b"definitely not a zip").unwrap();
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let rejected = request(
        &mut stdin,
        &mut reader,
        "1",
        "backup.import",
        json!({ "inPath": bogus.to_string_lossy(),
                "workspacePath": workspace.to_string_lossy() }),
    );
    assert_eq!(error_code(&rejected), "restore_failed");
}

#[test]
fn delete_all_requires_confirm_and_leaves_a_safety_bundle() {
    let workspace = temp_dir("attendanced-delete-all");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.save",
        json!({ "entityType": "students", "date": "2026-03-02", "classId": "c1",
                "subjectId": "sub1", "time": "08:00",
                "marks": { "s1": "P", "s2": "A" },
                "teacherName": "Mr Fon", "period": "single" }),
    );

    let unconfirmed = request(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.deleteAll",
        json!({}),
    );
    assert_eq!(error_code(&unconfirmed), "bad_params");
    let records = request_ok(&mut stdin, &mut reader, "3", "attendance.records", json!({}));
    assert_eq!(
        records.get("records").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );

    let wiped = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.deleteAll",
        json!({ "confirm": true }),
    );
    assert_eq!(wiped.get("deletedMarks").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(wiped.get("deletedSessions").and_then(|v| v.as_u64()), Some(1));
    let backup_path = wiped
        .get("backupPath")
        .and_then(|v| v.as_str())
        .expect("backup path");
    assert!(std::path::Path::new(backup_path).is_file());
    assert!(backup_path.contains("attendance-pre-delete-"));

    let records = request_ok(&mut stdin, &mut reader, "5", "attendance.records", json!({}));
    assert_eq!(
        records.get("records").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    // The safety bundle restores the wiped marks.
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "backup.import",
        json!({ "inPath": backup_path,
                "workspacePath": workspace.to_string_lossy() }),
    );
    let records = request_ok(&mut stdin, &mut reader, "7", "attendance.records", json!({}));
    assert_eq!(
        records.get("records").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );
}
