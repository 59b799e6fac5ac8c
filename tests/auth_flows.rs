mod test_support;

use serde_json::json;
use test_support::{error_code, error_message, request, request_ok, spawn_sidecar, temp_dir};

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
fn sign_up_validation_matches_the_form_rules() {
    let workspace = temp_dir("attendanced-auth-signup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);

    let short = request(
        &mut stdin,
        &mut reader,
        "1",
        "auth.signUp",
        json!({ "username": "ab", "password": "secret99", "repeatPassword": "secret99" }),
    );
    assert_eq!(
        error_message(&short),
        "Username must be at least 3 characters long."
    );

    let bad_chars = request(
        &mut stdin,
        &mut reader,
        "2",
        "auth.signUp",
        json!({ "username": "bad name", "password": "secret99", "repeatPassword": "secret99" }),
    );
    assert_eq!(
        error_message(&bad_chars),
        "Username can only contain letters, numbers, and underscores."
    );

    let weak = request(
        &mut stdin,
        &mut reader,
        "3",
        "auth.signUp",
        json!({ "username": "principal", "password": "abc", "repeatPassword": "abc" }),
    );
    assert_eq!(error_code(&weak), "weak_password");

    let mismatch = request(
        &mut stdin,
        &mut reader,
        "4",
        "auth.signUp",
        json!({ "username": "principal", "password": "secret99", "repeatPassword": "secret98" }),
    );
    assert_eq!(error_message(&mismatch), "Passwords do not match.");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "auth.signUp",
        json!({ "username": "principal", "password": "secret99", "repeatPassword": "secret99" }),
    );
    assert_eq!(
        created.get("email").and_then(|v| v.as_str()),
        Some("principal@mpasat.com")
    );

    let duplicate = request(
        &mut stdin,
        &mut reader,
        "6",
        "auth.signUp",
        json!({ "username": "principal", "password": "other-pass", "repeatPassword": "other-pass" }),
    );
    assert_eq!(
        error_message(&duplicate),
        "Username already exists. Please choose a different username."
    );
}

#[test]
fn sign_in_maps_failures_to_fixed_messages_and_rate_limits() {
    let workspace = temp_dir("attendanced-auth-signin");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "auth.signUp",
        json!({ "username": "bursar", "password": "secret99", "repeatPassword": "secret99" }),
    );

    let unknown = request(
        &mut stdin,
        &mut reader,
        "2",
        "auth.signIn",
        json!({ "username": "nobody", "password": "whatever" }),
    );
    assert_eq!(
        error_message(&unknown),
        "User not found. Please check your username or sign up."
    );

    let malformed = request(
        &mut stdin,
        &mut reader,
        "3",
        "auth.signIn",
        json!({ "username": "not@valid", "password": "whatever" }),
    );
    assert_eq!(error_message(&malformed), "Invalid email format.");

    for i in 0..5 {
        let wrong = request(
            &mut stdin,
            &mut reader,
            &format!("wrong-{}", i),
            "auth.signIn",
            json!({ "username": "bursar", "password": "nope" }),
        );
        assert_eq!(error_message(&wrong), "Incorrect password. Please try again.");
    }
    let limited = request(
        &mut stdin,
        &mut reader,
        "4",
        "auth.signIn",
        json!({ "username": "bursar", "password": "secret99" }),
    );
    assert_eq!(
        error_message(&limited),
        "Too many failed attempts. Please try again later."
    );
}

#[test]
fn sign_in_accepts_username_or_full_email_and_signs_out() {
    let workspace = temp_dir("attendanced-auth-session");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "auth.signUp",
        json!({ "username": "registrar", "password": "secret99", "repeatPassword": "secret99" }),
    );

    let by_username = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "auth.signIn",
        json!({ "username": "registrar", "password": "secret99" }),
    );
    assert_eq!(
        by_username.get("email").and_then(|v| v.as_str()),
        Some("registrar@mpasat.com")
    );

    let health = request_ok(&mut stdin, &mut reader, "3", "health", json!({}));
    assert_eq!(
        health.get("signedInAs").and_then(|v| v.as_str()),
        Some("registrar")
    );

    let by_email = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "auth.signIn",
        json!({ "username": "registrar@mpasat.com", "password": "secret99" }),
    );
    assert_eq!(
        by_email.get("username").and_then(|v| v.as_str()),
        Some("registrar")
    );

    request_ok(&mut stdin, &mut reader, "5", "auth.signOut", json!({}));
    let health = request_ok(&mut stdin, &mut reader, "6", "health", json!({}));
    assert!(health.get("signedInAs").map(|v| v.is_null()).unwrap_or(false));
}
