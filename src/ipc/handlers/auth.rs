use crate::auth::{self, AuthError, MAX_FAILED_SIGNINS};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::helpers::{new_id, now_iso, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request, SessionUser};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn auth_err(e: AuthError) -> HandlerErr {
    HandlerErr::new(e.code(), e.message())
}

/// Minimal sanity check on explicit email input; bare usernames never hit
/// this because they get the synthetic domain appended.
fn looks_like_email(candidate: &str) -> bool {
    let Some((local, domain)) = candidate.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

fn sign_up(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let username = required_str(params, "username")?;
    let password = required_str(params, "password")?;
    let repeat = required_str(params, "repeatPassword")?;

    auth::validate_username(&username).map_err(auth_err)?;
    auth::validate_password(&password, &repeat).map_err(auth_err)?;

    let taken = conn
        .query_row("SELECT 1 FROM users WHERE username = ?", [&username], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if taken {
        return Err(auth_err(AuthError::DuplicateUsername));
    }

    let email = auth::synthetic_email(&username);
    let user_id = new_id();
    let salt = new_id();
    let password_hash = auth::hash_password(&password, &salt);
    conn.execute(
        "INSERT INTO users(id, username, email, password_hash, salt, role, created_at)
         VALUES(?, ?, ?, ?, ?, 'user', ?)",
        (&user_id, &username, &email, &password_hash, &salt, now_iso()),
    )
    .map_err(HandlerErr::update)?;

    Ok(json!({ "userId": user_id, "email": email }))
}

struct StoredUser {
    id: String,
    username: String,
    email: String,
    password_hash: String,
    salt: String,
}

fn lookup_user(conn: &Connection, login: &str) -> Result<Option<StoredUser>, HandlerErr> {
    let email = auth::synthetic_email(login);
    conn.query_row(
        "SELECT id, username, email, password_hash, salt
         FROM users WHERE username = ? OR email = ?",
        (login, &email),
        |r| {
            Ok(StoredUser {
                id: r.get(0)?,
                username: r.get(1)?,
                email: r.get(2)?,
                password_hash: r.get(3)?,
                salt: r.get(4)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::query)
}

fn handle_sign_in(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let login = match required_str(&req.params, "username") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let password = match required_str(&req.params, "password") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    if login.contains('@') && !looks_like_email(&login) {
        return auth_err(AuthError::InvalidEmail).response(&req.id);
    }
    if state.failed_signins.get(&login).copied().unwrap_or(0) >= MAX_FAILED_SIGNINS {
        return auth_err(AuthError::TooManyRequests).response(&req.id);
    }

    let user = match lookup_user(conn, &login) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(user) = user else {
        return auth_err(AuthError::UserNotFound).response(&req.id);
    };

    if !auth::verify_password(&password, &user.salt, &user.password_hash) {
        *state.failed_signins.entry(login).or_insert(0) += 1;
        return auth_err(AuthError::WrongPassword).response(&req.id);
    }

    state.failed_signins.remove(&login);
    state.session = Some(SessionUser {
        user_id: user.id.clone(),
        username: user.username.clone(),
        email: user.email.clone(),
    });
    ok(
        &req.id,
        json!({
            "userId": user.id,
            "username": user.username,
            "email": user.email,
        }),
    )
}

fn handle_sign_up(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match sign_up(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_sign_out(state: &mut AppState, req: &Request) -> serde_json::Value {
    state.session = None;
    ok(&req.id, json!({ "signedOut": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.signUp" => Some(handle_sign_up(state, req)),
        "auth.signIn" => Some(handle_sign_in(state, req)),
        "auth.signOut" => Some(handle_sign_out(state, req)),
        _ => None,
    }
}
