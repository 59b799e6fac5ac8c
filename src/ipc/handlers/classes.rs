use crate::ipc::error::{err, ok};
use crate::ipc::handlers::helpers::{form_field, new_id, now_iso, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn class_name_taken(
    conn: &Connection,
    class_name: &str,
    exclude_id: Option<&str>,
) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM classes WHERE class_name = ? AND id != COALESCE(?, '')",
        (class_name, exclude_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

fn list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, class_name, abbreviation, created_at, updated_at
             FROM classes ORDER BY class_name",
        )
        .map_err(HandlerErr::query)?;
    let classes = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "className": r.get::<_, String>(1)?,
                "abbreviation": r.get::<_, String>(2)?,
                "createdAt": r.get::<_, Option<String>>(3)?,
                "updatedAt": r.get::<_, Option<String>>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "classes": classes }))
}

fn create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_name = form_field(params, "className")?;
    let abbreviation = form_field(params, "abbreviation")?;
    if class_name_taken(conn, &class_name, None)? {
        return Err(HandlerErr::validation("A class with this name already exists"));
    }
    let id = new_id();
    conn.execute(
        "INSERT INTO classes(id, class_name, abbreviation, created_at) VALUES(?, ?, ?, ?)",
        (&id, &class_name, &abbreviation, now_iso()),
    )
    .map_err(HandlerErr::update)?;
    Ok(json!({ "id": id }))
}

fn update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "id")?;
    let class_name = form_field(params, "className")?;
    let abbreviation = form_field(params, "abbreviation")?;
    if class_name_taken(conn, &class_name, Some(&id))? {
        return Err(HandlerErr::validation("A class with this name already exists"));
    }
    let changed = conn
        .execute(
            "UPDATE classes SET class_name = ?, abbreviation = ?, updated_at = ? WHERE id = ?",
            (&class_name, &abbreviation, now_iso(), &id),
        )
        .map_err(HandlerErr::update)?;
    if changed == 0 {
        return Err(HandlerErr::not_found("class not found"));
    }
    Ok(json!({ "id": id }))
}

/// No cascade: students, subjects and attendance history keep the dangling
/// classId and display it through fallbacks.
fn delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "id")?;
    let changed = conn
        .execute("DELETE FROM classes WHERE id = ?", [&id])
        .map_err(HandlerErr::update)?;
    if changed == 0 {
        return Err(HandlerErr::not_found("class not found"));
    }
    Ok(json!({ "deleted": true }))
}

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result = match req.method.as_str() {
        "classes.list" => list(conn, &req.params),
        "classes.create" => create(conn, &req.params),
        "classes.update" => update(conn, &req.params),
        "classes.delete" => delete(conn, &req.params),
        _ => unreachable!(),
    };
    match result {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" | "classes.create" | "classes.update" | "classes.delete" => {
            Some(dispatch(state, req))
        }
        _ => None,
    }
}
