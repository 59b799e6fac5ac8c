use crate::calc::UNKNOWN_CLASS;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::helpers::{form_field, new_id, now_iso, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;

fn list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_filter = params.get("classId").and_then(|v| v.as_str());

    let mut class_names: HashMap<String, String> = HashMap::new();
    let mut stmt = conn
        .prepare("SELECT id, class_name FROM classes")
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    for (id, name) in rows {
        class_names.insert(id, name);
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, subject_name, abbreviation, class_id, created_at, updated_at
             FROM subjects
             WHERE class_id = COALESCE(?, class_id)
             ORDER BY subject_name",
        )
        .map_err(HandlerErr::query)?;
    let subjects = stmt
        .query_map([class_filter], |r| {
            let class_id: String = r.get(3)?;
            let display = class_names
                .get(&class_id)
                .cloned()
                .unwrap_or_else(|| UNKNOWN_CLASS.to_string());
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "subjectName": r.get::<_, String>(1)?,
                "abbreviation": r.get::<_, String>(2)?,
                "classId": class_id,
                "className": display,
                "createdAt": r.get::<_, Option<String>>(4)?,
                "updatedAt": r.get::<_, Option<String>>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "subjects": subjects }))
}

fn create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_name = form_field(params, "subjectName")?;
    let abbreviation = form_field(params, "abbreviation")?;
    let class_id = form_field(params, "classId")?;
    let id = new_id();
    conn.execute(
        "INSERT INTO subjects(id, subject_name, abbreviation, class_id, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &subject_name, &abbreviation, &class_id, now_iso()),
    )
    .map_err(HandlerErr::update)?;
    Ok(json!({ "id": id }))
}

fn update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "id")?;
    let subject_name = form_field(params, "subjectName")?;
    let abbreviation = form_field(params, "abbreviation")?;
    let class_id = form_field(params, "classId")?;
    let changed = conn
        .execute(
            "UPDATE subjects
             SET subject_name = ?, abbreviation = ?, class_id = ?, updated_at = ?
             WHERE id = ?",
            (&subject_name, &abbreviation, &class_id, now_iso(), &id),
        )
        .map_err(HandlerErr::update)?;
    if changed == 0 {
        return Err(HandlerErr::not_found("subject not found"));
    }
    Ok(json!({ "id": id }))
}

fn delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "id")?;
    let changed = conn
        .execute("DELETE FROM subjects WHERE id = ?", [&id])
        .map_err(HandlerErr::update)?;
    if changed == 0 {
        return Err(HandlerErr::not_found("subject not found"));
    }
    Ok(json!({ "deleted": true }))
}

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result = match req.method.as_str() {
        "subjects.list" => list(conn, &req.params),
        "subjects.create" => create(conn, &req.params),
        "subjects.update" => update(conn, &req.params),
        "subjects.delete" => delete(conn, &req.params),
        _ => unreachable!(),
    };
    match result {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" | "subjects.create" | "subjects.update" | "subjects.delete" => {
            Some(dispatch(state, req))
        }
        _ => None,
    }
}
