use crate::calc::UNKNOWN_CLASS;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::helpers::{form_field, new_id, now_iso, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;

fn classes_taught_param(params: &serde_json::Value) -> Vec<String> {
    params
        .get("classesTaught")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn replace_classes_taught(
    conn: &Connection,
    teacher_id: &str,
    class_ids: &[String],
) -> Result<(), HandlerErr> {
    conn.execute("DELETE FROM teacher_classes WHERE teacher_id = ?", [teacher_id])
        .map_err(HandlerErr::update)?;
    for class_id in class_ids {
        conn.execute(
            "INSERT OR IGNORE INTO teacher_classes(teacher_id, class_id) VALUES(?, ?)",
            (teacher_id, class_id),
        )
        .map_err(HandlerErr::update)?;
    }
    Ok(())
}

fn list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
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

    let mut taught: HashMap<String, Vec<String>> = HashMap::new();
    let mut stmt = conn
        .prepare("SELECT teacher_id, class_id FROM teacher_classes ORDER BY class_id")
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    for (teacher_id, class_id) in rows {
        taught.entry(teacher_id).or_default().push(class_id);
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, name, sex, contact, created_at, updated_at
             FROM teachers ORDER BY name",
        )
        .map_err(HandlerErr::query)?;
    let teachers = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let class_ids = taught.get(&id).cloned().unwrap_or_default();
            let resolved: Vec<String> = class_ids
                .iter()
                .map(|cid| {
                    class_names
                        .get(cid)
                        .cloned()
                        .unwrap_or_else(|| UNKNOWN_CLASS.to_string())
                })
                .collect();
            Ok(json!({
                "id": id,
                "name": r.get::<_, String>(1)?,
                "sex": r.get::<_, String>(2)?,
                "contact": r.get::<_, String>(3)?,
                "classesTaught": class_ids,
                "classNames": resolved,
                "createdAt": r.get::<_, Option<String>>(4)?,
                "updatedAt": r.get::<_, Option<String>>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "teachers": teachers }))
}

fn create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = form_field(params, "name")?;
    let sex = form_field(params, "sex")?;
    let contact = form_field(params, "contact")?;
    let class_ids = classes_taught_param(params);
    let id = new_id();
    conn.execute(
        "INSERT INTO teachers(id, name, sex, contact, created_at) VALUES(?, ?, ?, ?, ?)",
        (&id, &name, &sex, &contact, now_iso()),
    )
    .map_err(HandlerErr::update)?;
    replace_classes_taught(conn, &id, &class_ids)?;
    Ok(json!({ "id": id }))
}

fn update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "id")?;
    let name = form_field(params, "name")?;
    let sex = form_field(params, "sex")?;
    let contact = form_field(params, "contact")?;
    let class_ids = classes_taught_param(params);
    let changed = conn
        .execute(
            "UPDATE teachers SET name = ?, sex = ?, contact = ?, updated_at = ? WHERE id = ?",
            (&name, &sex, &contact, now_iso(), &id),
        )
        .map_err(HandlerErr::update)?;
    if changed == 0 {
        return Err(HandlerErr::not_found("teacher not found"));
    }
    replace_classes_taught(conn, &id, &class_ids)?;
    Ok(json!({ "id": id }))
}

fn delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "id")?;
    let changed = conn
        .execute("DELETE FROM teachers WHERE id = ?", [&id])
        .map_err(HandlerErr::update)?;
    if changed == 0 {
        return Err(HandlerErr::not_found("teacher not found"));
    }
    conn.execute("DELETE FROM teacher_classes WHERE teacher_id = ?", [&id])
        .map_err(HandlerErr::update)?;
    Ok(json!({ "deleted": true }))
}

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result = match req.method.as_str() {
        "teachers.list" => list(conn, &req.params),
        "teachers.create" => create(conn, &req.params),
        "teachers.update" => update(conn, &req.params),
        "teachers.delete" => delete(conn, &req.params),
        _ => unreachable!(),
    };
    match result {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" | "teachers.create" | "teachers.update" | "teachers.delete" => {
            Some(dispatch(state, req))
        }
        _ => None,
    }
}
