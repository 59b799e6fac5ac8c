use crate::calc::UNKNOWN_CLASS;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::helpers::{form_field, new_id, now_iso, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;

fn class_names(conn: &Connection) -> Result<HashMap<String, String>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, class_name FROM classes")
        .map_err(HandlerErr::query)?;
    stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        .map_err(HandlerErr::query)
}

fn validate_form(params: &serde_json::Value) -> Result<(String, String, String, String, String), HandlerErr> {
    let full_name = form_field(params, "fullName")?;
    let sex = form_field(params, "sex")?;
    let date_of_birth = form_field(params, "dateOfBirth")?;
    let place_of_birth = form_field(params, "placeOfBirth")?;
    let class_id = form_field(params, "classId")?;
    if sex != "Male" && sex != "Female" {
        return Err(HandlerErr::validation("Sex must be Male or Female"));
    }
    if chrono::NaiveDate::parse_from_str(&date_of_birth, "%Y-%m-%d").is_err() {
        return Err(HandlerErr::validation("Date of birth must be a valid date"));
    }
    Ok((full_name, sex, date_of_birth, place_of_birth, class_id))
}

fn list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_filter = params.get("classId").and_then(|v| v.as_str());
    let names = class_names(conn)?;
    let mut stmt = conn
        .prepare(
            "SELECT id, full_name, sex, date_of_birth, place_of_birth, class_id,
                    created_at, updated_at
             FROM students
             WHERE class_id = COALESCE(?, class_id)
             ORDER BY full_name",
        )
        .map_err(HandlerErr::query)?;
    let mut students = stmt
        .query_map([class_filter], |r| {
            let class_id: String = r.get(5)?;
            Ok((
                json!({
                    "id": r.get::<_, String>(0)?,
                    "fullName": r.get::<_, String>(1)?,
                    "sex": r.get::<_, String>(2)?,
                    "dateOfBirth": r.get::<_, String>(3)?,
                    "placeOfBirth": r.get::<_, String>(4)?,
                    "classId": class_id.clone(),
                    "createdAt": r.get::<_, Option<String>>(6)?,
                    "updatedAt": r.get::<_, Option<String>>(7)?,
                }),
                class_id,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    // Resolve class names after the query so deleted classes surface as the
    // fallback string instead of dropping rows.
    let students: Vec<serde_json::Value> = students
        .drain(..)
        .map(|(mut row, class_id)| {
            let display = names
                .get(&class_id)
                .cloned()
                .unwrap_or_else(|| UNKNOWN_CLASS.to_string());
            row["className"] = json!(display);
            row
        })
        .collect();
    Ok(json!({ "students": students }))
}

fn create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (full_name, sex, date_of_birth, place_of_birth, class_id) = validate_form(params)?;
    let id = new_id();
    conn.execute(
        "INSERT INTO students(id, full_name, sex, date_of_birth, place_of_birth, class_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (&id, &full_name, &sex, &date_of_birth, &place_of_birth, &class_id, now_iso()),
    )
    .map_err(HandlerErr::update)?;
    Ok(json!({ "id": id }))
}

fn update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "id")?;
    let (full_name, sex, date_of_birth, place_of_birth, class_id) = validate_form(params)?;
    let changed = conn
        .execute(
            "UPDATE students
             SET full_name = ?, sex = ?, date_of_birth = ?, place_of_birth = ?,
                 class_id = ?, updated_at = ?
             WHERE id = ?",
            (&full_name, &sex, &date_of_birth, &place_of_birth, &class_id, now_iso(), &id),
        )
        .map_err(HandlerErr::update)?;
    if changed == 0 {
        return Err(HandlerErr::not_found("student not found"));
    }
    Ok(json!({ "id": id }))
}

fn delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "id")?;
    let changed = conn
        .execute("DELETE FROM students WHERE id = ?", [&id])
        .map_err(HandlerErr::update)?;
    if changed == 0 {
        return Err(HandlerErr::not_found("student not found"));
    }
    Ok(json!({ "deleted": true }))
}

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result = match req.method.as_str() {
        "students.list" => list(conn, &req.params),
        "students.create" => create(conn, &req.params),
        "students.update" => update(conn, &req.params),
        "students.delete" => delete(conn, &req.params),
        _ => unreachable!(),
    };
    match result {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" | "students.create" | "students.update" | "students.delete" => {
            Some(dispatch(state, req))
        }
        _ => None,
    }
}
