use crate::backup;
use crate::calc::{self, EntityKind, Mark, Period, SessionKey};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::helpers::{now_iso, optional_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

fn entity_kind(params: &serde_json::Value) -> Result<EntityKind, HandlerErr> {
    let code = params
        .get("entityType")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    EntityKind::from_code(code)
        .ok_or_else(|| HandlerErr::bad_params("entityType must be students or teachers"))
}

fn session_key(params: &serde_json::Value) -> Result<SessionKey, HandlerErr> {
    let kind = entity_kind(params)?;
    let date = optional_str(params, "date").unwrap_or_default();
    let class_id = optional_str(params, "classId").unwrap_or_default();
    let subject_id = optional_str(params, "subjectId").unwrap_or_default();
    let time = optional_str(params, "time").unwrap_or_default();
    SessionKey::new(kind, &date, &class_id, &subject_id, &time)
        .map_err(|e| HandlerErr::validation(e.to_string()))
}

fn upsert_mark(
    conn: &Connection,
    key: &SessionKey,
    person_id: &str,
    mark: Mark,
) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO attendance_marks(entity_type, date, class_id, subject_id, time, person_id, mark)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(entity_type, date, class_id, subject_id, time, person_id) DO UPDATE SET
           mark = excluded.mark",
        (
            key.kind.code(),
            &key.date,
            &key.class_id,
            &key.subject_id,
            &key.time,
            person_id,
            mark.code(),
        ),
    )
    .map_err(HandlerErr::update)?;
    Ok(())
}

fn save(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let key = session_key(params)?;
    match key.kind {
        EntityKind::Students => save_student_session(conn, &key, params),
        EntityKind::Teachers => save_teacher_mark(conn, &key, params),
    }
}

/// Saves one student session. Persons absent from the payload keep their
/// prior mark (non-destructive partial overwrite); persons included are
/// replaced outright.
fn save_student_session(
    conn: &Connection,
    key: &SessionKey,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(raw_marks) = params.get("marks").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing marks"));
    };
    let mut marks: BTreeMap<String, Mark> = BTreeMap::new();
    for (person_id, value) in raw_marks {
        let code = value.as_str().unwrap_or("");
        let Some(mark) = Mark::from_code(code) else {
            return Err(HandlerErr::bad_params(format!(
                "mark for {} must be P or A",
                person_id
            )));
        };
        marks.insert(person_id.clone(), mark);
    }

    let teacher_name = optional_str(params, "teacherName").unwrap_or_default();
    let period = match params.get("period").and_then(|v| v.as_str()) {
        None => Period::Single,
        Some(code) => Period::from_code(code)
            .ok_or_else(|| HandlerErr::bad_params("period must be single or double"))?,
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (person_id, mark) in &marks {
        upsert_mark(&tx, key, person_id, *mark)?;
    }
    tx.execute(
        "INSERT INTO attendance_meta(entity_type, date, class_id, subject_id, time,
                                     teacher_name, period, recorded_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(entity_type, date, class_id, subject_id, time) DO UPDATE SET
           teacher_name = excluded.teacher_name,
           period = excluded.period,
           recorded_at = excluded.recorded_at",
        (
            key.kind.code(),
            &key.date,
            &key.class_id,
            &key.subject_id,
            &key.time,
            &teacher_name,
            period.code(),
            now_iso(),
        ),
    )
    .map_err(HandlerErr::update)?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "path": key.path(), "saved": marks.len() }))
}

/// Teacher sessions record one mark for one teacher; both the teacher and
/// a status value are required dimensions of the write.
fn save_teacher_mark(
    conn: &Connection,
    key: &SessionKey,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = optional_str(params, "teacherId").unwrap_or_default();
    if teacher_id.trim().is_empty() {
        return Err(HandlerErr::validation("missing teacherId"));
    }
    let status = optional_str(params, "status").unwrap_or_default();
    if status.trim().is_empty() {
        return Err(HandlerErr::validation("missing status"));
    }
    let Some(mark) = Mark::from_code(status.trim()) else {
        return Err(HandlerErr::bad_params("status must be P or A"));
    };
    upsert_mark(conn, key, teacher_id.trim(), mark)?;
    Ok(json!({ "path": key.person_path(teacher_id.trim()), "saved": 1 }))
}

fn open_session(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let key = session_key(params)?;
    let mut stmt = conn
        .prepare(
            "SELECT person_id, mark FROM attendance_marks
             WHERE entity_type = ? AND date = ? AND class_id = ? AND subject_id = ? AND time = ?
             ORDER BY person_id",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map(
            (
                key.kind.code(),
                &key.date,
                &key.class_id,
                &key.subject_id,
                &key.time,
            ),
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    let mut marks = serde_json::Map::new();
    for (person_id, mark) in rows {
        marks.insert(person_id, json!(mark));
    }

    let metadata = conn
        .query_row(
            "SELECT teacher_name, period, recorded_at FROM attendance_meta
             WHERE entity_type = ? AND date = ? AND class_id = ? AND subject_id = ? AND time = ?",
            (
                key.kind.code(),
                &key.date,
                &key.class_id,
                &key.subject_id,
                &key.time,
            ),
            |r| {
                Ok(json!({
                    "teacherName": r.get::<_, String>(0)?,
                    "period": r.get::<_, String>(1)?,
                    "timestamp": r.get::<_, String>(2)?,
                }))
            },
        )
        .optional()
        .map_err(HandlerErr::query)?;

    Ok(json!({
        "path": key.path(),
        "marks": marks,
        "metadata": metadata,
    }))
}

fn records(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let kind = match params.get("entityType").and_then(|v| v.as_str()) {
        None => None,
        Some(code) => Some(
            EntityKind::from_code(code)
                .ok_or_else(|| HandlerErr::bad_params("entityType must be students or teachers"))?,
        ),
    };
    let tree = db::load_attendance_tree(conn, kind)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let roster = db::roster_index(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let records = calc::flatten_records(&tree, &roster);
    Ok(json!({ "records": records }))
}

fn count_rows(conn: &Connection, table: &str) -> Result<i64, HandlerErr> {
    // Table names come from a fixed internal list, never from params.
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
        .map_err(HandlerErr::query)
}

/// Roll-up totals over the selected subtree, plus roster head-counts for
/// the dashboard cards. Narrowing dimensions apply in path order; a
/// narrower dimension without its parents is rejected.
fn summary(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let kind = match params.get("entityType").and_then(|v| v.as_str()) {
        None => None,
        Some(code) => Some(
            EntityKind::from_code(code)
                .ok_or_else(|| HandlerErr::bad_params("entityType must be students or teachers"))?,
        ),
    };
    let date = optional_str(params, "date");
    let class_id = optional_str(params, "classId");
    let subject_id = optional_str(params, "subjectId");
    if date.is_some() && kind.is_none() {
        return Err(HandlerErr::bad_params("date requires entityType"));
    }
    if class_id.is_some() && date.is_none() {
        return Err(HandlerErr::bad_params("classId requires date"));
    }
    if subject_id.is_some() && class_id.is_none() {
        return Err(HandlerErr::bad_params("subjectId requires classId"));
    }

    let tree = db::load_attendance_tree(conn, kind)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let mut node = Some(&tree);
    let mut segments: Vec<String> = Vec::new();
    if let Some(kind) = kind {
        segments.push(kind.code().to_string());
    }
    for dim in [&date, &class_id, &subject_id] {
        if let Some(v) = dim {
            segments.push(v.clone());
        }
    }
    for segment in &segments {
        node = node.and_then(|n| n.get(segment));
    }
    let totals = node.map(calc::rollup_bucket).unwrap_or_default();

    Ok(json!({
        "totals": totals,
        "roster": {
            "students": count_rows(conn, "students")?,
            "teachers": count_rows(conn, "teachers")?,
            "classes": count_rows(conn, "classes")?,
            "subjects": count_rows(conn, "subjects")?,
        },
    }))
}

/// Per-session detail for one student session, weighted by the session's
/// own stored period. This is the view that disagrees with the roll-up's
/// fixed single weight; see DESIGN.md.
fn student_detail(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let date = optional_str(params, "date").unwrap_or_default();
    let class_id = optional_str(params, "classId").unwrap_or_default();
    let subject_id = optional_str(params, "subjectId").unwrap_or_default();
    let time = optional_str(params, "time").unwrap_or_default();
    let key = SessionKey::new(EntityKind::Students, &date, &class_id, &subject_id, &time)
        .map_err(|e| HandlerErr::validation(e.to_string()))?;

    let period = conn
        .query_row(
            "SELECT period FROM attendance_meta
             WHERE entity_type = ? AND date = ? AND class_id = ? AND subject_id = ? AND time = ?",
            (
                key.kind.code(),
                &key.date,
                &key.class_id,
                &key.subject_id,
                &key.time,
            ),
            |r| r.get::<_, String>(0),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .and_then(|code| Period::from_code(&code))
        .unwrap_or(Period::Single);

    let roster = db::roster_index(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let mut stmt = conn
        .prepare(
            "SELECT person_id, mark FROM attendance_marks
             WHERE entity_type = ? AND date = ? AND class_id = ? AND subject_id = ? AND time = ?
             ORDER BY person_id",
        )
        .map_err(HandlerErr::query)?;
    let stored = stmt
        .query_map(
            (
                key.kind.code(),
                &key.date,
                &key.class_id,
                &key.subject_id,
                &key.time,
            ),
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut rows = Vec::new();
    let mut marks = Vec::new();
    for (person_id, code) in &stored {
        let mark = Mark::from_code(code);
        marks.push(mark);
        rows.push(json!({
            "studentId": person_id,
            "studentName": roster.person_name(person_id),
            "mark": mark.map(Mark::code),
            "minutes": mark.map(|_| period.minutes()),
        }));
    }
    let tally = calc::tally_marks(marks, period);

    Ok(json!({
        "path": key.path(),
        "period": period.code(),
        "rows": rows,
        "tally": tally,
    }))
}

/// Irreversibly removes the whole attendance subtree. A safety bundle is
/// exported into the workspace first; if that export fails the wipe is
/// aborted.
fn handle_delete_all(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(workspace) = state.workspace.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if req.params.get("confirm").and_then(|v| v.as_bool()) != Some(true) {
        return err(
            &req.id,
            "bad_params",
            "deleting all attendance requires confirm: true",
            None,
        );
    }

    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let out_path = workspace
        .join("backups")
        .join(format!("attendance-pre-delete-{}.zip", stamp));
    let bundle = match backup::export_workspace_bundle(workspace, &out_path) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "backup_failed", format!("{e:?}"), None),
    };

    let deleted_marks = match conn.execute("DELETE FROM attendance_marks", []) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    let deleted_meta = match conn.execute("DELETE FROM attendance_meta", []) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "deletedMarks": deleted_marks,
            "deletedSessions": deleted_meta,
            "backupPath": bundle.out_path,
        }),
    )
}

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result = match req.method.as_str() {
        "attendance.save" => save(conn, &req.params),
        "attendance.openSession" => open_session(conn, &req.params),
        "attendance.records" => records(conn, &req.params),
        "attendance.summary" => summary(conn, &req.params),
        "attendance.studentDetail" => student_detail(conn, &req.params),
        _ => unreachable!(),
    };
    match result {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.save"
        | "attendance.openSession"
        | "attendance.records"
        | "attendance.summary"
        | "attendance.studentDetail" => Some(dispatch(state, req)),
        "attendance.deleteAll" => Some(handle_delete_all(state, req)),
        _ => None,
    }
}
