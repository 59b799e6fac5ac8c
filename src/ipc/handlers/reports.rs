use crate::calc::{self, EntityKind, UNKNOWN_CLASS};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::helpers::{required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::{Datelike, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const SCHOOL_NAME: &str = "MPASAT";

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// "2026-03-02" renders as "March 2, 2026"; anything unparseable passes
/// through untouched.
fn format_long_date(iso: &str) -> String {
    match NaiveDate::parse_from_str(iso, "%Y-%m-%d") {
        Ok(d) => format!("{} {}, {}", d.format("%B"), d.day(), d.year()),
        Err(_) => iso.to_string(),
    }
}

/// School years run September through August.
fn academic_year(iso_date: &str) -> String {
    let date = NaiveDate::parse_from_str(iso_date, "%Y-%m-%d")
        .unwrap_or_else(|_| chrono::Utc::now().date_naive());
    let start = if date.month() >= 9 {
        date.year()
    } else {
        date.year() - 1
    };
    format!("{}/{}", start, start + 1)
}

fn document(title: &str, body: &str) -> String {
    format!(
        "<html>\
         <head>\
         <title>{title}</title>\
         <style>\
         body {{ font-family: Segoe UI, Tahoma, Geneva, Verdana, sans-serif; padding: 20px; }}\
         .header {{ text-align: center; margin-bottom: 20px; }}\
         .title {{ color: #1e3a8a; margin: 10px 0 0 0; }}\
         table {{ width: 100%; border-collapse: collapse; margin-top: 10px; }}\
         th {{ background: #1e3a8a; color: #fff; padding: 10px; border: 1px solid #1e3a8a; text-align: left; }}\
         td {{ padding: 8px; border: 1px solid #ddd; }}\
         .cards {{ display: flex; gap: 12px; margin: 12px 0; }}\
         .card {{ border: 1px solid #ddd; padding: 10px 16px; }}\
         </style>\
         </head>\
         <body>{body}</body>\
         </html>",
        title = escape_html(title),
        body = body,
    )
}

fn class_roster(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let class_name: String = conn
        .query_row(
            "SELECT class_name FROM classes WHERE id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("class not found"))?;

    let mut stmt = conn
        .prepare(
            "SELECT full_name, sex, date_of_birth FROM students
             WHERE class_id = ? ORDER BY full_name",
        )
        .map_err(HandlerErr::query)?;
    let students = stmt
        .query_map([&class_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut rows = String::new();
    for (i, (full_name, sex, dob)) in students.iter().enumerate() {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            i + 1,
            escape_html(full_name),
            escape_html(sex),
            escape_html(&format_long_date(dob)),
        ));
    }

    let today = chrono::Utc::now().date_naive().format("%Y-%m-%d").to_string();
    let heading = format!(
        "{} CLASS LIST FOR {} - {} ACADEMIC YEAR",
        SCHOOL_NAME,
        class_name.to_uppercase(),
        academic_year(&today),
    );
    let body = format!(
        "<div class=\"header\"><h2 class=\"title\">{}</h2></div>\
         <table><thead><tr>\
         <th>S/N</th><th>Full Names</th><th>Sex</th><th>Date of Birth</th>\
         </tr></thead><tbody>{}</tbody></table>",
        escape_html(&heading),
        rows,
    );
    let title = format!("Class List - {}", class_name);
    Ok(json!({ "html": document(&title, &body) }))
}

fn teacher_roster(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let roster = db::roster_index(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let mut stmt = conn
        .prepare("SELECT id, name, sex, contact FROM teachers ORDER BY name")
        .map_err(HandlerErr::query)?;
    let teachers = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut taught_stmt = conn
        .prepare("SELECT class_id FROM teacher_classes WHERE teacher_id = ? ORDER BY class_id")
        .map_err(HandlerErr::query)?;
    let mut rows = String::new();
    for (i, (id, name, sex, contact)) in teachers.iter().enumerate() {
        let class_ids = taught_stmt
            .query_map([id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        let classes: Vec<String> = class_ids
            .iter()
            .map(|cid| {
                roster
                    .class_names
                    .get(cid)
                    .cloned()
                    .unwrap_or_else(|| UNKNOWN_CLASS.to_string())
            })
            .collect();
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            i + 1,
            escape_html(name),
            escape_html(sex),
            escape_html(contact),
            escape_html(&classes.join(", ")),
        ));
    }

    let heading = format!("{} TEACHER LIST", SCHOOL_NAME);
    let body = format!(
        "<div class=\"header\"><h2 class=\"title\">{}</h2></div>\
         <table><thead><tr>\
         <th>S/N</th><th>Name</th><th>Sex</th><th>Contact</th><th>Classes Taught</th>\
         </tr></thead><tbody>{}</tbody></table>",
        escape_html(&heading),
        rows,
    );
    Ok(json!({ "html": document("Teacher List", &body) }))
}

/// Date-scoped attendance report: summary cards from the roll-up (single
/// weight) over the day's subtree, then one table row per session.
fn attendance_report(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let date = required_str(params, "date")?;
    if NaiveDate::parse_from_str(&date, "%Y-%m-%d").is_err() {
        return Err(HandlerErr::validation("invalid date"));
    }
    let kind = match params.get("entityType").and_then(|v| v.as_str()) {
        None => EntityKind::Students,
        Some(code) => EntityKind::from_code(code)
            .ok_or_else(|| HandlerErr::bad_params("entityType must be students or teachers"))?,
    };

    let tree = db::load_attendance_tree(conn, Some(kind))
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let roster = db::roster_index(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let day_subtree = tree.get(kind.code()).and_then(|n| n.get(&date));
    let totals = day_subtree.map(calc::rollup_bucket).unwrap_or_default();

    let records: Vec<_> = calc::flatten_records(&tree, &roster)
        .into_iter()
        .filter(|r| r.date == date)
        .collect();

    let mut rows = String::new();
    for (i, record) in records.iter().enumerate() {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}%</td></tr>",
            i + 1,
            escape_html(&record.class_name),
            escape_html(&record.subject_name),
            escape_html(&record.time),
            record.present_count,
            record.total_count,
            record.attendance_rate,
        ));
    }

    let heading = format!(
        "{} ATTENDANCE REPORT FOR {} - {} ACADEMIC YEAR",
        SCHOOL_NAME,
        format_long_date(&date).to_uppercase(),
        academic_year(&date),
    );
    let body = format!(
        "<div class=\"header\"><h2 class=\"title\">{}</h2></div>\
         <div class=\"cards\">\
         <div class=\"card\">Present marks: {}</div>\
         <div class=\"card\">Absent marks: {}</div>\
         <div class=\"card\">Present minutes: {}</div>\
         <div class=\"card\">Absent minutes: {}</div>\
         <div class=\"card\">Sessions counted: {}</div>\
         </div>\
         <table><thead><tr>\
         <th>S/N</th><th>Class</th><th>Subject</th><th>Time</th>\
         <th>Present</th><th>Total</th><th>Rate</th>\
         </tr></thead><tbody>{}</tbody></table>",
        escape_html(&heading),
        totals.present_count,
        totals.absent_count,
        totals.present_minutes,
        totals.absent_minutes,
        totals.total_sessions,
        rows,
    );
    let title = format!("Attendance Report - {}", date);
    Ok(json!({ "html": document(&title, &body), "totals": totals }))
}

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result = match req.method.as_str() {
        "reports.classRoster" => class_roster(conn, &req.params),
        "reports.teacherRoster" => teacher_roster(conn, &req.params),
        "reports.attendanceReport" => attendance_report(conn, &req.params),
        _ => unreachable!(),
    };
    match result {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.classRoster" | "reports.teacherRoster" | "reports.attendanceReport" => {
            Some(dispatch(state, req))
        }
        _ => None,
    }
}
