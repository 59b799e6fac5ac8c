use crate::calc::{BucketNode, EntityKind, Mark, Period, RosterIndex, SessionMeta};
use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "attendance.sqlite3";

/// Opens (or creates) the workspace database. Schema creation is
/// idempotent. Referential integrity is deliberately advisory: no foreign
/// keys, so deleting a class leaves dependent records with a dangling
/// classId that display code resolves to a fallback string.
pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(workspace.join(DB_FILE))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            class_name TEXT NOT NULL UNIQUE,
            abbreviation TEXT NOT NULL,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            sex TEXT NOT NULL,
            date_of_birth TEXT NOT NULL,
            place_of_birth TEXT NOT NULL,
            class_id TEXT NOT NULL,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            sex TEXT NOT NULL,
            contact TEXT NOT NULL,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_classes(
            teacher_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            PRIMARY KEY(teacher_id, class_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            subject_name TEXT NOT NULL,
            abbreviation TEXT NOT NULL,
            class_id TEXT NOT NULL,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_class ON subjects(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            salt TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'user',
            created_at TEXT
        )",
        [],
    )?;

    // One row per person mark; the composite key mirrors the hierarchical
    // attendance path entityType/date/class/subject/time/person.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_marks(
            entity_type TEXT NOT NULL,
            date TEXT NOT NULL,
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            time TEXT NOT NULL,
            person_id TEXT NOT NULL,
            mark TEXT NOT NULL,
            PRIMARY KEY(entity_type, date, class_id, subject_id, time, person_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_marks_date ON attendance_marks(date)",
        [],
    )?;

    // Session metadata is a typed row of its own, never mixed in with
    // person marks.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_meta(
            entity_type TEXT NOT NULL,
            date TEXT NOT NULL,
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            time TEXT NOT NULL,
            teacher_name TEXT NOT NULL,
            period TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            PRIMARY KEY(entity_type, date, class_id, subject_id, time)
        )",
        [],
    )?;

    Ok(conn)
}

/// Snapshot of roster display names keyed by id, for resolution during
/// flattening and report rendering.
pub fn roster_index(conn: &Connection) -> anyhow::Result<RosterIndex> {
    let mut index = RosterIndex::default();

    let mut stmt = conn.prepare("SELECT id, class_name FROM classes")?;
    let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?;
    for row in rows {
        let (id, name) = row?;
        index.class_names.insert(id, name);
    }

    let mut stmt = conn.prepare("SELECT id, subject_name FROM subjects")?;
    let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?;
    for row in rows {
        let (id, name) = row?;
        index.subject_names.insert(id, name);
    }

    let mut stmt = conn.prepare("SELECT id, full_name FROM students")?;
    let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?;
    for row in rows {
        let (id, name) = row?;
        index.person_names.insert(id, name);
    }

    let mut stmt = conn.prepare("SELECT id, name FROM teachers")?;
    let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?;
    for row in rows {
        let (id, name) = row?;
        index.person_names.insert(id, name);
    }

    Ok(index)
}

/// Loads the attendance subtree into a typed tree. This is the
/// deserialization boundary: a stored mark code becomes a Mark leaf, a
/// metadata row becomes a Meta leaf under "_metadata", and rows with
/// unrecognized mark codes are dropped as unmarked.
pub fn load_attendance_tree(
    conn: &Connection,
    kind: Option<EntityKind>,
) -> anyhow::Result<BucketNode> {
    let mut tree = BucketNode::empty();

    let mut stmt = conn.prepare(
        "SELECT entity_type, date, class_id, subject_id, time, person_id, mark
         FROM attendance_marks",
    )?;
    let rows = stmt.query_map([], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
            r.get::<_, String>(3)?,
            r.get::<_, String>(4)?,
            r.get::<_, String>(5)?,
            r.get::<_, String>(6)?,
        ))
    })?;
    for row in rows {
        let (entity, date, class_id, subject_id, time, person_id, mark) = row?;
        if kind.is_some() && kind.map(|k| k.code()) != Some(entity.as_str()) {
            continue;
        }
        let Some(mark) = Mark::from_code(&mark) else {
            continue;
        };
        tree.insert(
            &[&entity, &date, &class_id, &subject_id, &time, &person_id],
            BucketNode::Mark(mark),
        );
    }

    let mut stmt = conn.prepare(
        "SELECT entity_type, date, class_id, subject_id, time, teacher_name, period, recorded_at
         FROM attendance_meta",
    )?;
    let rows = stmt.query_map([], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
            r.get::<_, String>(3)?,
            r.get::<_, String>(4)?,
            r.get::<_, String>(5)?,
            r.get::<_, String>(6)?,
            r.get::<_, String>(7)?,
        ))
    })?;
    for row in rows {
        let (entity, date, class_id, subject_id, time, teacher_name, period, recorded_at) = row?;
        if kind.is_some() && kind.map(|k| k.code()) != Some(entity.as_str()) {
            continue;
        }
        tree.insert(
            &[&entity, &date, &class_id, &subject_id, &time, "_metadata"],
            BucketNode::Meta(SessionMeta {
                teacher_name,
                period: Period::from_code(&period).unwrap_or(Period::Single),
                recorded_at,
            }),
        );
    }

    Ok(tree)
}
