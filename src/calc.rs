use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Minutes credited per mark under the two timetable period lengths.
pub const SINGLE_PERIOD_MINUTES: i64 = 50;
pub const DOUBLE_PERIOD_MINUTES: i64 = 100;

pub const UNKNOWN_CLASS: &str = "Unknown Class";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Present,
    Absent,
}

impl Mark {
    /// Stored mark codes are single letters. Anything else is "unmarked"
    /// and contributes to no count.
    pub fn from_code(code: &str) -> Option<Mark> {
        match code {
            "P" => Some(Mark::Present),
            "A" => Some(Mark::Absent),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Mark::Present => "P",
            Mark::Absent => "A",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Single,
    Double,
}

impl Period {
    pub fn from_code(code: &str) -> Option<Period> {
        match code {
            "single" => Some(Period::Single),
            "double" => Some(Period::Double),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Period::Single => "single",
            Period::Double => "double",
        }
    }

    pub fn minutes(self) -> i64 {
        match self {
            Period::Single => SINGLE_PERIOD_MINUTES,
            Period::Double => DOUBLE_PERIOD_MINUTES,
        }
    }
}

impl Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Students,
    Teachers,
}

impl EntityKind {
    pub fn from_code(code: &str) -> Option<EntityKind> {
        match code {
            "students" => Some(EntityKind::Students),
            "teachers" => Some(EntityKind::Teachers),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            EntityKind::Students => "students",
            EntityKind::Teachers => "teachers",
        }
    }
}

/// Session metadata recorded alongside student marks. Never counted as a
/// person entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub teacher_name: String,
    pub period: Period,
    pub recorded_at: String,
}

/// One node of the attendance tree. The Mark/Meta distinction is decided
/// when the tree is loaded from storage, so traversal never has to inspect
/// value shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum BucketNode {
    Mark(Mark),
    Meta(SessionMeta),
    Branch(BTreeMap<String, BucketNode>),
}

impl BucketNode {
    pub fn empty() -> BucketNode {
        BucketNode::Branch(BTreeMap::new())
    }

    pub fn children(&self) -> Option<&BTreeMap<String, BucketNode>> {
        match self {
            BucketNode::Branch(m) => Some(m),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&BucketNode> {
        self.children().and_then(|m| m.get(key))
    }

    /// Inserts a node at the given path, creating intermediate branches.
    /// Replaces whatever was stored there before.
    pub fn insert(&mut self, path: &[&str], node: BucketNode) {
        let BucketNode::Branch(map) = self else {
            *self = BucketNode::empty();
            return self.insert(path, node);
        };
        match path {
            [] => {}
            [leaf] => {
                map.insert((*leaf).to_string(), node);
            }
            [head, rest @ ..] => {
                map.entry((*head).to_string())
                    .or_insert_with(BucketNode::empty)
                    .insert(rest, node);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    Missing(&'static str),
    Invalid(&'static str),
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::Missing(field) => write!(f, "missing {}", field),
            KeyError::Invalid(field) => write!(f, "invalid {}", field),
        }
    }
}

/// Canonical identity of one attendance-taking event. Construction fails
/// when any dimension is blank or malformed, so a validated key is the only
/// way to reach a storage path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKey {
    pub kind: EntityKind,
    pub date: String,
    pub class_id: String,
    pub subject_id: String,
    pub time: String,
}

impl SessionKey {
    pub fn new(
        kind: EntityKind,
        date: &str,
        class_id: &str,
        subject_id: &str,
        time: &str,
    ) -> Result<SessionKey, KeyError> {
        let date = date.trim();
        let class_id = class_id.trim();
        let subject_id = subject_id.trim();
        let time = time.trim();
        if date.is_empty() {
            return Err(KeyError::Missing("date"));
        }
        if class_id.is_empty() {
            return Err(KeyError::Missing("classId"));
        }
        if subject_id.is_empty() {
            return Err(KeyError::Missing("subjectId"));
        }
        if time.is_empty() {
            return Err(KeyError::Missing("time"));
        }
        if chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
            return Err(KeyError::Invalid("date"));
        }
        if chrono::NaiveTime::parse_from_str(time, "%H:%M").is_err() {
            return Err(KeyError::Invalid("time"));
        }
        Ok(SessionKey {
            kind,
            date: date.to_string(),
            class_id: class_id.to_string(),
            subject_id: subject_id.to_string(),
            time: time.to_string(),
        })
    }

    pub fn segments(&self) -> [&str; 5] {
        [
            self.kind.code(),
            &self.date,
            &self.class_id,
            &self.subject_id,
            &self.time,
        ]
    }

    pub fn path(&self) -> String {
        format!("attendance/{}", self.segments().join("/"))
    }

    pub fn person_path(&self, person_id: &str) -> String {
        format!("{}/{}", self.path(), person_id)
    }
}

/// Roster snapshot used to resolve ids to display names at flatten time.
/// Missing entries fall back to the raw id so stale references stay visible.
#[derive(Debug, Clone, Default)]
pub struct RosterIndex {
    pub class_names: HashMap<String, String>,
    pub subject_names: HashMap<String, String>,
    pub person_names: HashMap<String, String>,
}

impl RosterIndex {
    pub fn class_name(&self, class_id: &str) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| class_id.to_string())
    }

    pub fn subject_name(&self, subject_id: &str) -> String {
        self.subject_names
            .get(subject_id)
            .cloned()
            .unwrap_or_else(|| subject_id.to_string())
    }

    pub fn person_name(&self, person_id: &str) -> String {
        self.person_names
            .get(person_id)
            .cloned()
            .unwrap_or_else(|| person_id.to_string())
    }
}

/// Whole-percent attendance rate. Zero denominator reads as 0, not an error.
pub fn attendance_rate(present_count: usize, total_count: usize) -> i64 {
    if total_count == 0 {
        return 0;
    }
    ((present_count as f64) / (total_count as f64) * 100.0).round() as i64
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkTally {
    pub present_count: usize,
    pub absent_count: usize,
    pub present_minutes: i64,
    pub absent_minutes: i64,
}

/// Duration totals for a sequence of optional marks under one period
/// weight. Unmarked entries contribute to neither count.
pub fn tally_marks<I>(marks: I, period: Period) -> MarkTally
where
    I: IntoIterator<Item = Option<Mark>>,
{
    let mut present_count = 0usize;
    let mut absent_count = 0usize;
    for mark in marks {
        match mark {
            Some(Mark::Present) => present_count += 1,
            Some(Mark::Absent) => absent_count += 1,
            None => {}
        }
    }
    MarkTally {
        present_count,
        absent_count,
        present_minutes: present_count as i64 * period.minutes(),
        absent_minutes: absent_count as i64 * period.minutes(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupTotals {
    pub present_count: usize,
    pub absent_count: usize,
    pub present_minutes: i64,
    pub absent_minutes: i64,
    pub total_sessions: usize,
}

/// Sums present/absent marks across an arbitrary subtree, skipping metadata
/// at any depth. Always weighted at the single period length regardless of
/// each session's stored period; the per-session detail view honors the
/// stored period and intentionally disagrees with this (see DESIGN.md).
pub fn rollup_bucket(node: &BucketNode) -> RollupTotals {
    let mut totals = RollupTotals::default();
    rollup_into(node, &mut totals);
    totals.present_minutes = totals.present_count as i64 * SINGLE_PERIOD_MINUTES;
    totals.absent_minutes = totals.absent_count as i64 * SINGLE_PERIOD_MINUTES;
    totals.total_sessions = totals.present_count + totals.absent_count;
    totals
}

fn rollup_into(node: &BucketNode, totals: &mut RollupTotals) {
    match node {
        BucketNode::Mark(Mark::Present) => totals.present_count += 1,
        BucketNode::Mark(Mark::Absent) => totals.absent_count += 1,
        BucketNode::Meta(_) => {}
        BucketNode::Branch(children) => {
            for child in children.values() {
                rollup_into(child, totals);
            }
        }
    }
}

/// One row of the attendance records list: a single (entityType, date,
/// class, subject, time) leaf bucket summarized for tabular display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummary {
    pub entity_type: String,
    pub date: String,
    pub class_id: String,
    pub class_name: String,
    pub subject_id: String,
    pub subject_name: String,
    pub time: String,
    pub present_count: usize,
    pub total_count: usize,
    pub attendance_rate: i64,
}

/// Flattens the full attendance tree (entityType → date → class → subject →
/// time → person) into one summary per leaf bucket. Name resolution happens
/// here, against the roster snapshot passed in, so renames propagate on the
/// next recomputation.
///
/// Ordering: date descending, then class name, then time. The tiebreak is a
/// deliberate determinism addition; iteration order used to be unspecified.
pub fn flatten_records(tree: &BucketNode, roster: &RosterIndex) -> Vec<RecordSummary> {
    let mut out = Vec::new();
    let Some(kinds) = tree.children() else {
        return out;
    };
    for (kind, dates) in kinds {
        let Some(dates) = dates.children() else {
            continue;
        };
        for (date, classes) in dates {
            let Some(classes) = classes.children() else {
                continue;
            };
            for (class_id, subjects) in classes {
                let Some(subjects) = subjects.children() else {
                    continue;
                };
                for (subject_id, times) in subjects {
                    let Some(times) = times.children() else {
                        continue;
                    };
                    for (time, bucket) in times {
                        out.push(summarize_bucket(
                            kind, date, class_id, subject_id, time, bucket, roster,
                        ));
                    }
                }
            }
        }
    }
    out.sort_by(|a, b| {
        b.date
            .cmp(&a.date)
            .then_with(|| a.class_name.cmp(&b.class_name))
            .then_with(|| a.time.cmp(&b.time))
    });
    out
}

fn summarize_bucket(
    kind: &str,
    date: &str,
    class_id: &str,
    subject_id: &str,
    time: &str,
    bucket: &BucketNode,
    roster: &RosterIndex,
) -> RecordSummary {
    let mut present_count = 0usize;
    let mut total_count = 0usize;
    if let Some(entries) = bucket.children() {
        for node in entries.values() {
            match node {
                BucketNode::Mark(mark) => {
                    total_count += 1;
                    if *mark == Mark::Present {
                        present_count += 1;
                    }
                }
                // Metadata rides alongside person marks but is not a person.
                BucketNode::Meta(_) => {}
                BucketNode::Branch(_) => {}
            }
        }
    }
    RecordSummary {
        entity_type: kind.to_string(),
        date: date.to_string(),
        class_id: class_id.to_string(),
        class_name: roster.class_name(class_id),
        subject_id: subject_id.to_string(),
        subject_name: roster.subject_name(subject_id),
        time: time.to_string(),
        present_count,
        total_count,
        attendance_rate: attendance_rate(present_count, total_count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> SessionMeta {
        SessionMeta {
            teacher_name: "A".to_string(),
            period: Period::Single,
            recorded_at: "2026-03-02T08:00:00Z".to_string(),
        }
    }

    #[test]
    fn session_key_requires_every_dimension() {
        let err = SessionKey::new(EntityKind::Students, "", "c1", "s1", "08:00");
        assert_eq!(err, Err(KeyError::Missing("date")));
        let err = SessionKey::new(EntityKind::Students, "2026-03-02", "  ", "s1", "08:00");
        assert_eq!(err, Err(KeyError::Missing("classId")));
        let err = SessionKey::new(EntityKind::Students, "2026-03-02", "c1", "", "08:00");
        assert_eq!(err, Err(KeyError::Missing("subjectId")));
        let err = SessionKey::new(EntityKind::Students, "2026-03-02", "c1", "s1", " ");
        assert_eq!(err, Err(KeyError::Missing("time")));
    }

    #[test]
    fn session_key_rejects_malformed_date_and_time() {
        let err = SessionKey::new(EntityKind::Students, "03/02/2026", "c1", "s1", "08:00");
        assert_eq!(err, Err(KeyError::Invalid("date")));
        let err = SessionKey::new(EntityKind::Students, "2026-03-02", "c1", "s1", "8am");
        assert_eq!(err, Err(KeyError::Invalid("time")));
    }

    #[test]
    fn session_key_path_orders_segments() {
        let key =
            SessionKey::new(EntityKind::Teachers, "2026-03-02", "c1", "sub1", "10:30").unwrap();
        assert_eq!(key.path(), "attendance/teachers/2026-03-02/c1/sub1/10:30");
        assert_eq!(
            key.person_path("t9"),
            "attendance/teachers/2026-03-02/c1/sub1/10:30/t9"
        );
    }

    #[test]
    fn tally_minutes_are_consistent_with_counts() {
        let marks = vec![
            Some(Mark::Present),
            Some(Mark::Absent),
            None,
            Some(Mark::Present),
        ];
        for period in [Period::Single, Period::Double] {
            let t = tally_marks(marks.clone(), period);
            assert_eq!(t.present_count, 2);
            assert_eq!(t.absent_count, 1);
            assert_eq!(
                t.present_minutes + t.absent_minutes,
                (t.present_count + t.absent_count) as i64 * period.minutes()
            );
            assert!(t.present_count + t.absent_count <= marks.len());
        }
    }

    #[test]
    fn rate_rounds_to_whole_percent_and_zero_is_safe() {
        assert_eq!(attendance_rate(3, 4), 75);
        assert_eq!(attendance_rate(0, 0), 0);
        assert_eq!(attendance_rate(1, 3), 33);
        assert_eq!(attendance_rate(2, 3), 67);
    }

    #[test]
    fn unmarked_codes_count_for_nobody() {
        assert_eq!(Mark::from_code("P"), Some(Mark::Present));
        assert_eq!(Mark::from_code("A"), Some(Mark::Absent));
        assert_eq!(Mark::from_code("L"), None);
        assert_eq!(Mark::from_code(""), None);
    }

    fn sample_session() -> BucketNode {
        let mut bucket = BucketNode::empty();
        bucket.insert(&["s1"], BucketNode::Mark(Mark::Present));
        bucket.insert(&["s2"], BucketNode::Mark(Mark::Absent));
        bucket.insert(&["s3"], BucketNode::Mark(Mark::Present));
        bucket
    }

    #[test]
    fn per_session_double_weight_disagrees_with_rollup_by_design() {
        // {s1:P, s2:A, s3:P} recorded as a double period.
        let per_session = tally_marks(
            [Some(Mark::Present), Some(Mark::Absent), Some(Mark::Present)],
            Period::Double,
        );
        assert_eq!(per_session.present_minutes, 200);
        assert_eq!(per_session.absent_minutes, 100);

        // The roll-up over the same bucket uses the single weight.
        let rollup = rollup_bucket(&sample_session());
        assert_eq!(rollup.present_minutes, 100);
        assert_eq!(rollup.absent_minutes, 50);
        assert_eq!(rollup.total_sessions, 3);
        assert_ne!(rollup.present_minutes, per_session.present_minutes);
    }

    #[test]
    fn rollup_skips_metadata_at_any_depth() {
        let mut tree = BucketNode::empty();
        tree.insert(
            &["d1", "c1", "sub", "08:00", "s1"],
            BucketNode::Mark(Mark::Present),
        );
        tree.insert(
            &["d1", "c1", "sub", "08:00", "_metadata"],
            BucketNode::Meta(meta()),
        );
        tree.insert(
            &["d1", "c1", "sub", "10:00", "s1"],
            BucketNode::Mark(Mark::Absent),
        );
        tree.insert(&["d1", "_metadata"], BucketNode::Meta(meta()));
        let totals = rollup_bucket(&tree);
        assert_eq!(totals.present_count, 1);
        assert_eq!(totals.absent_count, 1);
        assert_eq!(totals.total_sessions, 2);
    }

    #[test]
    fn rollup_is_order_independent() {
        let mut forward = BucketNode::empty();
        let mut reverse = BucketNode::empty();
        let people = ["s1", "s2", "s3", "s4", "s5"];
        for (i, id) in people.iter().enumerate() {
            let mark = if i % 2 == 0 { Mark::Present } else { Mark::Absent };
            forward.insert(&["d", "c", "sub", "08:00", id], BucketNode::Mark(mark));
        }
        for (i, id) in people.iter().enumerate().rev() {
            let mark = if i % 2 == 0 { Mark::Present } else { Mark::Absent };
            reverse.insert(&["d", "c", "sub", "08:00", id], BucketNode::Mark(mark));
        }
        assert_eq!(rollup_bucket(&forward), rollup_bucket(&reverse));
        // Same input, same totals on repeat runs.
        assert_eq!(rollup_bucket(&forward), rollup_bucket(&forward));
    }

    #[test]
    fn metadata_excluded_from_record_totals() {
        let mut tree = BucketNode::empty();
        tree.insert(
            &["students", "2026-03-02", "c1", "sub1", "08:00", "s1"],
            BucketNode::Mark(Mark::Present),
        );
        tree.insert(
            &["students", "2026-03-02", "c1", "sub1", "08:00", "_metadata"],
            BucketNode::Meta(meta()),
        );
        let records = flatten_records(&tree, &RosterIndex::default());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].total_count, 1);
        assert_eq!(records[0].present_count, 1);
        assert_eq!(records[0].attendance_rate, 100);
    }

    #[test]
    fn records_resolve_names_with_raw_id_fallback() {
        let mut roster = RosterIndex::default();
        roster
            .class_names
            .insert("c1".to_string(), "Form One".to_string());
        let mut tree = BucketNode::empty();
        tree.insert(
            &["students", "2026-03-02", "c1", "sub-gone", "08:00", "s1"],
            BucketNode::Mark(Mark::Absent),
        );
        let records = flatten_records(&tree, &roster);
        assert_eq!(records[0].class_name, "Form One");
        assert_eq!(records[0].subject_name, "sub-gone");
    }

    #[test]
    fn records_sort_by_date_desc_then_class_then_time() {
        let mut roster = RosterIndex::default();
        roster.class_names.insert("c1".into(), "Form One".into());
        roster.class_names.insert("c2".into(), "Form Two".into());
        let mut tree = BucketNode::empty();
        for (date, class, time) in [
            ("2026-03-01", "c2", "08:00"),
            ("2026-03-02", "c1", "10:00"),
            ("2026-03-02", "c1", "08:00"),
            ("2026-03-02", "c2", "08:00"),
        ] {
            tree.insert(
                &["students", date, class, "sub1", time, "s1"],
                BucketNode::Mark(Mark::Present),
            );
        }
        let records = flatten_records(&tree, &roster);
        let order: Vec<(&str, &str, &str)> = records
            .iter()
            .map(|r| (r.date.as_str(), r.class_name.as_str(), r.time.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("2026-03-02", "Form One", "08:00"),
                ("2026-03-02", "Form One", "10:00"),
                ("2026-03-02", "Form Two", "08:00"),
                ("2026-03-01", "Form Two", "08:00"),
            ]
        );
    }
}
