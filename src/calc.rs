use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;

/// Class-wide pass mark; at or above counts as passing, below needs
/// remediation.
pub const PASS_MARK: f64 = 75.0;

/// Half-up integer rounding used for every derived score: `Int(x + 0.5)`.
pub fn round_half_up(x: f64) -> f64 {
    (x + 0.5).floor()
}

/// Input coercion for score writes: non-finite input counts as 0, everything
/// else is rounded and clamped into [0, 100]. Out-of-range input is never
/// rejected.
pub fn clamp_score(v: f64) -> f64 {
    if !v.is_finite() {
        return 0.0;
    }
    round_half_up(v).clamp(0.0, 100.0)
}

/// The closed set of score categories. Formative and summative values are
/// scoped to one chapter; sts/sas span the whole subject/semester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScoreCategory {
    Formative(u8),
    Summative,
    Sts,
    Sas,
}

impl ScoreCategory {
    /// Fixed entry order: formative 1..5, summative, sts, sas.
    pub fn all() -> [ScoreCategory; 8] {
        [
            ScoreCategory::Formative(1),
            ScoreCategory::Formative(2),
            ScoreCategory::Formative(3),
            ScoreCategory::Formative(4),
            ScoreCategory::Formative(5),
            ScoreCategory::Summative,
            ScoreCategory::Sts,
            ScoreCategory::Sas,
        ]
    }

    pub fn parse(s: &str) -> Option<ScoreCategory> {
        match s {
            "summative" => Some(ScoreCategory::Summative),
            "sts" => Some(ScoreCategory::Sts),
            "sas" => Some(ScoreCategory::Sas),
            _ => {
                let n: u8 = s.strip_prefix("formative_")?.parse().ok()?;
                if (1..=5).contains(&n) {
                    Some(ScoreCategory::Formative(n))
                } else {
                    None
                }
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreCategory::Formative(1) => "formative_1",
            ScoreCategory::Formative(2) => "formative_2",
            ScoreCategory::Formative(3) => "formative_3",
            ScoreCategory::Formative(4) => "formative_4",
            ScoreCategory::Formative(5) => "formative_5",
            ScoreCategory::Formative(_) => "formative_?",
            ScoreCategory::Summative => "summative",
            ScoreCategory::Sts => "sts",
            ScoreCategory::Sas => "sas",
        }
    }

    /// Whether the category lives inside one chapter rather than on the
    /// record itself.
    pub fn is_chapter_scoped(&self) -> bool {
        !matches!(self, ScoreCategory::Sts | ScoreCategory::Sas)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterScore {
    pub formatives: [f64; 5],
    pub summative: f64,
    pub description: Option<String>,
}

impl Default for ChapterScore {
    fn default() -> Self {
        Self {
            formatives: [0.0; 5],
            summative: 0.0,
            description: None,
        }
    }
}

/// One student's durable grade record for a subject/semester, with its
/// per-chapter scores keyed by chapter id.
#[derive(Debug, Clone)]
pub struct LedgerRecord {
    pub record_id: String,
    pub student_id: String,
    pub sts: f64,
    pub sas: f64,
    pub updated_at: Option<String>,
    pub chapters: HashMap<String, ChapterScore>,
}

/// Snapshot of every grade record in one class/subject/semester. All
/// aggregation reads go through one of these so "active" detection sees a
/// consistent view.
#[derive(Debug, Clone, Default)]
pub struct ClassLedger {
    pub records: Vec<LedgerRecord>,
}

impl ClassLedger {
    pub fn for_student(&self, student_id: &str) -> Option<&LedgerRecord> {
        self.records.iter().find(|r| r.student_id == student_id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CalcContext<'a> {
    pub conn: &'a Connection,
    pub class_name: &'a str,
    pub subject: &'a str,
    pub semester: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterRef {
    pub chapter_id: String,
    pub title: String,
}

pub fn load_catalog_chapters(ctx: &CalcContext<'_>) -> Result<Vec<ChapterRef>, CalcError> {
    let mut stmt = ctx
        .conn
        .prepare(
            "SELECT id, title FROM chapters
             WHERE subject = ? AND semester = ? AND class_name = ?
             ORDER BY title",
        )
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    stmt.query_map((ctx.subject, ctx.semester, ctx.class_name), |r| {
        Ok(ChapterRef {
            chapter_id: r.get(0)?,
            title: r.get(1)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| CalcError::new("db_query_failed", e.to_string()))
}

pub fn load_class_ledger(ctx: &CalcContext<'_>) -> Result<ClassLedger, CalcError> {
    let mut record_stmt = ctx
        .conn
        .prepare(
            "SELECT id, student_id, sts, sas, updated_at FROM grade_records
             WHERE class_name = ? AND subject = ? AND semester = ?",
        )
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    let mut records: Vec<LedgerRecord> = record_stmt
        .query_map((ctx.class_name, ctx.subject, ctx.semester), |r| {
            Ok(LedgerRecord {
                record_id: r.get(0)?,
                student_id: r.get(1)?,
                sts: r.get(2)?,
                sas: r.get(3)?,
                updated_at: r.get(4)?,
                chapters: HashMap::new(),
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;

    let index: HashMap<String, usize> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.record_id.clone(), i))
        .collect();

    let mut score_stmt = ctx
        .conn
        .prepare(
            "SELECT cs.record_id, cs.chapter_id,
                    cs.f1, cs.f2, cs.f3, cs.f4, cs.f5,
                    cs.summative, cs.description
             FROM chapter_scores cs
             JOIN grade_records g ON g.id = cs.record_id
             WHERE g.class_name = ? AND g.subject = ? AND g.semester = ?",
        )
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    let rows = score_stmt
        .query_map((ctx.class_name, ctx.subject, ctx.semester), |r| {
            let record_id: String = r.get(0)?;
            let chapter_id: String = r.get(1)?;
            let score = ChapterScore {
                formatives: [r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?, r.get(6)?],
                summative: r.get(7)?,
                description: r.get(8)?,
            };
            Ok((record_id, chapter_id, score))
        })
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    for row in rows {
        let (record_id, chapter_id, score) =
            row.map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
        if let Some(&i) = index.get(&record_id) {
            records[i].chapters.insert(chapter_id, score);
        }
    }

    Ok(ClassLedger { records })
}

/// Which score slots carry at least one non-zero value anywhere in the
/// class. A class-wide property, not a per-student one.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveColumns {
    pub formatives: [bool; 5],
    pub summative: bool,
}

impl ActiveColumns {
    pub fn active_formative_indices(&self) -> Vec<usize> {
        (0..5).filter(|&i| self.formatives[i]).collect()
    }

    /// How many category groups (formative block, summative) are in play.
    pub fn category_count(&self) -> usize {
        let formative = if self.formatives.iter().any(|&f| f) {
            1
        } else {
            0
        };
        formative + usize::from(self.summative)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActivityMap {
    pub by_chapter: HashMap<String, ActiveColumns>,
    pub sts_active: bool,
    pub sas_active: bool,
}

/// Recomputed from the ledger snapshot on every query; never cached. Only
/// chapters still present in the catalog participate, so score rows orphaned
/// by a chapter deletion are inert.
pub fn detect_activity(ledger: &ClassLedger, chapters: &[ChapterRef]) -> ActivityMap {
    let mut map = ActivityMap::default();
    for chapter in chapters {
        let mut cols = ActiveColumns::default();
        for record in &ledger.records {
            if let Some(score) = record.chapters.get(&chapter.chapter_id) {
                for (i, &v) in score.formatives.iter().enumerate() {
                    if v > 0.0 {
                        cols.formatives[i] = true;
                    }
                }
                if score.summative > 0.0 {
                    cols.summative = true;
                }
            }
        }
        map.by_chapter.insert(chapter.chapter_id.clone(), cols);
    }
    for record in &ledger.records {
        if record.sts > 0.0 {
            map.sts_active = true;
        }
        if record.sas > 0.0 {
            map.sas_active = true;
        }
    }
    map
}

/// Per-student chapter average over the class-wide active columns. Zeroes on
/// active slots count toward the mean; a chapter with no active category
/// contributes nothing and averages 0.
pub fn chapter_average(score: &ChapterScore, cols: &ActiveColumns) -> f64 {
    let active = cols.active_formative_indices();
    let mut groups = 0usize;
    let mut formative_avg = 0.0;
    if !active.is_empty() {
        groups += 1;
        let sum: f64 = active.iter().map(|&i| score.formatives[i]).sum();
        formative_avg = sum / active.len() as f64;
    }
    if cols.summative {
        groups += 1;
    }
    if groups == 0 {
        return 0.0;
    }
    round_half_up((formative_avg + score.summative) / groups as f64)
}

/// Term report grade. The divisor counts the category groups populated
/// anywhere in the class: chapters, sts, sas. This is the single canonical
/// rule; every surface divides the same way.
pub fn report_grade(
    active_chapter_avgs: &[f64],
    sts: f64,
    sas: f64,
    sts_active: bool,
    sas_active: bool,
) -> f64 {
    let mut divisor = 0usize;
    let avg_chapters = if active_chapter_avgs.is_empty() {
        0.0
    } else {
        divisor += 1;
        active_chapter_avgs.iter().sum::<f64>() / active_chapter_avgs.len() as f64
    };
    if sts_active {
        divisor += 1;
    }
    if sas_active {
        divisor += 1;
    }
    if divisor == 0 {
        return 0.0;
    }
    round_half_up((avg_chapters + sts + sas) / divisor as f64)
}

/// First-write gate: a category drops out of the list as soon as any student
/// in the class has a non-zero value in it. Chapter-scoped categories are
/// checked within the given chapter; without a chapter id they stay open.
pub fn available_categories(ledger: &ClassLedger, chapter_id: Option<&str>) -> Vec<ScoreCategory> {
    ScoreCategory::all()
        .into_iter()
        .filter(|cat| !category_taken(ledger, *cat, chapter_id))
        .collect()
}

fn category_taken(ledger: &ClassLedger, cat: ScoreCategory, chapter_id: Option<&str>) -> bool {
    ledger.records.iter().any(|r| match cat {
        ScoreCategory::Sts => r.sts > 0.0,
        ScoreCategory::Sas => r.sas > 0.0,
        ScoreCategory::Summative => chapter_id
            .and_then(|cid| r.chapters.get(cid))
            .map(|c| c.summative > 0.0)
            .unwrap_or(false),
        ScoreCategory::Formative(n) => chapter_id
            .and_then(|cid| r.chapters.get(cid))
            .map(|c| c.formatives[usize::from(n) - 1] > 0.0)
            .unwrap_or(false),
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterCells {
    pub chapter_id: String,
    pub formatives: [f64; 5],
    pub summative: f64,
    pub average: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentMatrixRow {
    pub student_id: String,
    pub name: String,
    pub chapters: Vec<ChapterCells>,
    pub sts: f64,
    pub sas: f64,
    pub report_grade: f64,
    pub passing: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassMatrix {
    pub chapters: Vec<ChapterRef>,
    pub active_columns: HashMap<String, ActiveColumns>,
    pub sts_active: bool,
    pub sas_active: bool,
    pub students: Vec<StudentMatrixRow>,
}

/// The full monitoring view for one class/subject/semester: every student's
/// chapter cells, chapter averages and report grade over one consistent
/// ledger snapshot.
pub fn compute_class_matrix(ctx: &CalcContext<'_>) -> Result<ClassMatrix, CalcError> {
    let chapters = load_catalog_chapters(ctx)?;
    let ledger = load_class_ledger(ctx)?;
    let activity = detect_activity(&ledger, &chapters);

    let mut student_stmt = ctx
        .conn
        .prepare("SELECT id, name FROM students WHERE class_name = ? ORDER BY name")
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    let students: Vec<(String, String)> = student_stmt
        .query_map([ctx.class_name], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;

    let default_score = ChapterScore::default();
    let mut rows: Vec<StudentMatrixRow> = Vec::with_capacity(students.len());
    for (student_id, name) in students {
        let record = ledger.for_student(&student_id);
        let (sts, sas) = record.map(|r| (r.sts, r.sas)).unwrap_or((0.0, 0.0));

        let mut cells: Vec<ChapterCells> = Vec::with_capacity(chapters.len());
        let mut active_avgs: Vec<f64> = Vec::new();
        for chapter in &chapters {
            let cols = activity
                .by_chapter
                .get(&chapter.chapter_id)
                .copied()
                .unwrap_or_default();
            let score = record
                .and_then(|r| r.chapters.get(&chapter.chapter_id))
                .unwrap_or(&default_score);
            let average = chapter_average(score, &cols);
            if cols.category_count() > 0 {
                active_avgs.push(average);
            }
            cells.push(ChapterCells {
                chapter_id: chapter.chapter_id.clone(),
                formatives: score.formatives,
                summative: score.summative,
                average,
            });
        }

        let grade = report_grade(&active_avgs, sts, sas, activity.sts_active, activity.sas_active);
        rows.push(StudentMatrixRow {
            student_id,
            name,
            chapters: cells,
            sts,
            sas,
            report_grade: grade,
            passing: grade >= PASS_MARK,
        });
    }

    Ok(ClassMatrix {
        chapters,
        active_columns: activity.by_chapter,
        sts_active: activity.sts_active,
        sas_active: activity.sas_active,
        students: rows,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSummary {
    pub subject: String,
    pub class_name: String,
    pub chapter_mean: f64,
    pub sts: f64,
    pub sas: f64,
    pub report_grade: f64,
    pub passing: bool,
}

/// Per-subject term recap for one student. Runs through the same class-wide
/// detection and divisor as the monitoring view.
pub fn compute_student_summary(
    conn: &Connection,
    student_id: &str,
    semester: &str,
) -> Result<Vec<SubjectSummary>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT subject, class_name FROM grade_records
             WHERE student_id = ? AND semester = ?
             ORDER BY subject",
        )
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    let scopes: Vec<(String, String)> = stmt
        .query_map((student_id, semester), |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;

    let mut out: Vec<SubjectSummary> = Vec::with_capacity(scopes.len());
    for (subject, class_name) in scopes {
        let ctx = CalcContext {
            conn,
            class_name: &class_name,
            subject: &subject,
            semester,
        };
        let chapters = load_catalog_chapters(&ctx)?;
        let ledger = load_class_ledger(&ctx)?;
        let activity = detect_activity(&ledger, &chapters);
        let Some(record) = ledger.for_student(student_id) else {
            continue;
        };

        let default_score = ChapterScore::default();
        let mut active_avgs: Vec<f64> = Vec::new();
        for chapter in &chapters {
            let cols = activity
                .by_chapter
                .get(&chapter.chapter_id)
                .copied()
                .unwrap_or_default();
            if cols.category_count() == 0 {
                continue;
            }
            let score = record
                .chapters
                .get(&chapter.chapter_id)
                .unwrap_or(&default_score);
            active_avgs.push(chapter_average(score, &cols));
        }

        let chapter_mean = if active_avgs.is_empty() {
            0.0
        } else {
            round_half_up(active_avgs.iter().sum::<f64>() / active_avgs.len() as f64)
        };
        let grade = report_grade(
            &active_avgs,
            record.sts,
            record.sas,
            activity.sts_active,
            activity.sas_active,
        );
        out.push(SubjectSummary {
            subject,
            class_name,
            chapter_mean,
            sts: record.sts,
            sas: record.sas,
            report_grade: grade,
            passing: grade >= PASS_MARK,
        });
    }
    Ok(out)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskItem {
    pub id: String,
    pub subject: String,
    pub semester: String,
    pub chapter: String,
    pub description: String,
}

/// Unresolved work items for one student: chapter entries that carry a task
/// description while the chapter average sits below the pass mark. Derived
/// fresh on every request, never persisted.
pub fn incomplete_tasks(conn: &Connection, student_id: &str) -> Result<Vec<TaskItem>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, subject, semester, class_name FROM grade_records
             WHERE student_id = ?
             ORDER BY subject, semester",
        )
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    let scopes: Vec<(String, String, String, String)> = stmt
        .query_map([student_id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;

    let mut tasks: Vec<TaskItem> = Vec::new();
    for (record_id, subject, semester, class_name) in scopes {
        let ctx = CalcContext {
            conn,
            class_name: &class_name,
            subject: &subject,
            semester: &semester,
        };
        let chapters = load_catalog_chapters(&ctx)?;
        let ledger = load_class_ledger(&ctx)?;
        let activity = detect_activity(&ledger, &chapters);
        let titles: HashMap<&str, &str> = chapters
            .iter()
            .map(|c| (c.chapter_id.as_str(), c.title.as_str()))
            .collect();
        let Some(record) = ledger.for_student(student_id) else {
            continue;
        };

        for (chapter_id, score) in &record.chapters {
            // Entries whose chapter was deleted stay in the ledger but never
            // surface as tasks.
            let Some(&title) = titles.get(chapter_id.as_str()) else {
                continue;
            };
            let Some(description) = score
                .description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
            else {
                continue;
            };
            let cols = activity
                .by_chapter
                .get(chapter_id)
                .copied()
                .unwrap_or_default();
            if chapter_average(score, &cols) < PASS_MARK {
                tasks.push(TaskItem {
                    id: format!("{}_{}", record_id, chapter_id),
                    subject: subject.clone(),
                    semester: semester.clone(),
                    chapter: title.to_string(),
                    description: description.to_string(),
                });
            }
        }
    }
    Ok(tasks)
}
