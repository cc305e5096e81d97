use crate::calc::{self, CalcContext, ScoreCategory};
use crate::ipc::error::{err, ok, storage_err};
use crate::ipc::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

struct EntryScope {
    class_name: String,
    subject: String,
    semester: String,
}

fn entry_scope(req: &Request) -> Result<EntryScope, serde_json::Value> {
    let class_name = req
        .params
        .get("className")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or("");
    let subject = req
        .params
        .get("subject")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or("");
    let semester = req
        .params
        .get("semester")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or("");
    if class_name.is_empty() || subject.is_empty() || semester.is_empty() {
        return Err(err(
            &req.id,
            "bad_params",
            "missing className/subject/semester",
            None,
        ));
    }
    Ok(EntryScope {
        class_name: class_name.to_string(),
        subject: subject.to_string(),
        semester: semester.to_string(),
    })
}

fn parse_category(req: &Request) -> Result<ScoreCategory, serde_json::Value> {
    let raw = req
        .params
        .get("category")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    ScoreCategory::parse(raw).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            "unknown score category",
            Some(json!({ "category": raw })),
        )
    })
}

/// The formative/summative column a category writes through.
fn category_column(cat: ScoreCategory) -> Option<&'static str> {
    match cat {
        ScoreCategory::Formative(1) => Some("f1"),
        ScoreCategory::Formative(2) => Some("f2"),
        ScoreCategory::Formative(3) => Some("f3"),
        ScoreCategory::Formative(4) => Some("f4"),
        ScoreCategory::Formative(5) => Some("f5"),
        ScoreCategory::Summative => Some("summative"),
        _ => None,
    }
}

fn category_sort_key(cat: ScoreCategory) -> usize {
    ScoreCategory::all()
        .iter()
        .position(|c| *c == cat)
        .unwrap_or(usize::MAX)
}

fn chapter_in_scope(
    conn: &Connection,
    scope: &EntryScope,
    chapter_id: &str,
) -> Result<bool, rusqlite::Error> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM chapters
             WHERE id = ? AND subject = ? AND semester = ? AND class_name = ?",
            (chapter_id, &scope.subject, &scope.semester, &scope.class_name),
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn handle_available_categories(state: &mut AppState, req: &Request) -> serde_json::Value {
    let scope = match entry_scope(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let ctx = CalcContext {
        conn,
        class_name: &scope.class_name,
        subject: &scope.subject,
        semester: &scope.semester,
    };
    let ledger = match calc::load_class_ledger(&ctx) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };
    let chapter_id = req.params.get("chapterId").and_then(|v| v.as_str());
    let open: Vec<&str> = calc::available_categories(&ledger, chapter_id)
        .iter()
        .map(|c| c.as_str())
        .collect();
    ok(&req.id, json!({ "categories": open }))
}

fn handle_commit_entry(state: &mut AppState, req: &Request) -> serde_json::Value {
    let scope = match entry_scope(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let category = match parse_category(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let chapter_id = req
        .params
        .get("chapterId")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    if category.is_chapter_scoped() && chapter_id.is_none() {
        return err(
            &req.id,
            "bad_params",
            "formative/summative entries require chapterId",
            None,
        );
    }
    let date = req
        .params
        .get("date")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string());
    let description = req
        .params
        .get("description")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    // The draft buffer: studentId -> clamped value. Anything non-numeric
    // counts as 0; out-of-range input is coerced, never rejected.
    let mut drafts: HashMap<String, f64> = HashMap::new();
    if let Some(entries) = req.params.get("entries").and_then(|v| v.as_array()) {
        for entry in entries {
            let Some(student_id) = entry.get("studentId").and_then(|v| v.as_str()) else {
                return err(&req.id, "bad_params", "entry missing studentId", None);
            };
            let value = entry.get("value").and_then(|v| v.as_f64()).unwrap_or(0.0);
            drafts.insert(student_id.to_string(), calc::clamp_score(value));
        }
    }

    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    if let Some(cid) = &chapter_id {
        match chapter_in_scope(conn, &scope, cid) {
            Ok(true) => {}
            Ok(false) => {
                return err(
                    &req.id,
                    "not_found",
                    "chapter not found for this class/subject/semester",
                    Some(json!({ "chapterId": cid })),
                )
            }
            Err(e) => return storage_err(&req.id, e),
        }
    }

    let student_ids: Vec<String> = {
        let mut stmt = match conn
            .prepare("SELECT id FROM students WHERE class_name = ? ORDER BY sort_order")
        {
            Ok(s) => s,
            Err(e) => return storage_err(&req.id, e),
        };
        match stmt
            .query_map([&scope.class_name], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return storage_err(&req.id, e),
        }
    };

    let tx = match conn.transaction() {
        Ok(tx) => tx,
        Err(e) => return storage_err(&req.id, e),
    };

    let mut updated = 0usize;
    for student_id in &student_ids {
        // Lazy record creation: the first write for a student in this
        // subject/semester makes the record; it is zeroed, never absent,
        // afterwards.
        let existing: Option<String> = match tx
            .query_row(
                "SELECT id FROM grade_records
                 WHERE student_id = ? AND subject = ? AND semester = ?",
                (student_id, &scope.subject, &scope.semester),
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return storage_err(&req.id, e),
        };
        let record_id = match existing {
            Some(id) => {
                if let Err(e) = tx.execute(
                    "UPDATE grade_records SET updated_at = ? WHERE id = ?",
                    (&date, &id),
                ) {
                    return storage_err(&req.id, e);
                }
                id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                if let Err(e) = tx.execute(
                    "INSERT INTO grade_records(id, student_id, subject, semester, class_name, sts, sas, updated_at)
                     VALUES(?, ?, ?, ?, ?, 0, 0, ?)",
                    (&id, student_id, &scope.subject, &scope.semester, &scope.class_name, &date),
                ) {
                    return err(&req.id, "db_insert_failed", e.to_string(), None);
                }
                id
            }
        };

        match category {
            ScoreCategory::Sts | ScoreCategory::Sas => {
                if let Some(&value) = drafts.get(student_id) {
                    let sql = if category == ScoreCategory::Sts {
                        "UPDATE grade_records SET sts = ? WHERE id = ?"
                    } else {
                        "UPDATE grade_records SET sas = ? WHERE id = ?"
                    };
                    if let Err(e) = tx.execute(sql, (value, &record_id)) {
                        return storage_err(&req.id, e);
                    }
                    updated += 1;
                }
            }
            _ => {
                let cid = chapter_id.as_deref().expect("chapter-scoped category");
                // Every student in the class gets the chapter entry and its
                // task description, drafted value or not.
                if let Err(e) = tx.execute(
                    "INSERT INTO chapter_scores(record_id, chapter_id, description)
                     VALUES(?, ?, ?)
                     ON CONFLICT(record_id, chapter_id) DO UPDATE SET
                       description = excluded.description",
                    (&record_id, cid, &description),
                ) {
                    return err(&req.id, "db_insert_failed", e.to_string(), None);
                }
                if let Some(&value) = drafts.get(student_id) {
                    let column = category_column(category).expect("chapter-scoped category");
                    let sql = format!(
                        "UPDATE chapter_scores SET {} = ? WHERE record_id = ? AND chapter_id = ?",
                        column
                    );
                    if let Err(e) = tx.execute(&sql, (value, &record_id, cid)) {
                        return storage_err(&req.id, e);
                    }
                    updated += 1;
                }
            }
        }
    }

    if let Err(e) = tx.commit() {
        return storage_err(&req.id, e);
    }
    ok(
        &req.id,
        json!({ "touched": student_ids.len(), "updated": updated }),
    )
}

fn handle_entry_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let scope = match entry_scope(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let ctx = CalcContext {
        conn,
        class_name: &scope.class_name,
        subject: &scope.subject,
        semester: &scope.semester,
    };
    let chapters = match calc::load_catalog_chapters(&ctx) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };
    let ledger = match calc::load_class_ledger(&ctx) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };
    let titles: HashMap<&str, &str> = chapters
        .iter()
        .map(|c| (c.chapter_id.as_str(), c.title.as_str()))
        .collect();

    // One event per (date, category, chapter) with a non-zero value
    // anywhere in the class; the ledger is the only source.
    let mut events: BTreeMap<(String, usize, String), Option<String>> = BTreeMap::new();
    for record in &ledger.records {
        let date = record.updated_at.clone().unwrap_or_default();
        if record.sts > 0.0 {
            events
                .entry((date.clone(), category_sort_key(ScoreCategory::Sts), String::new()))
                .or_insert(None);
        }
        if record.sas > 0.0 {
            events
                .entry((date.clone(), category_sort_key(ScoreCategory::Sas), String::new()))
                .or_insert(None);
        }
        for (chapter_id, score) in &record.chapters {
            for (i, &value) in score.formatives.iter().enumerate() {
                if value > 0.0 {
                    let entry = events
                        .entry((date.clone(), i, chapter_id.clone()))
                        .or_insert(None);
                    if entry.is_none() {
                        *entry = score.description.clone();
                    }
                }
            }
            if score.summative > 0.0 {
                let entry = events
                    .entry((
                        date.clone(),
                        category_sort_key(ScoreCategory::Summative),
                        chapter_id.clone(),
                    ))
                    .or_insert(None);
                if entry.is_none() {
                    *entry = score.description.clone();
                }
            }
        }
    }

    let items: Vec<serde_json::Value> = events
        .into_iter()
        .map(|((date, order, chapter_id), description)| {
            let category = ScoreCategory::all()[order].as_str();
            let chapter_title = titles.get(chapter_id.as_str()).copied();
            json!({
                "date": date,
                "category": category,
                "chapterId": if chapter_id.is_empty() { None } else { Some(chapter_id.as_str()) },
                "chapterTitle": chapter_title,
                "description": description,
            })
        })
        .collect();
    ok(&req.id, json!({ "entries": items }))
}

fn handle_clear_entry(state: &mut AppState, req: &Request) -> serde_json::Value {
    let scope = match entry_scope(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let category = match parse_category(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let chapter_id = req.params.get("chapterId").and_then(|v| v.as_str());
    if category.is_chapter_scoped() && chapter_id.is_none() {
        return err(
            &req.id,
            "bad_params",
            "formative/summative clears require chapterId",
            None,
        );
    }

    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // Zero, don't delete: the record survives and the category re-opens for
    // first-time entry.
    let cleared = match category {
        ScoreCategory::Sts | ScoreCategory::Sas => {
            let sql = if category == ScoreCategory::Sts {
                "UPDATE grade_records SET sts = 0
                 WHERE class_name = ? AND subject = ? AND semester = ?"
            } else {
                "UPDATE grade_records SET sas = 0
                 WHERE class_name = ? AND subject = ? AND semester = ?"
            };
            conn.execute(sql, (&scope.class_name, &scope.subject, &scope.semester))
        }
        _ => {
            let column = category_column(category).expect("chapter-scoped category");
            let sql = format!(
                "UPDATE chapter_scores SET {} = 0
                 WHERE chapter_id = ? AND record_id IN (
                     SELECT id FROM grade_records
                     WHERE class_name = ? AND subject = ? AND semester = ?
                 )",
                column
            );
            conn.execute(
                &sql,
                (
                    chapter_id.expect("chapter-scoped category"),
                    &scope.class_name,
                    &scope.subject,
                    &scope.semester,
                ),
            )
        }
    };

    match cleared {
        Ok(n) => ok(&req.id, json!({ "cleared": n })),
        Err(e) => storage_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scores.availableCategories" => Some(handle_available_categories(state, req)),
        "scores.commitEntry" => Some(handle_commit_entry(state, req)),
        "scores.entryHistory" => Some(handle_entry_history(state, req)),
        "scores.clearEntry" => Some(handle_clear_entry(state, req)),
        _ => None,
    }
}
