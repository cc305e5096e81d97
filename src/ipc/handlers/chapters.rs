use crate::ipc::error::{err, ok, storage_err};
use crate::ipc::{AppState, Request};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

struct GroupScope {
    subject: String,
    semester: String,
}

fn scope_from(req: &Request) -> Result<GroupScope, serde_json::Value> {
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
    if subject.is_empty() || semester.is_empty() {
        return Err(err(&req.id, "bad_params", "missing subject/semester", None));
    }
    Ok(GroupScope {
        subject: subject.to_string(),
        semester: semester.to_string(),
    })
}

struct ChapterInput {
    title: String,
    sub_topics: Vec<String>,
}

/// Titles arrive either as plain strings or as objects carrying sub-topics.
fn parse_chapter_inputs(raw: &serde_json::Value) -> Result<Vec<ChapterInput>, String> {
    let Some(items) = raw.as_array() else {
        return Err("chapters must be an array".to_string());
    };
    if items.is_empty() {
        return Err("at least one chapter title is required".to_string());
    }
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let (title, sub_topics) = if let Some(s) = item.as_str() {
            (s.trim().to_string(), Vec::new())
        } else if let Some(obj) = item.as_object() {
            let title = obj
                .get("title")
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .unwrap_or_default();
            let sub_topics = obj
                .get("subTopics")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            (title, sub_topics)
        } else {
            return Err(format!("chapter at index {} must be a string or object", i));
        };
        if title.is_empty() {
            return Err(format!("chapter title at index {} must not be blank", i));
        }
        out.push(ChapterInput { title, sub_topics });
    }
    Ok(out)
}

fn handle_create_group(state: &mut AppState, req: &Request) -> serde_json::Value {
    let scope = match scope_from(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let classes: Vec<String> = req
        .params
        .get("classes")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();
    if classes.is_empty() {
        return err(&req.id, "bad_params", "pick at least one class", None);
    }
    let inputs = match req.params.get("chapters") {
        Some(raw) => match parse_chapter_inputs(raw) {
            Ok(v) => v,
            Err(msg) => return err(&req.id, "bad_params", msg, None),
        },
        None => return err(&req.id, "bad_params", "missing params.chapters", None),
    };

    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let tx = match conn.transaction() {
        Ok(tx) => tx,
        Err(e) => return storage_err(&req.id, e),
    };

    let mut created = 0usize;
    for class in &classes {
        for input in &inputs {
            // Re-saving the same title for a class replaces the row instead
            // of stacking a duplicate.
            if let Err(e) = tx.execute(
                "DELETE FROM chapters
                 WHERE subject = ? AND semester = ? AND class_name = ? AND title = ?",
                (&scope.subject, &scope.semester, class, &input.title),
            ) {
                return storage_err(&req.id, e);
            }
            let sub_topics = match serde_json::to_string(&input.sub_topics) {
                Ok(v) => v,
                Err(e) => return storage_err(&req.id, e),
            };
            if let Err(e) = tx.execute(
                "INSERT INTO chapters(id, subject, semester, class_name, title, sub_topics)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &scope.subject,
                    &scope.semester,
                    class,
                    &input.title,
                    sub_topics,
                ),
            ) {
                return err(&req.id, "db_insert_failed", e.to_string(), None);
            }
            created += 1;
        }
    }

    if let Err(e) = tx.commit() {
        return storage_err(&req.id, e);
    }
    ok(&req.id, json!({ "created": created }))
}

fn handle_rename_group(state: &mut AppState, req: &Request) -> serde_json::Value {
    let scope = match scope_from(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let old_title = req
        .params
        .get("oldTitle")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or("");
    let new_title = req
        .params
        .get("newTitle")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or("");
    if old_title.is_empty() || new_title.is_empty() {
        return err(&req.id, "bad_params", "missing oldTitle/newTitle", None);
    }

    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    // The rename unit is the whole (subject, semester, title) group: every
    // class sharing the title moves together.
    match conn.execute(
        "UPDATE chapters SET title = ?
         WHERE subject = ? AND semester = ? AND title = ?",
        (new_title, &scope.subject, &scope.semester, old_title),
    ) {
        Ok(renamed) => ok(&req.id, json!({ "renamed": renamed })),
        Err(e) => storage_err(&req.id, e),
    }
}

fn handle_delete_group(state: &mut AppState, req: &Request) -> serde_json::Value {
    let scope = match scope_from(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let title = req
        .params
        .get("title")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or("");
    if title.is_empty() {
        return err(&req.id, "bad_params", "missing title", None);
    }

    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    // No cascade: grade entries keep their chapter_id and become inert.
    match conn.execute(
        "DELETE FROM chapters WHERE subject = ? AND semester = ? AND title = ?",
        (&scope.subject, &scope.semester, title),
    ) {
        Ok(deleted) => ok(&req.id, json!({ "deleted": deleted })),
        Err(e) => storage_err(&req.id, e),
    }
}

fn handle_list_groups(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let subject_filter: Option<BTreeSet<String>> = req
        .params
        .get("subjects")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect()
        });

    let mut stmt = match conn.prepare(
        "SELECT subject, semester, title, class_name FROM chapters ORDER BY subject, semester, title",
    ) {
        Ok(s) => s,
        Err(e) => return storage_err(&req.id, e),
    };
    let rows = match stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return storage_err(&req.id, e),
    };

    let mut groups: BTreeMap<(String, String, String), BTreeSet<String>> = BTreeMap::new();
    for (subject, semester, title, class_name) in rows {
        if let Some(filter) = &subject_filter {
            if !filter.contains(&subject) {
                continue;
            }
        }
        groups
            .entry((subject, semester, title))
            .or_default()
            .insert(class_name);
    }

    let out: Vec<serde_json::Value> = groups
        .into_iter()
        .map(|((subject, semester, title), classes)| {
            json!({
                "subject": subject,
                "semester": semester,
                "title": title,
                "classes": classes.into_iter().collect::<Vec<_>>(),
            })
        })
        .collect();
    ok(&req.id, json!({ "groups": out }))
}

fn handle_list_for_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let scope = match scope_from(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(class_name) = req.params.get("className").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing className", None);
    };

    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut stmt = match conn.prepare(
        "SELECT id, title, sub_topics FROM chapters
         WHERE subject = ? AND semester = ? AND class_name = ?
         ORDER BY title",
    ) {
        Ok(s) => s,
        Err(e) => return storage_err(&req.id, e),
    };
    let rows = match stmt
        .query_map((&scope.subject, &scope.semester, class_name), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return storage_err(&req.id, e),
    };

    let chapters: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|(id, title, sub_topics)| {
            let sub_topics: Vec<String> = serde_json::from_str(&sub_topics).unwrap_or_default();
            json!({ "chapterId": id, "title": title, "subTopics": sub_topics })
        })
        .collect();
    ok(&req.id, json!({ "chapters": chapters }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "chapters.createGroup" => Some(handle_create_group(state, req)),
        "chapters.renameGroup" => Some(handle_rename_group(state, req)),
        "chapters.deleteGroup" => Some(handle_delete_group(state, req)),
        "chapters.listGroups" => Some(handle_list_groups(state, req)),
        "chapters.listForClass" => Some(handle_list_for_class(state, req)),
        _ => None,
    }
}
