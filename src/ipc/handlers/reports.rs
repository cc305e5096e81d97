use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::{AppState, Request};
use serde_json::json;

fn handle_student_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_id = req
        .params
        .get("studentId")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let semester = req
        .params
        .get("semester")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if student_id.is_empty() || semester.is_empty() {
        return err(&req.id, "bad_params", "missing studentId/semester", None);
    }

    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    // A student with no records yet is a valid, empty report.
    match calc::compute_student_summary(conn, student_id, semester) {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.studentSummary" => Some(handle_student_summary(state, req)),
        _ => None,
    }
}
