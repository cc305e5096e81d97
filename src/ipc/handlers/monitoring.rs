use crate::calc::{self, CalcContext};
use crate::ipc::error::{err, ok};
use crate::ipc::{AppState, Request};
use serde_json::json;

fn handle_class_grid(state: &mut AppState, req: &Request) -> serde_json::Value {
    let class_name = req
        .params
        .get("className")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let subject = req
        .params
        .get("subject")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let semester = req
        .params
        .get("semester")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if class_name.is_empty() || subject.is_empty() || semester.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "missing className/subject/semester",
            None,
        );
    }

    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let ctx = CalcContext {
        conn,
        class_name,
        subject,
        semester,
    };
    match calc::compute_class_matrix(&ctx) {
        Ok(matrix) => ok(
            &req.id,
            serde_json::to_value(&matrix).unwrap_or_else(|_| json!({})),
        ),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "monitoring.classGrid" => Some(handle_class_grid(state, req)),
        _ => None,
    }
}
