use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::{AppState, Request};
use serde_json::json;

fn handle_incomplete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_id = req
        .params
        .get("studentId")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if student_id.is_empty() {
        return err(&req.id, "bad_params", "missing studentId", None);
    }

    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match calc::incomplete_tasks(conn, student_id) {
        Ok(tasks) => ok(&req.id, json!({ "tasks": tasks })),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tasks.incomplete" => Some(handle_incomplete(state, req)),
        _ => None,
    }
}
