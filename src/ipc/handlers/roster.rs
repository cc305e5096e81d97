use crate::ipc::error::{err, ok, storage_err};
use crate::ipc::{AppState, Request};
use crate::roster::{self, Student, Teacher};
use serde_json::json;

fn handle_set_teachers(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(raw) = req.params.get("teachers") else {
        return err(&req.id, "bad_params", "missing params.teachers", None);
    };
    let teachers: Vec<Teacher> = match serde_json::from_value(raw.clone()) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                format!("teachers payload malformed: {}", e),
                None,
            )
        }
    };

    match roster::replace_teachers(conn, &teachers) {
        Ok(()) => ok(&req.id, json!({ "stored": teachers.len() })),
        Err(e) => storage_err(&req.id, e),
    }
}

fn handle_list_teachers(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match roster::list_teachers(conn) {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => storage_err(&req.id, e),
    }
}

fn handle_set_students(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(raw) = req.params.get("students") else {
        return err(&req.id, "bad_params", "missing params.students", None);
    };
    let students: Vec<Student> = match serde_json::from_value(raw.clone()) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                format!("students payload malformed: {}", e),
                None,
            )
        }
    };

    match roster::replace_students(conn, &students) {
        Ok(()) => ok(&req.id, json!({ "stored": students.len() })),
        Err(e) => storage_err(&req.id, e),
    }
}

fn handle_list_students(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_name = req.params.get("className").and_then(|v| v.as_str());
    match roster::list_students(conn, class_name) {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => storage_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "roster.setTeachers" => Some(handle_set_teachers(state, req)),
        "roster.listTeachers" => Some(handle_list_teachers(state, req)),
        "roster.setStudents" => Some(handle_set_students(state, req)),
        "roster.listStudents" => Some(handle_list_students(state, req)),
        _ => None,
    }
}
