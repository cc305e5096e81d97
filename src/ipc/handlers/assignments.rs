use crate::ipc::error::{err, ok, storage_err};
use crate::ipc::{AppState, Request};
use crate::roster::{self, Teacher};
use serde_json::json;

fn required_str<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params.get(key).and_then(|v| v.as_str())
}

fn load_teacher_for(
    state: &AppState,
    req: &Request,
) -> Result<(Teacher, String), serde_json::Value> {
    let Some(conn) = state.db.as_ref() else {
        return Err(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let Some(teacher_id) = required_str(req, "teacherId") else {
        return Err(err(&req.id, "bad_params", "missing teacherId", None));
    };
    let Some(subject) = required_str(req, "subject") else {
        return Err(err(&req.id, "bad_params", "missing subject", None));
    };

    match roster::load_teacher(conn, teacher_id) {
        Ok(Some(teacher)) => Ok((teacher, subject.to_string())),
        Ok(None) => Err(err(
            &req.id,
            "not_found",
            "teacher not found",
            Some(json!({ "teacherId": teacher_id })),
        )),
        Err(e) => Err(storage_err(&req.id, e)),
    }
}

fn handle_classes(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (teacher, subject) = match load_teacher_for(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    ok(
        &req.id,
        json!({ "classes": roster::assigned_classes(&teacher, &subject) }),
    )
}

fn handle_jenjangs(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (teacher, subject) = match load_teacher_for(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    ok(
        &req.id,
        json!({ "jenjangs": roster::jenjangs_for_subject(&teacher, &subject) }),
    )
}

fn handle_classes_for_jenjang(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(jenjang) = required_str(req, "jenjang").map(str::to_string) else {
        return err(&req.id, "bad_params", "missing jenjang", None);
    };
    let (teacher, subject) = match load_teacher_for(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    ok(
        &req.id,
        json!({ "classes": roster::classes_for_jenjang(&teacher, &subject, &jenjang) }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assignments.classes" => Some(handle_classes(state, req)),
        "assignments.jenjangs" => Some(handle_jenjangs(state, req)),
        "assignments.classesForJenjang" => Some(handle_classes_for_jenjang(state, req)),
        _ => None,
    }
}
