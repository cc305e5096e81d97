use crate::db;
use crate::ipc::error::{err, ok, storage_err};
use crate::ipc::{AppState, Request};
use serde_json::{json, Value};

const SETTINGS_KEY: &str = "setup.school";
const SEMESTER_LABELS: [&str; 2] = ["Ganjil", "Genap"];

fn default_settings() -> Value {
    json!({
        "schoolName": "",
        "academicYear": "",
        "semester": "Ganjil",
        "headmasterName": null,
        "headmasterNip": null
    })
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let stored = match db::settings_get_json(conn, SETTINGS_KEY) {
        Ok(v) => v,
        Err(e) => return storage_err(&req.id, e),
    };

    let mut settings = default_settings();
    if let (Some(base), Some(over)) = (settings.as_object_mut(), stored.as_ref().and_then(|v| v.as_object())) {
        for (k, v) in over {
            base.insert(k.clone(), v.clone());
        }
    }
    ok(&req.id, json!({ "settings": settings }))
}

fn handle_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(settings) = req.params.get("settings").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing params.settings object", None);
    };

    let semester = settings
        .get("semester")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if !SEMESTER_LABELS.contains(&semester) {
        return err(
            &req.id,
            "bad_params",
            "settings.semester must be Ganjil or Genap",
            Some(json!({ "semester": semester })),
        );
    }

    if let Err(e) = db::settings_set_json(conn, SETTINGS_KEY, &Value::Object(settings.clone())) {
        return storage_err(&req.id, e);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_get(state, req)),
        "setup.save" => Some(handle_save(state, req)),
        _ => None,
    }
}
