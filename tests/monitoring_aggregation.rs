use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_workspace(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rapord");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rapord");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn commit(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    category: &str,
    chapter_id: Option<&str>,
    entries: serde_json::Value,
) {
    let mut params = json!({
        "className": "IX A",
        "subject": "Matematika",
        "semester": "Ganjil",
        "date": "2024-09-02",
        "category": category,
        "entries": entries
    });
    if let Some(cid) = chapter_id {
        params["chapterId"] = json!(cid);
    }
    request_ok(stdin, reader, id, "scores.commitEntry", params);
}

fn class_grid(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        id,
        "monitoring.classGrid",
        json!({ "className": "IX A", "subject": "Matematika", "semester": "Ganjil" }),
    )
}

/// Two students, two Matematika chapters; Bab 2 never receives a score.
fn seed_class(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> (String, String) {
    request_ok(
        stdin,
        reader,
        "seed-students",
        "roster.setStudents",
        json!({ "students": [
            { "id": "s1", "name": "ABEL AULIA", "nis": "1129", "nisn": "3101640834", "gender": "P", "className": "IX A" },
            { "id": "s2", "name": "BUDI SANTOSO", "nis": "1132", "nisn": "0105795597", "gender": "L", "className": "IX A" }
        ] }),
    );
    request_ok(
        stdin,
        reader,
        "seed-chapters",
        "chapters.createGroup",
        json!({
            "subject": "Matematika",
            "semester": "Ganjil",
            "classes": ["IX A"],
            "chapters": ["Bab 1", "Bab 2"]
        }),
    );
    let listed = request_ok(
        stdin,
        reader,
        "seed-list",
        "chapters.listForClass",
        json!({ "subject": "Matematika", "semester": "Ganjil", "className": "IX A" }),
    );
    let ids: Vec<String> = listed
        .get("chapters")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|c| c.get("chapterId").and_then(|v| v.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    (ids[0].clone(), ids[1].clone())
}

#[test]
fn chapter_average_combines_active_categories_only() {
    let workspace = temp_workspace("rapord-agg-chapter");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (bab1, _bab2) = seed_class(&mut stdin, &mut reader);

    commit(
        &mut stdin,
        &mut reader,
        "2",
        "formative_1",
        Some(&bab1),
        json!([{ "studentId": "s1", "value": 80 }]),
    );
    commit(
        &mut stdin,
        &mut reader,
        "3",
        "summative",
        Some(&bab1),
        json!([{ "studentId": "s1", "value": 70 }, { "studentId": "s2", "value": 50 }]),
    );

    let grid = class_grid(&mut stdin, &mut reader, "4");

    let active = grid
        .pointer(&format!("/activeColumns/{}", bab1))
        .cloned()
        .unwrap_or_default();
    assert_eq!(
        active.get("formatives").cloned().unwrap_or_default(),
        json!([true, false, false, false, false])
    );
    assert_eq!(active.get("summative").and_then(|v| v.as_bool()), Some(true));

    let students = grid.get("students").and_then(|v| v.as_array()).unwrap();
    // ABEL: (80 + 70) / 2; BUDI: (0 + 50) / 2 with the zero counting.
    assert_eq!(
        students[0].pointer("/chapters/0/average").and_then(|v| v.as_f64()),
        Some(75.0)
    );
    assert_eq!(
        students[1].pointer("/chapters/0/average").and_then(|v| v.as_f64()),
        Some(25.0)
    );
    // The untouched chapter averages 0 for everyone.
    assert_eq!(
        students[0].pointer("/chapters/1/average").and_then(|v| v.as_f64()),
        Some(0.0)
    );
}

#[test]
fn report_grade_uses_the_dynamic_divisor() {
    let workspace = temp_workspace("rapord-agg-report");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (bab1, _bab2) = seed_class(&mut stdin, &mut reader);

    commit(
        &mut stdin,
        &mut reader,
        "2",
        "formative_1",
        Some(&bab1),
        json!([{ "studentId": "s1", "value": 80 }]),
    );
    commit(
        &mut stdin,
        &mut reader,
        "3",
        "summative",
        Some(&bab1),
        json!([{ "studentId": "s1", "value": 70 }, { "studentId": "s2", "value": 50 }]),
    );

    // Only chapters are active so far: divisor 1.
    let grid = class_grid(&mut stdin, &mut reader, "4");
    let students = grid.get("students").and_then(|v| v.as_array()).unwrap();
    assert_eq!(
        students[0].get("reportGrade").and_then(|v| v.as_f64()),
        Some(75.0)
    );
    assert_eq!(students[0].get("passing").and_then(|v| v.as_bool()), Some(true));

    commit(
        &mut stdin,
        &mut reader,
        "5",
        "sts",
        None,
        json!([{ "studentId": "s1", "value": 60 }]),
    );
    commit(
        &mut stdin,
        &mut reader,
        "6",
        "sas",
        None,
        json!([{ "studentId": "s1", "value": 70 }]),
    );

    // One active chapter at 75 plus sts and sas: round((75+60+70)/3) = 68.
    let grid = class_grid(&mut stdin, &mut reader, "7");
    assert_eq!(grid.get("stsActive").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(grid.get("sasActive").and_then(|v| v.as_bool()), Some(true));
    let students = grid.get("students").and_then(|v| v.as_array()).unwrap();
    assert_eq!(
        students[0].get("reportGrade").and_then(|v| v.as_f64()),
        Some(68.0)
    );
    assert_eq!(students[0].get("passing").and_then(|v| v.as_bool()), Some(false));

    // The classmate was never scored, but the class-wide divisor still
    // applies: round((25 + 0 + 0) / 3) = 8.
    assert_eq!(
        students[1].get("reportGrade").and_then(|v| v.as_f64()),
        Some(8.0)
    );
}

#[test]
fn untouched_class_reports_all_zero() {
    let workspace = temp_workspace("rapord-agg-empty");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_class(&mut stdin, &mut reader);

    let grid = class_grid(&mut stdin, &mut reader, "2");
    assert_eq!(grid.get("stsActive").and_then(|v| v.as_bool()), Some(false));
    let students = grid.get("students").and_then(|v| v.as_array()).unwrap();
    assert_eq!(students.len(), 2);
    for student in students {
        assert_eq!(student.get("reportGrade").and_then(|v| v.as_f64()), Some(0.0));
        assert_eq!(student.get("passing").and_then(|v| v.as_bool()), Some(false));
    }
}
