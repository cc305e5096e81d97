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

fn chapter_id(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    subject: &str,
) -> String {
    let listed = request_ok(
        stdin,
        reader,
        id,
        "chapters.listForClass",
        json!({ "subject": subject, "semester": "Ganjil", "className": "IX A" }),
    );
    listed
        .pointer("/chapters/0/chapterId")
        .and_then(|v| v.as_str())
        .expect("chapter id")
        .to_string()
}

fn commit(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    subject: &str,
    category: &str,
    chapter_id: Option<&str>,
    value: f64,
) {
    let mut params = json!({
        "className": "IX A",
        "subject": subject,
        "semester": "Ganjil",
        "date": "2024-09-02",
        "category": category,
        "entries": [{ "studentId": "s1", "value": value }]
    });
    if let Some(cid) = chapter_id {
        params["chapterId"] = json!(cid);
    }
    request_ok(stdin, reader, id, "scores.commitEntry", params);
}

#[test]
fn summary_divides_like_the_monitoring_view() {
    let workspace = temp_workspace("rapord-summary");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "roster.setStudents",
        json!({ "students": [
            { "id": "s1", "name": "ABEL AULIA", "nis": "1129", "nisn": "3101640834", "gender": "P", "className": "IX A" }
        ] }),
    );
    for (i, subject) in ["Matematika", "IPA"].iter().enumerate() {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("3-{}", i),
            "chapters.createGroup",
            json!({
                "subject": subject,
                "semester": "Ganjil",
                "classes": ["IX A"],
                "chapters": ["Bab 1"]
            }),
        );
    }

    // Matematika: one active chapter at 75, sts 60, sas 70 -> divisor 3.
    let mat_bab = chapter_id(&mut stdin, &mut reader, "4", "Matematika");
    commit(&mut stdin, &mut reader, "5", "Matematika", "formative_1", Some(&mat_bab), 80.0);
    commit(&mut stdin, &mut reader, "6", "Matematika", "summative", Some(&mat_bab), 70.0);
    commit(&mut stdin, &mut reader, "7", "Matematika", "sts", None, 60.0);
    commit(&mut stdin, &mut reader, "8", "Matematika", "sas", None, 70.0);

    // IPA: only one formative slot active -> divisor 1.
    let ipa_bab = chapter_id(&mut stdin, &mut reader, "9", "IPA");
    commit(&mut stdin, &mut reader, "10", "IPA", "formative_1", Some(&ipa_bab), 90.0);

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "reports.studentSummary",
        json!({ "studentId": "s1", "semester": "Ganjil" }),
    );
    let subjects = summary.get("subjects").and_then(|v| v.as_array()).unwrap();
    assert_eq!(subjects.len(), 2);

    // Rows come back ordered by subject.
    let ipa = &subjects[0];
    assert_eq!(ipa.get("subject").and_then(|v| v.as_str()), Some("IPA"));
    assert_eq!(ipa.get("chapterMean").and_then(|v| v.as_f64()), Some(90.0));
    assert_eq!(ipa.get("reportGrade").and_then(|v| v.as_f64()), Some(90.0));
    assert_eq!(ipa.get("passing").and_then(|v| v.as_bool()), Some(true));

    let mat = &subjects[1];
    assert_eq!(mat.get("subject").and_then(|v| v.as_str()), Some("Matematika"));
    assert_eq!(mat.get("chapterMean").and_then(|v| v.as_f64()), Some(75.0));
    assert_eq!(mat.get("sts").and_then(|v| v.as_f64()), Some(60.0));
    assert_eq!(mat.get("sas").and_then(|v| v.as_f64()), Some(70.0));
    // round((75 + 60 + 70) / 3), same divisor as the monitoring view.
    assert_eq!(mat.get("reportGrade").and_then(|v| v.as_f64()), Some(68.0));
    assert_eq!(mat.get("passing").and_then(|v| v.as_bool()), Some(false));
}

#[test]
fn student_without_records_gets_an_empty_report() {
    let workspace = temp_workspace("rapord-summary-empty");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "reports.studentSummary",
        json!({ "studentId": "ghost", "semester": "Ganjil" }),
    );
    assert_eq!(
        summary.get("subjects").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
}
