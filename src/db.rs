use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("rapor.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            nip TEXT,
            phone TEXT,
            homeroom_class TEXT,
            subjects TEXT NOT NULL,
            class_map TEXT NOT NULL,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            nis TEXT NOT NULL,
            nisn TEXT NOT NULL,
            gender TEXT NOT NULL,
            class_name TEXT NOT NULL,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS chapters(
            id TEXT PRIMARY KEY,
            subject TEXT NOT NULL,
            semester TEXT NOT NULL,
            class_name TEXT NOT NULL,
            title TEXT NOT NULL,
            sub_topics TEXT NOT NULL DEFAULT '[]'
        )",
        [],
    )?;
    ensure_chapters_sub_topics(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_chapters_scope ON chapters(subject, semester, class_name)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_chapters_group ON chapters(subject, semester, title)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            semester TEXT NOT NULL,
            class_name TEXT NOT NULL,
            sts REAL NOT NULL DEFAULT 0,
            sas REAL NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, subject, semester)
        )",
        [],
    )?;
    ensure_grade_records_updated_at(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_records_class
         ON grade_records(class_name, subject, semester)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_records_student ON grade_records(student_id)",
        [],
    )?;

    // chapter_id is deliberately NOT a foreign key: deleting a chapter leaves
    // its score rows behind, and aggregation treats them as inert.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS chapter_scores(
            record_id TEXT NOT NULL,
            chapter_id TEXT NOT NULL,
            f1 REAL NOT NULL DEFAULT 0,
            f2 REAL NOT NULL DEFAULT 0,
            f3 REAL NOT NULL DEFAULT 0,
            f4 REAL NOT NULL DEFAULT 0,
            f5 REAL NOT NULL DEFAULT 0,
            summative REAL NOT NULL DEFAULT 0,
            description TEXT,
            PRIMARY KEY(record_id, chapter_id),
            FOREIGN KEY(record_id) REFERENCES grade_records(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_chapter_scores_chapter ON chapter_scores(chapter_id)",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

fn ensure_chapters_sub_topics(conn: &Connection) -> anyhow::Result<()> {
    // Early workspaces stored chapters without the sub-topic list.
    if table_has_column(conn, "chapters", "sub_topics")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE chapters ADD COLUMN sub_topics TEXT NOT NULL DEFAULT '[]'",
        [],
    )?;
    Ok(())
}

fn ensure_grade_records_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "grade_records", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE grade_records ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
