use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Teacher {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub nip: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub homeroom_class: Option<String>,
    #[serde(default)]
    pub subjects: Vec<String>,
    /// Class name -> subjects the teacher takes in that class. The subjects
    /// here are expected to be a subset of `subjects`; not enforced.
    #[serde(default)]
    pub class_map: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub nis: String,
    pub nisn: String,
    pub gender: String,
    pub class_name: String,
}

/// Grade level ("jenjang") comes from the class name's leading token:
/// "VII A" -> "7". Anything else has no level.
pub fn jenjang_of(class_name: &str) -> Option<&'static str> {
    match class_name.split_whitespace().next()? {
        "VII" => Some("7"),
        "VIII" => Some("8"),
        "IX" => Some("9"),
        _ => None,
    }
}

/// Sorted class names where the subject appears in the teacher's class map.
/// A subject taught nowhere yields an empty set, which is a valid state.
pub fn assigned_classes(teacher: &Teacher, subject: &str) -> Vec<String> {
    let mut classes: Vec<String> = teacher
        .class_map
        .iter()
        .filter(|(_, subjects)| subjects.iter().any(|s| s == subject))
        .map(|(class, _)| class.clone())
        .collect();
    classes.sort();
    classes
}

/// Sorted grade levels represented by the teacher's assigned classes for a
/// subject.
pub fn jenjangs_for_subject(teacher: &Teacher, subject: &str) -> Vec<String> {
    let levels: BTreeSet<&'static str> = assigned_classes(teacher, subject)
        .iter()
        .filter_map(|c| jenjang_of(c))
        .collect();
    levels.into_iter().map(str::to_string).collect()
}

/// The assigned-class subset sitting at one grade level.
pub fn classes_for_jenjang(teacher: &Teacher, subject: &str, jenjang: &str) -> Vec<String> {
    assigned_classes(teacher, subject)
        .into_iter()
        .filter(|c| jenjang_of(c).map(|j| j == jenjang).unwrap_or(false))
        .collect()
}

pub fn load_teacher(conn: &Connection, id: &str) -> anyhow::Result<Option<Teacher>> {
    let row: Option<(String, String, Option<String>, Option<String>, Option<String>, String, String)> =
        conn.query_row(
            "SELECT id, name, nip, phone, homeroom_class, subjects, class_map
             FROM teachers WHERE id = ?",
            [id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                ))
            },
        )
        .optional()?;
    let Some((id, name, nip, phone, homeroom_class, subjects, class_map)) = row else {
        return Ok(None);
    };
    Ok(Some(Teacher {
        id,
        name,
        nip,
        phone,
        homeroom_class,
        subjects: serde_json::from_str(&subjects)?,
        class_map: serde_json::from_str(&class_map)?,
    }))
}

pub fn list_teachers(conn: &Connection) -> anyhow::Result<Vec<Teacher>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, nip, phone, homeroom_class, subjects, class_map
         FROM teachers ORDER BY sort_order",
    )?;
    let rows = stmt.query_map([], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, Option<String>>(2)?,
            r.get::<_, Option<String>>(3)?,
            r.get::<_, Option<String>>(4)?,
            r.get::<_, String>(5)?,
            r.get::<_, String>(6)?,
        ))
    })?;
    let mut teachers = Vec::new();
    for row in rows {
        let (id, name, nip, phone, homeroom_class, subjects, class_map) = row?;
        teachers.push(Teacher {
            id,
            name,
            nip,
            phone,
            homeroom_class,
            subjects: serde_json::from_str(&subjects)?,
            class_map: serde_json::from_str(&class_map)?,
        });
    }
    Ok(teachers)
}

pub fn replace_teachers(conn: &Connection, teachers: &[Teacher]) -> anyhow::Result<()> {
    conn.execute("DELETE FROM teachers", [])?;
    for (i, t) in teachers.iter().enumerate() {
        conn.execute(
            "INSERT INTO teachers(id, name, nip, phone, homeroom_class, subjects, class_map, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &t.id,
                &t.name,
                &t.nip,
                &t.phone,
                &t.homeroom_class,
                serde_json::to_string(&t.subjects)?,
                serde_json::to_string(&t.class_map)?,
                i as i64,
            ),
        )?;
    }
    Ok(())
}

pub fn list_students(conn: &Connection, class_name: Option<&str>) -> anyhow::Result<Vec<Student>> {
    let mut out = Vec::new();
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<Student> {
        Ok(Student {
            id: r.get(0)?,
            name: r.get(1)?,
            nis: r.get(2)?,
            nisn: r.get(3)?,
            gender: r.get(4)?,
            class_name: r.get(5)?,
        })
    };
    match class_name {
        Some(class) => {
            let mut stmt = conn.prepare(
                "SELECT id, name, nis, nisn, gender, class_name
                 FROM students WHERE class_name = ? ORDER BY name",
            )?;
            let rows = stmt.query_map([class], map_row)?;
            for row in rows {
                out.push(row?);
            }
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT id, name, nis, nisn, gender, class_name
                 FROM students ORDER BY class_name, name",
            )?;
            let rows = stmt.query_map([], map_row)?;
            for row in rows {
                out.push(row?);
            }
        }
    }
    Ok(out)
}

pub fn replace_students(conn: &Connection, students: &[Student]) -> anyhow::Result<()> {
    conn.execute("DELETE FROM students", [])?;
    for (i, s) in students.iter().enumerate() {
        conn.execute(
            "INSERT INTO students(id, name, nis, nisn, gender, class_name, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (&s.id, &s.name, &s.nis, &s.nisn, &s.gender, &s.class_name, i as i64),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn teacher_with_map(entries: &[(&str, &[&str])]) -> Teacher {
        Teacher {
            id: "t1".to_string(),
            name: "Purnadi, S. Pd.".to_string(),
            nip: None,
            phone: None,
            homeroom_class: None,
            subjects: vec!["Matematika".to_string(), "Informatika".to_string()],
            class_map: entries
                .iter()
                .map(|(c, subs)| {
                    (
                        c.to_string(),
                        subs.iter().map(|s| s.to_string()).collect(),
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn assigned_classes_filters_and_sorts() {
        let t = teacher_with_map(&[
            ("IX B", &["Matematika"]),
            ("VII A", &["Matematika", "Informatika"]),
            ("IX A", &["Informatika"]),
        ]);
        assert_eq!(assigned_classes(&t, "Matematika"), vec!["IX B", "VII A"]);
        assert_eq!(assigned_classes(&t, "Informatika"), vec!["IX A", "VII A"]);
        assert!(assigned_classes(&t, "IPA").is_empty());
    }

    #[test]
    fn jenjang_comes_from_leading_token() {
        assert_eq!(jenjang_of("VII A"), Some("7"));
        assert_eq!(jenjang_of("VIII C"), Some("8"));
        assert_eq!(jenjang_of("IX B"), Some("9"));
        assert_eq!(jenjang_of("X A"), None);
        assert_eq!(jenjang_of(""), None);
    }

    #[test]
    fn jenjang_set_and_filter_agree() {
        let t = teacher_with_map(&[
            ("VII A", &["Matematika"]),
            ("VII B", &["Matematika"]),
            ("IX A", &["Matematika"]),
        ]);
        assert_eq!(jenjangs_for_subject(&t, "Matematika"), vec!["7", "9"]);
        assert_eq!(
            classes_for_jenjang(&t, "Matematika", "7"),
            vec!["VII A", "VII B"]
        );
        assert_eq!(classes_for_jenjang(&t, "Matematika", "8"), Vec::<String>::new());
    }
}
