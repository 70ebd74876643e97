//! Fixed hiring reports over `hired_employees`, `departments`, and `jobs`.

use rusqlite::{Connection, params};
use serde::Serialize;

use crate::error::IngestError;

const HIRES_BY_QUARTER_SQL: &str = r#"
SELECT
    d.department AS department,
    j.job AS job,
    SUM(CASE WHEN (CAST(strftime('%m', h.datetime) AS INTEGER) + 2) / 3 = 1 THEN 1 ELSE 0 END) AS q1,
    SUM(CASE WHEN (CAST(strftime('%m', h.datetime) AS INTEGER) + 2) / 3 = 2 THEN 1 ELSE 0 END) AS q2,
    SUM(CASE WHEN (CAST(strftime('%m', h.datetime) AS INTEGER) + 2) / 3 = 3 THEN 1 ELSE 0 END) AS q3,
    SUM(CASE WHEN (CAST(strftime('%m', h.datetime) AS INTEGER) + 2) / 3 = 4 THEN 1 ELSE 0 END) AS q4
FROM hired_employees h
JOIN departments d ON h.department_id = d.id
JOIN jobs j ON h.job_id = j.id
WHERE strftime('%Y', h.datetime) = ?1
GROUP BY d.department, j.job
ORDER BY d.department, j.job
"#;

const DEPARTMENTS_ABOVE_MEAN_SQL: &str = r#"
WITH department_hires AS (
    SELECT d.id AS id, d.department AS department, COUNT(*) AS hired
    FROM hired_employees h
    JOIN departments d ON h.department_id = d.id
    WHERE strftime('%Y', h.datetime) = ?1
    GROUP BY d.id, d.department
),
average_hires AS (
    SELECT AVG(hired) AS mean_hires FROM department_hires
)
SELECT dh.id, dh.department, dh.hired
FROM department_hires dh
JOIN average_hires ah ON dh.hired > ah.mean_hires
ORDER BY dh.hired DESC, dh.id
"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuarterlyHires {
    pub department: String,
    pub job: String,
    pub q1: i64,
    pub q2: i64,
    pub q3: i64,
    pub q4: i64,
}

impl QuarterlyHires {
    pub fn headers() -> Vec<String> {
        ["department", "job", "Q1", "Q2", "Q3", "Q4"]
            .iter()
            .map(|h| h.to_string())
            .collect()
    }

    pub fn cells(&self) -> Vec<String> {
        vec![
            self.department.clone(),
            self.job.clone(),
            self.q1.to_string(),
            self.q2.to_string(),
            self.q3.to_string(),
            self.q4.to_string(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepartmentHires {
    pub id: i64,
    pub department: String,
    pub hired: i64,
}

impl DepartmentHires {
    pub fn headers() -> Vec<String> {
        ["id", "department", "hired"]
            .iter()
            .map(|h| h.to_string())
            .collect()
    }

    pub fn cells(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.department.clone(),
            self.hired.to_string(),
        ]
    }
}

/// Hires per department and job in `year`, split by calendar quarter.
pub fn hires_by_quarter(conn: &Connection, year: i32) -> Result<Vec<QuarterlyHires>, IngestError> {
    let mut stmt = conn.prepare(HIRES_BY_QUARTER_SQL)?;
    let rows = stmt
        .query_map(params![year_token(year)], |row| {
            Ok(QuarterlyHires {
                department: row.get(0)?,
                job: row.get(1)?,
                q1: row.get(2)?,
                q2: row.get(3)?,
                q3: row.get(4)?,
                q4: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Departments that hired more people in `year` than the mean across all
/// departments hiring that year, most hires first.
pub fn departments_above_mean(
    conn: &Connection,
    year: i32,
) -> Result<Vec<DepartmentHires>, IngestError> {
    let mut stmt = conn.prepare(DEPARTMENTS_ABOVE_MEAN_SQL)?;
    let rows = stmt
        .query_map(params![year_token(year)], |row| {
            Ok(DepartmentHires {
                id: row.get(0)?,
                department: row.get(1)?,
                hired: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn year_token(year: i32) -> String {
    format!("{year:04}")
}
