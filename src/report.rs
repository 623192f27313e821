//! Result files for a graded batch: one JSON file per student plus a JSON
//! and CSV summary.

use crate::error::SheetError;
use crate::grading::StudentReport;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const SUMMARY_JSON: &str = "summary.json";
pub const SUMMARY_CSV: &str = "summary.csv";

const CSV_HEADER: [&str; 9] = [
    "Student ID",
    "Total Score",
    "Language",
    "Q_No",
    "Type",
    "Key Answer",
    "Student Answer",
    "Score",
    "Reason",
];

/// Write `<student_id>.json` into `dir`
pub fn write_student(dir: &Path, report: &StudentReport) -> Result<PathBuf, SheetError> {
    let name = format!("{}.json", report.student_id);
    persist(dir, &name, |file| {
        serde_json::to_writer_pretty(&mut *file, report)
            .map_err(|e| SheetError::Report(format!("Failed to encode {}: {}", name, e)))
    })
}

/// Write `summary.json` and `summary.csv` for all reports into `dir`
pub fn write_summary(dir: &Path, reports: &[StudentReport]) -> Result<(), SheetError> {
    persist(dir, SUMMARY_JSON, |file| {
        serde_json::to_writer_pretty(&mut *file, reports)
            .map_err(|e| SheetError::Report(format!("Failed to encode summary: {}", e)))
    })?;

    persist(dir, SUMMARY_CSV, |file| write_csv(file, reports))?;

    tracing::info!(
        "Wrote summary of {} students to {}",
        reports.len(),
        dir.display()
    );
    Ok(())
}

/// One row per question, preceded by the header row
pub fn write_csv<W: Write>(writer: W, reports: &[StudentReport]) -> Result<(), SheetError> {
    let csv_err = |e: csv::Error| SheetError::Report(format!("Failed to write CSV: {}", e));
    let mut csv = csv::Writer::from_writer(writer);

    csv.write_record(CSV_HEADER).map_err(csv_err)?;
    for report in reports {
        for detail in &report.details {
            let q_no = detail.q_no.to_string();
            let kind = detail.kind.to_string();
            let score = detail.score.to_string();
            csv.write_record([
                report.student_id.as_str(),
                report.total_score.as_str(),
                report.language.as_str(),
                q_no.as_str(),
                kind.as_str(),
                detail.key_answer.as_str(),
                detail.student_answer.as_str(),
                score.as_str(),
                detail.reason_for_wrong.as_str(),
            ])
            .map_err(csv_err)?;
        }
    }

    csv.flush()
        .map_err(|e| SheetError::Report(format!("Failed to flush CSV: {}", e)))
}

/// Write through a temp file in `dir` and rename it into place, so readers
/// never see a half-written file
fn persist<F>(dir: &Path, name: &str, write: F) -> Result<PathBuf, SheetError>
where
    F: FnOnce(&mut BufWriter<&File>) -> Result<(), SheetError>,
{
    fs::create_dir_all(dir)
        .map_err(|e| SheetError::Report(format!("Failed to create {}: {}", dir.display(), e)))?;

    let temp = NamedTempFile::new_in(dir)
        .map_err(|e| SheetError::Report(format!("Failed to create temp file: {}", e)))?;

    {
        let mut writer = BufWriter::new(temp.as_file());
        write(&mut writer)?;
        writer
            .flush()
            .map_err(|e| SheetError::Report(format!("Failed to write {}: {}", name, e)))?;
    }

    let path = dir.join(name);
    temp.persist(&path)
        .map_err(|e| SheetError::Report(format!("Failed to save {}: {}", path.display(), e)))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grading::{QuestionResult, QuestionType};
    use tempfile::TempDir;

    fn report(id: &str) -> StudentReport {
        StudentReport {
            student_id: id.to_string(),
            language: "en".to_string(),
            total_score: "1/2".to_string(),
            details: vec![
                QuestionResult {
                    q_no: 1,
                    kind: QuestionType::Mcq,
                    student_answer: "B".to_string(),
                    key_answer: "B".to_string(),
                    score: 1,
                    feedback: "Correct option".to_string(),
                    correct_answer: "B".to_string(),
                    reason_for_wrong: "N/A".to_string(),
                },
                QuestionResult {
                    q_no: 7,
                    kind: QuestionType::Fillblank,
                    student_answer: "LYON".to_string(),
                    key_answer: "Paris".to_string(),
                    score: 0,
                    feedback: "Wrong city".to_string(),
                    correct_answer: "Paris".to_string(),
                    reason_for_wrong: "Wrong city, not the capital".to_string(),
                },
            ],
        }
    }

    #[test]
    fn test_csv_rows() {
        let mut out = Vec::new();
        write_csv(&mut out, &[report("s01")]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "Student ID,Total Score,Language,Q_No,Type,Key Answer,Student Answer,Score,Reason"
        );
        assert_eq!(lines[1], "s01,1/2,en,1,mcq,B,B,1,N/A");
        assert_eq!(
            lines[2],
            "s01,1/2,en,7,fillblank,Paris,LYON,0,\"Wrong city, not the capital\""
        );
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_writes_student_and_summary_files() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("results");
        let reports = vec![report("s01"), report("s02")];

        let path = write_student(&out, &reports[0]).unwrap();
        write_summary(&out, &reports).unwrap();

        assert_eq!(path, out.join("s01.json"));
        let back: StudentReport =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, reports[0]);

        let summary: Vec<StudentReport> =
            serde_json::from_str(&fs::read_to_string(out.join(SUMMARY_JSON)).unwrap()).unwrap();
        assert_eq!(summary.len(), 2);

        let csv = fs::read_to_string(out.join(SUMMARY_CSV)).unwrap();
        assert_eq!(csv.lines().count(), 5);
    }

    #[test]
    fn test_empty_summary_has_header_only() {
        let dir = TempDir::new().unwrap();
        write_summary(dir.path(), &[]).unwrap();

        let csv = fs::read_to_string(dir.path().join(SUMMARY_CSV)).unwrap();
        assert_eq!(csv.lines().count(), 1);
        assert_eq!(
            fs::read_to_string(dir.path().join(SUMMARY_JSON)).unwrap(),
            "[]"
        );
    }
}
