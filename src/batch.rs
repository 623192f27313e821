//! Grade a directory of answer sheets against one question paper and key.

use crate::error::SheetError;
use crate::grading::{Collaborators, SheetEvaluator, StudentReport, Template};
use crate::preprocessing::{self, EnhancementParameters, Pipeline};
use crate::report;
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

const SHEET_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "tif", "tiff"];

#[derive(Debug, Clone)]
pub struct BatchJob {
    pub question_paper: PathBuf,
    pub answer_key: PathBuf,
    pub sheets_dir: PathBuf,
    /// Template file; the default layout is written here when missing
    pub template: PathBuf,
    pub output_dir: PathBuf,
    /// Deskew and enhance every page with these parameters before grading
    pub preprocess: Option<EnhancementParameters>,
}

/// Grade every sheet in `job.sheets_dir` and write the result files.
///
/// Sheets that cannot be read are logged and left out of the summary.
pub fn process_batch(
    job: &BatchJob,
    collaborators: &Collaborators,
) -> Result<Vec<StudentReport>, SheetError> {
    let start = Instant::now();
    let pipeline = job.preprocess.clone().map(Pipeline::new).transpose()?;
    let sheets = list_sheets(&job.sheets_dir)?;

    let template = Template::load_or_generate(&job.template)?;
    let question_paper = load_page(&job.question_paper, pipeline.as_ref())?;
    let answer_key = load_page(&job.answer_key, pipeline.as_ref())?;

    let evaluator = SheetEvaluator::prepare(&question_paper, &answer_key, template, collaborators)?;
    tracing::info!("Using language: {}", evaluator.language());

    let mut reports = Vec::with_capacity(sheets.len());
    for path in &sheets {
        let student_id = student_id(path);
        let sheet = match load_page(path, pipeline.as_ref()) {
            Ok(sheet) => sheet,
            Err(e) => {
                tracing::error!("Error processing {}: {}", path.display(), e);
                continue;
            }
        };

        let result = evaluator.evaluate(&student_id, &sheet);
        report::write_student(&job.output_dir, &result)?;
        reports.push(result);
    }

    report::write_summary(&job.output_dir, &reports)?;
    tracing::info!(
        "Graded {} of {} sheets in {}ms",
        reports.len(),
        sheets.len(),
        start.elapsed().as_millis()
    );
    Ok(reports)
}

/// Answer sheet images in `dir`, sorted by file name
pub fn list_sheets(dir: &Path) -> Result<Vec<PathBuf>, SheetError> {
    let entries = fs::read_dir(dir).map_err(|e| {
        SheetError::Configuration(format!("Cannot read sheet directory {}: {}", dir.display(), e))
    })?;

    let mut sheets: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_sheet_image(path))
        .collect();
    sheets.sort();
    Ok(sheets)
}

fn is_sheet_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SHEET_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn student_id(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn load_page(path: &Path, pipeline: Option<&Pipeline>) -> Result<RgbImage, SheetError> {
    let image = preprocessing::open(path)?;
    match pipeline {
        Some(pipeline) => {
            let enhanced = pipeline.process(&image)?;
            tracing::debug!("{}: corrected {:.2} degrees", path.display(), enhanced.tilt);
            Ok(enhanced.image)
        }
        None => Ok(image),
    }
}
