//! CSV projection of a finished batch, ranked by score.

use crate::screening::models::ScoreResult;

const HEADER: [&str; 6] = [
    "Rank",
    "Filename",
    "Score",
    "Matching Skills",
    "Missing Skills",
    "Summary",
];

/// Renders results as CSV, best score first. Equal scores keep their
/// original order, and ranks are renumbered 1..N from the sorted order.
pub fn export_csv(results: &[ScoreResult]) -> Result<Vec<u8>, csv::Error> {
    let mut ranked: Vec<&ScoreResult> = results.iter().collect();
    // sort_by is stable
    ranked.sort_by(|a, b| b.score.cmp(&a.score));

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(HEADER)?;

    for (index, result) in ranked.iter().enumerate() {
        writer.write_record([
            (index + 1).to_string(),
            result.filename.clone(),
            result.score.to_string(),
            result.matching_skills.join(", "),
            result.missing_skills.join(", "),
            result.summary.clone(),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}
