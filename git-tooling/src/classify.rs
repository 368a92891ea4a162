//! Benign-outcome classification.
//!
//! git reports "nothing to do" through free text, sometimes with a non-zero
//! exit. These matchers are the only place that text is interpreted; anything
//! they do not recognize is treated as a real failure.

use crate::GitOutput;

const NOTHING_TO_COMMIT: &[&str] = &["nothing to commit", "nothing added to commit"];

const UP_TO_DATE: &[&str] = &["up to date", "up-to-date"];

/// Complete up-to-date reports; the only text accepted with a non-zero exit.
const UP_TO_DATE_REPORTS: &[&str] = &[
    "Already up to date",
    "Already up-to-date",
    "Everything up-to-date",
];

fn mentions(output: &GitOutput, needles: &[&str]) -> bool {
    needles
        .iter()
        .any(|needle| output.stdout.contains(needle) || output.stderr.contains(needle))
}

/// `git commit` found no staged changes.
pub(crate) fn is_nothing_to_commit(output: &GitOutput) -> bool {
    mentions(output, NOTHING_TO_COMMIT)
}

/// `git pull` / `git push` had nothing to transfer.
///
/// A failed command only counts when every line of its diagnostic is an
/// up-to-date report.
pub(crate) fn is_up_to_date(output: &GitOutput) -> bool {
    if output.success() {
        return mentions(output, UP_TO_DATE);
    }
    let detail = output.detail();
    !detail.is_empty()
        && detail.lines().map(str::trim).all(|line| {
            UP_TO_DATE_REPORTS
                .iter()
                .any(|report| line.starts_with(report))
        })
}
