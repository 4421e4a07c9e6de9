//! Dataset validation and quality checks.

use crate::discovery::{list_filenames, SplitPaths, IMAGE_EXT, MASK_EXT};
use crate::loader::load_pair;
use crate::types::{
    DatasetDescriptor, DatasetError, DatasetResult, Split, SplitSummary, ValidationOutcome,
    ValidationReport, ValidationThresholds,
};
use std::collections::BTreeSet;
use std::path::Path;

/// Pair every image of a split with its mask and decode both.
pub fn summarize_split(
    root: &Path,
    split: Split,
    descriptor: &DatasetDescriptor,
) -> DatasetResult<SplitSummary> {
    let paths = SplitPaths::new(root, split);
    let images: BTreeSet<String> = list_filenames(&paths.image_dir, IMAGE_EXT)?
        .into_iter()
        .collect();
    let masks: BTreeSet<String> = if paths.mask_dir.exists() {
        list_filenames(&paths.mask_dir, MASK_EXT)?
            .into_iter()
            .collect()
    } else {
        BTreeSet::new()
    };

    let mut summary = SplitSummary {
        split: Some(split),
        images: images.len(),
        masks: masks.len(),
        missing_mask: images.difference(&masks).count(),
        orphan_mask: masks.difference(&images).count(),
        ..Default::default()
    };
    for name in images.intersection(&masks) {
        match load_pair(&paths, name, descriptor) {
            Ok(_) => summary.paired += 1,
            Err(DatasetError::ShapeMismatch { .. }) => summary.shape_mismatch += 1,
            Err(e) => {
                log::warn!("[dataset] {split}/{name}: {e}");
                summary.undecodable += 1;
            }
        }
    }
    Ok(summary)
}

/// Summaries of every split directory present under `root`.
pub fn summarize_root(
    root: &Path,
    descriptor: &DatasetDescriptor,
) -> DatasetResult<Vec<SplitSummary>> {
    let mut out = Vec::new();
    for split in Split::ALL {
        if !SplitPaths::new(root, split).image_dir.exists() {
            continue;
        }
        out.push(summarize_split(root, split, descriptor)?);
    }
    Ok(out)
}

fn apply_threshold(
    label: &str,
    count: usize,
    max_count: Option<usize>,
    outcome: &mut ValidationOutcome,
    reasons: &mut Vec<String>,
) {
    if let Some(max) = max_count {
        if count > max {
            *outcome = ValidationOutcome::Fail;
            reasons.push(format!("{label}: {count} exceeds max {max}"));
            return;
        }
    }
    if count > 0 {
        if *outcome == ValidationOutcome::Pass {
            *outcome = ValidationOutcome::Warn;
        }
        reasons.push(format!("{label}: {count} observed"));
    }
}

pub fn validate_summary(
    summary: SplitSummary,
    thresholds: &ValidationThresholds,
) -> ValidationReport {
    let mut outcome = ValidationOutcome::Pass;
    let mut reasons = Vec::new();

    apply_threshold(
        "images without mask",
        summary.missing_mask,
        thresholds.max_missing_mask,
        &mut outcome,
        &mut reasons,
    );
    apply_threshold(
        "masks without image",
        summary.orphan_mask,
        thresholds.max_orphan_mask,
        &mut outcome,
        &mut reasons,
    );
    apply_threshold(
        "undecodable pairs",
        summary.undecodable,
        thresholds.max_undecodable,
        &mut outcome,
        &mut reasons,
    );
    apply_threshold(
        "image/mask shape mismatches",
        summary.shape_mismatch,
        thresholds.max_shape_mismatch,
        &mut outcome,
        &mut reasons,
    );
    if let Some(max_r) = thresholds.max_missing_ratio {
        let ratio = summary.missing_mask as f32 / summary.images.max(1) as f32;
        if ratio > max_r {
            outcome = ValidationOutcome::Fail;
            reasons.push(format!(
                "missing mask ratio {:.3} exceeds max {:.3}",
                ratio, max_r
            ));
        }
    }

    ValidationReport {
        outcome,
        reasons,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_summary_passes() {
        let summary = SplitSummary {
            images: 4,
            masks: 4,
            paired: 4,
            ..Default::default()
        };
        let report = validate_summary(summary, &ValidationThresholds::strict());
        assert_eq!(report.outcome, ValidationOutcome::Pass);
        assert!(report.reasons.is_empty());
    }

    #[test]
    fn issues_warn_without_thresholds_and_fail_with_them() {
        let summary = SplitSummary {
            images: 4,
            masks: 3,
            paired: 3,
            missing_mask: 1,
            ..Default::default()
        };
        let warn = validate_summary(summary.clone(), &ValidationThresholds::default());
        assert_eq!(warn.outcome, ValidationOutcome::Warn);
        let fail = validate_summary(summary, &ValidationThresholds::strict());
        assert_eq!(fail.outcome, ValidationOutcome::Fail);
        assert!(fail.reasons[0].contains("images without mask"));
    }
}
