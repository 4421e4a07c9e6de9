//! Pixel confusion matrix with void labels excluded.

use crate::types::{MetricsError, MetricsResult};

/// Rows index the target class, columns the predicted class.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionMatrix {
    nclasses: usize,
    void_labels: Vec<usize>,
    counts: Vec<u64>,
}

impl ConfusionMatrix {
    pub fn new(nclasses: usize, void_labels: &[usize]) -> Self {
        Self {
            nclasses,
            void_labels: void_labels.to_vec(),
            counts: vec![0; nclasses * nclasses],
        }
    }

    pub fn nclasses(&self) -> usize {
        self.nclasses
    }

    fn is_void(&self, class: usize) -> bool {
        self.void_labels.contains(&class)
    }

    /// Accumulate one batch of flattened predictions and targets. Pixels whose
    /// target is void or outside the class range are skipped. A rejected batch
    /// leaves the counts untouched.
    pub fn update(&mut self, pred: &[i32], target: &[i32]) -> MetricsResult<()> {
        if pred.len() != target.len() {
            return Err(MetricsError::LengthMismatch {
                pred: pred.len(),
                target: target.len(),
            });
        }
        let mut cells = Vec::with_capacity(pred.len());
        for (&p, &t) in pred.iter().zip(target) {
            let Ok(t) = usize::try_from(t) else {
                continue;
            };
            if t >= self.nclasses || self.is_void(t) {
                continue;
            }
            let p_idx = usize::try_from(p)
                .ok()
                .filter(|&p| p < self.nclasses)
                .ok_or(MetricsError::LabelOutOfRange {
                    label: p,
                    nclasses: self.nclasses,
                })?;
            cells.push(t * self.nclasses + p_idx);
        }
        for cell in cells {
            self.counts[cell] += 1;
        }
        Ok(())
    }

    pub fn merge(&mut self, other: &ConfusionMatrix) {
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
    }

    pub fn reset(&mut self) {
        self.counts.iter_mut().for_each(|c| *c = 0);
    }

    fn get(&self, target: usize, pred: usize) -> u64 {
        self.counts[target * self.nclasses + pred]
    }

    /// Non-void pixels counted so far.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Fraction of counted pixels predicted correctly; `None` before any update.
    pub fn accuracy(&self) -> Option<f64> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        let correct: u64 = (0..self.nclasses).map(|c| self.get(c, c)).sum();
        Some(correct as f64 / total as f64)
    }

    /// Intersection over union of every non-void class, in class order.
    /// Classes absent from both targets and predictions yield `None`.
    pub fn jaccard_per_class(&self) -> Vec<(usize, Option<f64>)> {
        (0..self.nclasses)
            .filter(|&c| !self.is_void(c))
            .map(|c| {
                let tp = self.get(c, c);
                let fn_: u64 = (0..self.nclasses).map(|p| self.get(c, p)).sum::<u64>() - tp;
                let fp: u64 = (0..self.nclasses).map(|t| self.get(t, c)).sum::<u64>() - tp;
                let union = tp + fp + fn_;
                let iou = (union > 0).then(|| tp as f64 / union as f64);
                (c, iou)
            })
            .collect()
    }

    /// Mean Jaccard over the classes that appeared.
    pub fn mean_jaccard(&self) -> Option<f64> {
        let present: Vec<f64> = self
            .jaccard_per_class()
            .into_iter()
            .filter_map(|(_, j)| j)
            .collect();
        if present.is_empty() {
            return None;
        }
        Some(present.iter().sum::<f64>() / present.len() as f64)
    }
}
