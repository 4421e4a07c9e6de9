//! Patience-based early stopping on the validation Jaccard.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    /// New best score; the caller should checkpoint this epoch.
    Improved,
    Continue,
    /// `max_patience` epochs passed without improvement.
    Stop,
}

#[derive(Debug, Clone)]
pub struct EarlyStopping {
    max_patience: usize,
    patience: usize,
    best_score: Option<f64>,
    best_epoch: usize,
}

impl EarlyStopping {
    pub fn new(max_patience: usize) -> Self {
        Self {
            max_patience,
            patience: 0,
            best_score: None,
            best_epoch: 0,
        }
    }

    /// Record the validation score of `epoch`. Higher is better.
    pub fn update(&mut self, epoch: usize, val_jaccard: f64) -> StopDecision {
        let improved = match self.best_score {
            None => !val_jaccard.is_nan(),
            Some(best) => val_jaccard > best,
        };
        if improved {
            self.best_score = Some(val_jaccard);
            self.best_epoch = epoch;
            self.patience = 0;
            return StopDecision::Improved;
        }
        self.patience += 1;
        if self.patience >= self.max_patience {
            log::info!(
                "early stopping at epoch {epoch}: no improvement since epoch {}",
                self.best_epoch
            );
            StopDecision::Stop
        } else {
            StopDecision::Continue
        }
    }

    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best_score
    }

    pub fn patience(&self) -> usize {
        self.patience
    }
}
