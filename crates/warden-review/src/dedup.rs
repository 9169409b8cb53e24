//! Semantic dedup of review comments.
//!
//! New comments are first deduplicated against each other, then against
//! comments already posted on the pull request. Similarity is cosine
//! similarity of comment embeddings, gated by file and line distance.

use std::sync::Arc;

use tracing::{debug, warn};
use warden_codelens::embedding::Embedder;
use warden_codelens::similarity::similarity_matrix;
use warden_core::{DedupConfig, ReviewComment, WardenError};

/// Whether two comments say the same thing about the same place.
///
/// Comments on different files are never similar. On the same file they are
/// similar above `high_similarity`, or above `low_similarity` when fewer
/// than `line_window` lines apart.
///
/// # Examples
///
/// ```
/// use warden_core::{DedupConfig, ReviewComment, ChangeStatus};
/// use warden_review::dedup::is_similar;
///
/// let at = |line| ReviewComment {
///     filename: "main.tf".into(),
///     line_number: line,
///     comment: "x".into(),
///     status: ChangeStatus::Added,
/// };
/// let config = DedupConfig::default();
/// assert!(is_similar(&at(10), &at(12), 0.85, &config));
/// assert!(!is_similar(&at(10), &at(30), 0.85, &config));
/// assert!(is_similar(&at(10), &at(30), 0.95, &config));
/// ```
pub fn is_similar(
    a: &ReviewComment,
    b: &ReviewComment,
    score: f32,
    config: &DedupConfig,
) -> bool {
    if a.filename != b.filename {
        return false;
    }
    let nearby = a.line_number.abs_diff(b.line_number) < config.line_window;
    score > config.high_similarity || (score > config.low_similarity && nearby)
}

/// Filter `new` against itself and against `existing`, given precomputed
/// similarity matrices.
///
/// `self_scores[i][j]` compares `new[i]` with `new[j]`; `history_scores[i][k]`
/// compares `new[i]` with `existing[k]`. The earliest of a group of similar
/// new comments survives. If every new comment is dropped, a single
/// PR-level placeholder is returned instead; empty input gives empty output.
///
/// # Examples
///
/// ```
/// use warden_core::{DedupConfig, ReviewComment};
/// use warden_review::dedup::dedup_with_scores;
///
/// let at_line_10 = |text: &str| ReviewComment {
///     filename: "a.tf".into(),
///     line_number: 10,
///     comment: text.into(),
///     status: Default::default(),
/// };
/// let existing = vec![at_line_10("X")];
/// let new = vec![at_line_10("X (rephrased)")];
/// let config = DedupConfig::default();
///
/// let kept = dedup_with_scores(&existing, &new, &[vec![1.0]], &[vec![0.95]], &config);
/// assert_eq!(kept, vec![ReviewComment::pr_level("No new issues found.")]);
/// ```
pub fn dedup_with_scores(
    existing: &[ReviewComment],
    new: &[ReviewComment],
    self_scores: &[Vec<f32>],
    history_scores: &[Vec<f32>],
    config: &DedupConfig,
) -> Vec<ReviewComment> {
    if new.is_empty() {
        return Vec::new();
    }

    let mut excluded = vec![false; new.len()];
    for i in 0..new.len() {
        if excluded[i] {
            continue;
        }
        for j in (i + 1)..new.len() {
            if !excluded[j] && is_similar(&new[i], &new[j], self_scores[i][j], config) {
                debug!(kept = i, dropped = j, score = self_scores[i][j], "duplicate new comment");
                excluded[j] = true;
            }
        }
    }

    let kept: Vec<ReviewComment> = new
        .iter()
        .enumerate()
        .filter(|(i, _)| !excluded[*i])
        .filter(|(i, comment)| {
            let seen = existing
                .iter()
                .enumerate()
                .any(|(k, old)| is_similar(comment, old, history_scores[*i][k], config));
            if seen {
                debug!(index = i, "comment already posted");
            }
            !seen
        })
        .map(|(_, comment)| comment.clone())
        .collect();

    if kept.is_empty() {
        return vec![ReviewComment::pr_level(config.placeholder.clone())];
    }
    kept
}

/// Drops near-duplicate comments using an embedding service.
///
/// Fails open: if embeddings cannot be computed the new comments are
/// returned unfiltered.
#[derive(Clone)]
pub struct CommentDeduplicator {
    embedder: Arc<dyn Embedder>,
    config: DedupConfig,
}

impl CommentDeduplicator {
    /// Create a deduplicator over `embedder` with the given thresholds.
    pub fn new(embedder: Arc<dyn Embedder>, config: DedupConfig) -> Self {
        Self { embedder, config }
    }

    /// The thresholds in use.
    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Filter `new` against itself and `existing`.
    pub async fn filter(
        &self,
        existing: &[ReviewComment],
        new: &[ReviewComment],
    ) -> Vec<ReviewComment> {
        if new.is_empty() {
            return Vec::new();
        }

        match self.scores(existing, new).await {
            Ok((self_scores, history_scores)) => {
                let kept =
                    dedup_with_scores(existing, new, &self_scores, &history_scores, &self.config);
                debug!(before = new.len(), after = kept.len(), "deduplicated comments");
                kept
            }
            Err(e) => {
                warn!(error = %e, "similarity unavailable, keeping all new comments");
                new.to_vec()
            }
        }
    }

    async fn scores(
        &self,
        existing: &[ReviewComment],
        new: &[ReviewComment],
    ) -> Result<(Vec<Vec<f32>>, Vec<Vec<f32>>), WardenError> {
        let texts: Vec<String> = new
            .iter()
            .chain(existing)
            .map(|c| c.comment.clone())
            .collect();
        let mut vectors = self.embedder.encode(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(WardenError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        let old_vectors = vectors.split_off(new.len());
        Ok((
            similarity_matrix(&vectors, &vectors),
            similarity_matrix(&vectors, &old_vectors),
        ))
    }
}
