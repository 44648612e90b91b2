//! Filler-word selection: a naive-Bayes classifier over a labelled corpus.
//!
//! Each training row pairs a user utterance with the short acknowledgement
//! a human agent would interject ("mhm", "okay", ...). At call time the
//! current utterance is classified and the winning word is spoken before
//! the full reply, masking generation latency. Corpus curation happens
//! offline; this module only trains from the shipped JSONL file at
//! startup and scores at runtime.

use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::error::{CoreError, CoreResult};

/// One labelled corpus row.
#[derive(Debug, Deserialize)]
pub struct TrainingRow {
    pub user: String,
    #[serde(default)]
    pub assistant: String,
    pub filler_word: String,
}

/// Multinomial naive Bayes with Laplace smoothing. Classes are filler
/// words; documents are user utterances.
#[derive(Debug, Default)]
pub struct FillerClassifier {
    class_docs: HashMap<String, usize>,
    class_tokens: HashMap<String, HashMap<String, usize>>,
    class_token_totals: HashMap<String, usize>,
    vocabulary: HashSet<String>,
    total_docs: usize,
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

impl FillerClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Train from a JSONL corpus; malformed lines are logged and skipped.
    pub fn from_jsonl_path(path: &Path) -> CoreResult<Self> {
        let file = std::fs::File::open(path)?;
        let mut classifier = Self::new();
        for (lineno, line) in std::io::BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TrainingRow>(&line) {
                Ok(row) => classifier.train(&row.user, &row.filler_word),
                Err(e) => warn!("skipping malformed corpus line {}: {e}", lineno + 1),
            }
        }
        if classifier.total_docs == 0 {
            return Err(CoreError::Classifier(format!(
                "corpus {} contained no usable rows",
                path.display()
            )));
        }
        Ok(classifier)
    }

    pub fn train(&mut self, text: &str, class: &str) {
        *self.class_docs.entry(class.to_string()).or_default() += 1;
        self.total_docs += 1;
        let tokens = self.class_tokens.entry(class.to_string()).or_default();
        let total = self.class_token_totals.entry(class.to_string()).or_default();
        for token in tokenize(text) {
            self.vocabulary.insert(token.clone());
            *tokens.entry(token).or_default() += 1;
            *total += 1;
        }
    }

    pub fn is_trained(&self) -> bool {
        self.total_docs > 0
    }

    /// Normalized posterior per class plus the argmax class.
    pub fn probabilities(&self, text: &str) -> (HashMap<String, f64>, String) {
        if self.total_docs == 0 {
            return (HashMap::new(), String::new());
        }
        let tokens: Vec<String> = tokenize(text).collect();
        let vocab_size = self.vocabulary.len() as f64;

        // Log-space joint likelihoods, then softmax-normalize.
        let mut log_scores: HashMap<String, f64> = HashMap::new();
        for (class, docs) in &self.class_docs {
            let prior = (*docs as f64 / self.total_docs as f64).ln();
            let token_counts = &self.class_tokens[class];
            let token_total = self.class_token_totals[class] as f64;
            let mut score = prior;
            for token in &tokens {
                let count = token_counts.get(token).copied().unwrap_or(0) as f64;
                score += ((count + 1.0) / (token_total + vocab_size)).ln();
            }
            log_scores.insert(class.clone(), score);
        }

        let max = log_scores.values().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mut probs: HashMap<String, f64> = log_scores
            .iter()
            .map(|(c, s)| (c.clone(), (s - max).exp()))
            .collect();
        let sum: f64 = probs.values().sum();
        for v in probs.values_mut() {
            *v /= sum;
        }

        let best = log_scores
            .into_iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(c, _)| c)
            .unwrap_or_default();
        (probs, best)
    }

    /// The filler word to interject before the full reply, or `None`.
    ///
    /// Utterances of four words or fewer get no filler (the reply will be
    /// fast enough). With a whitelist, pick the highest-probability
    /// whitelisted class that differs from the previously spoken filler.
    pub fn filler_word(
        &self,
        user_message: &str,
        whitelist: &[String],
        previous: &str,
    ) -> Option<String> {
        if user_message.split_whitespace().count() <= 4 {
            return None;
        }
        let (probs, best) = self.probabilities(user_message);
        if best.is_empty() {
            return None;
        }
        if whitelist.is_empty() {
            return Some(best);
        }
        probs
            .into_iter()
            .filter(|(word, _)| whitelist.iter().any(|w| w == word) && word != previous)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(word, _)| word)
    }
}
