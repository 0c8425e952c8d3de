// Full-text search engine
// Inverted index over analysed text with fuzzy, prefix (edge n-gram),
// substring (n-gram) and wildcard matching, plus per-document scoring.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// Edge n-grams cover prefixes of these widths.
const EDGE_GRAM_MIN: usize = 2;
const EDGE_GRAM_MAX: usize = 15;
/// Inner n-grams cover substrings of these widths.
const NGRAM_MIN: usize = 3;
const NGRAM_MAX: usize = 8;

/// Characters that mark a query as using explicit search syntax. A query
/// containing none of these (and no field qualifier) is rewritten `*term*`
/// so bare words behave as substring searches.
const SYNTAX_SET: &[char] = &['*', '?', '"', ':', '+', '-', '(', ')', '[', ']', '~', '^'];

/// Match-quality weights folded into the relevance score.
const WEIGHT_EXACT: f32 = 1.0;
const WEIGHT_PREFIX: f32 = 0.8;
const WEIGHT_FUZZY: f32 = 0.7;
const WEIGHT_SUBSTRING: f32 = 0.6;

/// A document handed to the index. The text field is analysed; the rest are
/// stored for display and filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDocument {
    pub id: String,
    pub text: String,
    pub tags: Vec<String>,
    pub category: String,
    pub created_ms: i64,
}

/// A scored hit, ordered by descending relevance.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub category: String,
    pub created_ms: i64,
}

/// Exclude-tags behaviour for a search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagFilter {
    /// Filter out documents carrying the `forget` tag.
    #[default]
    Default,
    /// Filter out documents carrying any of these tags.
    Exclude(Vec<String>),
    /// No tag filtering at all.
    IncludeAll,
}

impl TagFilter {
    fn excludes(&self, tags: &[String]) -> bool {
        match self {
            TagFilter::Default => tags.iter().any(|t| t == "forget"),
            TagFilter::Exclude(set) => tags.iter().any(|t| set.contains(t)),
            TagFilter::IncludeAll => false,
        }
    }
}

/// Stored per-document analysis result.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDoc {
    tags: Vec<String>,
    category: String,
    created_ms: i64,
    /// Token -> term frequency within the document.
    token_freq: HashMap<String, u32>,
    token_total: u32,
}

/// Durable portion of the index.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Segments {
    version: u32,
    docs: HashMap<String, StoredDoc>,
}

/// In-memory index state. The gram tables are derived from the vocabulary
/// and rebuilt on load rather than persisted.
#[derive(Debug, Default)]
struct IndexInner {
    docs: HashMap<String, StoredDoc>,
    /// token -> doc id -> tf
    postings: HashMap<String, HashMap<String, u32>>,
    /// edge n-gram -> tokens beginning with it
    edge_grams: HashMap<String, HashSet<String>>,
    /// inner n-gram -> tokens containing it
    ngrams: HashMap<String, HashSet<String>>,
}

/// Inverted-index full-text engine.
///
/// Three analyser chains are always active on the text field: word tokens
/// with case folding, a fuzzy variant at edit distance 1, and n-gram tables
/// for prefix and substring matching.
pub struct TextIndex {
    index_path: PathBuf,
    inner: RwLock<IndexInner>,
}

impl TextIndex {
    /// Open (or create) the index directory.
    pub async fn open(index_path: impl AsRef<Path>) -> Result<Self> {
        let index_path = index_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&index_path)
            .with_context(|| format!("Failed to create index directory: {}", index_path.display()))?;

        let mut inner = IndexInner::default();
        let segments_path = index_path.join("segments.bin");
        if segments_path.exists() {
            let bytes = std::fs::read(&segments_path)
                .with_context(|| format!("Failed to read index segments: {}", segments_path.display()))?;
            if !bytes.is_empty() {
                match bincode::deserialize::<Segments>(&bytes) {
                    Ok(segments) => {
                        for (id, doc) in segments.docs {
                            Self::link_doc(&mut inner, &id, doc);
                        }
                    }
                    Err(e) => {
                        // A broken index is recoverable via sync_search_index;
                        // start empty rather than failing the open.
                        debug!(path = %segments_path.display(), error = %e, "index segments unreadable, starting empty");
                    }
                }
            }
        }

        Ok(Self {
            index_path,
            inner: RwLock::new(inner),
        })
    }

    /// Tokenize with case folding. Underscores count as word characters so
    /// code identifiers stay whole.
    pub fn tokenize(text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        for c in text.to_lowercase().chars() {
            if c.is_alphanumeric() || c == '_' {
                current.push(c);
            } else if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            tokens.push(current);
        }
        tokens
    }

    fn link_token(inner: &mut IndexInner, token: &str) {
        let chars: Vec<char> = token.chars().collect();
        let max_edge = EDGE_GRAM_MAX.min(chars.len());
        for width in EDGE_GRAM_MIN..=max_edge {
            let gram: String = chars[..width].iter().collect();
            inner
                .edge_grams
                .entry(gram)
                .or_default()
                .insert(token.to_string());
        }
        let max_n = NGRAM_MAX.min(chars.len());
        for width in NGRAM_MIN..=max_n {
            for start in 0..=(chars.len() - width) {
                let gram: String = chars[start..start + width].iter().collect();
                inner
                    .ngrams
                    .entry(gram)
                    .or_default()
                    .insert(token.to_string());
            }
        }
    }

    fn link_doc(inner: &mut IndexInner, id: &str, doc: StoredDoc) {
        for (token, tf) in &doc.token_freq {
            inner
                .postings
                .entry(token.clone())
                .or_default()
                .insert(id.to_string(), *tf);
            Self::link_token(inner, token);
        }
        inner.docs.insert(id.to_string(), doc);
    }

    fn unlink_doc(inner: &mut IndexInner, id: &str) {
        let Some(doc) = inner.docs.remove(id) else {
            return;
        };
        for token in doc.token_freq.keys() {
            let empty = if let Some(postings) = inner.postings.get_mut(token) {
                postings.remove(id);
                postings.is_empty()
            } else {
                false
            };
            if empty {
                inner.postings.remove(token);
                // Gram tables keep dead tokens until the next rebuild; lookups
                // verify against postings so they stay correct.
            }
        }
    }

    /// Add a document, replacing any previous version under the same id.
    pub async fn add(&self, doc: &IndexDocument) -> Result<()> {
        let mut token_freq: HashMap<String, u32> = HashMap::new();
        for token in Self::tokenize(&doc.text) {
            *token_freq.entry(token).or_insert(0) += 1;
        }
        let token_total = token_freq.values().sum();
        let stored = StoredDoc {
            tags: doc.tags.clone(),
            category: doc.category.clone(),
            created_ms: doc.created_ms,
            token_freq,
            token_total,
        };

        let mut inner = self.inner.write().await;
        Self::unlink_doc(&mut inner, &doc.id);
        Self::link_doc(&mut inner, &doc.id, stored);
        self.persist(&inner).await
    }

    /// Remove a document. Succeeds even if the id is unknown.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        Self::unlink_doc(&mut inner, id);
        self.persist(&inner).await
    }

    /// Drop every document.
    pub async fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        *inner = IndexInner::default();
        self.persist(&inner).await
    }

    pub async fn doc_count(&self) -> usize {
        self.inner.read().await.docs.len()
    }

    async fn persist(&self, inner: &IndexInner) -> Result<()> {
        let segments = Segments {
            version: 1,
            docs: inner.docs.clone(),
        };
        let bytes = bincode::serialize(&segments).context("Failed to encode index segments")?;
        let path = self.index_path.join("segments.bin");
        let tmp = self.index_path.join("segments.bin.tmp");
        std::fs::write(&tmp, &bytes)
            .with_context(|| format!("Failed to write index segments: {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to install index segments: {}", path.display()))?;
        Ok(())
    }

    /// True when the query uses none of the explicit search syntax, i.e. it
    /// should be rewritten into substring form.
    pub fn is_simple_query(query: &str) -> bool {
        !query.chars().any(|c| SYNTAX_SET.contains(&c))
    }

    /// Edit distance <= 1 (insert, delete or substitute one character).
    fn within_one_edit(a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        let (a, b): (Vec<char>, Vec<char>) = (a.chars().collect(), b.chars().collect());
        let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
        match long.len() - short.len() {
            0 => {
                let mismatches = short.iter().zip(long.iter()).filter(|(x, y)| x != y).count();
                mismatches <= 1
            }
            1 => {
                let mut i = 0;
                let mut j = 0;
                let mut skipped = false;
                while i < short.len() && j < long.len() {
                    if short[i] == long[j] {
                        i += 1;
                        j += 1;
                    } else if skipped {
                        return false;
                    } else {
                        skipped = true;
                        j += 1;
                    }
                }
                true
            }
            _ => false,
        }
    }

    /// Match text against a `*`-wildcard pattern.
    fn matches_wildcard(text: &str, pattern: &str) -> bool {
        if pattern == "*" {
            return true;
        }
        let parts: Vec<&str> = pattern.split('*').collect();
        let mut pos = 0;
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() {
                continue;
            }
            if i == 0 && !pattern.starts_with('*') {
                if !text.starts_with(part) {
                    return false;
                }
                pos = part.len();
            } else if i == parts.len() - 1 && !pattern.ends_with('*') {
                if !text[pos..].ends_with(part) {
                    return false;
                }
            } else if let Some(found) = text[pos..].find(part) {
                pos += found + part.len();
            } else {
                return false;
            }
        }
        true
    }

    /// Tokens containing `term` as a substring, resolved through the n-gram
    /// table where the term length allows it.
    fn substring_candidates(inner: &IndexInner, term: &str) -> HashSet<String> {
        let len = term.chars().count();
        if (NGRAM_MIN..=NGRAM_MAX).contains(&len) {
            return inner.ngrams.get(term).cloned().unwrap_or_default();
        }
        if len > NGRAM_MAX {
            // Seed with the widest gram, then verify the full term.
            let seed: String = term.chars().take(NGRAM_MAX).collect();
            return inner
                .ngrams
                .get(&seed)
                .map(|tokens| {
                    tokens
                        .iter()
                        .filter(|t| t.contains(term))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
        }
        // Short terms scan the vocabulary.
        inner
            .postings
            .keys()
            .filter(|t| t.contains(term))
            .cloned()
            .collect()
    }

    /// Tokens starting with `term`, resolved through the edge-gram table.
    fn prefix_candidates(inner: &IndexInner, term: &str) -> HashSet<String> {
        let len = term.chars().count();
        if (EDGE_GRAM_MIN..=EDGE_GRAM_MAX).contains(&len) {
            return inner.edge_grams.get(term).cloned().unwrap_or_default();
        }
        if len > EDGE_GRAM_MAX {
            let seed: String = term.chars().take(EDGE_GRAM_MAX).collect();
            return inner
                .edge_grams
                .get(&seed)
                .map(|tokens| {
                    tokens
                        .iter()
                        .filter(|t| t.starts_with(term))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
        }
        inner
            .postings
            .keys()
            .filter(|t| t.starts_with(term))
            .cloned()
            .collect()
    }

    /// Vocabulary tokens matching one query term, with match-quality weights.
    fn term_matches(inner: &IndexInner, term: &str) -> HashMap<String, f32> {
        let mut matches: HashMap<String, f32> = HashMap::new();
        let mut note = |token: String, weight: f32| {
            let slot = matches.entry(token).or_insert(0.0);
            if weight > *slot {
                *slot = weight;
            }
        };

        if term.contains('*') || term.contains('?') {
            let pattern = term.replace('?', "*");
            let bare = pattern.trim_matches('*');
            if !bare.is_empty() && pattern == format!("*{bare}*") {
                // `*term*` resolves through the n-gram table; an exact token
                // hit still outranks the substring ones.
                for token in Self::substring_candidates(inner, bare) {
                    let weight = if token == bare {
                        WEIGHT_EXACT
                    } else {
                        WEIGHT_SUBSTRING
                    };
                    note(token, weight);
                }
            } else {
                for token in inner.postings.keys() {
                    if Self::matches_wildcard(token, &pattern) {
                        note(token.clone(), WEIGHT_SUBSTRING);
                    }
                }
            }
            return matches;
        }

        if inner.postings.contains_key(term) {
            note(term.to_string(), WEIGHT_EXACT);
        }
        for token in Self::prefix_candidates(inner, term) {
            if token != term {
                note(token, WEIGHT_PREFIX);
            }
        }
        // Fuzzy pass over tokens of comparable length.
        let term_len = term.chars().count();
        for token in inner.postings.keys() {
            let len = token.chars().count();
            if len + 1 >= term_len && term_len + 1 >= len && Self::within_one_edit(term, token) {
                if token != term {
                    note(token.clone(), WEIGHT_FUZZY);
                }
            }
        }
        matches
    }

    /// Scored search.
    ///
    /// Queries of simple tokens are wrapped `*term*` for substring
    /// behaviour. Hits are ordered by descending score and filtered by the
    /// exclude-tags set before `limit` applies (0 = unlimited).
    pub async fn search_with_score(
        &self,
        query: &str,
        min_score: f32,
        filter: &TagFilter,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let inner = self.inner.read().await;

        let raw_terms = Self::tokenize_query(query);
        if raw_terms.is_empty() {
            // Match-all: an empty query lists every (unexcluded) document,
            // newest first, so search is empty exactly when the store is.
            let mut hits: Vec<SearchHit> = inner
                .docs
                .iter()
                .filter(|(_, doc)| !filter.excludes(&doc.tags))
                .map(|(id, doc)| SearchHit {
                    id: id.clone(),
                    score: 0.0,
                    category: doc.category.clone(),
                    created_ms: doc.created_ms,
                })
                .collect();
            hits.sort_by(|a, b| b.created_ms.cmp(&a.created_ms).then_with(|| a.id.cmp(&b.id)));
            if limit > 0 && hits.len() > limit {
                hits.truncate(limit);
            }
            return Ok(hits);
        }
        let simple = Self::is_simple_query(query);
        let terms: Vec<String> = raw_terms
            .into_iter()
            .map(|t| if simple { format!("*{t}*") } else { t })
            .collect();

        let mut scores: HashMap<String, f32> = HashMap::new();
        for term in &terms {
            let token_weights = Self::term_matches(&inner, term);
            // Accumulate per-document best contribution for this term.
            let mut per_doc: HashMap<String, f32> = HashMap::new();
            for (token, weight) in token_weights {
                if let Some(postings) = inner.postings.get(&token) {
                    for (doc_id, tf) in postings {
                        let doc = match inner.docs.get(doc_id) {
                            Some(d) => d,
                            None => continue,
                        };
                        let norm = (doc.token_total.max(1) as f32).sqrt();
                        let contribution = weight * (*tf as f32) / norm;
                        let slot = per_doc.entry(doc_id.clone()).or_insert(0.0);
                        if contribution > *slot {
                            *slot = contribution;
                        }
                    }
                }
            }
            for (doc_id, contribution) in per_doc {
                *scores.entry(doc_id).or_insert(0.0) += contribution;
            }
        }

        let mut hits: Vec<SearchHit> = scores
            .into_iter()
            .filter_map(|(id, score)| {
                let doc = inner.docs.get(&id)?;
                if filter.excludes(&doc.tags) || score < min_score {
                    return None;
                }
                Some(SearchHit {
                    id,
                    score,
                    category: doc.category.clone(),
                    created_ms: doc.created_ms,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.created_ms.cmp(&a.created_ms))
        });
        if limit > 0 && hits.len() > limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }

    /// Split a query into terms, preserving wildcard characters.
    fn tokenize_query(query: &str) -> Vec<String> {
        query
            .to_lowercase()
            .split(|c: char| c.is_whitespace())
            .map(|t| {
                t.trim_matches(|c: char| {
                    !(c.is_alphanumeric() || c == '_' || c == '*' || c == '?')
                })
                .to_string()
            })
            .filter(|t| !t.is_empty() && t.chars().any(|c| c.is_alphanumeric() || c == '*'))
            .collect()
    }
}
