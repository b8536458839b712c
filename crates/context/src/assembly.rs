//! Context Assembler - Builds the final, budget-fitted context
//!
//! Provides:
//! - Near-duplicate removal (Ratcliff/Obershelp similarity)
//! - Adjacent chunk merging within a page
//! - Token budget management with sentence-aware truncation
//! - Source attribution with compressed page ranges

use crate::stage::StageOutcome;
use docrag_common::errors::{AppError, Result};
use docrag_common::metrics;
use docrag_common::RetrievedChunk;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Instant;
use tracing::{info, warn};

/// Default separator between chunk texts
pub const DEFAULT_SEPARATOR: &str = "\n\n---\n\n";

/// One source file used by the context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSource {
    pub file_id: i64,
    pub file_name: String,
    /// Distinct positive page numbers
    pub pages: BTreeSet<i32>,
}

/// Chunk rendered for the answer-generation component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextDocument {
    pub page_content: String,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub file_id: i64,
    pub file_name: String,
    pub page: i32,
    pub chunk_id: String,
    pub score: f32,
}

/// Final context handed to answer generation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssembledContext {
    pub chunks: Vec<RetrievedChunk>,
    pub total_tokens: usize,
    pub file_sources: Vec<FileSource>,
}

impl AssembledContext {
    /// Context with no chunks
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunk texts joined with `separator`
    pub fn text(&self, separator: &str) -> String {
        self.chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(separator)
    }

    /// Human-readable source block, empty when there are no sources
    pub fn source_attribution(&self) -> String {
        if self.file_sources.is_empty() {
            return String::new();
        }

        let lines: Vec<String> = self
            .file_sources
            .iter()
            .map(|source| {
                if source.pages.is_empty() {
                    format!("- {}", source.file_name)
                } else {
                    format!("- {} (pages: {})", source.file_name, format_page_ranges(&source.pages))
                }
            })
            .collect();

        format!("Sources:\n{}", lines.join("\n"))
    }

    pub fn to_documents(&self) -> Vec<ContextDocument> {
        self.chunks
            .iter()
            .map(|chunk| ContextDocument {
                page_content: chunk.text.clone(),
                metadata: DocumentMetadata {
                    file_id: chunk.file_id,
                    file_name: chunk.file_name.clone(),
                    page: chunk.page,
                    chunk_id: chunk.chunk_id.clone(),
                    score: chunk.score,
                },
            })
            .collect()
    }
}

/// Render pages with consecutive runs compressed, e.g. `1, 3, 5–7`
pub fn format_page_ranges(pages: &BTreeSet<i32>) -> String {
    let mut parts = Vec::new();
    let mut iter = pages.iter().copied();

    let Some(first) = iter.next() else {
        return String::new();
    };

    let (mut start, mut end) = (first, first);
    for page in iter {
        if page == end + 1 {
            end = page;
            continue;
        }
        parts.push(render_run(start, end));
        start = page;
        end = page;
    }
    parts.push(render_run(start, end));

    parts.join(", ")
}

fn render_run(start: i32, end: i32) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{}–{}", start, end)
    }
}

/// Context assembler configuration
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Similarity at or above which two chunks are duplicates
    pub similarity_threshold: f64,

    /// Characters compared for similarity
    pub compare_chars: usize,

    /// Characters per estimated token
    pub chars_per_token: usize,

    /// Smallest partial chunk worth including, in characters
    pub min_partial_chars: usize,

    /// Chunks kept when assembly fails
    pub fallback_chunks: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            compare_chars: 500,
            chars_per_token: 4,
            min_partial_chars: 100,
            fallback_chunks: 10,
        }
    }
}

/// Context assembler
#[derive(Debug, Clone, Default)]
pub struct ContextAssembler {
    config: AssemblerConfig,
}

impl ContextAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self { config }
    }

    /// Assemble the final context. Never fails: on an internal error the
    /// first chunks are returned unprocessed.
    pub fn assemble(
        &self,
        chunks: Vec<RetrievedChunk>,
        max_tokens: usize,
        dedupe: bool,
        merge: bool,
    ) -> AssembledContext {
        self.assemble_outcome(chunks, max_tokens, dedupe, merge).output
    }

    /// Assemble as a pipeline stage, reporting whether the fallback was used
    pub fn assemble_outcome(
        &self,
        chunks: Vec<RetrievedChunk>,
        max_tokens: usize,
        dedupe: bool,
        merge: bool,
    ) -> StageOutcome<AssembledContext> {
        match self.try_assemble(chunks.clone(), max_tokens, dedupe, merge) {
            Ok(context) => StageOutcome::ok(context),
            Err(e) => {
                warn!(error = %e, "Context assembly failed, using unprocessed chunks");
                StageOutcome::failed(self.fallback(chunks), e)
            }
        }
    }

    /// Assemble, reporting internal failures
    pub fn try_assemble(
        &self,
        chunks: Vec<RetrievedChunk>,
        max_tokens: usize,
        dedupe: bool,
        merge: bool,
    ) -> Result<AssembledContext> {
        let start = Instant::now();
        let input_count = chunks.len();

        if chunks.is_empty() {
            return Ok(AssembledContext::empty());
        }

        if let Some(bad) = chunks.iter().find(|c| !c.score.is_finite()) {
            return Err(AppError::Assembly {
                message: format!("chunk {} has non-finite score {}", bad.chunk_id, bad.score),
            });
        }

        let mut processed = unique_ids(chunks);

        if dedupe {
            processed = self.deduplicate(processed);
        }

        if merge {
            processed = merge_adjacent(processed);
        }

        let processed = self.fit_budget(processed, max_tokens);
        let context = self.build(processed);

        metrics::record_context_tokens(context.total_tokens);
        info!(
            input_chunks = input_count,
            output_chunks = context.chunks.len(),
            total_tokens = context.total_tokens,
            num_sources = context.file_sources.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Context assembly completed"
        );

        Ok(context)
    }

    /// Keep the best-scoring chunk of every group of near-duplicates
    pub fn deduplicate(&self, mut chunks: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
        if chunks.len() <= 1 {
            return chunks;
        }

        chunks.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut kept = Vec::with_capacity(chunks.len());
        let mut seen: Vec<Vec<char>> = Vec::new();

        for chunk in chunks {
            let head = self.comparable(&chunk.text);
            let duplicate = seen
                .iter()
                .any(|other| similarity(&head, other) >= self.config.similarity_threshold);

            if !duplicate {
                seen.push(head);
                kept.push(chunk);
            }
        }

        kept
    }

    fn comparable(&self, text: &str) -> Vec<char> {
        let head: String = text.trim().chars().take(self.config.compare_chars).collect();
        head.to_lowercase().chars().collect()
    }

    fn estimate_tokens(&self, text: &str) -> usize {
        text.chars().count() / self.config.chars_per_token
    }

    /// Take chunks in order until the budget is spent; the first chunk that
    /// does not fit may be included as a truncated prefix.
    pub fn fit_budget(&self, chunks: Vec<RetrievedChunk>, max_tokens: usize) -> Vec<RetrievedChunk> {
        let mut result = Vec::new();
        let mut current = 0;

        for mut chunk in chunks {
            let tokens = self.estimate_tokens(&chunk.text);

            if current + tokens <= max_tokens {
                current += tokens;
                result.push(chunk);
                continue;
            }

            let remaining_chars = max_tokens.saturating_sub(current) * self.config.chars_per_token;
            if remaining_chars > self.config.min_partial_chars {
                let prefix: Vec<char> = chunk.text.chars().take(remaining_chars).collect();
                let cut = prefix
                    .iter()
                    .rposition(|c| *c == '.')
                    .filter(|&pos| pos * 2 > remaining_chars)
                    .map(|pos| pos + 1)
                    .unwrap_or(prefix.len());

                let mut text: String = prefix[..cut].iter().collect();
                text.push_str("...");
                chunk.text = text;
                result.push(chunk);
            }
            break;
        }

        result
    }

    fn build(&self, chunks: Vec<RetrievedChunk>) -> AssembledContext {
        let total_tokens = chunks.iter().map(|c| self.estimate_tokens(&c.text)).sum();
        let file_sources = extract_sources(&chunks);
        AssembledContext { chunks, total_tokens, file_sources }
    }

    fn fallback(&self, chunks: Vec<RetrievedChunk>) -> AssembledContext {
        let mut chunks = unique_ids(chunks);
        chunks.truncate(self.config.fallback_chunks);
        self.build(chunks)
    }
}

/// Drop later chunks repeating an earlier `chunk_id`
fn unique_ids(chunks: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
    let mut seen = HashSet::new();
    chunks
        .into_iter()
        .filter(|chunk| seen.insert(chunk.chunk_id.clone()))
        .collect()
}

/// Merge consecutive chunks of the same file and page, then re-sort by score
pub fn merge_adjacent(chunks: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
    if chunks.len() <= 1 {
        return chunks;
    }

    let mut order: Vec<i64> = Vec::new();
    let mut groups: HashMap<i64, Vec<RetrievedChunk>> = HashMap::new();
    for chunk in chunks {
        if !groups.contains_key(&chunk.file_id) {
            order.push(chunk.file_id);
        }
        groups.entry(chunk.file_id).or_default().push(chunk);
    }

    let mut merged = Vec::new();
    for file_id in order {
        let Some(mut group) = groups.remove(&file_id) else {
            continue;
        };
        group.sort_by_key(|c| (c.page, c.chunk_index));

        // The accumulator keeps its first chunk's index, so at most one
        // successor is absorbed into it
        let mut current: Option<RetrievedChunk> = None;
        for chunk in group {
            match current.as_mut() {
                Some(acc) if chunk.page == acc.page && chunk.chunk_index == acc.chunk_index + 1 => {
                    acc.text.push_str("\n\n");
                    acc.text.push_str(&chunk.text);
                    acc.score = acc.score.max(chunk.score);
                }
                _ => {
                    if let Some(done) = current.replace(chunk) {
                        merged.push(done);
                    }
                }
            }
        }
        if let Some(done) = current {
            merged.push(done);
        }
    }

    merged.sort_by(|a, b| b.score.total_cmp(&a.score));
    merged
}

/// Group chunks by file in first-appearance order
pub fn extract_sources(chunks: &[RetrievedChunk]) -> Vec<FileSource> {
    let mut sources: Vec<FileSource> = Vec::new();

    for chunk in chunks {
        let position = match sources.iter().position(|s| s.file_id == chunk.file_id) {
            Some(position) => position,
            None => {
                sources.push(FileSource {
                    file_id: chunk.file_id,
                    file_name: chunk.file_name.clone(),
                    pages: BTreeSet::new(),
                });
                sources.len() - 1
            }
        };

        if chunk.page > 0 {
            sources[position].pages.insert(chunk.page);
        }
    }

    sources
}

/// Sequences at least this long have their popular characters pruned from
/// the match index
const AUTOJUNK_MIN_LEN: usize = 200;

/// Ratcliff/Obershelp ratio `2·M / T` over characters.
///
/// When `b` has at least 200 characters, any character occurring more than
/// `len / 100 + 1` times in it cannot seed a match. It can still extend one.
pub fn similarity(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }

    let mut positions: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, c) in b.iter().enumerate() {
        positions.entry(*c).or_default().push(j);
    }
    if b.len() >= AUTOJUNK_MIN_LEN {
        let popular = b.len() / 100 + 1;
        positions.retain(|_, js| js.len() <= popular);
    }

    let mut matched = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, size) = longest_match(a, b, &positions, alo, ahi, blo, bhi);
        if size == 0 {
            continue;
        }
        matched += size;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + size < ahi && j + size < bhi {
            pending.push((i + size, ahi, j + size, bhi));
        }
    }

    2.0 * matched as f64 / total as f64
}

/// Longest common block of `a[alo..ahi]` and `b[blo..bhi]`, earliest in `a` on ties.
/// The block found through `positions` is then widened over equal neighbours.
fn longest_match(
    a: &[char],
    b: &[char],
    positions: &HashMap<char, Vec<usize>>,
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0);
    let mut run_lengths: HashMap<usize, usize> = HashMap::new();

    for (i, c) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut next = HashMap::new();
        if let Some(js) = positions.get(c) {
            for &j in js {
                if j < blo {
                    continue;
                }
                if j >= bhi {
                    break;
                }
                let size = j
                    .checked_sub(1)
                    .and_then(|prev| run_lengths.get(&prev))
                    .copied()
                    .unwrap_or(0)
                    + 1;
                next.insert(j, size);
                if size > best_size {
                    best_i = i + 1 - size;
                    best_j = j + 1 - size;
                    best_size = size;
                }
            }
        }
        run_lengths = next;
    }

    while best_i > alo && best_j > blo && a[best_i - 1] == b[best_j - 1] {
        best_i -= 1;
        best_j -= 1;
        best_size += 1;
    }
    while best_i + best_size < ahi && best_j + best_size < bhi && a[best_i + best_size] == b[best_j + best_size] {
        best_size += 1;
    }

    (best_i, best_j, best_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, file_id: i64, page: i32, index: i32, text: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            text: text.to_string(),
            file_id,
            file_name: format!("file-{}.pdf", file_id),
            page,
            chunk_id: id.to_string(),
            chunk_index: index,
            score,
            dense_score: 0.0,
            sparse_score: 0.0,
            source: String::new(),
        }
    }

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn test_similarity_ratio() {
        assert_eq!(similarity(&chars("abcd"), &chars("bcde")), 0.75);
        assert_eq!(similarity(&chars("same text"), &chars("same text")), 1.0);
        assert_eq!(similarity(&chars(""), &chars("")), 1.0);
        assert_eq!(similarity(&chars("abc"), &chars("xyz")), 0.0);
    }

    fn settings_list() -> (String, String) {
        let original = "router firmware reset admin password wireless channel guest network parental \
            controls port forwarding dns settings vpn passthrough firewall rules dhcp lease time mac \
            filtering qos priority upnp toggle remote management ntp server log export backup restore \
            factory defaults";
        let edited = original
            .replace("reset", "rebot")
            .replace("password", "passcode")
            .replace("channel", "chanel")
            .replace("network", "netwrk")
            .replace("controls", "control")
            .replace("forwarding", "forwardng")
            .replace("settings", "setting")
            .replace("rules", "rule")
            .replace("lease", "leas")
            .replace("priority", "priorty")
            .replace("toggle", "togle")
            .replace("server", "servr")
            .replace("export", "exprt");
        (original.to_string(), edited)
    }

    #[test]
    fn test_similarity_prunes_popular_characters_in_long_text() {
        let (original, edited) = settings_list();
        assert!(original.len() >= 200 && edited.len() >= 200);

        // Spaces and common letters cannot seed matches at this length
        let ratio = similarity(&chars(&edited), &chars(&original));
        assert!((ratio - 0.671_669_793_621_013_1).abs() < 1e-9, "ratio = {}", ratio);
        assert!((similarity(&chars(&original), &chars(&edited)) - 0.082_551_594_746_716_7).abs() < 1e-9);
    }

    #[test]
    fn test_dedup_keeps_lightly_edited_long_chunks() {
        let (original, edited) = settings_list();
        let kept = ContextAssembler::default().deduplicate(vec![
            chunk("a", 1, 1, 0, &original, 0.9),
            chunk("b", 2, 1, 0, &edited, 0.8),
        ]);

        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_dedup_keeps_higher_score() {
        let assembler = ContextAssembler::default();
        let text = "To reset the router, hold the reset button for ten seconds until the light blinks.";
        let near = "To reset the router, hold the reset button for ten seconds until the lights blink.";

        let kept = assembler.deduplicate(vec![
            chunk("low", 1, 1, 0, text, 0.4),
            chunk("high", 2, 1, 0, near, 0.9),
            chunk("other", 3, 1, 0, "Firmware updates are installed from the admin page.", 0.5),
        ]);

        let ids: Vec<_> = kept.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["high", "other"]);
    }

    #[test]
    fn test_merge_adjacent_same_page() {
        let merged = merge_adjacent(vec![
            chunk("b", 7, 3, 1, "second half", 0.9),
            chunk("a", 7, 3, 0, "first half", 0.5),
        ]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text, "first half\n\nsecond half");
        assert_eq!(merged[0].chunk_id, "a");
        assert_eq!(merged[0].chunk_index, 0);
        assert_eq!(merged[0].score, 0.9);
    }

    #[test]
    fn test_merge_absorbs_one_successor_and_respects_pages() {
        let merged = merge_adjacent(vec![
            chunk("a", 7, 3, 0, "one", 0.5),
            chunk("b", 7, 3, 1, "two", 0.5),
            chunk("c", 7, 3, 2, "three", 0.4),
            chunk("d", 7, 4, 3, "four", 0.8),
            chunk("e", 8, 3, 1, "other file", 0.1),
        ]);

        let texts: Vec<_> = merged.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["four", "one\n\ntwo", "three", "other file"]);
        assert_eq!(merged[1].chunk_id, "a");
        assert_eq!(merged[2].chunk_id, "c");
    }

    #[test]
    fn test_budget_with_partial_chunk() {
        let assembler = ContextAssembler::default();
        let first = "a".repeat(300);
        let second = format!("{}.{}", "b".repeat(120), "c".repeat(100));

        let fitted = assembler.fit_budget(
            vec![chunk("1", 1, 1, 0, &first, 0.9), chunk("2", 1, 2, 0, &second, 0.8), chunk("3", 1, 3, 0, "tail", 0.1)],
            120,
        );

        assert_eq!(fitted.len(), 2);
        assert_eq!(fitted[1].text, format!("{}....", "b".repeat(120)));
        assert!(fitted[1].text.ends_with("..."));
    }

    #[test]
    fn test_budget_skips_tiny_remainder() {
        let assembler = ContextAssembler::default();
        let fitted = assembler.fit_budget(
            vec![chunk("1", 1, 1, 0, &"a".repeat(300), 0.9), chunk("2", 1, 2, 0, &"b".repeat(400), 0.8)],
            100,
        );

        // 25 tokens left is exactly 100 characters, not enough for a partial
        assert_eq!(fitted.len(), 1);
    }

    #[test]
    fn test_assemble_respects_budget() {
        let assembler = ContextAssembler::default();
        let chunks: Vec<_> = (0..10)
            .map(|i| chunk(&i.to_string(), i, 1, 0, &format!("{} {}", i, "word ".repeat(60)), 1.0 - i as f32 / 10.0))
            .collect();

        let context = assembler.assemble(chunks, 130, false, false);
        assert_eq!(context.chunks.len(), 2);
        assert!(context.total_tokens <= 130);
        assert!(context.chunks.last().unwrap().text.ends_with("..."));
    }

    #[test]
    fn test_sources_and_attribution() {
        let assembler = ContextAssembler::default();
        let context = assembler.assemble(
            vec![
                chunk("a", 1, 5, 0, "alpha", 0.9),
                chunk("b", 2, 0, 0, "beta", 0.8),
                chunk("c", 1, 1, 0, "gamma", 0.7),
                chunk("d", 1, 7, 0, "delta", 0.6),
                chunk("e", 1, 6, 0, "epsilon", 0.5),
                chunk("f", 1, 3, 0, "zeta", 0.4),
            ],
            8000,
            false,
            false,
        );

        assert_eq!(context.file_sources.len(), 2);
        assert_eq!(context.file_sources[0].file_id, 1);
        assert!(context.file_sources[1].pages.is_empty());
        assert_eq!(
            context.source_attribution(),
            "Sources:\n- file-1.pdf (pages: 1, 3, 5–7)\n- file-2.pdf"
        );
    }

    #[test]
    fn test_page_ranges() {
        let pages: BTreeSet<i32> = [1, 2, 4, 9, 10, 11].into_iter().collect();
        assert_eq!(format_page_ranges(&pages), "1–2, 4, 9–11");
        assert_eq!(format_page_ranges(&BTreeSet::new()), "");
    }

    #[test]
    fn test_duplicate_ids_collapse() {
        let context = ContextAssembler::default().assemble(
            vec![chunk("a", 1, 1, 0, "first", 0.9), chunk("a", 1, 1, 0, "repeat", 0.95)],
            8000,
            false,
            false,
        );

        assert_eq!(context.chunks.len(), 1);
        assert_eq!(context.chunks[0].text, "first");
    }

    #[test]
    fn test_non_finite_score_falls_back() {
        let mut chunks: Vec<_> = (0..15).map(|i| chunk(&i.to_string(), 1, i, 0, "text", 0.5)).collect();
        chunks[3].score = f32::NAN;

        let assembler = ContextAssembler::default();
        assert!(assembler.try_assemble(chunks.clone(), 8000, true, true).is_err());

        let outcome = assembler.assemble_outcome(chunks, 8000, true, true);
        assert!(!outcome.succeeded);
        assert_eq!(outcome.output.chunks.len(), 10);
        assert_eq!(outcome.output.chunks[0].chunk_id, "0");
    }

    #[test]
    fn test_empty_and_rendering() {
        let assembler = ContextAssembler::default();
        let empty = assembler.assemble(vec![], 8000, true, true);
        assert_eq!(empty, AssembledContext::empty());
        assert!(empty.is_empty());
        assert_eq!(empty.source_attribution(), "");

        let context = assembler.assemble(
            vec![chunk("a", 1, 2, 0, "alpha text", 0.9), chunk("b", 2, 4, 0, "beta text", 0.8)],
            8000,
            false,
            false,
        );
        assert_eq!(context.text(DEFAULT_SEPARATOR), "alpha text\n\n---\n\nbeta text");

        let documents = context.to_documents();
        assert_eq!(documents[1].page_content, "beta text");
        assert_eq!(documents[1].metadata.page, 4);
        assert_eq!(documents[1].metadata.chunk_id, "b");
    }
}
