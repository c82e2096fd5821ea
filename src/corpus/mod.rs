//! `WordCorpus`: a bidirectional vocabulary, a token-id buffer, unigram
//! frequencies, forward/reverse suffix arrays, per-id attributes,
//! context-equivalence folding and positional ids for skip-gram use (spec
//! §4.9, component L). This is the "glue" component: every type it holds
//! is built by an earlier module ([`crate::index`], [`crate::suffix`]),
//! and `WordCorpus` itself is grounded directly on the spec's own
//! description of the assembly rather than on a teacher file (no word
//! corpus appears anywhere in the example pack).

pub mod attributes;

use crate::error::{Error, Result};
use crate::index::BidirectionalIndex;
use crate::io::format::{check_signature, check_size, save_atomically, signature, SIGNATURE_LEN};
use crate::pool::thread_pool::ThreadPool;
use crate::suffix::SuffixArray;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::sync::Arc;

const SIGNATURE: [u8; SIGNATURE_LEN] = signature(b"\x7FWordCorp");

/// Id `>=` this value is a line-break marker rather than a vocabulary id
/// (spec §3 "word buffer": "`id >= last_linenum_mark` identifies a
/// newline"). Vocabulary ids are assigned from `0` upward by
/// [`BidirectionalIndex::add_key`]; a corpus with more than ~4.29 billion
/// distinct tokens would collide with this band, which is not a
/// real-world concern for a word-level vocabulary.
pub const LAST_LINENUM_MARK: u32 = u32::MAX - 1_000_000;

/// The line-break id used when `keep_linenumbers` is `false`: every
/// newline collapses to this single shared symbol.
pub const SHARED_NEWLINE: u32 = u32::MAX;

/// The vocabulary entry pre-registered at id `0` (spec §4.9: "a reserved
/// end-of-data 'sentinel' token"). Chosen to be a string no real token can
/// collide with. Kept at id `0` because [`SuffixArray::generate`] requires
/// the unique smallest symbol to be `0`.
const SENTINEL_TOKEN: &str = "\u{0}$END-OF-DATA$";

/// Ties a vocabulary, a token buffer, and the indexing/classification
/// layers built on top of them into one corpus (spec §4.9).
pub struct WordCorpus {
    vocabulary: BidirectionalIndex<String, u32>,
    buffer: Vec<u32>,
    keep_linenumbers: bool,
    next_line_mark: u32,
    left_context: u32,
    right_context: u32,

    unigram_freq: Option<Vec<u32>>,
    attributes: Option<Vec<u8>>,

    context_classes: BidirectionalIndex<String, u32>,
    context_map: HashMap<String, u32>,
    rare_threshold: Option<u32>,
    rare_id: u32,

    forward_index: Option<SuffixArray>,
    reverse_index: Option<SuffixArray>,
    /// Read-only once a memory-mapped corpus is loaded (spec §7
    /// `InvalidOperation`: "inserting into a read-only memory-mapped word
    /// corpus").
    read_only: bool,
}

impl Default for WordCorpus {
    fn default() -> Self {
        Self::new(0, 0, false)
    }
}

impl WordCorpus {
    /// Creates an empty corpus. `left_context`/`right_context` size the
    /// skip-gram window used by [`Self::positional_id`]; `keep_linenumbers`
    /// selects whether line breaks are recoverable (distinct descending
    /// ids) or collapse to [`SHARED_NEWLINE`] (spec §4.9 word buffer
    /// encoding).
    pub fn new(left_context: u32, right_context: u32, keep_linenumbers: bool) -> Self {
        let mut vocabulary = BidirectionalIndex::new();
        vocabulary.add_key(SENTINEL_TOKEN.to_string());
        Self {
            vocabulary,
            buffer: Vec::new(),
            keep_linenumbers,
            next_line_mark: SHARED_NEWLINE,
            left_context,
            right_context,
            unigram_freq: None,
            attributes: None,
            context_classes: BidirectionalIndex::new(),
            context_map: HashMap::new(),
            rare_threshold: None,
            rare_id: u32::MAX,
            forward_index: None,
            reverse_index: None,
            read_only: false,
        }
    }

    /// Number of distinct vocabulary entries, including the reserved
    /// sentinel.
    pub fn vocab_size(&self) -> usize {
        self.vocabulary.len()
    }

    /// Number of tokens (words and line breaks) appended so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// The sentinel id (spec §4.9: "a reserved end-of-data sentinel
    /// token"), always `0`.
    pub fn sentinel_id(&self) -> u32 {
        0
    }

    /// `true` iff `id` is a line-break marker rather than a vocabulary id.
    pub fn is_newline_id(&self, id: u32) -> bool {
        id >= LAST_LINENUM_MARK
    }

    /// Looks up (adding if absent) `token`'s vocabulary id, without
    /// appending it to the buffer.
    pub fn intern(&mut self, token: &str) -> Result<u32> {
        if self.read_only {
            return Err(Error::InvalidOperation);
        }
        Ok(self.vocabulary.add_key(token.to_string()))
    }

    /// Interns and appends `token` to the token buffer, returning its id.
    pub fn append_word(&mut self, token: &str) -> Result<u32> {
        let id = self.intern(token)?;
        self.buffer.push(id);
        Ok(id)
    }

    /// Appends a line-break marker (spec §4.9: either the shared newline
    /// id, or a fresh descending id if `keep_linenumbers` was set).
    pub fn append_line_break(&mut self) -> Result<u32> {
        if self.read_only {
            return Err(Error::InvalidOperation);
        }
        let id = if self.keep_linenumbers {
            let id = self.next_line_mark;
            self.next_line_mark = self.next_line_mark.saturating_sub(1).max(LAST_LINENUM_MARK);
            id
        } else {
            SHARED_NEWLINE
        };
        self.buffer.push(id);
        Ok(id)
    }

    /// The token string for a vocabulary id, or `None` for a line-break
    /// marker or an id outside the vocabulary.
    pub fn word(&self, id: u32) -> Option<&str> {
        if self.is_newline_id(id) {
            return None;
        }
        self.vocabulary.get_key(id).map(String::as_str)
    }

    pub fn word_id(&self, token: &str) -> u32 {
        self.vocabulary.get_index(token)
    }

    pub fn buffer(&self) -> &[u32] {
        &self.buffer
    }

    /// Computes unigram frequencies over the vocabulary in one linear pass
    /// (spec §4.9: "computed by one linear pass"). Line-break markers are
    /// not vocabulary members and are skipped.
    pub fn compute_unigram_frequencies(&mut self) {
        let mut freq = vec![0u32; self.vocabulary.len()];
        for &id in &self.buffer {
            if !self.is_newline_id(id) {
                freq[id as usize] += 1;
            }
        }
        self.unigram_freq = Some(freq);
    }

    pub fn unigram_freq(&self, id: u32) -> Option<u32> {
        self.unigram_freq.as_ref().and_then(|f| f.get(id as usize).copied())
    }

    fn ensure_attributes(&mut self) -> &mut Vec<u8> {
        self.attributes.get_or_insert_with(|| vec![0u8; self.vocabulary.len()])
    }

    pub fn set_attribute(&mut self, id: u32, mask: u8) {
        self.ensure_attributes()[id as usize] |= mask;
    }

    pub fn clear_attribute(&mut self, id: u32, mask: u8) {
        self.ensure_attributes()[id as usize] &= !mask;
    }

    pub fn test_attribute(&self, id: u32, mask: u8) -> bool {
        self.attributes.as_ref().and_then(|a| a.get(id as usize)).is_some_and(|&b| b & mask != 0)
    }

    /// Loads a context-equivalence map from a tab-separated `word\tclass`
    /// file (spec §4.9: "a separate key -> id map read from a
    /// tab-separated file; used at context-id lookup time so that all
    /// members of a class share one id").
    pub fn load_context_map(&mut self, path: &Path) -> Result<()> {
        let file = std::fs::File::open(path)?;
        for line in BufReader::new(file).lines() {
            let line = line?;
            let Some((word, class)) = line.split_once('\t') else { continue };
            let class_id = self.context_classes.add_key(class.to_string());
            self.context_map.insert(word.to_string(), class_id);
            let word_id = self.vocabulary.get_index(word);
            if word_id != self.vocabulary.error_id() {
                self.set_attribute(word_id, attributes::CLASS_MEMBER);
            }
        }
        Ok(())
    }

    /// Sets the rare-word folding threshold and substitute id (spec §4.9
    /// "rare-word folding"): at [`Self::context_id`] time, any word whose
    /// unigram frequency is below `threshold` resolves to `rare_id`
    /// instead of its own id.
    pub fn set_rare_folding(&mut self, threshold: u32, rare_id: u32) {
        self.rare_threshold = Some(threshold);
        self.rare_id = rare_id;
    }

    /// Resolves `word` to a context id: its context-equivalence class if
    /// mapped, else its own vocabulary id, folded to `rare_id` if it falls
    /// below the configured rare-word threshold (spec §4.9).
    pub fn context_id(&self, word: &str) -> u32 {
        if let Some(&class_id) = self.context_map.get(word) {
            return class_id;
        }
        let id = self.vocabulary.get_index(word);
        if let (Some(freq), Some(threshold)) = (&self.unigram_freq, self.rare_threshold) {
            if let Some(&f) = freq.get(id as usize) {
                if f < threshold {
                    return self.rare_id;
                }
            }
        }
        id
    }

    fn total_context(&self) -> u32 {
        let sum = self.left_context + self.right_context;
        if sum == 0 { 1 } else { sum }
    }

    /// `word * total_context + (offset + left_context - (offset > 0))`
    /// (spec §4.9 "positional ids for skip-gram use"). `offset` is
    /// expected to be nonzero (a word's context never includes itself);
    /// the formula is not injective at `offset == 0`.
    pub fn positional_id(&self, word: u32, offset: i32) -> u32 {
        let adjust = offset + self.left_context as i32 - i32::from(offset > 0);
        word * self.total_context() + adjust as u32
    }

    /// Inverse of [`Self::positional_id`] over the valid (nonzero) offset
    /// range.
    pub fn offset_of_position(&self, positional_id: u32) -> (u32, i32) {
        let total = self.total_context();
        let word = positional_id / total;
        for offset in (-(self.left_context as i32)..0).chain(1..=(self.right_context as i32)) {
            if self.positional_id(word, offset) == positional_id {
                return (word, offset);
            }
        }
        unreachable!("positional id does not correspond to any nonzero offset in this corpus's window")
    }

    /// Builds the forward suffix array over the token buffer, appending
    /// the sentinel first (spec §4.9: "Before indexing, a sentinel token
    /// is appended"). Idempotent after the first call.
    pub fn build_forward_index(&mut self) {
        if self.forward_index.is_some() {
            return;
        }
        self.forward_index = Some(self.build_index_over(&self.buffer));
    }

    /// Builds the reverse suffix array: the token buffer is reversed,
    /// sentinel-appended, indexed, and the working copy discarded (spec
    /// §4.9). Per the spec's own open TODO about remapping reverse-index
    /// offsets (§9), this crate's decision -- recorded in `DESIGN.md` -- is
    /// that [`SuffixArray::sa`] positions returned by the reverse index are
    /// **reversed-buffer coordinates**; use
    /// [`Self::reverse_position_to_original`] to map a match back to the
    /// original buffer.
    pub fn build_reverse_index(&mut self) {
        if self.reverse_index.is_some() {
            return;
        }
        let mut reversed = self.buffer.clone();
        reversed.reverse();
        self.reverse_index = Some(self.build_index_over(&reversed));
    }

    /// SA-IS (`sa_is`) sorts by raw symbol value; it has no notion of "any
    /// newline mark compares equal to any other" the way
    /// [`compare_symbol`](super::suffix::array) does. Every line-break id
    /// (spanning `[LAST_LINENUM_MARK, u32::MAX]` so `keep_linenumbers`
    /// corpora can recover which line a match fell on) is therefore folded
    /// to one dense symbol, `vocab_size`, before indexing -- the one
    /// remapping step that keeps `sa_is`'s raw-value sort consistent with
    /// the folded comparisons `SuffixArray` performs everywhere else.
    fn build_index_over(&self, tokens: &[u32]) -> SuffixArray {
        let vocab_size = self.vocabulary.len() as u32;
        let mut ids: Vec<u32> = Vec::with_capacity(tokens.len() + 1);
        ids.extend(tokens.iter().map(|&id| if self.is_newline_id(id) { vocab_size } else { id }));
        ids.push(self.sentinel_id());
        let sigma = vocab_size as usize + 1;
        let shared: Arc<[u32]> = ids.into();
        SuffixArray::generate(shared, sigma, 0, vocab_size, vocab_size, None, false)
    }

    /// Maps a position in the *reversed* buffer (as returned by the
    /// reverse index) back to the corresponding position in the original
    /// buffer.
    pub fn reverse_position_to_original(&self, reversed_pos: usize) -> usize {
        self.buffer.len() - 1 - reversed_pos
    }

    pub fn forward_index(&self) -> Option<&SuffixArray> {
        self.forward_index.as_ref()
    }

    pub fn reverse_index(&self) -> Option<&SuffixArray> {
        self.reverse_index.as_ref()
    }

    /// Parallel n-gram enumeration over the forward index (spec §4.8
    /// "parallel variant", applied to a corpus per spec §4.9). Panics if
    /// [`Self::build_forward_index`] has not been called yet.
    pub fn enumerate_parallel<F, M>(&self, pool: &ThreadPool, minlen: usize, maxlen: usize, filter: F, on_match: M)
    where
        F: Fn(&[u32], usize, usize, bool) -> bool + Sync,
        M: Fn(&[u32], usize, usize, usize) + Sync,
    {
        let index = self.forward_index.as_ref().expect("build_forward_index must be called first");
        index.enumerate_parallel(pool, minlen, maxlen, filter, on_match);
    }

    /// Persists the vocabulary, token buffer, and optional
    /// frequencies/attributes/rare-folding config (spec §6 signature
    /// `"\x7FWordCorp"`). Suffix arrays are not persisted: spec §4.9
    /// already treats them as built "lazily on request", so a loaded
    /// corpus simply rebuilds whichever index it needs via
    /// [`Self::build_forward_index`]/[`Self::build_reverse_index`].
    pub fn save(&self, path: &Path) -> Result<()> {
        tracing::info!(
            path = %path.display(),
            words = self.buffer.len(),
            vocab = self.vocabulary.len(),
            "saving word corpus"
        );
        save_atomically(path, |file| {
            file.write_all(&SIGNATURE)?;
            file.write_all(&[4u8, 4u8])?; // idsize, idxsize: both u32

            file.write_all(&(self.buffer.len() as u64).to_le_bytes())?;
            file.write_all(&(self.vocabulary.len() as u64).to_le_bytes())?;
            file.write_all(&LAST_LINENUM_MARK.to_le_bytes())?;
            file.write_all(&self.rare_id.to_le_bytes())?;
            file.write_all(&self.rare_threshold.unwrap_or(0).to_le_bytes())?;
            file.write_all(&self.left_context.to_le_bytes())?;
            file.write_all(&self.right_context.to_le_bytes())?;

            let mut flags = 0u8;
            if self.keep_linenumbers {
                flags |= 1 << 0;
            }
            if self.unigram_freq.is_some() {
                flags |= 1 << 1;
            }
            if self.attributes.is_some() {
                flags |= 1 << 2;
            }
            if self.rare_threshold.is_some() {
                flags |= 1 << 3;
            }
            file.write_all(&[flags])?;

            for word in self.vocabulary.iter().map(|(_, k)| k) {
                let bytes = word.as_bytes();
                file.write_all(&(bytes.len() as u32).to_le_bytes())?;
                file.write_all(bytes)?;
            }
            for &id in &self.buffer {
                file.write_all(&id.to_le_bytes())?;
            }
            if let Some(freq) = &self.unigram_freq {
                for &f in freq {
                    file.write_all(&f.to_le_bytes())?;
                }
            }
            if let Some(attrs) = &self.attributes {
                file.write_all(attrs)?;
            }
            Ok(())
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "loading word corpus");
        let mut file = std::fs::File::open(path)?;
        let mut header = [0u8; SIGNATURE_LEN + 2 + 8 + 8 + 4 + 4 + 4 + 4 + 4 + 1];
        file.read_exact(&mut header)?;
        check_signature(&header[..SIGNATURE_LEN], &SIGNATURE)?;
        let mut c = SIGNATURE_LEN;
        check_size(header[c] as usize, 4)?;
        check_size(header[c + 1] as usize, 4)?;
        c += 2;
        let rd_u64 = |h: &[u8], at: usize| u64::from_le_bytes(h[at..at + 8].try_into().unwrap()) as usize;
        let rd_u32 = |h: &[u8], at: usize| u32::from_le_bytes(h[at..at + 4].try_into().unwrap());

        let numwords = rd_u64(&header, c);
        c += 8;
        let vocabsize = rd_u64(&header, c);
        c += 8;
        let last_linenum_mark = rd_u32(&header, c);
        c += 4;
        check_size(last_linenum_mark as usize, LAST_LINENUM_MARK as usize)?;
        let rare_id = rd_u32(&header, c);
        c += 4;
        let rare_threshold_raw = rd_u32(&header, c);
        c += 4;
        let left_context = rd_u32(&header, c);
        c += 4;
        let right_context = rd_u32(&header, c);
        c += 4;
        let flags = header[c];

        let keep_linenumbers = flags & (1 << 0) != 0;
        let has_freq = flags & (1 << 1) != 0;
        let has_attrs = flags & (1 << 2) != 0;
        let has_rare = flags & (1 << 3) != 0;

        let mut vocabulary: BidirectionalIndex<String, u32> = BidirectionalIndex::new();
        for _ in 0..vocabsize {
            let mut len_buf = [0u8; 4];
            file.read_exact(&mut len_buf)?;
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut bytes = vec![0u8; len];
            file.read_exact(&mut bytes)?;
            let word = String::from_utf8(bytes).map_err(|_| Error::BadFormat)?;
            vocabulary.add_key(word);
        }
        check_size(vocabulary.len(), vocabsize)?;

        let mut buffer = vec![0u32; numwords];
        let mut word_bytes = vec![0u8; numwords * 4];
        file.read_exact(&mut word_bytes)?;
        for (slot, chunk) in buffer.iter_mut().zip(word_bytes.chunks_exact(4)) {
            *slot = u32::from_le_bytes(chunk.try_into().unwrap());
        }

        let unigram_freq = if has_freq {
            let mut freq = vec![0u32; vocabsize];
            let mut bytes = vec![0u8; vocabsize * 4];
            file.read_exact(&mut bytes)?;
            for (slot, chunk) in freq.iter_mut().zip(bytes.chunks_exact(4)) {
                *slot = u32::from_le_bytes(chunk.try_into().unwrap());
            }
            Some(freq)
        } else {
            None
        };

        let attributes = if has_attrs {
            let mut attrs = vec![0u8; vocabsize];
            file.read_exact(&mut attrs)?;
            Some(attrs)
        } else {
            None
        };

        tracing::info!(words = numwords, vocab = vocabsize, "loaded word corpus");
        Ok(Self {
            vocabulary,
            buffer,
            keep_linenumbers,
            next_line_mark: SHARED_NEWLINE,
            left_context,
            right_context,
            unigram_freq,
            attributes,
            context_classes: BidirectionalIndex::new(),
            context_map: HashMap::new(),
            rare_threshold: has_rare.then_some(rare_threshold_raw),
            rare_id,
            forward_index: None,
            reverse_index: None,
            read_only: false,
        })
    }

    /// Inspects only the signature at the front of `path` (spec §4.9
    /// `isCorpusFile`).
    pub fn is_corpus_file(path: &Path) -> bool {
        let Ok(mut file) = std::fs::File::open(path) else { return false };
        let mut sig = [0u8; SIGNATURE_LEN];
        file.read_exact(&mut sig).is_ok() && sig == SIGNATURE
    }
}
