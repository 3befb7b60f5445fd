//! Dynamic corpus: the ordered population of coverage-improving test cases.
//!
//! Entries are kept best-coverage-first. During the main fuzzing phase new
//! finds are pushed to the head so they are tested immediately; in every
//! other phase the sequence stays sorted by the coverage vector and
//! [`CorpusWrapper::renumerate`] restores the rank invariant afterwards.

use crate::phase::Phase;
use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, RwLock,
};

/// Upper bound for the human-readable origin label of an entry.
pub const MAX_PATH_LABEL: usize = 1024;

/// A single corpus entry. `data` never changes after insertion.
#[derive(Debug, Clone)]
pub struct DynFile {
    pub cov: [u64; 4],
    pub data: Arc<[u8]>,
    /// Rank assigned by the corpus; higher means better coverage.
    pub idx: usize,
    /// Times this entry was selected since the cursor last moved past it.
    pub tested: usize,
    /// Origin label, e.g. the static file the entry came from.
    pub path: String,
}

impl DynFile {
    pub fn new(data: &[u8], cov: [u64; 4], path: &str) -> Self {
        let mut path = path.to_string();
        if path.len() > MAX_PATH_LABEL {
            let mut end = MAX_PATH_LABEL;
            while !path.is_char_boundary(end) {
                end -= 1;
            }
            path.truncate(end);
        }
        Self {
            cov,
            data: data.into(),
            idx: 0,
            tested: 0,
            path,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Return true iff `a` covers strictly more than `b`, reading the four
/// counters left to right. Equal vectors compare equal.
pub fn cmp_cov(a: &[u64; 4], b: &[u64; 4]) -> bool {
    for i in 0..4 {
        if a[i] > b[i] {
            return true;
        }
        if a[i] < b[i] {
            return false;
        }
    }
    false
}

/// Number of tests an entry gets per pass, based on its percentile rank.
/// The best entries are tested up to 10x more often than average ones.
pub fn num_tests(idx: usize, total: usize) -> usize {
    if idx > total {
        panic!("corpus rank {} exceeds corpus size {}", idx, total);
    }
    match idx * 100 / total {
        0..=90 => 1,
        91..=92 => 2,
        93..=94 => 3,
        95..=96 => 4,
        97..=98 => 5,
        _ => 10,
    }
}

/// Consistent view of one entry, taken under the corpus write lock.
#[derive(Debug, Clone)]
pub struct InputSnapshot {
    pub data: Arc<[u8]>,
    pub path: String,
    pub cov: [u64; 4],
}

/// Read-only per-entry summary for observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub idx: usize,
    pub cov: [u64; 4],
    pub size: usize,
    pub path: String,
}

#[derive(Debug, Default)]
pub struct Corpus {
    files: VecDeque<DynFile>,
    cursor: Option<usize>,
}

impl Corpus {
    fn insert(&mut self, mut file: DynFile, phase: Phase) {
        file.idx = self.files.len();
        if phase == Phase::DynamicMain {
            // Front of the queue so it gets tested next.
            self.files.push_front(file);
            self.cursor = Some(0);
            return;
        }
        // Keep better coverage earlier in the sequence.
        let pos = self
            .files
            .iter()
            .position(|other| cmp_cov(&file.cov, &other.cov))
            .unwrap_or(self.files.len());
        self.files.insert(pos, file);
        if let Some(cursor) = self.cursor.as_mut() {
            if *cursor >= pos {
                *cursor += 1;
            }
        }
    }

    fn select(&mut self) -> InputSnapshot {
        let total = self.files.len();
        let cur = self.cursor.unwrap_or(0);
        let test_cnt = num_tests(self.files[cur].idx, total);
        let file = &mut self.files[cur];
        file.tested += 1;
        let snap = InputSnapshot {
            data: Arc::clone(&file.data),
            path: file.path.clone(),
            cov: file.cov,
        };
        if file.tested >= test_cnt {
            file.tested = 0;
            let next = cur + 1;
            self.cursor = if next < total { Some(next) } else { None };
        } else {
            self.cursor = Some(cur);
        }
        snap
    }

    fn minimize_next(&mut self) -> Option<InputSnapshot> {
        let next = match self.cursor {
            None => 0,
            Some(cur) => cur + 1,
        };
        if next >= self.files.len() {
            self.cursor = None;
            return None;
        }
        self.cursor = Some(next);
        let file = &self.files[next];
        Some(InputSnapshot {
            data: Arc::clone(&file.data),
            path: file.path.clone(),
            cov: file.cov,
        })
    }

    fn renumerate(&mut self) {
        let mut idx = self.files.len();
        for file in self.files.iter_mut() {
            file.idx = idx;
            idx -= 1;
        }
    }
}

/// Process-wide corpus handle shared by all workers. `count` and
/// `max_entry_size` are kept in atomics so they can be read without the
/// lock; everything else goes through the readers-writer lock.
#[derive(Debug, Default)]
pub struct CorpusWrapper {
    inner: RwLock<Corpus>,
    count: AtomicUsize,
    max_entry_size: AtomicUsize,
}

impl CorpusWrapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest entry observed so far.
    pub fn max_entry_size(&self) -> usize {
        self.max_entry_size.load(Ordering::SeqCst)
    }

    /// Insert a new entry. In [`Phase::DynamicMain`] it goes to the head and
    /// the sampling cursor points at it; otherwise it is placed before the
    /// first entry it strictly beats.
    pub fn add_file(&self, file: DynFile, phase: Phase) {
        let len = file.size();
        let mut inner = self.inner.write().unwrap();
        inner.insert(file, phase);
        self.count.store(inner.files.len(), Ordering::SeqCst);
        self.max_entry_size.fetch_max(len, Ordering::SeqCst);
    }

    /// Biased selection: advances the shared cursor once the current entry
    /// has been handed out [`num_tests`] times. Panics on an empty corpus.
    pub fn select_input(&self) -> InputSnapshot {
        if self.is_empty() {
            panic!("the dynamic file corpus is empty, nothing to select");
        }
        let mut inner = self.inner.write().unwrap();
        inner.select()
    }

    /// Advance the minimization walk by one entry; `None` once every entry
    /// has been visited. Panics on an empty corpus.
    pub fn minimize_next(&self) -> Option<InputSnapshot> {
        if self.is_empty() {
            panic!("the dynamic file corpus is empty (for minimization)");
        }
        let mut inner = self.inner.write().unwrap();
        inner.minimize_next()
    }

    /// Re-assign ranks head to tail: the head gets `count`, the tail gets 1.
    /// Call after any operation that disturbed the coverage sort order.
    pub fn renumerate(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.renumerate();
    }

    /// Snapshot of the sequence head to tail.
    pub fn entries(&self) -> Vec<EntryInfo> {
        let inner = self.inner.read().unwrap();
        inner
            .files
            .iter()
            .map(|f| EntryInfo {
                idx: f.idx,
                cov: f.cov,
                size: f.size(),
                path: f.path.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(corpus: &CorpusWrapper, cov: [u64; 4], phase: Phase) {
        corpus.add_file(DynFile::new(&cov.map(|c| c as u8), cov, "test"), phase);
    }

    #[test]
    fn ordered_insert_outside_main_phase() {
        let corpus = CorpusWrapper::new();
        add(&corpus, [5, 0, 0, 0], Phase::DryRun);
        add(&corpus, [5, 1, 0, 0], Phase::DryRun);
        add(&corpus, [4, 9, 9, 9], Phase::DryRun);

        let covs: Vec<[u64; 4]> = corpus.entries().iter().map(|e| e.cov).collect();
        assert_eq!(covs, vec![[5, 1, 0, 0], [5, 0, 0, 0], [4, 9, 9, 9]]);

        // Head to tail, each entry beats or ties its successor.
        for pair in covs.windows(2) {
            assert!(cmp_cov(&pair[0], &pair[1]) || pair[0] == pair[1]);
        }
    }

    #[test]
    fn head_insert_in_main_phase() {
        let corpus = CorpusWrapper::new();
        add(&corpus, [5, 0, 0, 0], Phase::DryRun);
        add(&corpus, [5, 1, 0, 0], Phase::DryRun);
        add(&corpus, [4, 9, 9, 9], Phase::DryRun);
        add(&corpus, [0, 0, 0, 0], Phase::DynamicMain);

        let covs: Vec<[u64; 4]> = corpus.entries().iter().map(|e| e.cov).collect();
        assert_eq!(
            covs,
            vec![[0, 0, 0, 0], [5, 1, 0, 0], [5, 0, 0, 0], [4, 9, 9, 9]]
        );

        // The cursor must point at the fresh entry.
        let snap = corpus.select_input();
        assert_eq!(snap.cov, [0, 0, 0, 0]);
    }

    #[test]
    fn num_tests_table() {
        assert_eq!(num_tests(0, 100), 1);
        assert_eq!(num_tests(50, 100), 1);
        assert_eq!(num_tests(90, 100), 1);
        assert_eq!(num_tests(91, 100), 2);
        assert_eq!(num_tests(93, 100), 3);
        assert_eq!(num_tests(95, 100), 4);
        assert_eq!(num_tests(97, 100), 5);
        assert_eq!(num_tests(99, 100), 10);
        assert_eq!(num_tests(100, 100), 10);
    }

    #[test]
    fn num_tests_is_non_decreasing() {
        for total in [1usize, 7, 100, 1000] {
            let mut last = 0;
            for idx in 0..=total {
                let n = num_tests(idx, total);
                assert!(n >= last, "num_tests({}, {}) decreased", idx, total);
                last = n;
            }
        }
    }

    #[test]
    #[should_panic(expected = "exceeds corpus size")]
    fn num_tests_rejects_bad_rank() {
        num_tests(101, 100);
    }

    #[test]
    #[should_panic(expected = "corpus is empty")]
    fn select_on_empty_corpus_panics() {
        let corpus = CorpusWrapper::new();
        corpus.select_input();
    }

    #[test]
    fn renumerate_assigns_descending_ranks() {
        let corpus = CorpusWrapper::new();
        add(&corpus, [1, 0, 0, 0], Phase::DryRun);
        add(&corpus, [2, 0, 0, 0], Phase::DryRun);
        add(&corpus, [3, 0, 0, 0], Phase::DryRun);
        corpus.renumerate();

        let idxs: Vec<usize> = corpus.entries().iter().map(|e| e.idx).collect();
        assert_eq!(idxs, vec![3, 2, 1]);
    }

    #[test]
    fn max_entry_size_tracks_largest() {
        let corpus = CorpusWrapper::new();
        corpus.add_file(DynFile::new(&[0; 3], [1, 0, 0, 0], "a"), Phase::DryRun);
        corpus.add_file(DynFile::new(&[0; 10], [2, 0, 0, 0], "b"), Phase::DryRun);
        corpus.add_file(DynFile::new(&[0; 5], [3, 0, 0, 0], "c"), Phase::DryRun);
        assert_eq!(corpus.max_entry_size(), 10);
    }

    #[test]
    fn cursor_advances_after_enough_tests() {
        let corpus = CorpusWrapper::new();
        add(&corpus, [1, 0, 0, 0], Phase::DryRun);
        add(&corpus, [2, 0, 0, 0], Phase::DryRun);
        corpus.renumerate();

        // Head has idx == count == 2, percentile 100: ten tests before the
        // cursor moves on to the tail entry.
        for _ in 0..10 {
            assert_eq!(corpus.select_input().cov, [2, 0, 0, 0]);
        }
        assert_eq!(corpus.select_input().cov, [1, 0, 0, 0]);
    }

    #[test]
    fn minimization_walk_visits_every_entry_once() {
        let corpus = CorpusWrapper::new();
        add(&corpus, [1, 0, 0, 0], Phase::DryRun);
        add(&corpus, [2, 0, 0, 0], Phase::DryRun);

        let first = corpus.minimize_next().unwrap();
        assert_eq!(first.cov, [2, 0, 0, 0]);
        let second = corpus.minimize_next().unwrap();
        assert_eq!(second.cov, [1, 0, 0, 0]);
        assert!(corpus.minimize_next().is_none());
    }

    #[test]
    fn path_label_is_truncated() {
        let long = "x".repeat(4 * MAX_PATH_LABEL);
        let file = DynFile::new(b"data", [0; 4], &long);
        assert_eq!(file.path.len(), MAX_PATH_LABEL);
    }

    #[test]
    fn cmp_cov_is_lexicographic() {
        assert!(cmp_cov(&[1, 0, 0, 0], &[0, 9, 9, 9]));
        assert!(cmp_cov(&[1, 1, 0, 0], &[1, 0, 9, 9]));
        assert!(!cmp_cov(&[1, 0, 0, 0], &[1, 0, 0, 0]));
        assert!(!cmp_cov(&[0, 9, 9, 9], &[1, 0, 0, 0]));
    }
}
