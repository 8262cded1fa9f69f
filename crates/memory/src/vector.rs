//! Cosine-ranked embedding memory with exponential time decay.
//!
//! Recall is O(N·D) over the whole store, which is fine below ~10k records.
//! Persistence is a typed binary file (header + raw little-endian f32
//! matrix) with a JSON sidecar for record metadata; nothing on disk can
//! trigger arbitrary-object deserialization.

use picoagent_core::error::MemoryError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

const MAGIC: &[u8; 4] = b"PAVM";
const FORMAT_VERSION: u16 = 1;
const MAX_TEXT_BYTES: usize = 4096;
const DEFAULT_HALF_LIFE_SECS: f64 = 7.0 * 86_400.0;
const DEFAULT_MAX_RECORDS: usize = 10_000;

/// One stored memory. Records are immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub text: String,
    /// Seconds since the epoch
    pub created_at: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

struct StoredRecord {
    record: MemoryRecord,
    embedding: Vec<f32>,
}

/// What `prune` removes.
#[derive(Debug, Clone, Copy)]
pub enum PruneCriteria {
    /// Records older than this many seconds
    OlderThan(f64),
    /// Records whose decay weight has fallen below this floor
    MinDecay(f32),
}

/// Compute cosine similarity between two vectors.
///
/// Accumulates in f64 for stability. Returns 0.0 for mismatched lengths,
/// empty inputs, or a near-zero denominator.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-12 {
        return 0.0;
    }
    dot / denom
}

/// Exponential age decay: exp(−λ·age) with λ = ln 2 / half_life.
pub fn decay_weight(age_secs: f64, half_life_secs: f64) -> f64 {
    let lambda = std::f64::consts::LN_2 / half_life_secs;
    (-lambda * age_secs.max(0.0)).exp()
}

/// The embedding store. Exclusively owns its record table; callers
/// serialize access (the turn engine holds it behind a lock).
pub struct VectorMemory {
    records: Vec<StoredRecord>,
    dimension: Option<usize>,
    half_life_secs: f64,
    max_records: usize,
}

impl VectorMemory {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            dimension: None,
            half_life_secs: DEFAULT_HALF_LIFE_SECS,
            max_records: DEFAULT_MAX_RECORDS,
        }
    }

    pub fn with_half_life_secs(mut self, secs: f64) -> Self {
        self.half_life_secs = secs.max(1.0);
        self
    }

    pub fn with_max_records(mut self, max: usize) -> Self {
        self.max_records = max.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The store's embedding dimension, fixed by the first stored record.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Append a record. The first store fixes the dimension; later stores
    /// with a different dimension fail with `DimensionMismatch`. Text is
    /// truncated to 4 KB on a char boundary.
    pub fn store(
        &mut self,
        text: impl Into<String>,
        embedding: Vec<f32>,
        created_at: f64,
        tags: BTreeMap<String, String>,
    ) -> Result<String, MemoryError> {
        if embedding.is_empty() {
            return Err(MemoryError::InvalidRecord("embedding cannot be empty".into()));
        }
        match self.dimension {
            None => self.dimension = Some(embedding.len()),
            Some(expected) if expected != embedding.len() => {
                return Err(MemoryError::DimensionMismatch {
                    expected,
                    got: embedding.len(),
                });
            }
            Some(_) => {}
        }

        let id = Uuid::new_v4().to_string();
        self.records.push(StoredRecord {
            record: MemoryRecord {
                id: id.clone(),
                text: truncate_utf8(text.into(), MAX_TEXT_BYTES),
                created_at,
                tags,
            },
            embedding,
        });
        self.evict_if_needed();
        Ok(id)
    }

    /// Evict stalest (oldest) records until back at the cap. Deterministic:
    /// sorted by `created_at`, ties by id.
    fn evict_if_needed(&mut self) {
        while self.records.len() > self.max_records {
            let stalest = self
                .records
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    a.record
                        .created_at
                        .partial_cmp(&b.record.created_at)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.record.id.cmp(&b.record.id))
                })
                .map(|(i, _)| i);
            match stalest {
                Some(i) => {
                    let evicted = self.records.remove(i);
                    debug!(id = %evicted.record.id, "Evicted stalest memory record");
                }
                None => break,
            }
        }
    }

    /// Top-k records by cosine × decay against a query embedding.
    ///
    /// Edge cases: empty store or zero-norm query → empty list; a query of
    /// the wrong dimension is an error. Ties break toward the fresher
    /// record.
    pub fn recall(
        &self,
        query_embedding: &[f32],
        k: usize,
        now: f64,
    ) -> Result<Vec<(MemoryRecord, f64)>, MemoryError> {
        if k == 0 || self.records.is_empty() {
            return Ok(Vec::new());
        }
        let Some(dimension) = self.dimension else {
            return Ok(Vec::new());
        };
        if query_embedding.len() != dimension {
            return Err(MemoryError::DimensionMismatch {
                expected: dimension,
                got: query_embedding.len(),
            });
        }
        let query_norm: f64 = query_embedding.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
        if query_norm < 1e-12 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f64)> = self
            .records
            .iter()
            .enumerate()
            .map(|(i, stored)| {
                let cosine = cosine_similarity(query_embedding, &stored.embedding);
                let decay = decay_weight(now - stored.record.created_at, self.half_life_secs);
                (i, cosine * decay)
            })
            .collect();

        scored.sort_by(|(ai, a), (bi, b)| {
            b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal).then_with(|| {
                let at = self.records[*ai].record.created_at;
                let bt = self.records[*bi].record.created_at;
                bt.partial_cmp(&at).unwrap_or(std::cmp::Ordering::Equal)
            })
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| (self.records[i].record.clone(), score))
            .collect())
    }

    /// Remove records matching the criteria; returns how many went.
    pub fn prune(&mut self, criteria: PruneCriteria, now: f64) -> usize {
        let half_life = self.half_life_secs;
        let before = self.records.len();
        self.records.retain(|stored| match criteria {
            PruneCriteria::OlderThan(secs) => now - stored.record.created_at <= secs,
            PruneCriteria::MinDecay(floor) => {
                decay_weight(now - stored.record.created_at, half_life) >= floor as f64
            }
        });
        let removed = before - self.records.len();
        if self.records.is_empty() {
            self.dimension = None;
        }
        removed
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.dimension = None;
    }

    /// Persist to `path` (binary matrix) and `path.json` (record sidecar),
    /// each via write-then-rename so a crash leaves the previous files.
    pub fn save(&self, path: &Path) -> Result<(), MemoryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MemoryError::Persistence(format!("create dir: {e}")))?;
        }

        let dimension = self.dimension.unwrap_or(0) as u32;
        let count = self.records.len() as u32;

        let mut binary = Vec::with_capacity(12 + self.records.len() * dimension as usize * 4);
        binary.extend_from_slice(MAGIC);
        binary.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        binary.extend_from_slice(&dimension.to_le_bytes());
        binary.extend_from_slice(&count.to_le_bytes());
        for stored in &self.records {
            for value in &stored.embedding {
                binary.extend_from_slice(&value.to_le_bytes());
            }
        }

        let sidecar: Vec<&MemoryRecord> = self.records.iter().map(|s| &s.record).collect();
        let sidecar_json = serde_json::to_vec_pretty(&sidecar)
            .map_err(|e| MemoryError::Persistence(format!("encode sidecar: {e}")))?;

        let bin_tmp = tmp_path(path);
        let sidecar_path = sidecar_path(path);
        let sidecar_tmp = tmp_path(&sidecar_path);

        write_all(&bin_tmp, &binary)?;
        write_all(&sidecar_tmp, &sidecar_json)?;
        std::fs::rename(&sidecar_tmp, &sidecar_path)
            .map_err(|e| MemoryError::Persistence(format!("rename sidecar: {e}")))?;
        std::fs::rename(&bin_tmp, path)
            .map_err(|e| MemoryError::Persistence(format!("rename matrix: {e}")))?;

        debug!(path = %path.display(), count, "Vector memory saved");
        Ok(())
    }

    /// Load from disk, replacing the in-memory store only on success.
    /// Rejects unknown magic/version, count mismatches between matrix and
    /// sidecar, and any dimension that differs from `expected_dim`.
    /// Returns the number of records loaded; a missing file loads nothing.
    pub fn load(&mut self, path: &Path, expected_dim: Option<usize>) -> Result<usize, MemoryError> {
        if !path.exists() {
            return Ok(0);
        }

        let mut file = std::fs::File::open(path)
            .map_err(|e| MemoryError::Persistence(format!("open matrix: {e}")))?;
        let mut header = [0u8; 14];
        file.read_exact(&mut header)
            .map_err(|e| MemoryError::Persistence(format!("read header: {e}")))?;

        if &header[0..4] != MAGIC {
            return Err(MemoryError::Persistence("bad magic in memory file".into()));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != FORMAT_VERSION {
            return Err(MemoryError::Persistence(format!(
                "unsupported memory format version {version}"
            )));
        }
        let dimension = u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;
        let count = u32::from_le_bytes([header[10], header[11], header[12], header[13]]) as usize;

        if let Some(expected) = expected_dim {
            if count > 0 && dimension != expected {
                return Err(MemoryError::DimensionMismatch {
                    expected,
                    got: dimension,
                });
            }
        }

        let mut matrix = vec![0u8; count * dimension * 4];
        file.read_exact(&mut matrix)
            .map_err(|e| MemoryError::Persistence(format!("read matrix: {e}")))?;

        let sidecar_raw = std::fs::read_to_string(sidecar_path(path))
            .map_err(|e| MemoryError::Persistence(format!("read sidecar: {e}")))?;
        let sidecar: Vec<MemoryRecord> = serde_json::from_str(&sidecar_raw)
            .map_err(|e| MemoryError::Persistence(format!("decode sidecar: {e}")))?;
        if sidecar.len() != count {
            return Err(MemoryError::Persistence(format!(
                "sidecar holds {} records, matrix holds {count}",
                sidecar.len()
            )));
        }

        let mut records = Vec::with_capacity(count);
        for (i, record) in sidecar.into_iter().enumerate() {
            let offset = i * dimension * 4;
            let embedding: Vec<f32> = matrix[offset..offset + dimension * 4]
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            records.push(StoredRecord { record, embedding });
        }

        self.records = records;
        self.dimension = if count > 0 { Some(dimension) } else { None };
        debug!(path = %path.display(), count, "Vector memory loaded");
        Ok(count)
    }
}

impl Default for VectorMemory {
    fn default() -> Self {
        Self::new()
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".json");
    PathBuf::from(s)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".tmp");
    PathBuf::from(s)
}

fn write_all(path: &Path, bytes: &[u8]) -> Result<(), MemoryError> {
    let mut f = std::fs::File::create(path)
        .map_err(|e| MemoryError::Persistence(format!("create {}: {e}", path.display())))?;
    f.write_all(bytes)
        .map_err(|e| MemoryError::Persistence(format!("write {}: {e}", path.display())))?;
    f.flush()
        .map_err(|e| MemoryError::Persistence(format!("flush {}: {e}", path.display())))
}

fn truncate_utf8(mut text: String, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text;
    }
    let mut cut = max_bytes;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: f64 = 86_400.0;

    fn no_tags() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn cosine_known_value() {
        // [1,1] · [1,0] = 1, |[1,1]| = sqrt(2), |[1,0]| = 1 → ≈ 0.7071
        let sim = cosine_similarity(&[1.0, 1.0], &[1.0, 0.0]);
        assert!((sim - 0.7071).abs() < 0.001);
    }

    #[test]
    fn cosine_zero_and_mismatched() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn store_fixes_dimension() {
        let mut mem = VectorMemory::new();
        mem.store("a", vec![1.0, 0.0], 0.0, no_tags()).unwrap();
        let err = mem.store("b", vec![1.0, 0.0, 0.0], 0.0, no_tags()).unwrap_err();
        assert!(matches!(
            err,
            MemoryError::DimensionMismatch { expected: 2, got: 3 }
        ));
    }

    #[test]
    fn recall_orders_by_cosine_times_decay() {
        let now = 100.0 * DAY;
        let mut mem = VectorMemory::new();
        // Equal cosine 0.8 vs query [1,0]: embedding [0.8, 0.6]
        mem.store("old", vec![0.8, 0.6], now - 14.0 * DAY, no_tags()).unwrap();
        mem.store("fresh", vec![0.8, 0.6], now, no_tags()).unwrap();

        let hits = mem.recall(&[1.0, 0.0], 2, now).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.text, "fresh");
        // fresh: 0.8 · 1.0; old: 0.8 · 2^(-2) = 0.2
        assert!((hits[0].1 - 0.8).abs() < 1e-6);
        assert!((hits[1].1 - 0.2).abs() < 1e-6);
    }

    #[test]
    fn recall_scores_are_non_increasing() {
        let now = 50.0 * DAY;
        let mut mem = VectorMemory::new();
        for i in 0..20 {
            let angle = i as f64 * 0.07;
            mem.store(
                format!("r{i}"),
                vec![angle.cos() as f32, angle.sin() as f32],
                now - (i as f64) * DAY,
                no_tags(),
            )
            .unwrap();
        }
        let hits = mem.recall(&[1.0, 0.0], 10, now).unwrap();
        for pair in hits.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn recall_edge_cases() {
        let mem = VectorMemory::new();
        assert!(mem.recall(&[1.0, 0.0], 5, 0.0).unwrap().is_empty());

        let mut mem = VectorMemory::new();
        mem.store("a", vec![1.0, 0.0], 0.0, no_tags()).unwrap();
        // Zero-norm query
        assert!(mem.recall(&[0.0, 0.0], 5, 0.0).unwrap().is_empty());
        // Wrong dimension errors
        assert!(mem.recall(&[1.0], 5, 0.0).is_err());
        // k = 0
        assert!(mem.recall(&[1.0, 0.0], 0, 0.0).unwrap().is_empty());
    }

    #[test]
    fn ties_break_toward_fresher_record() {
        let mut mem = VectorMemory::new().with_half_life_secs(1e12);
        mem.store("older", vec![1.0, 0.0], 10.0, no_tags()).unwrap();
        mem.store("newer", vec![1.0, 0.0], 20.0, no_tags()).unwrap();
        let hits = mem.recall(&[1.0, 0.0], 1, 20.0).unwrap();
        assert_eq!(hits[0].0.text, "newer");
    }

    #[test]
    fn eviction_removes_stalest_first() {
        let mut mem = VectorMemory::new().with_max_records(3);
        for i in 0..5 {
            mem.store(format!("r{i}"), vec![1.0, 0.0], i as f64, no_tags()).unwrap();
        }
        assert_eq!(mem.len(), 3);
        let hits = mem.recall(&[1.0, 0.0], 10, 5.0).unwrap();
        let texts: Vec<&str> = hits.iter().map(|(r, _)| r.text.as_str()).collect();
        assert!(texts.contains(&"r4") && texts.contains(&"r3") && texts.contains(&"r2"));
    }

    #[test]
    fn prune_older_than() {
        let now = 30.0 * DAY;
        let mut mem = VectorMemory::new();
        mem.store("ancient", vec![1.0, 0.0], 0.0, no_tags()).unwrap();
        mem.store("recent", vec![1.0, 0.0], now - DAY, no_tags()).unwrap();

        let removed = mem.prune(PruneCriteria::OlderThan(7.0 * DAY), now);
        assert_eq!(removed, 1);
        assert_eq!(mem.len(), 1);
    }

    #[test]
    fn prune_min_decay() {
        let now = 30.0 * DAY;
        let mut mem = VectorMemory::new(); // 7-day half-life
        mem.store("stale", vec![1.0, 0.0], now - 28.0 * DAY, no_tags()).unwrap(); // decay 2^-4
        mem.store("fresh", vec![1.0, 0.0], now, no_tags()).unwrap();

        let removed = mem.prune(PruneCriteria::MinDecay(0.5), now);
        assert_eq!(removed, 1);
        let hits = mem.recall(&[1.0, 0.0], 10, now).unwrap();
        assert_eq!(hits[0].0.text, "fresh");
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.bin");

        let mut mem = VectorMemory::new();
        let mut tags = BTreeMap::new();
        tags.insert("type".to_string(), "user".to_string());
        mem.store("remember me", vec![0.5, 0.25, -1.0], 42.0, tags).unwrap();
        mem.store("and me", vec![1.0, 0.0, 0.0], 43.0, no_tags()).unwrap();
        mem.save(&path).unwrap();

        let mut loaded = VectorMemory::new();
        let count = loaded.load(&path, Some(3)).unwrap();
        assert_eq!(count, 2);
        assert_eq!(loaded.dimension(), Some(3));

        let hits = loaded.recall(&[0.5, 0.25, -1.0], 1, 43.0).unwrap();
        assert_eq!(hits[0].0.text, "remember me");
        assert_eq!(hits[0].0.tags.get("type").map(String::as_str), Some("user"));
    }

    #[test]
    fn load_rejects_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.bin");

        let mut mem = VectorMemory::new();
        mem.store("x", vec![1.0, 0.0], 0.0, no_tags()).unwrap();
        mem.save(&path).unwrap();

        let mut other = VectorMemory::new();
        other.store("keep", vec![1.0, 0.0, 0.0], 0.0, no_tags()).unwrap();
        let err = other.load(&path, Some(3)).unwrap_err();
        assert!(matches!(err, MemoryError::DimensionMismatch { expected: 3, got: 2 }));
        // Failed load leaves the store untouched
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn load_rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.bin");
        std::fs::write(&path, b"NOTAMEMORYFILE").unwrap();

        let mut mem = VectorMemory::new();
        assert!(mem.load(&path, None).is_err());
    }

    #[test]
    fn missing_file_loads_nothing() {
        let mut mem = VectorMemory::new();
        let count = mem.load(Path::new("/nonexistent/memory.bin"), None).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn save_is_atomic_over_existing_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.bin");

        let mut mem = VectorMemory::new();
        mem.store("v1", vec![1.0], 0.0, no_tags()).unwrap();
        mem.save(&path).unwrap();
        mem.store("v2", vec![0.5], 1.0, no_tags()).unwrap();
        mem.save(&path).unwrap();

        // No temp files left behind, and the final state is complete
        assert!(!tmp_path(&path).exists());
        let mut loaded = VectorMemory::new();
        assert_eq!(loaded.load(&path, Some(1)).unwrap(), 2);
    }

    #[test]
    fn long_text_is_truncated() {
        let mut mem = VectorMemory::new();
        let id = mem.store("é".repeat(4000), vec![1.0], 0.0, no_tags()).unwrap();
        assert!(!id.is_empty());
        let hits = mem.recall(&[1.0], 1, 0.0).unwrap();
        assert!(hits[0].0.text.len() <= 4096);
    }
}
