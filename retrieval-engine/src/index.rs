use std::cmp::Ordering;

use common::error::AppError;

const INDEX_MAGIC: [u8; 4] = *b"VIDX";
const FORMAT_VERSION: u32 = 1;
// magic + format version + dimension + row count
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// Exact inner-product index over L2-normalized vectors.
///
/// Rows are stored contiguously and scanned in full on every search; with
/// normalized vectors the inner product equals cosine similarity. The row
/// position doubles as the ordinal id handed back to callers.
#[derive(Debug, Clone)]
pub struct FlatVectorIndex {
    dimension: usize,
    vectors: Vec<f32>,
}

impl FlatVectorIndex {
    pub fn from_vectors(dimension: usize, vectors: Vec<f32>) -> Result<Self, AppError> {
        if dimension == 0 {
            return Err(AppError::IndexFormat("dimension must be non-zero".into()));
        }
        if vectors.len() % dimension != 0 {
            return Err(AppError::IndexFormat(format!(
                "vector payload of {} floats is not a multiple of dimension {}",
                vectors.len(),
                dimension
            )));
        }
        Ok(Self { dimension, vectors })
    }

    /// Deserialize the on-disk format: `VIDX` magic, format version,
    /// dimension, row count, then packed little-endian `f32` rows.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AppError> {
        if bytes.len() < HEADER_LEN {
            return Err(AppError::IndexFormat(format!(
                "index file truncated: {} bytes, header needs {HEADER_LEN}",
                bytes.len()
            )));
        }
        let (header, body) = bytes.split_at(HEADER_LEN);

        if header[0..4] != INDEX_MAGIC {
            return Err(AppError::IndexFormat("bad magic, not a vector index file".into()));
        }
        let version = read_u32(header, 4)?;
        if version != FORMAT_VERSION {
            return Err(AppError::IndexFormat(format!(
                "unsupported index format version {version}"
            )));
        }
        let dimension = read_u32(header, 8)? as usize;
        if dimension == 0 {
            return Err(AppError::IndexFormat("index declares zero dimension".into()));
        }
        let count = read_u64(header, 12)? as usize;

        let expected = count
            .checked_mul(dimension)
            .and_then(|floats| floats.checked_mul(4))
            .ok_or_else(|| AppError::IndexFormat("index header overflows payload size".into()))?;
        if body.len() != expected {
            return Err(AppError::IndexFormat(format!(
                "index payload is {} bytes, header implies {expected}",
                body.len()
            )));
        }

        let vectors = body
            .chunks_exact(4)
            .map(|chunk| {
                let raw: [u8; 4] = chunk.try_into().unwrap_or_default();
                f32::from_le_bytes(raw)
            })
            .collect();

        Ok(Self { dimension, vectors })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.vectors.len() * 4);
        out.extend_from_slice(&INDEX_MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        out.extend_from_slice(&(self.len() as u64).to_le_bytes());
        for value in &self.vectors {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of indexed vectors.
    pub fn len(&self) -> usize {
        self.vectors.len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Top-`k` rows by inner product against `query`, best first, as
    /// `(similarity, ordinal)` pairs. Returns every row when fewer than `k`
    /// are indexed; ties keep ordinal order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(f32, usize)> {
        if k == 0 || self.is_empty() || query.len() != self.dimension {
            return Vec::new();
        }

        let mut scored: Vec<(f32, usize)> = self
            .vectors
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(ordinal, row)| (dot(query, row), ordinal))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, AppError> {
    bytes
        .get(offset..offset + 4)
        .and_then(|slice| slice.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| AppError::IndexFormat("index header truncated".into()))
}

fn read_u64(bytes: &[u8], offset: usize) -> Result<u64, AppError> {
    bytes
        .get(offset..offset + 8)
        .and_then(|slice| slice.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| AppError::IndexFormat("index header truncated".into()))
}

/// Scale `vector` to unit length. A zero vector is left untouched (its norm
/// is treated as 1), so callers never divide by zero.
pub fn normalize_l2(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector {
            *value /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_row_index() -> FlatVectorIndex {
        // Unit rows along distinct axes plus one diagonal.
        let rows = vec![
            1.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, //
            0.707, 0.707, 0.0,
        ];
        FlatVectorIndex::from_vectors(3, rows).expect("index")
    }

    #[test]
    fn search_orders_by_descending_similarity() {
        let index = three_row_index();
        let results = index.search(&[1.0, 0.0, 0.0], 3);

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].1, 0);
        assert_eq!(results[1].1, 2);
        assert_eq!(results[2].1, 1);
        assert!(results[0].0 > results[1].0);
        assert!(results[1].0 > results[2].0);
    }

    #[test]
    fn search_returns_all_rows_when_k_exceeds_count() {
        let index = three_row_index();
        let results = index.search(&[0.0, 1.0, 0.0], 10);
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn search_truncates_to_k() {
        let index = three_row_index();
        let results = index.search(&[0.0, 1.0, 0.0], 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1, 1);
    }

    #[test]
    fn equal_scores_keep_ordinal_order() {
        let rows = vec![
            0.0, 1.0, //
            0.0, 1.0, //
            1.0, 0.0,
        ];
        let index = FlatVectorIndex::from_vectors(2, rows).expect("index");
        let results = index.search(&[0.0, 1.0], 3);
        assert_eq!(results[0].1, 0);
        assert_eq!(results[1].1, 1);
        assert_eq!(results[2].1, 2);
    }

    #[test]
    fn round_trip_preserves_rows() {
        let index = three_row_index();
        let restored = FlatVectorIndex::from_bytes(&index.to_bytes()).expect("restore");
        assert_eq!(restored.dimension(), 3);
        assert_eq!(restored.len(), 3);
        let results = restored.search(&[1.0, 0.0, 0.0], 1);
        assert_eq!(results[0].1, 0);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = three_row_index().to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            FlatVectorIndex::from_bytes(&bytes),
            Err(AppError::IndexFormat(_))
        ));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let mut bytes = three_row_index().to_bytes();
        bytes.truncate(bytes.len() - 5);
        assert!(matches!(
            FlatVectorIndex::from_bytes(&bytes),
            Err(AppError::IndexFormat(_))
        ));
    }

    #[test]
    fn mismatched_payload_length_is_rejected() {
        assert!(FlatVectorIndex::from_vectors(3, vec![1.0, 0.0]).is_err());
    }

    #[test]
    fn normalize_produces_unit_vectors() {
        let mut vector = vec![3.0, 4.0];
        normalize_l2(&mut vector);
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector_untouched() {
        let mut vector = vec![0.0, 0.0, 0.0];
        normalize_l2(&mut vector);
        assert_eq!(vector, vec![0.0, 0.0, 0.0]);
    }
}
