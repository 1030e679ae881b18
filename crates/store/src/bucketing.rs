//! Deterministic variant bucketing.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Index of the variant `user_id` falls into. Stable across processes and
/// restarts, and independent between experiments.
pub fn bucket(experiment_id: &Uuid, user_id: &str, variant_count: usize) -> usize {
    if variant_count <= 1 {
        return 0;
    }
    let digest = Sha256::digest(format!("{experiment_id}:{user_id}").as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % variant_count as u64) as usize
}
