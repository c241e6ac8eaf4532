use core::num::NonZeroU64;

use ethereum_hashing::hash_fixed;
use types::phase0::primitives::H256;

const BITS_PER_HASH: u64 = 256;

// Based on the swap-or-not shuffle from the consensus specifications.
// See <https://github.com/protolambda/eth2-docs#shuffling> for an
// explanation of the algorithm.
#[must_use]
pub fn shuffle_single(mut index: u64, index_count: NonZeroU64, seed: H256, rounds: u8) -> u64 {
    assert!(index < index_count.get());

    for round in 0..rounds {
        let pivot = compute_pivot(seed, round, index_count);
        let flip = (pivot + index_count.get() - index) % index_count;
        let position = index.max(flip);
        let source = compute_source(seed, round, position / BITS_PER_HASH);
        let byte = source[usize::try_from(position % BITS_PER_HASH).expect(
            "remainder of division by BITS_PER_HASH fits in usize",
        ) / 8];
        let bit = (byte >> (position % 8)) & 1;

        if bit == 1 {
            index = flip;
        }
    }

    index
}

fn compute_pivot(seed: H256, round: u8, index_count: NonZeroU64) -> u64 {
    let mut input = [0; 33];
    input[..32].copy_from_slice(seed.as_slice());
    input[32] = round;

    let digest = hash_fixed(&input);

    let pivot = digest[..size_of::<u64>()]
        .try_into()
        .map(u64::from_le_bytes)
        .expect("slice has the same size as u64");

    pivot % index_count
}

fn compute_source(seed: H256, round: u8, position_window: u64) -> [u8; 32] {
    // Truncate to match `compute_shuffled_index` in the consensus specifications.
    #[allow(clippy::cast_possible_truncation)]
    let position_window = position_window as u32;

    let mut input = [0; 37];
    input[..32].copy_from_slice(seed.as_slice());
    input[32] = round;
    input[33..].copy_from_slice(&position_window.to_le_bytes());

    hash_fixed(&input)
}

#[cfg(test)]
mod tests {
    use itertools::Itertools as _;
    use test_case::test_case;

    use super::*;

    #[test_case(1)]
    #[test_case(2)]
    #[test_case(33)]
    #[test_case(100)]
    fn shuffle_single_is_a_permutation(count: u64) {
        let seed = H256::repeat_byte(0xab);
        let index_count = NonZeroU64::new(count).expect("count is nonzero");

        let mapping = (0..count)
            .map(|index| shuffle_single(index, index_count, seed, 10))
            .collect_vec();

        assert!(mapping.iter().all(|index| *index < count));
        assert_eq!(mapping.iter().unique().count(), mapping.len());
    }

    #[test]
    fn shuffle_single_is_deterministic() {
        let seed = H256::repeat_byte(0x01);
        let index_count = NonZeroU64::new(64).expect("count is nonzero");

        for index in 0..64 {
            assert_eq!(
                shuffle_single(index, index_count, seed, 90),
                shuffle_single(index, index_count, seed, 90),
            );
        }
    }

    #[test]
    fn different_seeds_produce_different_permutations() {
        let index_count = NonZeroU64::new(100).expect("count is nonzero");

        let first = (0..100)
            .map(|index| shuffle_single(index, index_count, H256::repeat_byte(0x01), 90))
            .collect_vec();

        let second = (0..100)
            .map(|index| shuffle_single(index, index_count, H256::repeat_byte(0x02), 90))
            .collect_vec();

        assert_ne!(first, second);
    }
}
