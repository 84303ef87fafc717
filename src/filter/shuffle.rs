//! Filter id 2: byte shuffle. Transposes an array of `n`-byte elements so
//! that same-position bytes become contiguous, which generally improves
//! subsequent compression (spec.md §4.6, §8 property 6).

use crate::error::{Error, Result};
use crate::filter::Filter;

pub struct Shuffle {
    pub element_size: u32,
}

/// `shuffle(x)[j*k + i] = x[i*n + j]` for `i < k, j < n`, `k = L/n`.
pub fn shuffle(data: &[u8], element_size: usize) -> Vec<u8> {
    if element_size <= 1 || data.is_empty() {
        return data.to_vec();
    }
    let k = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for i in 0..k {
        for j in 0..element_size {
            out[j * k + i] = data[i * element_size + j];
        }
    }
    out
}

/// Inverse of [`shuffle`].
pub fn unshuffle(data: &[u8], element_size: usize) -> Vec<u8> {
    if element_size <= 1 || data.is_empty() {
        return data.to_vec();
    }
    let k = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for i in 0..k {
        for j in 0..element_size {
            out[i * element_size + j] = data[j * k + i];
        }
    }
    out
}

impl Filter for Shuffle {
    fn id(&self) -> u16 {
        super::ID_SHUFFLE
    }

    fn name(&self) -> &str {
        "shuffle"
    }

    fn apply(&self, data: &[u8]) -> Result<Vec<u8>> {
        let n = self.element_size as usize;
        if n != 0 && data.len() % n != 0 {
            return Err(Error::InvariantViolation(format!(
                "shuffle input length {} is not a multiple of element size {n}",
                data.len()
            )));
        }
        Ok(shuffle(data, n))
    }

    fn remove(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(unshuffle(data, self.element_size as usize))
    }

    fn encode_params(&self) -> (u16, Vec<u32>) {
        (0, vec![self.element_size])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shuffle_matches_worked_example() {
        let input = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        let shuffled = shuffle(&input, 4);
        assert_eq!(shuffled, vec![1, 5, 9, 2, 6, 10, 3, 7, 11, 4, 8, 12]);
        assert_eq!(unshuffle(&shuffled, 4), input);
    }

    #[test]
    fn unshuffle_inverts_shuffle_for_arbitrary_input() {
        let input: Vec<u8> = (0..40u8).collect();
        let shuffled = shuffle(&input, 5);
        assert_eq!(unshuffle(&shuffled, 5), input);
    }
}
