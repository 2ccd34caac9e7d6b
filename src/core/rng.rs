//! Draw Random Number Generator
//!
//! Uses Xorshift128+ for fast, reproducible randomness.
//! Given the same seed, produces an identical sequence on all platforms,
//! which lets tests pin outcome draws and synthetic picks.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::kind::GameKind;
use super::round_id::TableNumber;

/// Basis points in one whole (100 %).
pub const BPS_ONE: u32 = 10_000;

/// Xorshift128+ PRNG used for outcome draws and synthetic bets.
///
/// # Example
///
/// ```
/// use numbers_table::core::rng::DrawRng;
///
/// let mut a = DrawRng::new(12345);
/// let mut b = DrawRng::new(12345);
/// assert_eq!(a.next_u64(), b.next_u64());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DrawRng {
    state: [u64; 2],
}

impl Default for DrawRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DrawRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Ensure state is never all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Create the RNG for one table.
    pub fn for_table(kind: GameKind, table_number: TableNumber, entropy: u64) -> Self {
        Self::new(derive_table_seed(kind, table_number, entropy))
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random integer in range [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        // modulo bias is negligible for ranges this small
        (self.next_u64() % max as u64) as u32
    }

    /// True with probability `bps / 10_000`.
    #[inline]
    pub fn chance_bps(&mut self, bps: u32) -> bool {
        self.next_int(BPS_ONE) < bps
    }

    /// Select a random element from a slice.
    pub fn choose<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            let idx = self.next_int(slice.len() as u32) as usize;
            Some(&slice[idx])
        }
    }

    /// Get current state (for checkpointing/debugging).
    pub fn state(&self) -> [u64; 2] {
        self.state
    }
}

/// SplitMix64 for seed initialization.
/// Produces well-distributed values from sequential seeds.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive a table's draw seed.
///
/// Tables sharing one entropy value still get independent sequences.
pub fn derive_table_seed(kind: GameKind, table_number: TableNumber, entropy: u64) -> u64 {
    let mut hasher = Sha256::new();

    // Domain separator
    hasher.update(b"NUMBERS_TABLE_DRAW_V1");
    hasher.update(kind.as_str().as_bytes());
    hasher.update(table_number.to_le_bytes());
    hasher.update(entropy.to_le_bytes());

    let hash = hasher.finalize();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[0..8]);
    u64::from_le_bytes(seed)
}

// =============================================================================
// TESTS
// =============================================================================
