//! Seedable per-voice random numbers
//!
//! Every voice owns one [`Rng`]. It feeds unison detune offsets, phase
//! randomization, humanizer values and noise sub-oscillators. Seeding a voice
//! explicitly makes its whole output sequence reproducible, which the
//! regression tests rely on.
//!
//! The generator is Xorshift128+: fast, period 2^128 - 1, good enough for
//! audio noise.

/// Xorshift128+ generator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rng {
    s0: u64,
    s1: u64,
}

impl Rng {
    /// Build from raw state. An all-zero state is replaced by a valid one.
    #[inline]
    pub const fn new(s0: u64, s1: u64) -> Self {
        let s0 = if s0 == 0 && s1 == 0 { 1 } else { s0 };
        Self { s0, s1 }
    }

    /// Derive the two state words from a single seed with splitmix64
    #[inline]
    pub fn from_seed(seed: u64) -> Self {
        let s0 = splitmix64(seed);
        let s1 = splitmix64(seed.wrapping_add(0x9e3779b97f4a7c15));
        Self::new(s0, s1)
    }

    /// Non-deterministic seed for production voices
    #[cfg(feature = "entropy")]
    pub fn from_entropy() -> Self {
        Self::from_seed(rand::random::<u64>())
    }

    /// Fixed fallback when no entropy source is compiled in
    #[cfg(not(feature = "entropy"))]
    pub fn from_entropy() -> Self {
        Self::new(0x853c49e6748fea9b, 0xda3e39cb94b95bdb)
    }

    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.s0;
        let mut s1 = self.s1;
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.s0 = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.s1 = s1.rotate_left(37);

        result
    }

    /// Uniform in [0, 1)
    #[inline]
    pub fn next_f32(&mut self) -> f32 {
        // 24 mantissa bits
        (self.next_u64() >> 40) as f32 * (1.0 / (1u64 << 24) as f32)
    }

    /// Uniform in [-1, 1)
    #[inline]
    pub fn next_bipolar(&mut self) -> f32 {
        self.next_f32() * 2.0 - 1.0
    }

    /// Uniform integer in [0, bound). Returns 0 for an empty range.
    #[inline]
    pub fn next_index(&mut self, bound: usize) -> usize {
        if bound == 0 {
            return 0;
        }
        (self.next_u64() % bound as u64) as usize
    }

    /// Split off an independent stream, advancing this one
    pub fn fork(&mut self) -> Self {
        Self::from_seed(self.next_u64())
    }
}

impl Default for Rng {
    fn default() -> Self {
        Self::from_entropy()
    }
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e3779b97f4a7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_deterministic() {
        let mut rng1 = Rng::from_seed(12345);
        let mut rng2 = Rng::from_seed(12345);

        for _ in 0..100 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_rng_different_seeds() {
        let mut rng1 = Rng::from_seed(12345);
        let mut rng2 = Rng::from_seed(54321);
        assert_ne!(rng1.next_u64(), rng2.next_u64());
    }

    #[test]
    fn test_rng_f32_range() {
        let mut rng = Rng::from_seed(42);
        for _ in 0..1000 {
            let v = rng.next_f32();
            assert!((0.0..1.0).contains(&v), "Value {} out of range", v);
        }
    }

    #[test]
    fn test_rng_bipolar_range() {
        let mut rng = Rng::from_seed(42);
        for _ in 0..1000 {
            let v = rng.next_bipolar();
            assert!((-1.0..1.0).contains(&v), "Value {} out of range", v);
        }
    }

    #[test]
    fn test_rng_index_bound() {
        let mut rng = Rng::from_seed(7);
        for _ in 0..1000 {
            assert!(rng.next_index(2048) < 2048);
        }
        assert_eq!(rng.next_index(0), 0);
    }

    #[test]
    fn test_rng_distribution() {
        let mut rng = Rng::from_seed(42);
        let count = 10000;
        let sum: f32 = (0..count).map(|_| rng.next_f32()).sum();
        let mean = sum / count as f32;
        assert!((mean - 0.5).abs() < 0.02, "Mean {} too far from 0.5", mean);
    }

    #[test]
    fn test_fork_is_independent() {
        let mut parent = Rng::from_seed(99);
        let mut child = parent.fork();
        assert_ne!(parent.next_u64(), child.next_u64());
    }

    #[test]
    fn test_zero_seed_handling() {
        let mut rng = Rng::new(0, 0);
        let v = rng.next_f32();
        assert!((0.0..1.0).contains(&v));
    }

    #[cfg(feature = "entropy")]
    #[test]
    fn test_entropy_seeds_differ() {
        let a: Vec<u64> = (0..4).map(|_| Rng::from_entropy().next_u64()).collect();
        assert!(a.windows(2).any(|w| w[0] != w[1]));
    }

    #[cfg(not(feature = "entropy"))]
    #[test]
    fn test_fixed_seed_without_entropy() {
        assert_eq!(Rng::from_entropy(), Rng::default());
        assert_eq!(Rng::from_entropy().next_u64(), Rng::from_entropy().next_u64());
    }
}
