use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

static GENERATION: AtomicU64 = AtomicU64::new(1);

/// Square single-channel displacement texture with samples in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Heightmap {
    size: usize,
    data: Vec<f32>,
    generation: u64,
}

impl Heightmap {
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Changes every time a new heightmap is generated; GPU uploads key off it.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[cfg(test)]
    pub(crate) fn filled(size: usize, value: f32) -> Self {
        Self {
            size,
            data: vec![value; size * size],
            generation: GENERATION.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Nearest-neighbour lookup with clamp-to-edge addressing.
    pub fn sample(&self, u: f32, v: f32) -> f32 {
        if self.size == 0 {
            return 0.0;
        }
        let max = self.size - 1;
        let x = ((u.clamp(0.0, 1.0) * self.size as f32) as usize).min(max);
        let y = ((v.clamp(0.0, 1.0) * self.size as f32) as usize).min(max);
        self.data[y * self.size + x]
    }
}

/// Draws a fresh `size`×`size` heightmap of independent uniform samples.
pub fn generate<R: Rng + ?Sized>(size: usize, rng: &mut R) -> Heightmap {
    let data = (0..size * size).map(|_| rng.gen_range(0.0..=1.0)).collect();
    Heightmap {
        size,
        data,
        generation: GENERATION.fetch_add(1, Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn has_size_squared_samples_in_unit_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for size in [0, 1, 5, 123] {
            let map = generate(size, &mut rng);
            assert_eq!(map.data().len(), size * size);
            assert!(map.data().iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn every_call_gets_a_new_generation() {
        let mut rng = StdRng::seed_from_u64(1);
        let a = generate(4, &mut rng);
        let b = generate(4, &mut rng);
        assert_ne!(a.generation(), b.generation());
        assert_ne!(a.data(), b.data());
    }

    #[test]
    fn sampling_clamps_to_edges() {
        let mut rng = StdRng::seed_from_u64(3);
        let map = generate(8, &mut rng);
        assert_eq!(map.sample(-1.0, -1.0), map.data()[0]);
        assert_eq!(map.sample(2.0, 2.0), map.data()[63]);
    }
}
