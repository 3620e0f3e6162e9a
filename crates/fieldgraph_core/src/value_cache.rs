//! Per-context storage for field values and derivatives.

/// Algorithm-specific workspace kept alongside a field's values.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Scratch {
    #[default]
    None,
    /// Working copy of the source matrix and the eigenvector matrix, eigenvectors in columns.
    Eigen { matrix: Vec<f64>, vectors: Vec<f64> },
    /// LU factors, row pivots and a work vector for back-substitution.
    Invert {
        lu: Vec<f64>,
        pivots: Vec<usize>,
        work: Vec<f64>,
    },
}

#[derive(Debug, Clone)]
pub struct ValueCache {
    pub values: Vec<f64>,
    pub(crate) evaluation_counter: u64,
    pub scratch: Scratch,
}

impl ValueCache {
    pub fn new(component_count: usize) -> Self {
        Self {
            values: vec![0.0; component_count],
            evaluation_counter: 0,
            scratch: Scratch::None,
        }
    }

    /// Value cache for an eigen-analysis of an `n` x `n` matrix.
    pub fn eigen(n: usize) -> Self {
        Self {
            values: vec![0.0; n],
            evaluation_counter: 0,
            scratch: Scratch::Eigen {
                matrix: vec![0.0; n * n],
                vectors: vec![0.0; n * n],
            },
        }
    }

    /// Value cache for inverting an `n` x `n` matrix.
    pub fn invert(n: usize) -> Self {
        Self {
            values: vec![0.0; n * n],
            evaluation_counter: 0,
            scratch: Scratch::Invert {
                lu: vec![0.0; n * n],
                pivots: vec![0; n],
                work: vec![0.0; n],
            },
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn component_count(&self) -> usize {
        self.values.len()
    }

    /// Eigenvector matrix left by the last eigen-analysis, if this is an eigen cache.
    pub fn eigenvectors(&self) -> Option<&[f64]> {
        match &self.scratch {
            Scratch::Eigen { vectors, .. } => Some(vectors),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DerivativeValueCache {
    pub values: Vec<f64>,
    term_count: usize,
    pub(crate) evaluation_counter: u64,
}

impl DerivativeValueCache {
    pub fn new(component_count: usize, term_count: usize) -> Self {
        Self {
            values: vec![0.0; component_count * term_count],
            term_count,
            evaluation_counter: 0,
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn term_count(&self) -> usize {
        self.term_count
    }

    pub fn component_count(&self) -> usize {
        if self.term_count == 0 {
            0
        } else {
            self.values.len() / self.term_count
        }
    }

    /// Derivative terms of one component.
    pub fn component(&self, component: usize) -> &[f64] {
        let start = component * self.term_count;
        &self.values[start..start + self.term_count]
    }

    pub fn zero_values(&mut self) {
        self.values.iter_mut().for_each(|v| *v = 0.0);
    }

    pub fn copy_values(&mut self, source: &[f64]) {
        self.values.copy_from_slice(source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specialised_caches_allocate_scratch_space() {
        let eigen = ValueCache::eigen(3);
        assert_eq!(eigen.component_count(), 3);
        assert_eq!(eigen.eigenvectors().map(<[f64]>::len), Some(9));
        let invert = ValueCache::invert(2);
        assert_eq!(invert.component_count(), 4);
        assert!(invert.eigenvectors().is_none());
        assert!(matches!(invert.scratch, Scratch::Invert { ref pivots, .. } if pivots.len() == 2));
    }

    #[test]
    fn derivative_cache_is_component_major() {
        let mut cache = DerivativeValueCache::new(2, 3);
        cache.copy_values(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(cache.component_count(), 2);
        assert_eq!(cache.component(1), &[4.0, 5.0, 6.0]);
        cache.zero_values();
        assert!(cache.values().iter().all(|&v| v == 0.0));
    }
}
