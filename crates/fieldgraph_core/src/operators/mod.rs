//! Concrete field types and their factory functions on [`FieldModule`](crate::module::FieldModule).

pub mod arithmetic;
pub mod derivative;
pub mod leaf;
pub mod matrix;
pub mod trigonometry;

use crate::error::{FieldError, Result};
use crate::field::Field;

pub(crate) fn require_components(field: &Field, expected: usize, context: &str) -> Result<()> {
    if field.component_count() == expected {
        Ok(())
    } else {
        Err(FieldError::ComponentMismatch {
            context: format!("{context}: source {}", field.name()),
            expected,
            actual: field.component_count(),
        })
    }
}

pub(crate) fn require_same_components(a: &Field, b: &Field, context: &str) -> Result<()> {
    require_components(b, a.component_count(), context)
}

/// Side length of a square matrix with `components` entries.
pub(crate) fn square_size(components: usize) -> Option<usize> {
    let n = (components as f64).sqrt().round() as usize;
    (n > 0 && n * n == components).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_size_detects_perfect_squares() {
        assert_eq!(square_size(1), Some(1));
        assert_eq!(square_size(9), Some(3));
        assert_eq!(square_size(16), Some(4));
        assert_eq!(square_size(5), None);
        assert_eq!(square_size(0), None);
    }
}
