//! ID generation utilities.

use uuid::Uuid;

/// ID generator for punishments and other entities.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Generate a new punishment ID.
    ///
    /// UUID v7 is time-ordered and suitable for database primary keys.
    #[must_use]
    pub fn generate(&self) -> Uuid {
        Uuid::now_v7()
    }

    /// Generate a new random UUID v4.
    #[must_use]
    pub fn generate_random(&self) -> Uuid {
        Uuid::new_v4()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_v7() {
        let id_gen = IdGenerator::new();
        let id1 = id_gen.generate();
        let id2 = id_gen.generate();

        assert_eq!(id1.get_version_num(), 7);
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_generate_random() {
        let id = IdGenerator::new().generate_random();
        assert_eq!(id.get_version_num(), 4);
    }
}
