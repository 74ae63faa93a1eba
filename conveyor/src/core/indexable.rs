//! The trait every indexed domain object implements.

use std::any::Any;

/// A domain object with a globally-unique identifier string.
///
/// Objects are stored type-erased in the index container; `as_any`
/// supports the typed lookup path.
pub trait Indexable: Send + Sync + 'static {
    /// Returns the object's unique identifier.
    fn uid(&self) -> &str;

    /// Returns the object as [`Any`] for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Returns the object's declared type name.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl dyn Indexable {
    /// Attempts to view the object as a concrete type.
    #[must_use]
    pub fn downcast_ref<T: Indexable>(&self) -> Option<&T> {
        self.as_any().downcast_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Order {
        id: String,
        total: u64,
    }

    impl Indexable for Order {
        fn uid(&self) -> &str {
            &self.id
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_downcast_ref() {
        let order: Box<dyn Indexable> = Box::new(Order {
            id: "o-1".into(),
            total: 42,
        });

        assert_eq!(order.uid(), "o-1");
        assert_eq!(order.downcast_ref::<Order>().map(|o| o.total), Some(42));
        assert!(order.type_name().ends_with("Order"));
    }
}
