use std::{
    any::{type_name, Any, TypeId},
    cmp::Ordering,
    fmt::{self, Display, Formatter},
    sync::Arc,
};

/// A container-managed instance, type-erased.
pub type Bean = Arc<dyn Any + Send + Sync>;

/// A bean seen through one of its capabilities.
/// Always holds an `Arc<I>` where `I` is the requested capability type.
pub(crate) type BeanView = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct TypeInfo {
    pub name: &'static str,
    pub id: TypeId,
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeInfo {}

impl PartialOrd for TypeInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Display for TypeInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl TypeInfo {
    #[inline]
    #[must_use]
    pub fn of<T>() -> Self
    where
        T: ?Sized + 'static,
    {
        Self {
            name: type_name::<T>(),
            id: TypeId::of::<T>(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TypeInfo;

    trait Greeter {}
    struct English;

    #[test]
    fn test_type_info_eq_by_id() {
        assert_eq!(TypeInfo::of::<English>(), TypeInfo::of::<English>());
        assert_ne!(TypeInfo::of::<English>(), TypeInfo::of::<dyn Greeter>());
    }
}
