use std::{any::type_name, fmt, str::FromStr, sync::Arc, vec::IntoIter};

use crate::{
    any::{BeanView, TypeInfo},
    errors::{PropertyErrorKind, ResolveErrorKind},
};

/// Where the value of a constructor argument comes from.
#[derive(Clone)]
pub enum ArgSource {
    /// Another bean, found by type and narrowed by an optional qualifier (bean name).
    Autowired { qualifier: Option<String> },
    /// A value given at registration time. Holds an `Arc<I>` of the parameter type.
    Provided(BeanView),
    /// A property looked up in the environment when the bean is constructed.
    Property { key: Option<String>, default: Option<String> },
}

impl fmt::Debug for ArgSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Autowired { qualifier } => f.debug_struct("Autowired").field("qualifier", qualifier).finish(),
            Self::Provided(_) => f.write_str("Provided"),
            Self::Property { key, default } => f
                .debug_struct("Property")
                .field("key", key)
                .field("default", default)
                .finish(),
        }
    }
}

/// A `(parameter_type, source, required)` triple of a bean constructor.
#[derive(Debug, Clone)]
pub struct ConstructorArg {
    pub param_type: TypeInfo,
    pub source: ArgSource,
    pub required: bool,
}

impl ConstructorArg {
    #[inline]
    #[must_use]
    pub fn autowired(param_type: TypeInfo) -> Self {
        Self {
            param_type,
            source: ArgSource::Autowired { qualifier: None },
            required: true,
        }
    }

    #[inline]
    #[must_use]
    pub fn property(param_type: TypeInfo) -> Self {
        Self {
            param_type,
            source: ArgSource::Property { key: None, default: None },
            required: true,
        }
    }

    #[inline]
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Qualifier of an autowired argument
    #[inline]
    #[must_use]
    pub fn qualifier(&self) -> Option<&str> {
        match &self.source {
            ArgSource::Autowired { qualifier } => qualifier.as_deref(),
            _ => None,
        }
    }
}

/// A constructor argument after resolution, handed to the constructor in declaration order.
#[derive(Clone)]
pub(crate) enum ArgValue {
    /// Holds an `Arc<I>` of the parameter type
    Bean(BeanView),
    Text { key: String, value: String },
    Absent,
}

/// Resolved constructor arguments, consumed front to back by [`Injectable`] implementations.
pub struct ResolvedArgs {
    values: IntoIter<ArgValue>,
    index: usize,
}

impl ResolvedArgs {
    #[inline]
    #[must_use]
    pub(crate) fn new(values: Vec<ArgValue>) -> Self {
        Self {
            values: values.into_iter(),
            index: 0,
        }
    }

    fn next(&mut self) -> (usize, ArgValue) {
        let index = self.index;
        self.index += 1;
        (index, self.values.next().unwrap_or(ArgValue::Absent))
    }

    /// Consumes the next argument if it's absent
    fn skip_absent(&mut self) -> bool {
        if matches!(self.values.as_slice().first(), Some(ArgValue::Absent)) {
            self.next();
            true
        } else {
            false
        }
    }
}

/// A constructor parameter the container knows how to fill.
pub trait Injectable: Sized {
    /// Declared shape of the parameter, read once at registration
    fn arg() -> ConstructorArg;

    fn inject(args: &mut ResolvedArgs) -> Result<Self, ResolveErrorKind>;
}

/// A full constructor parameter list.
pub trait Dependencies: Sized {
    fn args() -> Vec<ConstructorArg>;

    fn inject_all(args: &mut ResolvedArgs) -> Result<Self, ResolveErrorKind>;
}

macro_rules! impl_dependencies {
    (
        [$($ty:ident),*]
    ) => {
        #[allow(non_snake_case, unused_mut)]
        impl<$($ty,)*> Dependencies for ($($ty,)*)
        where
            $( $ty: Injectable, )*
        {
            #[inline]
            fn args() -> Vec<ConstructorArg> {
                vec![$($ty::arg(),)*]
            }

            #[inline]
            #[allow(unused_variables)]
            fn inject_all(args: &mut ResolvedArgs) -> Result<Self, ResolveErrorKind> {
                Ok(($($ty::inject(args)?,)*))
            }
        }
    };
}

all_the_tuples!(impl_dependencies);

/// Another bean, or a capability of one (`Inject<dyn Trait>`).
pub struct Inject<Dep: ?Sized>(pub Arc<Dep>);

impl<Dep: ?Sized + Send + Sync + 'static> Injectable for Inject<Dep> {
    fn arg() -> ConstructorArg {
        ConstructorArg::autowired(TypeInfo::of::<Dep>())
    }

    fn inject(args: &mut ResolvedArgs) -> Result<Self, ResolveErrorKind> {
        match args.next() {
            (index, ArgValue::Bean(view)) => view
                .downcast_ref::<Arc<Dep>>()
                .cloned()
                .map(Self)
                .ok_or(ResolveErrorKind::IncorrectArgument {
                    index,
                    expected: type_name::<Dep>(),
                }),
            (index, ArgValue::Absent) => Err(ResolveErrorKind::MissingArgument {
                index,
                type_name: type_name::<Dep>(),
            }),
            (index, ArgValue::Text { .. }) => Err(ResolveErrorKind::IncorrectArgument {
                index,
                expected: type_name::<Dep>(),
            }),
        }
    }
}

/// A property value parsed into `T` when the bean is constructed.
pub struct Value<T>(pub T);

impl<T: FromStr + 'static> Injectable for Value<T> {
    fn arg() -> ConstructorArg {
        ConstructorArg::property(TypeInfo::of::<T>())
    }

    fn inject(args: &mut ResolvedArgs) -> Result<Self, ResolveErrorKind> {
        match args.next() {
            (_, ArgValue::Text { key, value }) => match value.parse() {
                Ok(parsed) => Ok(Self(parsed)),
                Err(_) => Err(PropertyErrorKind::Parse {
                    key,
                    value,
                    type_name: type_name::<T>(),
                }
                .into()),
            },
            (index, ArgValue::Absent) => Err(ResolveErrorKind::MissingArgument {
                index,
                type_name: type_name::<T>(),
            }),
            (index, ArgValue::Bean(_)) => Err(ResolveErrorKind::IncorrectArgument {
                index,
                expected: type_name::<T>(),
            }),
        }
    }
}

/// Optional argument, `None` when nothing satisfies it.
impl<T: Injectable> Injectable for Option<T> {
    fn arg() -> ConstructorArg {
        T::arg().optional()
    }

    fn inject(args: &mut ResolvedArgs) -> Result<Self, ResolveErrorKind> {
        if args.skip_absent() {
            return Ok(None);
        }
        T::inject(args).map(Some)
    }
}
