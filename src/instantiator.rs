use std::sync::Arc;
use tracing::debug;

use crate::{
    any::Bean,
    errors::{InstantiateErrorKind, InstantiatorErrorKind, ResolveErrorKind},
    inject::{Dependencies, Injectable, ResolvedArgs},
    service::{service_fn, BoxCloneService},
};

/// A bean constructor: anything callable with [`Injectable`] parameters.
pub trait Instantiator<Deps>: Clone + Send + Sync + 'static
where
    Deps: Dependencies,
{
    type Provides: Send + Sync + 'static;
    type Error: Into<InstantiateErrorKind>;

    fn instantiate(&mut self, dependencies: Deps) -> Result<Self::Provides, Self::Error>;
}

pub(crate) type BoxedCloneInstantiator =
    BoxCloneService<ResolvedArgs, Bean, InstantiatorErrorKind<ResolveErrorKind, InstantiateErrorKind>>;

#[must_use]
pub(crate) fn boxed_instantiator_factory<Inst, Deps>(instantiator: Inst) -> BoxedCloneInstantiator
where
    Inst: Instantiator<Deps>,
    Deps: Dependencies,
{
    BoxCloneService::new(service_fn({
        move |mut args: ResolvedArgs| -> Result<Bean, InstantiatorErrorKind<ResolveErrorKind, InstantiateErrorKind>> {
            let dependencies = match Deps::inject_all(&mut args) {
                Ok(dependencies) => dependencies,
                Err(err) => return Err(InstantiatorErrorKind::Deps(err)),
            };
            let bean = match instantiator.clone().instantiate(dependencies) {
                Ok(bean) => bean,
                Err(err) => return Err(InstantiatorErrorKind::Factory(err.into())),
            };

            debug!("Instantiated");

            Ok(Arc::new(bean) as Bean)
        }
    }))
}

macro_rules! impl_instantiator {
    (
        [$($ty:ident),*]
    ) => {
        #[allow(non_snake_case)]
        impl<F, Response, Err, $($ty,)*> Instantiator<($($ty,)*)> for F
        where
            F: FnMut($($ty,)*) -> Result<Response, Err> + Clone + Send + Sync + 'static,
            Response: Send + Sync + 'static,
            Err: Into<InstantiateErrorKind>,
            $( $ty: Injectable, )*
        {
            type Provides = Response;
            type Error = Err;

            fn instantiate(&mut self, ($($ty,)*): ($($ty,)*)) -> Result<Self::Provides, Self::Error> {
                self($($ty,)*)
            }
        }
    };
}

all_the_tuples!(impl_instantiator);

/// Wrapper to create an instantiator that just returns passed value.
/// It can be used when the value was created outside the container.
#[inline]
#[must_use]
pub fn instance<T>(val: T) -> impl Instantiator<(), Provides = T, Error = InstantiateErrorKind>
where
    T: Clone + Send + Sync + 'static,
{
    move || Ok(val.clone())
}

#[cfg(test)]
mod tests {
    use super::{boxed_instantiator_factory, instance, InstantiateErrorKind, Instantiator};
    use crate::{
        any::BeanView,
        errors::{InstantiatorErrorKind, ResolveErrorKind},
        inject::{ArgValue, Dependencies, Inject, ResolvedArgs},
    };

    use std::sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    };
    use tracing::debug;
    use tracing_test::traced_test;

    struct Pool(u8);
    struct Repository(u8);

    #[test]
    #[allow(dead_code)]
    fn test_instantiator_impls() {
        fn resolver<Deps: Dependencies, F: Instantiator<Deps>>(_f: F) {}
        fn resolver_with_dep() {
            resolver(|| Ok::<_, InstantiateErrorKind>(()));
            resolver(|Inject(pool): Inject<Pool>| Ok::<_, InstantiateErrorKind>(Repository(pool.0)));
            resolver(instance(1u8));
        }
    }

    #[test]
    #[traced_test]
    fn test_boxed_instantiator_factory() {
        let call_count = Arc::new(AtomicU8::new(0));

        let instantiator = boxed_instantiator_factory({
            let call_count = call_count.clone();
            move |Inject(pool): Inject<Pool>| {
                call_count.fetch_add(1, Ordering::SeqCst);

                debug!("Call instantiator repository");
                Ok::<_, InstantiateErrorKind>(Repository(pool.0))
            }
        });

        let pool = Arc::new(Arc::new(Pool(7))) as BeanView;
        let repository_1 = instantiator
            .call_cloned(ResolvedArgs::new(vec![ArgValue::Bean(pool.clone())]))
            .unwrap();
        let repository_2 = instantiator
            .call_cloned(ResolvedArgs::new(vec![ArgValue::Bean(pool)]))
            .unwrap();

        assert!(!Arc::ptr_eq(&repository_1, &repository_2));
        assert_eq!(repository_1.downcast::<Repository>().unwrap().0, 7);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    #[traced_test]
    fn test_errors_split_by_stage() {
        let instantiator = boxed_instantiator_factory(|Inject(_): Inject<Pool>| {
            Err::<Repository, _>(InstantiateErrorKind::Custom(anyhow::anyhow!("pool exhausted")))
        });

        let deps_err = instantiator.call_cloned(ResolvedArgs::new(vec![ArgValue::Absent])).err().unwrap();
        assert!(matches!(
            deps_err,
            InstantiatorErrorKind::Deps(ResolveErrorKind::MissingArgument { index: 0, .. })
        ));

        let pool = Arc::new(Arc::new(Pool(1))) as BeanView;
        let factory_err = instantiator.call_cloned(ResolvedArgs::new(vec![ArgValue::Bean(pool)])).err().unwrap();
        assert_eq!(factory_err.to_string(), "pool exhausted");
    }

    #[test]
    fn test_instance_clones() {
        let instantiator = boxed_instantiator_factory(instance(5u8));
        let value = instantiator.call_cloned(ResolvedArgs::new(Vec::new())).unwrap();

        assert_eq!(*value.downcast::<u8>().unwrap(), 5);
    }
}
