use std::marker::PhantomData;

use typed_builder::TypedBuilder;

use crate::aggregate::Aggregate;

/// A named action to put under load.
#[derive(Debug, Clone, TypedBuilder)]
pub struct Scenario<A, F, Fut>
where
    A: Aggregate,
    F: Fn() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = A::Metric> + Send,
{
    #[builder(setter(into))]
    pub name: String,
    pub action: F,
    #[builder(default, setter(skip))]
    aggregate: PhantomData<A>,
}
