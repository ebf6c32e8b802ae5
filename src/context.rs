use crate::error::BoxError;

use std::fmt;
use std::marker::PhantomData;

/// Creates and destroys the execution contexts handed to jobs.
///
/// Both calls happen inside the pool's bookkeeping critical section, so they
/// should be synchronous and return promptly. A panic in either call is
/// caught by the pool and handled like an `Err`.
pub trait ContextProvider: Send + Sync + 'static {
  /// The expensive resource a job runs against.
  type Context: Send + 'static;

  /// Builds a fresh context for a job that is being admitted.
  fn create(&self) -> Result<Self::Context, BoxError>;

  /// Tears down a context once its job has settled. Called exactly once per
  /// successfully created context.
  fn destroy(&self, context: Self::Context) -> Result<(), BoxError>;
}

/// A [`ContextProvider`] built from a factory closure and a teardown closure.
pub struct FnContextProvider<C, Fc, Fd> {
  create_fn: Fc,
  destroy_fn: Fd,
  _context: PhantomData<fn() -> C>,
}

impl<C, Fc, Fd> fmt::Debug for FnContextProvider<C, Fc, Fd> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FnContextProvider")
      .field("context", &std::any::type_name::<C>())
      .finish_non_exhaustive()
  }
}

impl<C, Fc, Fd> ContextProvider for FnContextProvider<C, Fc, Fd>
where
  C: Send + 'static,
  Fc: Fn() -> Result<C, BoxError> + Send + Sync + 'static,
  Fd: Fn(C) -> Result<(), BoxError> + Send + Sync + 'static,
{
  type Context = C;

  fn create(&self) -> Result<C, BoxError> {
    (self.create_fn)()
  }

  fn destroy(&self, context: C) -> Result<(), BoxError> {
    (self.destroy_fn)(context)
  }
}

/// Builds a provider from a pair of closures.
pub fn context_fns<C, Fc, Fd>(create_fn: Fc, destroy_fn: Fd) -> FnContextProvider<C, Fc, Fd>
where
  C: Send + 'static,
  Fc: Fn() -> Result<C, BoxError> + Send + Sync + 'static,
  Fd: Fn(C) -> Result<(), BoxError> + Send + Sync + 'static,
{
  FnContextProvider {
    create_fn,
    destroy_fn,
    _context: PhantomData,
  }
}
