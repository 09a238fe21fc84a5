//! Operation pipeline.
//!
//! An operation travels through an ordered list of middlewares. Each
//! middleware receives an [`Operation`] and must either resolve it itself or
//! delegate with [`Operation::next`], which runs the rest of the chain and
//! hands back its result. Dispatch is index based: an operation only knows
//! the middlewares after the one holding it.
//!
//! Misconfiguration panics: executing an empty pipeline, calling `next()`
//! from the last middleware, or returning without resolving.

use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Arguments of an operation, naming the operation and its result type.
pub trait OperationArgs: Clone + Send + Sync + 'static {
    type Value: Send + Sync + 'static;

    fn name(&self) -> &'static str;
}

/// A step in a pipeline.
#[async_trait]
pub trait Middleware<C, O: OperationArgs>: Send + Sync {
    async fn handle(&self, context: &C, operation: Operation<'_, C, O>);
}

/// An operation on its way through a pipeline.
pub struct Operation<'a, C, O: OperationArgs> {
    /// Arguments; a middleware may change them before calling `next()`
    pub args: O,
    context: &'a C,
    remaining: &'a [Arc<dyn Middleware<C, O>>],
    slot: &'a mut Option<Result<O::Value>>,
}

impl<'a, C, O: OperationArgs> Operation<'a, C, O> {
    pub fn name(&self) -> &'static str {
        self.args.name()
    }

    /// Run the rest of the chain and return its result.
    ///
    /// # Panics
    ///
    /// When called from the last middleware, or when the rest of the chain
    /// doesn't resolve.
    pub async fn next(&self) -> Result<O::Value> {
        let Some((middleware, remaining)) = self.remaining.split_first() else {
            panic!(
                "operation {}: next() called by the last middleware in the pipeline",
                self.name()
            );
        };
        let mut slot = None;
        let operation = Operation {
            args: self.args.clone(),
            context: self.context,
            remaining,
            slot: &mut slot,
        };
        middleware.handle(self.context, operation).await;
        match slot {
            Some(result) => result,
            None => panic!("operation {}: middleware returned without resolving", self.name()),
        }
    }

    /// Resolve the operation. Consumes it, so it can only happen once.
    pub fn resolve(self, result: Result<O::Value>) {
        *self.slot = Some(result);
    }

    /// Delegate to the rest of the chain and resolve with its result.
    pub async fn pass_through(self) {
        let result = self.next().await;
        self.resolve(result);
    }
}

/// An ordered list of middlewares.
pub struct Pipeline<C, O: OperationArgs> {
    middlewares: Vec<Arc<dyn Middleware<C, O>>>,
}

impl<C, O: OperationArgs> Clone for Pipeline<C, O> {
    fn clone(&self) -> Self {
        Self {
            middlewares: self.middlewares.clone(),
        }
    }
}

impl<C, O: OperationArgs> Default for Pipeline<C, O> {
    fn default() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }
}

impl<C, O: OperationArgs> Pipeline<C, O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware; the last one added runs last.
    pub fn with(mut self, middleware: impl Middleware<C, O> + 'static) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run an operation through the whole pipeline.
    ///
    /// # Panics
    ///
    /// On an empty pipeline, or when no middleware resolves the operation.
    pub async fn execute(&self, context: &C, args: O) -> Result<O::Value> {
        let Some((first, remaining)) = self.middlewares.split_first() else {
            panic!("operation {}: cannot execute an empty pipeline", args.name());
        };
        let name = args.name();
        let mut slot = None;
        let operation = Operation {
            args,
            context,
            remaining,
            slot: &mut slot,
        };
        first.handle(context, operation).await;
        match slot {
            Some(result) => result,
            None => panic!("operation {name}: middleware returned without resolving"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    struct Double(i64);

    impl OperationArgs for Double {
        type Value = i64;

        fn name(&self) -> &'static str {
            "double"
        }
    }

    struct Terminal;

    #[async_trait]
    impl Middleware<(), Double> for Terminal {
        async fn handle(&self, _context: &(), operation: Operation<'_, (), Double>) {
            let value = operation.args.0 * 2;
            operation.resolve(Ok(value));
        }
    }

    /// Adds to the argument on the way in and to the result on the way out.
    struct AddBothWays(i64);

    #[async_trait]
    impl Middleware<(), Double> for AddBothWays {
        async fn handle(&self, _context: &(), mut operation: Operation<'_, (), Double>) {
            operation.args.0 += self.0;
            let result = operation.next().await.map(|value| value + self.0);
            operation.resolve(result);
        }
    }

    struct Record(Arc<Mutex<Vec<&'static str>>>, &'static str);

    #[async_trait]
    impl Middleware<(), Double> for Record {
        async fn handle(&self, _context: &(), operation: Operation<'_, (), Double>) {
            self.0.lock().unwrap().push(self.1);
            operation.pass_through().await;
        }
    }

    struct Reject;

    #[async_trait]
    impl Middleware<(), Double> for Reject {
        async fn handle(&self, _context: &(), operation: Operation<'_, (), Double>) {
            operation.resolve(Err(Error::not_authorized("no")));
        }
    }

    struct Forgetful;

    #[async_trait]
    impl Middleware<(), Double> for Forgetful {
        async fn handle(&self, _context: &(), _operation: Operation<'_, (), Double>) {}
    }

    #[tokio::test]
    async fn single_middleware() {
        let pipeline = Pipeline::new().with(Terminal);
        assert_eq!(pipeline.execute(&(), Double(21)).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn chain_modifies_args_and_results() {
        let pipeline = Pipeline::new()
            .with(AddBothWays(1))
            .with(AddBothWays(10))
            .with(Terminal);
        // ((5 + 1 + 10) * 2) + 10 + 1
        assert_eq!(pipeline.execute(&(), Double(5)).await.unwrap(), 43);
    }

    #[tokio::test]
    async fn middlewares_run_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .with(Record(seen.clone(), "a"))
            .with(Record(seen.clone(), "b"))
            .with(Terminal);
        pipeline.execute(&(), Double(1)).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn short_circuit() {
        let pipeline = Pipeline::new().with(Reject).with(Terminal);
        let err = pipeline.execute(&(), Double(1)).await.unwrap_err();
        assert!(err.is_kind(crate::ErrorKind::NotAuthorized));
    }

    #[tokio::test]
    #[should_panic(expected = "cannot execute an empty pipeline")]
    async fn empty_pipeline_panics() {
        let pipeline: Pipeline<(), Double> = Pipeline::new();
        let _ = pipeline.execute(&(), Double(1)).await;
    }

    #[tokio::test]
    #[should_panic(expected = "next() called by the last middleware")]
    async fn last_middleware_calling_next_panics() {
        let pipeline = Pipeline::new().with(AddBothWays(1));
        let _ = pipeline.execute(&(), Double(1)).await;
    }

    #[tokio::test]
    #[should_panic(expected = "returned without resolving")]
    async fn unresolved_operation_panics() {
        let pipeline = Pipeline::new().with(Forgetful);
        let _ = pipeline.execute(&(), Double(1)).await;
    }
}
