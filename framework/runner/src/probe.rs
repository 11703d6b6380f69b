use crate::context::ProbeContext;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// The result of one probe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub success: bool,
    /// The time the operation took. Probes may leave out setup work they don't want measured.
    pub elapsed: Duration,
}

impl ProbeOutcome {
    pub fn success(elapsed: Duration) -> Self {
        Self {
            success: true,
            elapsed,
        }
    }

    pub fn failure(elapsed: Duration) -> Self {
        Self {
            success: false,
            elapsed,
        }
    }
}

/// A unit of work performed once per virtual user iteration.
///
/// A probe reports an unsuccessful operation, such as an unexpected status code, by returning a
/// [ProbeOutcome] with `success` set to false. Returning an error, or panicking, is treated as a
/// fault: the iteration is recorded as failed and the virtual user carries on.
///
/// The virtual user records `<prefix>_duration`, `<prefix>_reqs` and `<prefix>_failed` for every
/// call, where the prefix is [Probe::metric_prefix].
#[async_trait::async_trait]
pub trait Probe: Send + Sync + 'static {
    fn metric_prefix(&self) -> &str;

    async fn call(&self, ctx: &mut ProbeContext) -> anyhow::Result<ProbeOutcome>;
}

type ProbeFn =
    dyn for<'a> Fn(&'a mut ProbeContext) -> BoxFuture<'a, anyhow::Result<ProbeOutcome>>
        + Send
        + Sync;

/// A probe built from a closure with [probe_fn].
pub struct FnProbe {
    prefix: String,
    f: Box<ProbeFn>,
}

#[async_trait::async_trait]
impl Probe for FnProbe {
    fn metric_prefix(&self) -> &str {
        &self.prefix
    }

    async fn call(&self, ctx: &mut ProbeContext) -> anyhow::Result<ProbeOutcome> {
        (self.f)(ctx).await
    }
}

impl std::fmt::Debug for FnProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnProbe")
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// Turn an async closure into a [Probe].
///
/// ```no_run
/// use gale_runner::prelude::{probe_fn, ProbeOutcome};
/// use std::time::Duration;
///
/// let probe = probe_fn("sleepy", |_ctx| {
///     Box::pin(async move {
///         tokio::time::sleep(Duration::from_millis(10)).await;
///         Ok(ProbeOutcome::success(Duration::from_millis(10)))
///     })
/// });
/// ```
pub fn probe_fn<F>(prefix: impl Into<String>, f: F) -> FnProbe
where
    F: for<'a> Fn(&'a mut ProbeContext) -> BoxFuture<'a, anyhow::Result<ProbeOutcome>>
        + Send
        + Sync
        + 'static,
{
    FnProbe {
        prefix: prefix.into(),
        f: Box::new(f),
    }
}

/// Probes available to a run, looked up by the name scenarios use in `exec`.
#[derive(Clone, Default)]
pub struct ProbeRegistry {
    probes: HashMap<String, Arc<dyn Probe>>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, exec: impl Into<String>, probe: impl Probe) {
        self.probes.insert(exec.into(), Arc::new(probe));
    }

    pub fn with_probe(mut self, exec: impl Into<String>, probe: impl Probe) -> Self {
        self.register(exec, probe);
        self
    }

    pub fn get(&self, exec: &str) -> Option<Arc<dyn Probe>> {
        self.probes.get(exec).cloned()
    }

    pub fn contains(&self, exec: &str) -> bool {
        self.probes.contains_key(exec)
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }
}

impl std::fmt::Debug for ProbeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = self.probes.keys().collect::<Vec<_>>();
        names.sort();
        f.debug_struct("ProbeRegistry")
            .field("probes", &names)
            .finish()
    }
}
