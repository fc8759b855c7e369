//! Ambient actor context.
//!
//! Who is acting, from where, with which client. Established once per
//! inbound request and readable anywhere below it without being passed as
//! an argument. Backed by a tokio task-local, so each request's scope is
//! isolated from every other concurrently running request and is torn
//! down when the scoped future completes, panics or is dropped.
//!
//! Tokio does not carry task-locals into `tokio::spawn`. Detached work
//! that must still see the request's actor goes through [`spawn`], which
//! re-establishes the current scope inside the new task. Tasks spawned
//! outside any request observe no context.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

tokio::task_local! {
    static ACTOR: Arc<ActorContext>;
}

/// Read-only description of the party behind the current request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    actor_id: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
}

impl ActorContext {
    /// Build the context of one request.
    ///
    /// `actor_id` is `None` for unauthenticated calls. Empty strings are
    /// treated as absent.
    pub fn new(
        actor_id: Option<&str>,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Self {
        let own = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(String::from);
        Self {
            actor_id: own(actor_id),
            ip_address: own(ip_address),
            user_agent: own(user_agent),
        }
    }

    /// Context for a request with an authenticated actor only.
    pub fn for_actor(actor_id: &str) -> Self {
        Self::new(Some(actor_id), None, None)
    }

    pub fn actor_id(&self) -> Option<&str> {
        self.actor_id.as_deref()
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }
}

/// Run `fut` with `ctx` as its ambient actor.
pub async fn establish<F: Future>(ctx: ActorContext, fut: F) -> F::Output {
    ACTOR.scope(Arc::new(ctx), fut).await
}

/// Synchronous counterpart of [`establish`].
pub fn establish_sync<R>(ctx: ActorContext, f: impl FnOnce() -> R) -> R {
    ACTOR.sync_scope(Arc::new(ctx), f)
}

/// The actor of the enclosing scope, if there is one.
pub fn current() -> Option<Arc<ActorContext>> {
    ACTOR.try_with(Arc::clone).ok()
}

/// Spawn a detached task that inherits the current actor.
pub fn spawn<F>(fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match current() {
        Some(ctx) => tokio::spawn(ACTOR.scope(ctx, fut)),
        None => tokio::spawn(fut),
    }
}
