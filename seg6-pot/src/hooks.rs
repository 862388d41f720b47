//! Attach/detach sequencing for the ingress (XDP) and egress (tc) hooks.
//!
//! Bring-up runs ingress first, then egress. Each completed step pushes its
//! inverse onto an undo stack. A failed step unwinds the stack and the
//! original error is returned. A normal shutdown unwinds the same stack, so
//! teardown is always the exact reverse of what was set up.

use std::{fmt, io};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Seg6Error;

/// Ordering metadata for the egress tc filter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TcOrdering {
    pub handle: u32,
    pub priority: u16,
}

/// Kernel-facing attach primitives. Implemented over aya in production and
/// by a recording fake in tests.
pub trait HookBackend {
    fn attach_ingress(&mut self, iface: &str) -> Result<(), Seg6Error>;
    fn detach_ingress(&mut self, iface: &str) -> Result<(), Seg6Error>;

    /// Create the clsact qdisc that carries the egress hook. The raw OS
    /// error is returned so the caller can classify it.
    fn create_egress_hook(&mut self, iface: &str) -> io::Result<()>;
    fn destroy_egress_hook(&mut self, iface: &str) -> Result<(), Seg6Error>;

    fn attach_egress(&mut self, iface: &str, ordering: TcOrdering) -> Result<(), Seg6Error>;
    fn detach_egress(&mut self, iface: &str) -> Result<(), Seg6Error>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HookCreateError {
    AlreadyExists,
    Other,
}

/// The single place that decides whether a hook-create failure means
/// "a previous run left the hook behind".
pub fn classify_hook_create_error(err: &io::Error) -> HookCreateError {
    if err.kind() == io::ErrorKind::AlreadyExists || err.raw_os_error() == Some(libc::EEXIST) {
        HookCreateError::AlreadyExists
    } else {
        HookCreateError::Other
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LifecycleState {
    ModuleLoaded,
    IngressAttached,
    EgressHookReady,
    EgressAttached,
    Running,
    Detaching,
    Terminal,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ModuleLoaded => "module-loaded",
            Self::IngressAttached => "ingress-attached",
            Self::EgressHookReady => "egress-hook-ready",
            Self::EgressAttached => "egress-attached",
            Self::Running => "running",
            Self::Detaching => "detaching",
            Self::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Undo {
    DetachIngress,
    DestroyEgressHook,
    DetachEgress,
}

pub struct HookManager<B: HookBackend> {
    backend: B,
    iface: String,
    ordering: TcOrdering,
    state: LifecycleState,
    undo: Vec<Undo>,
}

impl<B: HookBackend> HookManager<B> {
    /// `backend` must already hold a loaded module.
    pub fn new(backend: B, iface: impl Into<String>, ordering: TcOrdering) -> Self {
        Self {
            backend,
            iface: iface.into(),
            ordering,
            state: LifecycleState::ModuleLoaded,
            undo: Vec::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    #[cfg(test)]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Park in `Running` until `shutdown` fires, then tear down. Teardown is
    /// synchronous, so nothing after the first cancellation can interrupt it.
    pub async fn serve(&mut self, shutdown: CancellationToken) {
        if self.state != LifecycleState::EgressAttached {
            warn!(iface = %self.iface, state = %self.state, "serve called before bring-up completed");
            return;
        }
        self.state = LifecycleState::Running;
        info!(iface = %self.iface, "ingress and egress programs attached; waiting for shutdown signal");

        shutdown.cancelled().await;

        info!(iface = %self.iface, "shutdown requested, detaching");
        self.tear_down();
    }

    /// Run every attach step; on the first failure unwind and return it.
    pub fn bring_up(&mut self) -> Result<(), Seg6Error> {
        if let Err(err) = self.try_bring_up() {
            warn!(iface = %self.iface, state = %self.state, error = %err, "bring-up failed, rolling back");
            self.tear_down();
            return Err(err);
        }
        Ok(())
    }

    fn try_bring_up(&mut self) -> Result<(), Seg6Error> {
        self.backend.attach_ingress(&self.iface)?;
        self.undo.push(Undo::DetachIngress);
        self.state = LifecycleState::IngressAttached;

        match self.backend.create_egress_hook(&self.iface) {
            Ok(()) => {}
            Err(err) => match classify_hook_create_error(&err) {
                HookCreateError::AlreadyExists => {
                    info!(iface = %self.iface, "tc hook already existed, re-using");
                }
                HookCreateError::Other => {
                    return Err(Seg6Error::HookCreateFailed(format!(
                        "create clsact on {}: {err}",
                        self.iface
                    )));
                }
            },
        }
        self.undo.push(Undo::DestroyEgressHook);
        self.state = LifecycleState::EgressHookReady;

        self.backend.attach_egress(&self.iface, self.ordering)?;
        self.undo.push(Undo::DetachEgress);
        self.state = LifecycleState::EgressAttached;
        Ok(())
    }

    /// Unwind everything that was set up, newest first. Never stops early:
    /// failures are logged and the next step still runs.
    pub fn tear_down(&mut self) {
        self.state = LifecycleState::Detaching;
        while let Some(step) = self.undo.pop() {
            let result = match step {
                Undo::DetachEgress => self.backend.detach_egress(&self.iface),
                Undo::DestroyEgressHook => self.backend.destroy_egress_hook(&self.iface),
                Undo::DetachIngress => self.backend.detach_ingress(&self.iface),
            };
            if let Err(err) = result {
                warn!(iface = %self.iface, step = ?step, error = %err, "teardown step failed");
            }
        }
        self.state = LifecycleState::Terminal;
    }
}
