use std::{io, process::Command};

use aya::programs::{
    tc::{self, NlOptions, SchedClassifierLinkId, TcAttachOptions, TcAttachType},
    xdp::XdpLinkId,
};
use tracing::{debug, info};

use crate::{
    config::{Seg6Config, XdpMode},
    error::Seg6Error,
    hooks::{HookBackend, TcOrdering},
    loader::{Seg6Module, describe},
};

/// `HookBackend` over a loaded `Seg6Module`.
///
/// Owns the module, so dropping the backend unloads the programs.
pub struct AyaHookBackend {
    module: Seg6Module,
    ingress_program: String,
    egress_program: String,
    xdp_mode: XdpMode,
    ingress_link: Option<XdpLinkId>,
    egress_link: Option<SchedClassifierLinkId>,
}

impl AyaHookBackend {
    pub fn new(module: Seg6Module, cfg: &Seg6Config) -> Self {
        Self {
            module,
            ingress_program: cfg.ingress_program.clone(),
            egress_program: cfg.egress_program.clone(),
            xdp_mode: cfg.xdp_mode,
            ingress_link: None,
            egress_link: None,
        }
    }
}

impl HookBackend for AyaHookBackend {
    fn attach_ingress(&mut self, iface: &str) -> Result<(), Seg6Error> {
        let name = &self.ingress_program;
        let program = self.module.xdp_program(name)?;
        let link = program.attach(iface, self.xdp_mode.flags()).map_err(|e| {
            Seg6Error::AttachFailed(format!("xdp {name} on {iface}: {}", describe(&e)))
        })?;
        self.ingress_link = Some(link);
        info!(program = %name, iface, mode = ?self.xdp_mode, "XDP program attached (ingress)");
        Ok(())
    }

    fn detach_ingress(&mut self, iface: &str) -> Result<(), Seg6Error> {
        let Some(link) = self.ingress_link.take() else {
            return Ok(());
        };
        let name = &self.ingress_program;
        self.module
            .xdp_program(name)?
            .detach(link)
            .map_err(|e| Seg6Error::AttachFailed(format!("detach xdp {name} on {iface}: {e}")))?;
        debug!(program = %name, iface, "XDP program detached");
        Ok(())
    }

    fn create_egress_hook(&mut self, iface: &str) -> io::Result<()> {
        tc::qdisc_add_clsact(iface)?;
        debug!(iface, "clsact qdisc created");
        Ok(())
    }

    fn destroy_egress_hook(&mut self, iface: &str) -> Result<(), Seg6Error> {
        // Flush the egress filters only. The clsact qdisc and any ingress
        // filters on it may belong to someone else and are left alone.
        let output = egress_flush_command(iface).output().map_err(|e| {
            Seg6Error::HookDestroyFailed(format!("flush egress on {iface}: failed to run tc: {e}"))
        })?;
        if !output.status.success() {
            return Err(Seg6Error::HookDestroyFailed(format!(
                "flush egress on {iface}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        debug!(iface, "egress tc filters flushed");
        Ok(())
    }

    fn attach_egress(&mut self, iface: &str, ordering: TcOrdering) -> Result<(), Seg6Error> {
        let name = &self.egress_program;
        let options = TcAttachOptions::Netlink(NlOptions {
            priority: ordering.priority,
            handle: ordering.handle,
        });
        let link = self
            .module
            .classifier(name)?
            .attach_with_options(iface, TcAttachType::Egress, options)
            .map_err(|e| {
                Seg6Error::AttachFailed(format!("tc {name} on {iface}: {}", describe(&e)))
            })?;
        self.egress_link = Some(link);
        info!(
            program = %name,
            iface,
            handle = ordering.handle,
            priority = ordering.priority,
            "TC program attached (egress)"
        );
        Ok(())
    }

    fn detach_egress(&mut self, iface: &str) -> Result<(), Seg6Error> {
        let Some(link) = self.egress_link.take() else {
            return Ok(());
        };
        let name = &self.egress_program;
        self.module
            .classifier(name)?
            .detach(link)
            .map_err(|e| Seg6Error::AttachFailed(format!("detach tc {name} on {iface}: {e}")))?;
        debug!(program = %name, iface, "TC program detached");
        Ok(())
    }
}

fn egress_flush_command(iface: &str) -> Command {
    let mut cmd = Command::new("tc");
    cmd.args(["filter", "del", "dev", iface, "egress"]);
    cmd
}
