use std::{error::Error as StdError, fs, io};

use aya::{
    Ebpf, EbpfLoader, include_bytes_aligned,
    pin::PinError,
    programs::{SchedClassifier, Xdp},
};
use tracing::{debug, info};

use crate::{config::Seg6Config, error::Seg6Error};

/// The data-plane object staged into `OUT_DIR` by `build.rs`.
const SEG6_POT_OBJ: &[u8] = include_bytes_aligned!(concat!(env!("OUT_DIR"), "/seg6_pot_tlv.o"));

/// A verified, loaded instance of the data-plane object.
///
/// Owned by exactly one `install` run. Dropping it unloads both programs
/// and tears down any links aya still tracks; the key map survives because
/// it is pinned on bpffs.
pub struct Seg6Module {
    ebpf: Ebpf,
}

impl Seg6Module {
    pub fn load_embedded(cfg: &Seg6Config) -> Result<Self, Seg6Error> {
        Self::load(SEG6_POT_OBJ, cfg)
    }

    /// Parse `bytes`, create (or reuse) the pinned maps and run both
    /// programs through the verifier.
    pub fn load(bytes: &[u8], cfg: &Seg6Config) -> Result<Self, Seg6Error> {
        if bytes.is_empty() {
            return Err(Seg6Error::LoadFailed(
                "bytecode artifact is empty; rebuild with SEG6_POT_BPF_OBJ pointing at seg6_pot_tlv.o"
                    .into(),
            ));
        }

        let pin_dir = cfg.pin_dir();
        fs::create_dir_all(pin_dir).map_err(|e| {
            Seg6Error::LoadFailed(format!("failed to create {}: {e}", pin_dir.display()))
        })?;

        let ebpf = EbpfLoader::new()
            .map_pin_path(pin_dir)
            .load(bytes)
            .map_err(|e| Seg6Error::LoadFailed(describe(&e)))?;
        let mut module = Self { ebpf };

        module.verify_programs(cfg)?;
        module.ensure_pinned(cfg)?;

        info!(
            ingress = %cfg.ingress_program,
            egress = %cfg.egress_program,
            pin = %cfg.key_map_pin.display(),
            "eBPF object loaded and verified"
        );
        Ok(module)
    }

    pub fn xdp_program(&mut self, name: &str) -> Result<&mut Xdp, Seg6Error> {
        self.ebpf
            .program_mut(name)
            .ok_or_else(|| Seg6Error::ProgramNotFound(name.to_string()))?
            .try_into()
            .map_err(|_| Seg6Error::ProgramNotFound(format!("{name} (xdp)")))
    }

    pub fn classifier(&mut self, name: &str) -> Result<&mut SchedClassifier, Seg6Error> {
        self.ebpf
            .program_mut(name)
            .ok_or_else(|| Seg6Error::ProgramNotFound(name.to_string()))?
            .try_into()
            .map_err(|_| Seg6Error::ProgramNotFound(format!("{name} (sched_cls)")))
    }

    fn verify_programs(&mut self, cfg: &Seg6Config) -> Result<(), Seg6Error> {
        let ingress = &cfg.ingress_program;
        self.xdp_program(ingress)?
            .load()
            .map_err(|e| Seg6Error::LoadFailed(format!("verify {ingress}: {}", describe(&e))))?;
        debug!(program = %ingress, "xdp program verified");

        let egress = &cfg.egress_program;
        self.classifier(egress)?
            .load()
            .map_err(|e| Seg6Error::LoadFailed(format!("verify {egress}: {}", describe(&e))))?;
        debug!(program = %egress, "tc program verified");
        Ok(())
    }

    /// Make sure the key map is reachable at the configured pin path, even
    /// when that path differs from the by-name location.
    fn ensure_pinned(&mut self, cfg: &Seg6Config) -> Result<(), Seg6Error> {
        let name = &cfg.key_map_name;
        let path = &cfg.key_map_pin;
        let map = self
            .ebpf
            .map_mut(name)
            .ok_or_else(|| Seg6Error::LoadFailed(format!("map {name} not found")))?;
        match map.pin(path) {
            Ok(()) => Ok(()),
            Err(PinError::SyscallError(err))
                if err.io_error.kind() == io::ErrorKind::AlreadyExists =>
            {
                Ok(())
            }
            Err(err) => Err(Seg6Error::LoadFailed(format!(
                "failed to pin map {name} at {}: {err}",
                path.display()
            ))),
        }
    }
}

/// Render an error with its whole source chain so verifier output is kept.
pub(crate) fn describe(err: &dyn StdError) -> String {
    let mut previous = err.to_string();
    let mut out = previous.clone();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        // Some errors already print their source inline.
        if !previous.contains(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        previous = text;
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use std::fmt;

    use super::*;

    fn scratch_config(tag: &str) -> Seg6Config {
        let dir = std::env::temp_dir().join(format!("seg6-pot-loader-{tag}-{}", std::process::id()));
        Seg6Config::with_pin_path(dir.join("seg6_pot_keys"))
    }

    #[test]
    fn empty_artifact_is_load_failure() {
        match Seg6Module::load(&[], &scratch_config("empty")) {
            Err(Seg6Error::LoadFailed(msg)) => assert!(msg.contains("SEG6_POT_BPF_OBJ"), "{msg}"),
            Err(other) => panic!("expected LoadFailed, got {other:?}"),
            Ok(_) => panic!("empty artifact must not load"),
        }
    }

    #[test]
    fn garbage_artifact_is_load_failure() {
        let cfg = scratch_config("garbage");
        let result = Seg6Module::load(b"definitely not an ELF object", &cfg);
        let _ = fs::remove_dir_all(cfg.pin_dir());
        assert!(matches!(result, Err(Seg6Error::LoadFailed(_))));
    }

    #[derive(Debug)]
    struct Outer(Inner);
    #[derive(Debug)]
    struct Inner;

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("the BPF_PROG_LOAD syscall failed")
        }
    }
    impl fmt::Display for Inner {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("R1 invalid mem access 'scalar'")
        }
    }
    impl StdError for Outer {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }
    impl StdError for Inner {}

    #[test]
    fn describe_keeps_verifier_detail() {
        let text = describe(&Outer(Inner));
        assert_eq!(
            text,
            "the BPF_PROG_LOAD syscall failed: R1 invalid mem access 'scalar'"
        );
    }

    #[derive(Debug)]
    struct Link(&'static str, Option<Box<Link>>);

    impl fmt::Display for Link {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.0)
        }
    }
    impl StdError for Link {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            self.1.as_deref().map(|l| l as &(dyn StdError + 'static))
        }
    }

    #[test]
    fn describe_keeps_short_cause_seen_earlier() {
        let chain = Link(
            "error loading program seg6_pot_tlv",
            Some(Box::new(Link(
                "the BPF_PROG_LOAD syscall failed",
                Some(Box::new(Link("program", None))),
            ))),
        );
        assert_eq!(
            describe(&chain),
            "error loading program seg6_pot_tlv: the BPF_PROG_LOAD syscall failed: program"
        );
    }

    #[test]
    fn describe_skips_source_repeated_by_parent() {
        let chain = Link(
            "attach failed: device busy",
            Some(Box::new(Link("device busy", None))),
        );
        assert_eq!(describe(&chain), "attach failed: device busy");
    }
}
