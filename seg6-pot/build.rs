use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context as _, Result, anyhow};

const OBJ_ENV: &str = "SEG6_POT_BPF_OBJ";
const OBJ_NAME: &str = "seg6_pot_tlv.o";

fn main() -> Result<()> {
    let out_dir = env::var_os("OUT_DIR").ok_or(anyhow!("OUT_DIR not set"))?;
    let dst = PathBuf::from(out_dir).join(OBJ_NAME);

    println!("cargo:rerun-if-env-changed={OBJ_ENV}");
    let src = match env::var_os(OBJ_ENV) {
        Some(path) => PathBuf::from(path),
        None => default_object_path()?,
    };
    println!("cargo:rerun-if-changed={}", src.display());

    if src.is_file() {
        fs::copy(&src, &dst)
            .with_context(|| format!("failed to copy {} to {}", src.display(), dst.display()))?;
    } else {
        // Still build the control plane; `install` reports the empty object at runtime.
        println!(
            "cargo:warning={} not found; set {OBJ_ENV} to the compiled data-plane object",
            src.display()
        );
        fs::write(&dst, b"").with_context(|| format!("failed to write {}", dst.display()))?;
    }
    Ok(())
}

fn default_object_path() -> Result<PathBuf> {
    let manifest_dir = env::var_os("CARGO_MANIFEST_DIR").ok_or(anyhow!("CARGO_MANIFEST_DIR not set"))?;
    let workspace = Path::new(&manifest_dir)
        .parent()
        .ok_or_else(|| anyhow!("no parent for {}", Path::new(&manifest_dir).display()))?;
    Ok(workspace.join("build").join(OBJ_NAME))
}
