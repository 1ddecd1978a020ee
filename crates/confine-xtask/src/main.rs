use anyhow::Context as _;
use clap::Parser;
use std::path::PathBuf;
use std::process::Command;

#[derive(Parser)]
struct Opts {
    #[clap(subcommand)]
    cmd: Cmd,
}

#[derive(Parser)]
enum Cmd {
    /// Build the eBPF bytecode
    BuildEbpf(BuildEbpfOpts),
}

#[derive(Parser)]
struct BuildEbpfOpts {
    /// Set the endianness of the BPF target
    #[clap(default_value = "bpfel-unknown-none", long)]
    target: String,

    /// Build release target
    #[clap(long)]
    release: bool,
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    match opts.cmd {
        Cmd::BuildEbpf(opts) => build_ebpf(opts),
    }
}

fn workspace_root() -> anyhow::Result<PathBuf> {
    // CARGO_MANIFEST_DIR points to crates/confine-xtask
    let xtask_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let root = xtask_dir
        .parent() // crates/
        .and_then(|p| p.parent()) // workspace root
        .context("Failed to resolve workspace root from CARGO_MANIFEST_DIR")?;
    Ok(root.to_path_buf())
}

fn build_ebpf(opts: BuildEbpfOpts) -> anyhow::Result<()> {
    let root = workspace_root()?;
    let target_flag = format!("--target={}", opts.target);

    let mut args = vec![
        "+nightly",
        "build",
        "--package",
        "confine-ebpf",
        &target_flag,
        "-Z",
        "build-std=core",
        "--features",
        "ebpf",
    ];

    if opts.release {
        args.push("--release");
    }

    let rustflags = match std::env::var("RUSTFLAGS") {
        Ok(v) if !v.is_empty() => format!("{v} -C linker=bpf-linker"),
        _ => "-C linker=bpf-linker".to_string(),
    };

    let status = Command::new("cargo")
        .current_dir(&root)
        .args(&args)
        .env("RUSTFLAGS", rustflags)
        .status()
        .context("Failed to run cargo build for ebpf")?;

    if !status.success() {
        anyhow::bail!("Failed to build eBPF program");
    }

    // Deterministic artifact copy
    let src = resolve_ebpf_output(&root, &opts.target, opts.release)
        .context("Could not locate built eBPF artifact")?;
    let dst = root.join("target").join("confine-ebpf.o");

    std::fs::create_dir_all(dst.parent().unwrap()).ok();
    std::fs::copy(&src, &dst).with_context(|| {
        format!(
            "Failed to copy eBPF artifact from {} to {}",
            src.display(),
            dst.display()
        )
    })?;

    println!("eBPF build successful");
    println!("  target: {}", opts.target);
    println!("  src:    {}", src.display());
    println!("  out:    {}", dst.display());
    Ok(())
}

fn resolve_ebpf_output(
    root: &std::path::Path,
    target: &str,
    release: bool,
) -> anyhow::Result<PathBuf> {
    let profile = if release { "release" } else { "debug" };

    // 1) Preferred: target/<triple>/<profile>/<bin-name>
    let preferred = root
        .join("target")
        .join(target)
        .join(profile)
        .join("confine-ebpf");
    if preferred.exists() {
        return Ok(preferred);
    }

    // 2) Some toolchains put it under deps/ with hashing or different naming.
    // Fallback: pick newest file that starts with "confine_ebpf" or "confine-ebpf"
    let deps_dir = root.join("target").join(target).join(profile).join("deps");
    if deps_dir.is_dir() {
        let mut best: Option<(std::time::SystemTime, PathBuf)> = None;
        for ent in std::fs::read_dir(&deps_dir)? {
            let ent = ent?;
            let p = ent.path();
            if !p.is_file() {
                continue;
            }
            let name = p.file_name().and_then(|s| s.to_str()).unwrap_or("");
            let looks_like = name.starts_with("confine_ebpf") || name.starts_with("confine-ebpf");
            if !looks_like {
                continue;
            }
            let mt = ent
                .metadata()?
                .modified()
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            if best.as_ref().map(|(t, _)| mt > *t).unwrap_or(true) {
                best = Some((mt, p));
            }
        }
        if let Some((_, p)) = best {
            return Ok(p);
        }
    }

    anyhow::bail!(
        "No eBPF artifact found. Looked in: {} and {}",
        preferred.display(),
        deps_dir.display()
    );
}
