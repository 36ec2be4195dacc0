//! Build script for haltpoint-core
//!
//! Checks the toolchain and target before compilation:
//!
//! - **Rust**: 1.70 or newer
//! - **macOS**: 10.13+ on Intel, 11.0+ on Apple Silicon
//! - **Targets**: Linux, macOS and Windows; other targets build, but
//!   `create_backend()` reports them as unsupported

fn main()
{
    println!("cargo:rerun-if-changed=build.rs");

    if let Ok(rustc_version) = rustc_version::version() {
        let min_rust_version = rustc_version::Version::new(1, 70, 0);
        if rustc_version < min_rust_version {
            panic!("haltpoint-core requires Rust {} or newer, found {}", min_rust_version, rustc_version);
        }
    } else {
        println!("cargo:warning=could not verify Rust version");
    }

    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if !matches!(target_os.as_str(), "linux" | "macos" | "windows") {
        println!("cargo:warning=haltpoint-core has no debugger backend for target OS `{}`", target_os);
    }

    #[cfg(target_os = "macos")]
    check_macos_requirements();
}

#[cfg(target_os = "macos")]
fn check_macos_requirements()
{
    // Apple Silicon needs Big Sur; POSIX_SPAWN_START_SUSPENDED with
    // task_for_pid works reliably from High Sierra on.
    let min_macos_version = if cfg!(target_arch = "aarch64") { (11, 0, 0) } else { (10, 13, 0) };

    match get_macos_version() {
        Some(version) if version < min_macos_version => panic!(
            "haltpoint-core requires macOS {}.{}.{} or newer, found {}.{}.{}",
            min_macos_version.0, min_macos_version.1, min_macos_version.2, version.0, version.1, version.2
        ),
        Some(_) => {}
        // Might be cross-compiling.
        None => println!("cargo:warning=could not detect macOS version"),
    }
}

#[cfg(target_os = "macos")]
fn get_macos_version() -> Option<(u32, u32, u32)>
{
    use std::process::Command;

    let output = Command::new("sw_vers").arg("-productVersion").output().ok()?;
    let version_str = String::from_utf8(output.stdout).ok()?;

    // "14.2.1" or "11.0"
    let mut parts = version_str.trim().split('.').map(|part| part.parse::<u32>().ok());
    let major = parts.next()??;
    let minor = parts.next()??;
    let patch = parts.next().flatten().unwrap_or(0);

    Some((major, minor, patch))
}
