// Build script for SIS Kernel
// Phase 5 - Production Readiness Plan
//
// Generates build metadata for forensics and debugging

use std::env;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Get git information
    let git_commit = get_git_commit();
    let git_branch = get_git_branch();
    let git_dirty = is_git_dirty();

    // Get build timestamp (unix seconds)
    let build_timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string());

    // Export as environment variables; `lib::build_info` reads these back via
    // `option_env!` and logs them once at boot (step 8 of the bring-up
    // sequence).
    println!("cargo:rustc-env=GIT_COMMIT={}", git_commit);
    println!("cargo:rustc-env=GIT_BRANCH={}", git_branch);
    println!("cargo:rustc-env=GIT_DIRTY={}", if git_dirty { "1" } else { "0" });
    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", build_timestamp);
    println!("cargo:rustc-env=RUST_VERSION={}", get_rust_version());
    println!("cargo:rustc-env=FEATURES={}", get_enabled_features());
    println!("cargo:rustc-env=PROFILE={}", env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string()));
    println!("cargo:rustc-env=TARGET={}", env::var("TARGET").unwrap_or_else(|_| "unknown".to_string()));

    // Select the linker script and hand the kernel's load address to the
    // linker. Skipped for host-target test runs, which link a normal std
    // binary and have no business with a freestanding layout.
    let target = env::var("TARGET").unwrap_or_default();
    if target.starts_with("i686") || target.starts_with("i386") {
        let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
        println!("cargo:rustc-link-arg=-T{}/linker.ld", manifest_dir);
        println!("cargo:rerun-if-changed=linker.ld");
    }
}

fn get_git_commit() -> String {
    Command::new("git")
        .args(&["rev-parse", "HEAD"])
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                String::from_utf8(output.stdout).ok()
            } else {
                None
            }
        })
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn get_git_branch() -> String {
    Command::new("git")
        .args(&["branch", "--show-current"])
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                String::from_utf8(output.stdout).ok()
            } else {
                None
            }
        })
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn is_git_dirty() -> bool {
    Command::new("git")
        .args(&["status", "--porcelain"])
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                Some(!output.stdout.is_empty())
            } else {
                None
            }
        })
        .unwrap_or(false)
}

fn get_rust_version() -> String {
    Command::new("rustc")
        .arg("--version")
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                String::from_utf8(output.stdout).ok()
            } else {
                None
            }
        })
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn get_enabled_features() -> String {
    // Get features from CARGO_FEATURE_* environment variables
    let mut features = Vec::new();

    for (key, _) in env::vars() {
        if key.starts_with("CARGO_FEATURE_") {
            let feature = key["CARGO_FEATURE_".len()..].to_lowercase();
            features.push(feature);
        }
    }

    features.sort();
    features.join(",")
}
