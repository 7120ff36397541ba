//! Build metadata captured by `build.rs` and baked in via `option_env!`
//! (§4.M). Read once at boot and logged so a serial capture of a hung or
//! crashed board records exactly what was flashed onto it.

/// Git commit this build was compiled from, or `"unknown"` outside a git
/// checkout.
pub fn git_commit() -> &'static str {
    option_env!("GIT_COMMIT").unwrap_or("unknown")
}

pub fn git_branch() -> &'static str {
    option_env!("GIT_BRANCH").unwrap_or("unknown")
}

/// `true` if the working tree had uncommitted changes at build time.
pub fn git_dirty() -> bool {
    option_env!("GIT_DIRTY") == Some("1")
}

/// Unix seconds at build time, or `"0"` if the clock was unavailable.
pub fn build_timestamp() -> &'static str {
    option_env!("BUILD_TIMESTAMP").unwrap_or("0")
}

pub fn rustc_version() -> &'static str {
    option_env!("RUST_VERSION").unwrap_or("unknown")
}

/// Comma-separated list of Cargo features enabled for this build.
pub fn enabled_features() -> &'static str {
    option_env!("FEATURES").unwrap_or("")
}

pub fn profile() -> &'static str {
    option_env!("PROFILE").unwrap_or("unknown")
}

pub fn target() -> &'static str {
    option_env!("TARGET").unwrap_or("unknown")
}

/// Emit a single log line summarizing the above, called once during boot.
pub fn log_summary() {
    crate::info!(
        "build: commit={} branch={}{} profile={} target={} rustc={} features=[{}]",
        git_commit(),
        git_branch(),
        if git_dirty() { " (dirty)" } else { "" },
        profile(),
        target(),
        rustc_version(),
        enabled_features(),
    );
}
