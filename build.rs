use std::process::Command;

fn main() {
    println!("cargo:rustc-env=KLISTRA_VERSION={}", version());
    println!("cargo:rerun-if-env-changed=KLISTRA_BUILD_COMMIT");

    if std::path::Path::new(".git").exists() {
        println!("cargo:rerun-if-changed=.git/HEAD");
        println!("cargo:rerun-if-changed=.git/refs");
    }
}

fn version() -> String {
    let package = env!("CARGO_PKG_VERSION");

    if let Some(describe) = git(&["describe", "--tags", "--always", "--dirty"]) {
        // Tagged builds report the tag; anything else is a dev build of the package version.
        if describe.starts_with('v') && !describe.contains("-g") {
            return describe;
        }
        return format!("{package}-dev+{describe}");
    }

    // Container builds have no .git but may pass the commit in.
    match std::env::var("KLISTRA_BUILD_COMMIT") {
        Ok(commit) if !commit.trim().is_empty() => format!("{package}-dev+{}", commit.trim()),
        _ => package.to_string(),
    }
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}
