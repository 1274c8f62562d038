use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-env-changed=GITHUB_SHA");

    let pkg_version = env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());
    let short_sha = env::var("GITHUB_SHA")
        .ok()
        .or_else(head_sha)
        .and_then(|sha| sha.get(0..8).map(str::to_string));

    let version = match short_sha {
        Some(sha) => format!("{pkg_version}+{sha}"),
        None => pkg_version,
    };
    println!("cargo:rustc-env=MINER_VERSION={version}");
}

/// Resolve HEAD from the nearest `.git` directory without shelling out to `git`.
fn head_sha() -> Option<String> {
    let mut dir = env::current_dir().ok()?;
    let git_dir: PathBuf = loop {
        let candidate = dir.join(".git");
        if candidate.is_dir() {
            break candidate;
        }
        if !dir.pop() {
            return None;
        }
    };
    println!("cargo:rerun-if-changed={}", git_dir.join("HEAD").display());

    let head = fs::read_to_string(git_dir.join("HEAD")).ok()?;
    let head = head.trim();
    match head.strip_prefix("ref: ") {
        Some(reference) => {
            if let Ok(sha) = fs::read_to_string(git_dir.join(reference)) {
                return Some(sha.trim().to_string());
            }
            let packed = fs::read_to_string(git_dir.join("packed-refs")).ok()?;
            packed
                .lines()
                .filter(|line| !line.starts_with('#') && !line.starts_with('^'))
                .find_map(|line| {
                    let (sha, name) = line.split_once(' ')?;
                    (name.trim() == reference).then(|| sha.to_string())
                })
        }
        None => Some(head.to_string()),
    }
}
