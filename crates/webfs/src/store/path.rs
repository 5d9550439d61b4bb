use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::bytes::Regex;

// "/.." or "../", but never a bare ".." so names like "stupid..filename" survive
static UP_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\.\.|\.\./").expect("static regex must compile"));

static HOME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(/*)~/?").expect("static regex must compile"));

/// Strip parent-directory tokens and a leading home shorthand from a request path.
///
/// Works on raw bytes since a decoded request path need not be UTF-8. Parent
/// tokens are removed until none remain, so a removal can never splice the
/// surrounding characters into a fresh `../`.
pub fn strip_url(input: &[u8]) -> Vec<u8> {
    let mut out = input.to_vec();
    loop {
        let next = UP_PATTERN.replace_all(&out, &b""[..]).into_owned();
        if next == out {
            break;
        }
        out = next;
    }

    HOME_PATTERN.replace(&out, &b"$1"[..]).into_owned()
}

/// Resolve a raw request path to an absolute path under `root`.
///
/// Only normal segments of the stripped path are appended, which keeps the
/// result lexically inside `root` whatever the input. An empty or root-only
/// path resolves to `root` itself.
pub fn resolve(root: &Path, raw: impl AsRef<[u8]>) -> PathBuf {
    let stripped = strip_url(raw.as_ref());

    let mut path = root.to_path_buf();
    for component in Path::new(OsStr::from_bytes(&stripped)).components() {
        if let Component::Normal(segment) = component {
            path.push(segment);
        }
    }
    path
}
