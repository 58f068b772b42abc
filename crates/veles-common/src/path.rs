//! Archive path normalization.
//!
//! Paths inside the archive use forward slashes, carry no leading slash and
//! no scheme prefix. References embedded in model files may use either
//! separator and a `romfs://`/`trpfs://`/`archive://` prefix.

/// Scheme prefixes stripped from archive paths (matched case-insensitively).
pub const SCHEME_PREFIXES: [&str; 3] = ["romfs://", "trpfs://", "archive://"];

/// Normalize an archive path.
///
/// Backslashes become forward slashes, surrounding whitespace is trimmed and
/// scheme prefixes and leading slashes are removed until none remain, so the
/// result is a fixed point: `normalize(normalize(p)) == normalize(p)`.
pub fn normalize(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let mut rest = unified.as_str();

    loop {
        let before = rest.len();
        rest = rest.trim().trim_start_matches('/');
        for prefix in SCHEME_PREFIXES {
            if starts_with_ignore_case(rest, prefix) {
                rest = &rest[prefix.len()..];
            }
        }
        if rest.len() == before {
            break;
        }
    }

    rest.to_string()
}

/// Directory part of a normalized path, including the trailing slash.
///
/// Returns an empty string for a bare file name.
pub fn directory_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..=idx],
        None => "",
    }
}

/// File name part of a path (everything after the last separator).
pub fn file_name(path: &str) -> &str {
    match path.rfind(['/', '\\']) {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// File name without its final extension.
pub fn file_stem(path: &str) -> &str {
    let name = file_name(path);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

/// Lower-cased extension including the dot (e.g. `.trmdl`), or empty.
pub fn extension(path: &str) -> String {
    let name = file_name(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[idx..].to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// Join a normalized base directory and a relative path, collapsing `.` and
/// `..` segments. `..` never climbs above the archive root.
pub fn join(base_dir: &str, relative: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in base_dir.split('/').chain(relative.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len()
        && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}
