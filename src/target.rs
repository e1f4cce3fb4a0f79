//! Destination path computation
//!
//! Wildcard patterns are turned into anchored regular expressions; each
//! parenthesized group in a pattern can be referenced from the target as
//! `{1}`..`{9}`.

use crate::error::TransferError;
use anyhow::Result;
use regex::Regex;
use std::path::{Component, Path, PathBuf};

/// True when `target` references a capture group (`{n}`).
pub fn has_placeholders(target: &str) -> bool {
    target
        .as_bytes()
        .windows(3)
        .any(|w| w[0] == b'{' && w[1].is_ascii_digit() && w[2] == b'}')
}

/// Any `*`, a trailing `/`, or no `/` at all makes a pattern match more
/// than one exact path.
pub fn is_wildcard_pattern(pattern: &str) -> bool {
    pattern.contains('*') || pattern.ends_with('/') || !pattern.contains('/')
}

/// Convert a wildcard path pattern into an anchored regular expression.
pub fn path_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for c in pattern.chars() {
        match c {
            '.' | '^' | '$' | '+' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            '*' => out.push_str(".*"),
            _ => out.push(c),
        }
    }
    if pattern.ends_with('/') || pattern.ends_with('\\') {
        out.push_str(".*");
    }
    out.push('$');
    out
}

pub fn compile(regex: &str, pattern: &str) -> Result<Regex> {
    Regex::new(regex).map_err(|e| {
        TransferError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

fn remove_repo(path: &str) -> &str {
    match path.find('/') {
        Some(idx) => &path[idx..],
        None => path,
    }
}

/// Substitute `{i}` in `target` with the i-th capture group of `groups`
/// (`groups[0]` is the whole match). Returns the new target and whether
/// any placeholder was replaced.
pub fn replace_placeholders(groups: &[String], target: &str) -> (String, bool) {
    let mut out = target.to_string();
    for (i, group) in groups.iter().enumerate().skip(1) {
        out = out.replace(&format!("{{{i}}}"), &group.replace('\\', "/"));
    }
    let used = out != target;
    (out, used)
}

/// Resolve `target` for a remote item at `path` matched by `pattern`.
///
/// With `ignore_repo` the first segment of both pattern and path is dropped,
/// so items found in a different repository still line up with the groups.
pub fn build_target_path(
    pattern: &str,
    path: &str,
    target: &str,
    ignore_repo: bool,
) -> Result<(String, bool)> {
    let (pattern, path) = if ignore_repo {
        (remove_repo(pattern), remove_repo(path))
    } else {
        (pattern, path)
    };
    let re = compile(&path_to_regex(pattern), pattern)?;
    let groups: Vec<String> = match re.captures(path) {
        Some(caps) => caps
            .iter()
            .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
            .collect(),
        None => Vec::new(),
    };
    Ok(replace_placeholders(&groups, target))
}

/// Split at the last `/` or `\` into `(file, dir)`.
pub fn file_and_dir(path: &str) -> (&str, &str) {
    match path.rfind(['/', '\\']) {
        Some(idx) => (&path[idx + 1..], &path[..idx]),
        None => (path, ""),
    }
}

fn join_clean(base: &str, rel: &str) -> PathBuf {
    let mut out = PathBuf::from(base);
    for part in Path::new(rel).components() {
        match part {
            Component::Normal(p) => out.push(p),
            Component::ParentDir => out.push(".."),
            _ => {}
        }
    }
    out
}

/// Local directory and file name for a downloaded item.
///
/// The target's last segment names the file unless it is empty or `"."`.
/// The item's remote directory is kept under the target directory unless
/// the layout is flat or placeholders already placed it.
pub fn local_path_and_file(
    original_name: &str,
    remote_dir: &str,
    target: &str,
    flat: bool,
    placeholders_used: bool,
) -> (PathBuf, String) {
    let (target_file, target_dir) = file_and_dir(target);
    let local_dir = if !flat && !placeholders_used {
        join_clean(target_dir, remote_dir)
    } else {
        join_clean(target_dir, "")
    };
    let file = if !target_file.is_empty() && target_file != "." {
        target_file.to_string()
    } else {
        original_name.to_string()
    };
    (local_dir, file)
}

/// Normalize separators and strip relative components.
pub fn trim_path(path: &str) -> String {
    path.replace('\\', "/")
        .replace("//", "/")
        .replace("../", "")
        .replace("./", "")
}

/// Expand a leading `~` to `$HOME`. Other patterns are returned unchanged.
pub fn expand_home(pattern: &str) -> String {
    let rest = match pattern.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with(['/', '\\']) => rest,
        _ => return pattern.to_string(),
    };
    match std::env::var("HOME") {
        Ok(home) => format!("{}{rest}", home.trim_end_matches('/')),
        Err(_) => pattern.to_string(),
    }
}

/// Longest leading directory of a local pattern free of wildcards (or of
/// regex groups when `regexp`). `"."` when the first section already is one.
pub fn root_path(pattern: &str, regexp: bool) -> String {
    let sep = if pattern.contains('/') || !pattern.contains('\\') {
        '/'
    } else {
        '\\'
    };
    let mut root = String::new();
    for section in pattern.split(sep) {
        if section.is_empty() {
            continue;
        }
        let stop = if regexp {
            section.contains('(')
        } else {
            section.contains('*')
        };
        if stop {
            break;
        }
        if !root.is_empty() {
            root.push(sep);
        }
        root.push_str(section);
    }
    if pattern.starts_with(sep) {
        root.insert(0, sep);
    }
    if root.is_empty() {
        ".".to_string()
    } else {
        root
    }
}

/// Remote path for an uploaded local file. Only targets ending in `/` are
/// completed: with the file name when flat or placeholders were used,
/// otherwise with the whole local path.
pub fn upload_target(local_path: &str, target: &str, flat: bool, placeholders_used: bool) -> String {
    if !target.ends_with('/') {
        return target.to_string();
    }
    if flat || placeholders_used {
        let (file, _) = file_and_dir(local_path);
        format!("{target}{file}")
    } else {
        format!("{target}{}", trim_path(local_path).trim_start_matches('/'))
    }
}

/// Move/copy destination for an item at `item_path` (its directory inside
/// the repository) whose full relative path is `item_relative_path`.
pub fn destination_path(
    target: &str,
    pattern: &str,
    item_path: &str,
    item_relative_path: &str,
    flat: bool,
) -> Result<String> {
    let mut dest = target.to_string();
    if !flat {
        dest = if dest.contains('/') {
            let (file, dir) = file_and_dir(&dest);
            trim_path(&format!("{dir}/{item_path}/{file}"))
        } else {
            trim_path(&format!("{dest}/{item_path}/"))
        };
    }
    let (dest, _) = build_target_path(pattern, item_relative_path, &dest, true)?;
    Ok(dest)
}

/// Escape every parenthesis pair in `pattern` that no `{n}` in `target`
/// refers to, so that literal parentheses are not treated as groups.
pub fn escape_unreferenced_parentheses(pattern: &str, target: &str) -> String {
    let mut open: Vec<(usize, Option<usize>)> = Vec::new();
    for (i, c) in pattern.char_indices() {
        match c {
            '(' => open.push((i, None)),
            ')' => {
                if let Some(slot) = open.iter_mut().rev().find(|(_, close)| close.is_none()) {
                    slot.1 = Some(i);
                }
            }
            _ => {}
        }
    }
    let pairs: Vec<(usize, usize)> = open
        .into_iter()
        .filter_map(|(o, c)| c.map(|c| (o, c)))
        .collect();

    let mut referenced = Vec::new();
    for n in placeholder_numbers(target) {
        if n >= 1 && n <= pairs.len() {
            referenced.push(pairs[n - 1]);
        }
    }
    let is_referenced = |i: usize| referenced.iter().any(|&(o, c)| o == i || c == i);

    let mut out = String::with_capacity(pattern.len());
    for (i, c) in pattern.char_indices() {
        if (c == '(' || c == ')') && !is_referenced(i) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn placeholder_numbers(target: &str) -> Vec<usize> {
    let mut out: Vec<usize> = Vec::new();
    let mut rest = target;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                if let Ok(n) = after[..end].parse::<usize>() {
                    out.push(n);
                }
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    out.sort_unstable();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_to_regex() {
        assert_eq!(path_to_regex("a/*.jar"), "^a/.*\\.jar$");
        assert_eq!(path_to_regex("dir/"), "^dir/.*$");
        assert_eq!(path_to_regex("r/v{1.0}/*"), "^r/v\\{1\\.0\\}/.*$");
    }

    #[test]
    fn test_braces_in_pattern_are_literal() -> Result<()> {
        let re = compile(&path_to_regex("repo/v{1.0}/*"), "repo/v{1.0}/*")?;
        assert!(re.is_match("repo/v{1.0}/a.txt"));
        assert!(!re.is_match("repo/v1/a.txt"));
        let (t, used) = build_target_path("repo/v{1.0}/(*)", "repo/v{1.0}/a.txt", "out/{1}", true)?;
        assert_eq!(t, "out/a.txt");
        assert!(used);
        Ok(())
    }

    #[test]
    fn test_build_target_path_groups() -> Result<()> {
        let (t, used) = build_target_path("repoA/1(*)234", "repoA/1hello234", "{1}", false)?;
        assert_eq!(t, "hello");
        assert!(used);
        let (t, used) = build_target_path("repoA/1(*)234", "repoB/1hello234", "out/{1}/", true)?;
        assert_eq!(t, "out/hello/");
        assert!(used);
        let (t, used) = build_target_path("repo/*", "repo/a/b.txt", "out/", true)?;
        assert_eq!(t, "out/");
        assert!(!used);
        Ok(())
    }

    #[test]
    fn test_has_placeholders() {
        assert!(has_placeholders("r/{1}/x"));
        assert!(!has_placeholders("r/{a}/x"));
        assert!(!has_placeholders("r/x/"));
    }

    #[test]
    fn test_local_path_and_file() {
        let (dir, file) = local_path_and_file("c.txt", "a/b", "/out/", false, false);
        assert_eq!(dir, PathBuf::from("/out/a/b"));
        assert_eq!(file, "c.txt");
        let (dir, file) = local_path_and_file("c.txt", "a/b", "/out/", true, false);
        assert_eq!(dir, PathBuf::from("/out"));
        assert_eq!(file, "c.txt");
        let (dir, file) = local_path_and_file("c.txt", "a/b", "/out/renamed.txt", true, false);
        assert_eq!(dir, PathBuf::from("/out"));
        assert_eq!(file, "renamed.txt");
        let (dir, _) = local_path_and_file("c.txt", ".", "/out/", false, false);
        assert_eq!(dir, PathBuf::from("/out"));
    }

    #[test]
    fn test_trim_path() {
        assert_eq!(trim_path("a\\b//c/./d/../e"), "a/b/c/d/e");
    }

    #[test]
    fn test_root_path() {
        assert_eq!(root_path("/tmp/dir/*.txt", false), "/tmp/dir");
        assert_eq!(root_path("dir/sub/(.*)", true), "dir/sub");
        assert_eq!(root_path("*.txt", false), ".");
        assert_eq!(root_path("a/b/c.txt", false), "a/b/c.txt");
    }

    #[test]
    fn test_expand_home_leaves_other_paths() {
        assert_eq!(expand_home("/abs/~/x"), "/abs/~/x");
        assert_eq!(expand_home("~user/x"), "~user/x");
        assert_eq!(expand_home("rel/*"), "rel/*");
    }

    #[test]
    fn test_upload_target() {
        assert_eq!(upload_target("/src/a/f.txt", "repo/dir/", true, false), "repo/dir/f.txt");
        assert_eq!(upload_target("src/a/f.txt", "repo/dir/", false, false), "repo/dir/src/a/f.txt");
        assert_eq!(upload_target("src/a/f.txt", "repo/x.txt", false, false), "repo/x.txt");
    }

    #[test]
    fn test_destination_path() -> Result<()> {
        assert_eq!(destination_path("dst/", "src/*", "a/b", "src/a/b/f", false)?, "dst/a/b/");
        assert_eq!(destination_path("dst/", "src/*", "a/b", "src/a/b/f", true)?, "dst/");
        assert_eq!(destination_path("dst/new.txt", "src/*", ".", "src/f", false)?, "dst/new.txt");
        assert_eq!(destination_path("dst/{1}/", "src/(*)/f", "a", "src/a/f", true)?, "dst/a/");
        Ok(())
    }

    #[test]
    fn test_escape_unreferenced_parentheses() {
        assert_eq!(escape_unreferenced_parentheses("a(b)/(c)", "t/{2}"), "a\\(b\\)/(c)");
        assert_eq!(escape_unreferenced_parentheses("a(b)", "t/"), "a\\(b\\)");
        assert_eq!(escape_unreferenced_parentheses("(a)(b)", "{1}{2}"), "(a)(b)");
    }
}
