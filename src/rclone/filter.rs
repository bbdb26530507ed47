/// Escape rclone filter-rule glob metacharacters in a single path segment.
/// rclone's filter syntax treats `[ ] * ? {` and `}` specially in
/// `--include`/`--filter` patterns; a source path that happens to
/// contain one of these characters (a release name with brackets is
/// common) must have it escaped with a backslash or the daemon will
/// silently misinterpret the pattern as a glob.
pub fn escape_glob(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '[' | ']' | '*' | '?' | '{' | '}') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// The daemon-facing shape of a single job's copy request: the source
/// and destination filesystem roots, plus the include-rule filter that
/// scopes the copy to exactly one entry (file or directory) under the
/// source root.
#[derive(Debug, Clone, PartialEq)]
pub struct FsPair {
    pub src_fs: String,
    pub dst_fs: String,
    pub include_rules: Vec<String>,
}

/// Split a remote-relative path into `(parent, base_name)`. A path with
/// no `/` has an empty parent — the whole thing lives at the remote's
/// root.
fn split_parent_and_base(remote_path: &str) -> (&str, &str) {
    match remote_path.trim_end_matches('/').rsplit_once('/') {
        Some((parent, base)) => (parent, base),
        None => ("", remote_path),
    }
}

/// Build the `srcFs`/`dstFs`/filter triple rclone's `sync/copy` rc call
/// expects for one job.
///
/// rclone's rc API copies the *contents* of `srcFs` into `dstFs`; to
/// target one file or directory within a much larger remote tree
/// without the daemon listing the whole tree, the source fs is rooted
/// at the target's *parent*, and a filter narrows the copy to just the
/// target's base name (and, if it's a directory, everything under it).
/// This is why both `baseName` and `baseName/**` are needed as include
/// rules: a bare `baseName` rule matches a file but not a directory's
/// contents, and `baseName/**` alone would miss the directory entry
/// itself on some rclone filter evaluation paths.
pub fn build_fs_pair(remote_name: &str, remote_path: &str, local_path: &str) -> FsPair {
    let (parent, base_name) = split_parent_and_base(remote_path);

    let src_fs = if parent.is_empty() {
        format!("{remote_name}:/")
    } else {
        format!("{remote_name}:{parent}/")
    };
    let dst_fs = format!("{}/", local_path.trim_end_matches('/'));

    let escaped_base = escape_glob(base_name);
    let include_rules = vec![escaped_base.clone(), format!("{escaped_base}/**")];

    FsPair {
        src_fs,
        dst_fs,
        include_rules,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_all_glob_metacharacters() {
        assert_eq!(escape_glob("a[b]c"), "a\\[b\\]c");
        assert_eq!(escape_glob("movie {2024}"), "movie \\{2024\\}");
        assert_eq!(escape_glob("what?"), "what\\?");
        assert_eq!(escape_glob("a*b"), "a\\*b");
    }

    #[test]
    fn leaves_plain_paths_untouched() {
        assert_eq!(escape_glob("Movies/Inception (2010)"), "Movies/Inception (2010)");
    }

    #[test]
    fn builds_parent_rooted_src_fs_with_include_rules() {
        let pair = build_fs_pair("seedbox", "downloads/movie [2024]", "/data/movies");
        assert_eq!(pair.src_fs, "seedbox:downloads/");
        assert_eq!(pair.dst_fs, "/data/movies/");
        assert_eq!(pair.include_rules, vec!["movie \\[2024\\]", "movie \\[2024\\]/**"]);
    }

    #[test]
    fn root_level_remote_path_uses_remote_root_as_parent() {
        let pair = build_fs_pair("seedbox", "movie.mkv", "/data/movies");
        assert_eq!(pair.src_fs, "seedbox:/");
        assert_eq!(pair.include_rules, vec!["movie.mkv", "movie.mkv/**"]);
    }

    #[test]
    fn trailing_slash_on_remote_path_is_ignored() {
        let pair = build_fs_pair("seedbox", "downloads/Show.Name/", "/data/tv");
        assert_eq!(pair.src_fs, "seedbox:downloads/");
        assert_eq!(pair.include_rules[0], "Show.Name");
    }

    #[test]
    fn local_path_always_gets_a_trailing_separator() {
        let pair = build_fs_pair("seedbox", "a/b", "/data/movies");
        assert_eq!(pair.dst_fs, "/data/movies/");
        let pair2 = build_fs_pair("seedbox", "a/b", "/data/movies/");
        assert_eq!(pair2.dst_fs, "/data/movies/");
    }
}
