use std::path::{Component, Path, PathBuf};

/// Compute `target` relative to the directory `base`, using `..` where needed.
///
/// Both paths should be absolute (or both relative to the same root). When
/// they share no prefix at all (e.g. different Windows drives), `target` is
/// returned unchanged.
#[must_use]
pub fn relative_to(target: &Path, base: &Path) -> PathBuf {
    let target: Vec<Component<'_>> = target.components().collect();
    let base: Vec<Component<'_>> = base.components().collect();

    let common = target
        .iter()
        .zip(base.iter())
        .take_while(|(a, b)| a == b)
        .count();

    if common == 0 && target.first().is_some_and(|c| matches!(c, Component::Prefix(_))) {
        return target.iter().collect();
    }

    let mut out = PathBuf::new();
    for _ in common..base.len() {
        out.push("..");
    }
    for component in &target[common..] {
        out.push(component.as_os_str());
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Render a path with forward slashes, as used in URLs and source maps.
#[must_use]
pub fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
        .replace("//", "/")
}
