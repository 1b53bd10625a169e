use std::path::{Component, Path, MAIN_SEPARATOR};

/// Folder name a source is mirrored into inside the session root.
///
/// Returns the last normal component of `path`, so `/home/me/Documents/`
/// yields `Documents`. Roots and empty paths have no leaf.
pub fn leaf_name(path: &Path) -> Option<String> {
    match path.components().next_back()? {
        Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
        _ => None,
    }
}

/// Shorten a long path for display.
///
/// Paths with more than three separator-delimited parts collapse to
/// `/<first>/.../<last>/`; shorter paths are returned unchanged.
pub fn format_for_display(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }

    let parts: Vec<&str> = path
        .split(MAIN_SEPARATOR)
        .filter(|part| !part.is_empty())
        .collect();

    if parts.len() <= 3 {
        return path.to_string();
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    format!("/{first}/.../{last}/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_leaf_name() {
        assert_eq!(leaf_name(Path::new("/home/me/Documents")), Some("Documents".to_string()));
        assert_eq!(leaf_name(Path::new("/home/me/Documents/")), Some("Documents".to_string()));
        assert_eq!(leaf_name(Path::new("photos")), Some("photos".to_string()));
    }

    #[test]
    fn test_leaf_name_of_root_is_none() {
        assert_eq!(leaf_name(Path::new("/")), None);
        assert_eq!(leaf_name(Path::new("")), None);
        assert_eq!(leaf_name(&PathBuf::from("/tmp/..")), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_format_for_display() {
        assert_eq!(format_for_display(""), "");
        assert_eq!(format_for_display("/home/me"), "/home/me");
        assert_eq!(format_for_display("/home/me/docs"), "/home/me/docs");
        assert_eq!(
            format_for_display("/home/me/work/projects/report"),
            "/home/.../report/"
        );
    }
}
