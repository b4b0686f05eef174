use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::model::Item;

/// Characters that cannot appear in file names on common filesystems, and
/// their reversible stand-ins.
const FORBIDDEN_CHARS: &[(char, &str)] = &[
    ('<', "#l"),
    ('>', "#g"),
    (':', "#c"),
    ('"', "#d"),
    ('/', "#s"),
    ('\\', "#b"),
    ('|', "#p"),
    ('?', "#q"),
    ('*', "#a"),
];

#[derive(Clone)]
pub struct FileManager {
    output_dir: PathBuf,
}

impl FileManager {
    pub fn new(output_dir: &Path) -> Result<Self> {
        let output_dir = output_dir.to_path_buf();
        fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create output directory: {:?}", output_dir))?;

        Ok(Self { output_dir })
    }

    /// `[<origin>][<published>][<title>].html` inside the output directory.
    pub fn output_path(&self, item: &Item) -> PathBuf {
        let origin = sanitize_filename(&item.origin.title);
        let title = sanitize_filename(&item.title);
        let published = item.published_time().format("%Y-%m-%d %H.%M.%S");

        self.output_dir
            .join(format!("[{}][{}][{}].html", origin, published, title))
    }

    pub fn save_html(&self, item: &Item, html: &str) -> Result<PathBuf> {
        let path = self.output_path(item);
        fs::write(&path, html).with_context(|| format!("cannot write html: {:?}", path))?;
        Ok(path)
    }
}

pub fn ensure_images_dir(images_dir: &Path) -> Result<()> {
    fs::create_dir_all(images_dir)
        .with_context(|| format!("cannot make images dir {:?}", images_dir))
}

pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match FORBIDDEN_CHARS.iter().find(|(forbidden, _)| *forbidden == c) {
            Some((_, replacement)) => out.push_str(replacement),
            None => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Origin;
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a/b:c"), "a#sb#cc");
        assert_eq!(sanitize_filename(r#"<x>"|\?*"#), "#lx#g#d#p#b#q#a");
        assert_eq!(sanitize_filename("plain title"), "plain title");
    }

    #[test]
    fn test_output_path_shape() {
        let temp_dir = tempdir().unwrap();
        let manager = FileManager::new(temp_dir.path()).unwrap();
        let item = Item {
            title: "What? Why/How".to_string(),
            origin: Origin {
                title: "Blog: News".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let path = manager.output_path(&item);
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("[Blog#c News]["), "{}", name);
        assert!(name.ends_with("][What#q Why#sHow].html"), "{}", name);
        assert_eq!(path.parent().unwrap(), temp_dir.path());
    }

    #[test]
    fn test_save_html_and_images_dir() {
        let temp_dir = tempdir().unwrap();
        let manager = FileManager::new(&temp_dir.path().join("out")).unwrap();
        let saved = manager.save_html(&Item::default(), "<html></html>").unwrap();
        assert_eq!(fs::read_to_string(saved).unwrap(), "<html></html>");

        let images = temp_dir.path().join("nested").join("images");
        ensure_images_dir(&images).unwrap();
        assert!(images.is_dir());
    }
}
