//! Gallery item discovery and caption metadata.
//!
//! Items are collected once at startup from the files and directories named
//! on the command line. A `gallery.toml` next to the images may carry a
//! title, description, and alt text per file; everything in it is optional.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use toml::Value as TomlValue;

/// Caption headline used when an item has neither a title nor alt text.
pub const FALLBACK_TITLE: &str = "Untitled";

const MANIFEST_NAME: &str = "gallery.toml";

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "bmp", "tiff", "tif", "gif", "webp",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryItem {
    pub path: PathBuf,
    /// Short textual stand-in for the image; may be empty.
    pub alt: String,
    pub title: Option<String>,
    pub description: Option<String>,
}

impl GalleryItem {
    fn from_path(path: PathBuf) -> Self {
        let alt = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            alt,
            title: None,
            description: None,
        }
    }

    /// Caption headline: the explicit title, then non-empty alt text, then
    /// [`FALLBACK_TITLE`].
    pub fn caption_title(&self) -> &str {
        match &self.title {
            Some(title) if !title.is_empty() => title,
            _ if !self.alt.is_empty() => &self.alt,
            _ => FALLBACK_TITLE,
        }
    }
}

#[derive(Debug, Default)]
struct ItemMetadata {
    alt: Option<String>,
    title: Option<String>,
    description: Option<String>,
}

type Manifest = HashMap<String, ItemMetadata>;

fn parse_manifest(contents: &str) -> Manifest {
    let mut manifest = Manifest::new();
    if let Ok(TomlValue::Table(table)) = toml::from_str::<TomlValue>(contents) {
        for (file_name, value) in table {
            let TomlValue::Table(fields) = value else {
                continue;
            };
            let mut meta = ItemMetadata::default();
            for (key, field) in fields {
                if let TomlValue::String(text) = field {
                    match key.as_str() {
                        "alt" => meta.alt = Some(text),
                        "title" => meta.title = Some(text),
                        "description" => meta.description = Some(text),
                        _ => {}
                    }
                }
            }
            manifest.insert(file_name, meta);
        }
    }
    manifest
}

fn load_manifest(dir: &Path) -> Manifest {
    let path = dir.join(MANIFEST_NAME);
    match fs::read_to_string(&path) {
        Ok(contents) => parse_manifest(&contents),
        Err(err) => {
            if err.kind() != ErrorKind::NotFound {
                eprintln!("failed to read {}: {}", path.display(), err);
            }
            Manifest::new()
        }
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Collect gallery items from the given files and directories.
///
/// Directories are scanned non-recursively and their entries sorted by name
/// so the gallery order is deterministic; explicit file arguments keep their
/// command-line order. The scan happens exactly once; the viewer never
/// re-reads the list.
pub fn discover(inputs: &[PathBuf]) -> Result<Vec<GalleryItem>> {
    let mut items = Vec::new();
    let mut manifests: HashMap<PathBuf, Manifest> = HashMap::new();
    for input in inputs {
        if input.is_dir() {
            let entries = fs::read_dir(input)
                .with_context(|| format!("failed to read directory {}", input.display()))?;
            let mut found = Vec::new();
            for entry in entries {
                let path = entry?.path();
                if path.is_file() && is_image_file(&path) {
                    found.push(path);
                }
            }
            found.sort();
            for path in found {
                items.push(with_metadata(path, &mut manifests)?);
            }
        } else if input.is_file() {
            items.push(with_metadata(input.clone(), &mut manifests)?);
        } else {
            bail!("no such file or directory: {}", input.display());
        }
    }
    Ok(items)
}

fn with_metadata(path: PathBuf, manifests: &mut HashMap<PathBuf, Manifest>) -> Result<GalleryItem> {
    let path = path
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", path.display()))?;
    let mut item = GalleryItem::from_path(path);
    let Some(parent) = item.path.parent().map(Path::to_path_buf) else {
        return Ok(item);
    };
    let manifest = manifests
        .entry(parent.clone())
        .or_insert_with(|| load_manifest(&parent));
    if let Some(name) = item.path.file_name().and_then(|name| name.to_str()) {
        if let Some(meta) = manifest.get(name) {
            if let Some(alt) = &meta.alt {
                item.alt = alt.clone();
            }
            item.title = meta.title.clone();
            item.description = meta.description.clone();
        }
    }
    Ok(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        File::create(&path).expect("failed to create test file");
        path
    }

    fn file_names(items: &[GalleryItem]) -> Vec<String> {
        items
            .iter()
            .map(|item| {
                item.path
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }

    #[test]
    fn directory_scan_filters_and_sorts() {
        let dir = tempdir().expect("failed to create temp dir");
        touch(dir.path(), "c.png");
        touch(dir.path(), "a.jpg");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "B.JPEG");

        let items = discover(&[dir.path().to_path_buf()]).expect("discover failed");
        assert_eq!(file_names(&items), vec!["B.JPEG", "a.jpg", "c.png"]);
    }

    #[test]
    fn explicit_files_keep_argument_order() {
        let dir = tempdir().expect("failed to create temp dir");
        let b = touch(dir.path(), "b.png");
        let a = touch(dir.path(), "a.png");

        let items = discover(&[b, a]).expect("discover failed");
        assert_eq!(file_names(&items), vec!["b.png", "a.png"]);
    }

    #[test]
    fn missing_input_is_an_error() {
        let dir = tempdir().expect("failed to create temp dir");
        let missing = dir.path().join("nope.jpg");
        assert!(discover(&[missing]).is_err());
    }

    #[test]
    fn manifest_metadata_is_attached() {
        let dir = tempdir().expect("failed to create temp dir");
        touch(dir.path(), "stance.jpg");
        touch(dir.path(), "plain.jpg");
        let mut manifest =
            File::create(dir.path().join("gallery.toml")).expect("failed to create manifest");
        writeln!(
            manifest,
            "[\"stance.jpg\"]\ntitle = \"Kalari stance\"\ndescription = \"Third form.\"\nalt = \"Fighter in low stance\"\n"
        )
        .expect("failed to write manifest");

        let items = discover(&[dir.path().to_path_buf()]).expect("discover failed");
        assert_eq!(items.len(), 2);

        let plain = &items[0];
        assert_eq!(plain.title, None);
        assert_eq!(plain.alt, "plain");

        let stance = &items[1];
        assert_eq!(stance.title.as_deref(), Some("Kalari stance"));
        assert_eq!(stance.description.as_deref(), Some("Third form."));
        assert_eq!(stance.alt, "Fighter in low stance");
    }

    #[test]
    fn malformed_manifest_is_ignored() {
        let dir = tempdir().expect("failed to create temp dir");
        touch(dir.path(), "a.jpg");
        let mut manifest =
            File::create(dir.path().join("gallery.toml")).expect("failed to create manifest");
        writeln!(manifest, "not [valid toml").expect("failed to write manifest");

        let items = discover(&[dir.path().to_path_buf()]).expect("discover failed");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, None);
    }

    #[test]
    fn caption_title_falls_back_in_order() {
        let mut item = GalleryItem {
            path: PathBuf::from("/tmp/a.jpg"),
            alt: "alt text".to_string(),
            title: Some("Title".to_string()),
            description: None,
        };
        assert_eq!(item.caption_title(), "Title");

        item.title = None;
        assert_eq!(item.caption_title(), "alt text");

        item.alt.clear();
        assert_eq!(item.caption_title(), FALLBACK_TITLE);

        item.title = Some(String::new());
        assert_eq!(item.caption_title(), FALLBACK_TITLE);
    }

    #[test]
    fn alt_defaults_to_the_file_stem() {
        let dir = tempdir().expect("failed to create temp dir");
        let path = touch(dir.path(), "morning_form.jpg");
        let items = discover(&[path]).expect("discover failed");
        assert_eq!(items[0].alt, "morning_form");
    }
}
