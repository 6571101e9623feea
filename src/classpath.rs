use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use zip::ZipArchive;

/// Where a classpath class can be read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ClassSource {
    File(PathBuf),
    JarEntry { jar: PathBuf, entry: String },
}

/// Fallback classpath index keyed by internal class name.
#[derive(Debug, Default)]
pub(crate) struct ClasspathIndex {
    pub(crate) classes: BTreeMap<String, ClassSource>,
}

impl ClasspathIndex {
    /// Read the class file bytes for `name`, if the classpath has it.
    pub(crate) fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let Some(source) = self.classes.get(name) else {
            return Ok(None);
        };
        let data = match source {
            ClassSource::File(path) => {
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?
            }
            ClassSource::JarEntry { jar, entry } => {
                let file = fs::File::open(jar)
                    .with_context(|| format!("failed to open {}", jar.display()))?;
                let mut archive = ZipArchive::new(file)
                    .with_context(|| format!("failed to read {}", jar.display()))?;
                let mut zipped = archive
                    .by_name(entry)
                    .with_context(|| format!("failed to read {}:{}", jar.display(), entry))?;
                let mut data = Vec::new();
                zipped
                    .read_to_end(&mut data)
                    .with_context(|| format!("failed to read {}:{}", jar.display(), entry))?;
                data
            }
        };
        Ok(Some(data))
    }
}

/// Index every class reachable from the classpath entries, following jar
/// manifest `Class-Path` references.
pub(crate) fn resolve_classpath(entries: &[PathBuf]) -> Result<ClasspathIndex> {
    let mut class_map: BTreeMap<String, Vec<ClassSource>> = BTreeMap::new();
    for entry in expand_classpath(entries.to_vec())? {
        if entry.is_dir() {
            index_dir(&entry, &entry, &mut class_map)?;
        } else if is_jar_path(&entry) {
            index_jar(&entry, &mut class_map)?;
        } else {
            anyhow::bail!("unsupported classpath entry: {}", entry.display());
        }
    }

    let mut duplicates = Vec::new();
    for (name, sources) in &class_map {
        if sources.len() > 1 {
            duplicates.push(format!("{name}: {}", describe_sources(sources)));
        }
    }
    if !duplicates.is_empty() {
        anyhow::bail!("duplicate classes found: {}", duplicates.join(", "));
    }

    let classes = class_map
        .into_iter()
        .filter_map(|(name, sources)| sources.into_iter().next().map(|source| (name, source)))
        .collect();
    Ok(ClasspathIndex { classes })
}

fn describe_sources(sources: &[ClassSource]) -> String {
    sources
        .iter()
        .map(|source| match source {
            ClassSource::File(path) => path.display().to_string(),
            ClassSource::JarEntry { jar, entry } => format!("{}:{entry}", jar.display()),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn index_dir(
    root: &Path,
    dir: &Path,
    class_map: &mut BTreeMap<String, Vec<ClassSource>>,
) -> Result<()> {
    let mut entries = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to read directory {}", dir.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read entry under {}", dir.display()))?;
        entries.push(entry.path());
    }
    entries.sort_by_key(|path| path_key(path));

    for path in entries {
        if path.is_dir() {
            index_dir(root, &path, class_map)?;
            continue;
        }
        let Some(name) = class_name_under(root, &path) else {
            continue;
        };
        class_map
            .entry(name)
            .or_default()
            .push(ClassSource::File(path));
    }
    Ok(())
}

/// Internal name of a `.class` file relative to a classpath directory.
pub(crate) fn class_name_under(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let text = relative.to_str()?.strip_suffix(".class")?;
    if text.ends_with("module-info") {
        return None;
    }
    Some(text.replace(std::path::MAIN_SEPARATOR, "/"))
}

fn index_jar(jar: &Path, class_map: &mut BTreeMap<String, Vec<ClassSource>>) -> Result<()> {
    let file = fs::File::open(jar).with_context(|| format!("failed to open {}", jar.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", jar.display()))?;
    let mut names = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}", jar.display()))?;
        if entry.is_dir() {
            continue;
        }
        names.push(entry.name().to_string());
    }
    names.sort();
    for entry in names {
        if !is_class_entry(&entry) {
            continue;
        }
        let Some(name) = entry.strip_suffix(".class") else {
            continue;
        };
        class_map
            .entry(name.to_string())
            .or_default()
            .push(ClassSource::JarEntry {
                jar: jar.to_path_buf(),
                entry: entry.clone(),
            });
    }
    Ok(())
}

/// Class entries of a jar, skipping module descriptors and multi-release
/// variants.
pub(crate) fn is_class_entry(name: &str) -> bool {
    name.ends_with(".class")
        && !name.ends_with("module-info.class")
        && !name.starts_with("META-INF/versions/")
}

pub(crate) fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

pub(crate) fn is_jar_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("jar"))
        .unwrap_or(false)
}

fn expand_classpath(initial: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    let mut queue = VecDeque::new();
    let mut initial_sorted = initial;
    initial_sorted.sort_by_key(|path| path_key(path));
    for entry in initial_sorted {
        queue.push_back(entry);
    }

    let mut seen = BTreeSet::new();
    let mut result = Vec::new();
    while let Some(entry) = queue.pop_front() {
        let key = path_key(&entry);
        if !seen.insert(key) {
            continue;
        }
        if !entry.exists() {
            anyhow::bail!("classpath entry not found: {}", entry.display());
        }
        result.push(entry.clone());
        if is_jar_path(&entry) {
            let mut referenced = manifest_classpath(&entry)?;
            referenced.sort_by_key(|path| path_key(path));
            queue.extend(referenced);
        }
    }

    Ok(result)
}

/// `Class-Path` entries of a jar manifest, resolved against the jar's
/// directory.
pub(crate) fn manifest_classpath(path: &Path) -> Result<Vec<PathBuf>> {
    let file =
        fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;
    let Ok(mut entry) = archive.by_name("META-INF/MANIFEST.MF") else {
        return Ok(Vec::new());
    };
    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .with_context(|| format!("failed to read manifest of {}", path.display()))?;
    Ok(parse_manifest_classpath(path, &content))
}

fn parse_manifest_classpath(jar_path: &Path, content: &str) -> Vec<PathBuf> {
    let mut class_path = None;
    let mut current_key: Option<String> = None;
    let mut current_value = String::new();

    for raw_line in content.lines() {
        let line = raw_line.trim_end_matches('\r');
        if let Some(continuation) = line.strip_prefix(' ') {
            if current_key.is_some() {
                current_value.push_str(continuation);
            }
            continue;
        }

        if let Some(key) = current_key.take() {
            if key == "Class-Path" {
                class_path = Some(current_value.clone());
            }
            current_value.clear();
        }

        if let Some((key, value)) = line.split_once(':') {
            current_key = Some(key.trim().to_string());
            current_value.push_str(value.trim_start());
        }
    }

    if current_key.as_deref() == Some("Class-Path") {
        class_path = Some(current_value);
    }

    let Some(class_path) = class_path else {
        return Vec::new();
    };

    let base_dir = jar_path.parent().unwrap_or_else(|| Path::new(""));
    class_path
        .split_whitespace()
        .map(|entry| {
            let entry_path = PathBuf::from(entry);
            if entry_path.is_absolute() {
                entry_path
            } else {
                base_dir.join(entry_path)
            }
        })
        .collect()
}

/// Classes the JDK provides; a missing platform ancestor is tolerated.
pub(crate) fn is_platform_class(name: &str) -> bool {
    const PREFIXES: [&str; 5] = ["java/", "javax/", "jdk/", "sun/", "com/sun/"];
    PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::write_jar;

    #[test]
    fn manifest_class_path_is_followed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let lib = temp.path().join("lib.jar");
        let app = temp.path().join("app.jar");
        write_jar(&lib, &[("p/Lib.class", b"lib")]);
        write_jar(
            &app,
            &[
                ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\nClass-Path: lib.jar\n"),
                ("p/App.class", b"app"),
            ],
        );

        let index = resolve_classpath(&[app]).expect("index");
        assert!(index.classes.contains_key("p/App"));
        assert_eq!(index.read("p/Lib").expect("read"), Some(b"lib".to_vec()));
        assert_eq!(index.read("p/Missing").expect("read"), None);
    }

    #[test]
    fn duplicates_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let first = temp.path().join("a.jar");
        let second = temp.path().join("b.jar");
        write_jar(&first, &[("p/Foo.class", b"a")]);
        write_jar(&second, &[("p/Foo.class", b"b")]);

        let error = resolve_classpath(&[first, second]).expect_err("duplicate");
        assert!(format!("{error:#}").contains("duplicate classes"));
    }

    #[test]
    fn directories_map_paths_to_internal_names() {
        let temp = tempfile::tempdir().expect("tempdir");
        let package = temp.path().join("p").join("q");
        fs::create_dir_all(&package).expect("mkdir");
        fs::write(package.join("Foo.class"), b"foo").expect("write");
        fs::write(package.join("notes.txt"), b"skip").expect("write");

        let index = resolve_classpath(&[temp.path().to_path_buf()]).expect("index");
        assert_eq!(index.classes.len(), 1);
        assert_eq!(index.read("p/q/Foo").expect("read"), Some(b"foo".to_vec()));
    }

    #[test]
    fn manifest_continuation_lines_are_joined() {
        let paths = parse_manifest_classpath(
            Path::new("/opt/app.jar"),
            "Class-Path: a.jar b\n .jar\nMain-Class: x\n",
        );
        assert_eq!(
            paths,
            vec![PathBuf::from("/opt/a.jar"), PathBuf::from("/opt/b.jar")]
        );
    }

    #[test]
    fn platform_prefixes() {
        assert!(is_platform_class("java/lang/Object"));
        assert!(!is_platform_class("javafx2/Thing"));
    }
}
