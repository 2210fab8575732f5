//! Uniform view over a problem package, whether it is a plain directory or
//! a `.zip` archive (`spec.md` §4.4). A zip archive that contains exactly
//! one top-level directory is transparently rebased: paths resolve as if
//! that directory were the archive root.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use zip::ZipArchive;

use crate::{Error, ErrorKind, Result};

/// A loaded problem package. Owns any temporary directory created to
/// extract a zip archive; the directory (and its contents) is removed when
/// the `Package` is dropped.
pub enum Package {
    /// A package rooted directly at a directory on disk.
    Directory(PathBuf),

    /// A package extracted from a zip archive into a private temp
    /// directory, optionally rebased into that archive's single top-level
    /// directory.
    Zip { _extracted_to: TempDir, root: PathBuf },
}

impl Package {
    /// Open a package at `path`. Directories are used in place; `.zip`
    /// files are extracted into a private temporary directory.
    pub fn open(path: &Path) -> Result<Package> {
        if path.is_dir() {
            return Ok(Package::Directory(path.to_owned()));
        }

        let file = fs::File::open(path)?;
        let mut archive = ZipArchive::new(file)
            .map_err(|e| Error::from(ErrorKind::PackageInvalid(format!("corrupt zip: {}", e))))?;

        let extract_dir = tempfile::tempdir()?;
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)
                .map_err(|e| Error::from(ErrorKind::PackageInvalid(format!("corrupt zip entry: {}", e))))?;
            let dest = extract_dir.path().join(entry.mangled_name());

            if entry.is_dir() {
                fs::create_dir_all(&dest)?;
            } else {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut out = fs::File::create(&dest)?;
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf)?;
                out.write_all(&buf)?;
            }
        }

        let root = detect_main_dir(extract_dir.path())?;
        Ok(Package::Zip { _extracted_to: extract_dir, root })
    }

    /// The package's effective root directory (after main-directory
    /// rebasing, for zip archives).
    pub fn root(&self) -> &Path {
        match self {
            Package::Directory(root) => root,
            Package::Zip { root, .. } => root,
        }
    }

    /// Read a small file, fully, as a string.
    pub fn load_as_str(&self, rel_path: &Path) -> Result<String> {
        Ok(fs::read_to_string(self.resolve(rel_path))?)
    }

    /// Return a real filesystem path for `rel_path`. For a directory
    /// package this is just the resolved path; zip packages were already
    /// extracted to a temp dir, so this is equally a direct path.
    /// `hint_name` is unused for directory/already-extracted packages and
    /// exists purely to mirror the original contract for future
    /// implementations that extract lazily.
    pub fn load_as_file(&self, rel_path: &Path, _hint_name: &str) -> Result<PathBuf> {
        let resolved = self.resolve(rel_path);
        if !resolved.exists() {
            bail!(ErrorKind::PackageInvalid(format!("missing file: {}", rel_path.display())));
        }
        Ok(resolved)
    }

    /// Copy `rel_path` to `dest`.
    pub fn load_into_dest_file(&self, rel_path: &Path, dest: &Path) -> Result<()> {
        fs::copy(self.resolve(rel_path), dest)?;
        Ok(())
    }

    /// Resolve a package-relative path against this package's root,
    /// stripping any leading `/` or `..` components per the safe-path
    /// rewriting rule (`spec.md` §4.5).
    pub fn resolve(&self, rel_path: &Path) -> PathBuf {
        let mut result = self.root().to_owned();
        for component in rel_path.components() {
            use std::path::Component;
            match component {
                Component::Normal(part) => result.push(part),
                _ => (),
            }
        }
        result
    }

    /// Walk the package tree (excluding `utils/`), yielding paths relative
    /// to the package root.
    pub fn walk(&self) -> Result<Vec<PathBuf>> {
        let mut result = Vec::new();
        walk_dir(self.root(), self.root(), &mut result)?;
        Ok(result)
    }
}

fn walk_dir(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let rel = path.strip_prefix(root).unwrap();

        if rel.starts_with("utils") {
            continue;
        }

        if path.is_dir() {
            walk_dir(root, &path, out)?;
        } else {
            out.push(rel.to_owned());
        }
    }

    Ok(())
}

/// If `dir` contains exactly one entry and that entry is a directory,
/// return it; otherwise return `dir` itself unchanged.
fn detect_main_dir(dir: &Path) -> Result<PathBuf> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .map(|e| e.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;

    if entries.len() == 1 && entries[0].is_dir() {
        Ok(entries.remove(0))
    } else {
        Ok(dir.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::Package;

    #[test]
    fn directory_package_resolves_paths_under_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Simfile"), "name: foo").unwrap();

        let package = Package::Directory(dir.path().to_owned());
        let content = package.load_as_str(std::path::Path::new("Simfile")).unwrap();

        assert_eq!("name: foo", content);
    }

    #[test]
    fn safe_path_rewriting_strips_parent_and_root_components() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("secret"), "x").unwrap();

        let package = Package::Directory(dir.path().to_owned());
        let resolved = package.resolve(std::path::Path::new("../../secret"));

        assert_eq!(dir.path().join("secret"), resolved);
    }
}
