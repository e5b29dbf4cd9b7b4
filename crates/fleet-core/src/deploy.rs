//! Deploy descriptor: which files of a local directory make up a challenge
//! and which of them is the entry point, plus the content fingerprint used
//! to key the bundle cache.

use std::collections::BTreeSet;
use std::path::Path;

use data_encoding::HEXLOWER;
use fleet_common::{FleetError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployDescriptor {
    basedir: String,
    files: BTreeSet<String>,
    entry: String,
}

impl DeployDescriptor {
    /// Rebuild a descriptor from persisted fields without re-validating the
    /// basedir; the directory may legitimately be gone between sessions.
    pub(crate) fn restore(basedir: String, files: BTreeSet<String>, entry: String) -> Self {
        Self {
            basedir,
            files,
            entry,
        }
    }

    pub fn basedir(&self) -> &str {
        &self.basedir
    }

    pub fn files(&self) -> &BTreeSet<String> {
        &self.files
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Set the base directory. Must name an existing directory; stored in
    /// canonical absolute form so equal descriptors hash equally.
    pub fn set_basedir(&mut self, path: &str) -> Result<()> {
        let canonical = Path::new(path)
            .canonicalize()
            .map_err(|_| FleetError::NotFound(format!("directory '{path}'")))?;
        if !canonical.is_dir() {
            return Err(FleetError::FormatError(format!(
                "'{path}' is not a directory"
            )));
        }
        self.basedir = canonical.to_string_lossy().into_owned();
        Ok(())
    }

    /// Add relative paths to the deployed file set. Whitespace anywhere in
    /// a path is rejected since paths end up inside rendered build files.
    pub fn add_files<I, S>(&mut self, paths: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut incoming = Vec::new();
        for path in paths {
            let path = path.into();
            if path.is_empty() || path.chars().any(char::is_whitespace) {
                return Err(FleetError::FormatError(format!(
                    "deploy path '{path}' must be non-empty and free of whitespace"
                )));
            }
            incoming.push(path);
        }
        self.files.extend(incoming);
        Ok(())
    }

    pub fn remove_files<'a, I>(&mut self, paths: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for path in paths {
            self.files.remove(path);
        }
    }

    pub fn set_entry(&mut self, entry: &str) -> Result<()> {
        if entry.is_empty() || entry.chars().any(char::is_whitespace) {
            return Err(FleetError::FormatError(format!(
                "entry path '{entry}' must be non-empty and free of whitespace"
            )));
        }
        self.entry = entry.to_string();
        Ok(())
    }

    /// Whether the entry point is reachable through the deployed file set:
    /// either listed itself or located under a listed directory.
    pub fn entry_covered(&self) -> bool {
        if self.entry.is_empty() {
            return false;
        }
        self.files.iter().any(|f| {
            f == &self.entry || self.entry.starts_with(&format!("{}/", f.trim_end_matches('/')))
        })
    }

    /// Stable content key over `(basedir, files, entry)`.
    ///
    /// The file set is iterated in `BTreeSet` order, so insertion order can
    /// never change the result; any change to one of the three fields does.
    /// Every component is length-prefixed, so no path content can fake a
    /// component boundary.
    pub fn fingerprint(&self) -> String {
        fn component(hasher: &mut Sha256, s: &str) {
            hasher.update((s.len() as u64).to_le_bytes());
            hasher.update(s.as_bytes());
        }

        let mut hasher = Sha256::new();
        component(&mut hasher, &self.basedir);
        hasher.update((self.files.len() as u64).to_le_bytes());
        for file in &self.files {
            component(&mut hasher, file);
        }
        component(&mut hasher, &self.entry);
        HEXLOWER.encode(&hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(files: &[&str], entry: &str) -> DeployDescriptor {
        let mut d = DeployDescriptor::restore(
            "/tmp/chal".to_string(),
            files.iter().map(|s| s.to_string()).collect(),
            String::new(),
        );
        if !entry.is_empty() {
            d.set_entry(entry).unwrap();
        }
        d
    }

    #[test]
    fn fingerprint_ignores_insertion_order() {
        let mut a = DeployDescriptor::restore("/tmp/chal".into(), BTreeSet::new(), "run".into());
        a.add_files(["pwn.elf", "libc.so", "ld.so"]).unwrap();
        let mut b = DeployDescriptor::restore("/tmp/chal".into(), BTreeSet::new(), "run".into());
        b.add_files(["ld.so", "pwn.elf", "libc.so"]).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_any_field() {
        let base = descriptor(&["pwn.elf"], "pwn.elf");

        let mut other_files = base.clone();
        other_files.add_files(["libc.so"]).unwrap();
        assert_ne!(base.fingerprint(), other_files.fingerprint());

        let mut other_entry = base.clone();
        other_entry.set_entry("other").unwrap();
        assert_ne!(base.fingerprint(), other_entry.fingerprint());

        let other_basedir =
            DeployDescriptor::restore("/tmp/chal2".into(), base.files.clone(), "pwn.elf".into());
        assert_ne!(base.fingerprint(), other_basedir.fingerprint());
    }

    #[test]
    fn fingerprint_component_boundaries_are_unforgeable() {
        // A comma inside a path must not merge with a neighboring entry.
        let mut split = descriptor(&[], "run");
        split.add_files(["ab", "c"]).unwrap();
        let mut joined = descriptor(&[], "run");
        joined.add_files(["ab,c"]).unwrap();
        assert_ne!(split.fingerprint(), joined.fingerprint());

        // Content cannot migrate between fields either.
        let a = DeployDescriptor::restore("/tmp/chalx".into(), BTreeSet::new(), "run".into());
        let b = DeployDescriptor::restore("/tmp/chal".into(), BTreeSet::new(), "xrun".into());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn basedir_rejects_files_and_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"x").unwrap();

        let mut d = DeployDescriptor::default();
        assert!(d.set_basedir(file.to_str().unwrap()).is_err());
        assert!(d.set_basedir("/definitely/not/here").is_err());
        d.set_basedir(dir.path().to_str().unwrap()).unwrap();
        assert!(!d.basedir().is_empty());
    }

    #[test]
    fn whitespace_paths_rejected() {
        let mut d = DeployDescriptor::default();
        assert!(d.add_files(["has space"]).is_err());
        assert!(d.set_entry("also bad").is_err());
        assert!(d.add_files(["fine.bin"]).is_ok());
    }

    #[test]
    fn entry_coverage() {
        assert!(descriptor(&["pwn.elf"], "pwn.elf").entry_covered());
        assert!(descriptor(&["bin"], "bin/run.sh").entry_covered());
        assert!(descriptor(&["bin/"], "bin/run.sh").entry_covered());
        assert!(!descriptor(&["libs"], "pwn.elf").entry_covered());
        assert!(!descriptor(&["pwn.elf"], "").entry_covered());
    }
}
