use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::defs::{GENOTYPE_EXTS, PGEN_EXT, PSAM_EXT, PVAR_EXT};

/// Appends `suffix` to the final component of `prefix`, joined by `sep`.
/// `out/qc` + `geno` -> `out/qc_geno`. Dots in the prefix are left alone,
/// unlike `Path::with_extension`.
pub fn append_to_prefix(prefix: &Path, sep: &str, suffix: &str) -> PathBuf {
    let mut name: OsString = prefix.as_os_str().to_owned();
    name.push(sep);
    name.push(suffix);
    PathBuf::from(name)
}

/// Handle on a PLINK 2 genotype trio sharing one path prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct GenotypeDataset {
    prefix: PathBuf,
}

impl GenotypeDataset {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        GenotypeDataset { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn companion(&self, ext: &str) -> PathBuf {
        append_to_prefix(&self.prefix, ".", ext)
    }

    pub fn pgen(&self) -> PathBuf {
        self.companion(PGEN_EXT)
    }

    pub fn psam(&self) -> PathBuf {
        self.companion(PSAM_EXT)
    }

    pub fn pvar(&self) -> PathBuf {
        self.companion(PVAR_EXT)
    }

    /// Liveness proxy for the whole trio: only the call matrix is checked.
    pub fn calls_exist(&self) -> bool {
        self.pgen().is_file()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_companions().is_empty()
    }

    pub fn missing_companions(&self) -> Vec<PathBuf> {
        GENOTYPE_EXTS
            .iter()
            .map(|ext| self.companion(ext))
            .filter(|path| !path.is_file())
            .collect()
    }

    /// Deletes whichever companions exist. Returns how many files were removed.
    pub fn remove(&self) -> io::Result<usize> {
        let mut removed = 0;
        for ext in GENOTYPE_EXTS {
            let path = self.companion(ext);
            if path.is_file() {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn count_variants(&self) -> io::Result<usize> {
        count_data_lines(&self.pvar())
    }
}

/// Counts lines that are neither empty nor `#` headers.
pub fn count_data_lines(path: &Path) -> io::Result<usize> {
    let reader = BufReader::new(File::open(path)?);
    let mut count = 0;
    for line in reader.lines() {
        let line = line?;
        if !line.is_empty() && !line.starts_with('#') {
            count += 1;
        }
    }
    Ok(count)
}

/// Copies `file` into `dir`, keeping its file name.
pub fn copy_into_dir(file: &Path, dir: &Path) -> io::Result<PathBuf> {
    let name = file.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("{} has no file name", file.display()))
    })?;
    let dest = dir.join(name);
    fs::copy(file, &dest)?;
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch_trio(dataset: &GenotypeDataset) {
        for ext in GENOTYPE_EXTS {
            fs::write(dataset.companion(ext), "#CHROM\n1\n").unwrap();
        }
    }

    #[test]
    fn append_keeps_dots_in_prefix() {
        let path = append_to_prefix(Path::new("out/cohort.v2"), "_", "geno");
        assert_eq!(path, PathBuf::from("out/cohort.v2_geno"));
        let ds = GenotypeDataset::new("out/cohort.v2");
        assert_eq!(ds.pgen(), PathBuf::from("out/cohort.v2.pgen"));
    }

    #[test]
    fn completeness_and_removal() {
        let dir = tempdir().unwrap();
        let ds = GenotypeDataset::new(dir.path().join("cohort"));
        assert!(!ds.calls_exist());
        assert_eq!(ds.missing_companions().len(), 3);

        touch_trio(&ds);
        assert!(ds.is_complete());
        assert_eq!(ds.count_variants().unwrap(), 1);

        fs::remove_file(ds.psam()).unwrap();
        assert!(ds.calls_exist());
        assert!(!ds.is_complete());

        assert_eq!(ds.remove().unwrap(), 2);
        assert!(!ds.calls_exist());
    }
}
