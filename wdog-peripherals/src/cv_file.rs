//! Configuration storage for host runs. The persistent slice of the
//! table lives in a small file; everything else starts from defaults on
//! every open, the same split an EEPROM-backed table has.

use log::{info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use wdog_core::constants::cv;
use wdog_core::cv::{persisted, CvStore, DEFAULTS};

pub struct FileCvStore {
    path: PathBuf,
    values: [u8; cv::TABLE_SIZE],
}

impl FileCvStore {
    /// Loads the stored table, keeping only the variables that are meant
    /// to survive a restart. A missing or malformed file means defaults.
    pub fn open(path: &Path) -> io::Result<FileCvStore> {
        let mut values = DEFAULTS;
        match fs::read(path) {
            Ok(saved) if saved.len() == cv::TABLE_SIZE => {
                for (index, value) in saved.iter().enumerate() {
                    if persisted(index) {
                        values[index] = *value;
                    }
                }
            }
            Ok(_) => warn!("ignoring malformed table in {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("no stored table, starting from defaults");
            }
            Err(e) => return Err(e),
        }
        Ok(FileCvStore {
            path: path.to_path_buf(),
            values,
        })
    }

    fn flush(&self) {
        if let Err(e) = fs::write(&self.path, &self.values) {
            warn!("could not save table to {}: {}", self.path.display(), e);
        }
    }
}

impl CvStore for FileCvStore {
    fn read(&self, index: usize) -> u8 {
        self.values[index]
    }

    fn write(&mut self, index: usize, value: u8) {
        self.values[index] = value;
        if persisted(index) {
            self.flush();
        }
    }

    fn restore_defaults(&mut self) {
        self.values = DEFAULTS;
        self.flush();
        info!("restored factory defaults");
    }
}

#[cfg(test)]
mod cv_file_tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("wdog-cv-{}-{}", name, std::process::id()));
        let _ = fs::remove_file(&path);
        path
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = scratch("missing");
        let store = FileCvStore::open(&path).unwrap();
        assert_eq!(store.read(cv::ADDR_LOW), DEFAULTS[cv::ADDR_LOW]);
    }

    #[test]
    fn persisted_writes_survive_a_reopen() {
        let path = scratch("persist");
        {
            let mut store = FileCvStore::open(&path).unwrap();
            store.write(cv::ADDR_LOW, 17);
        }
        let store = FileCvStore::open(&path).unwrap();
        assert_eq!(store.read(cv::ADDR_LOW), 17);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn volatile_writes_reset_on_reopen() {
        let path = scratch("volatile");
        {
            let mut store = FileCvStore::open(&path).unwrap();
            store.write(cv::SEARCH, 1);
            store.write(cv::ADDR_LOW, 5); // force a flush
        }
        let store = FileCvStore::open(&path).unwrap();
        assert_eq!(store.read(cv::SEARCH), 0);
        assert_eq!(store.read(cv::ADDR_LOW), 5);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn restore_defaults_wipes_the_file_too() {
        let path = scratch("restore");
        {
            let mut store = FileCvStore::open(&path).unwrap();
            store.write(cv::ADDR_LOW, 17);
            store.restore_defaults();
        }
        let store = FileCvStore::open(&path).unwrap();
        assert_eq!(store.read(cv::ADDR_LOW), DEFAULTS[cv::ADDR_LOW]);
        let _ = fs::remove_file(&path);
    }
}
