//! Jar container access.
//!
//! A jar is loaded whole into memory: archives under rewrite are build
//! artifacts, not multi-gigabyte inputs, and in-memory entries let the
//! rewriting layer stay a pure bytes-to-bytes transform.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, Write};
use std::path::Path;

use log::info;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::surgery::{Surgeon, SurgeryError};

#[derive(Debug)]
pub enum JarError {
    Io(io::Error),
    Zip(zip::result::ZipError),
}

impl fmt::Display for JarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JarError::Io(err) => write!(f, "jar io error: {err}"),
            JarError::Zip(err) => write!(f, "jar archive error: {err}"),
        }
    }
}

impl std::error::Error for JarError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JarError::Io(err) => Some(err),
            JarError::Zip(err) => Some(err),
        }
    }
}

impl From<io::Error> for JarError {
    fn from(err: io::Error) -> Self {
        JarError::Io(err)
    }
}

impl From<zip::result::ZipError> for JarError {
    fn from(err: zip::result::ZipError) -> Self {
        JarError::Zip(err)
    }
}

/// An in-memory jar, entries keyed by archive path.
#[derive(Default)]
pub struct JarFile {
    entries: BTreeMap<String, Vec<u8>>,
}

impl JarFile {
    pub fn new() -> JarFile {
        JarFile::default()
    }

    pub fn read_from(path: &Path) -> Result<JarFile, JarError> {
        JarFile::from_reader(File::open(path)?)
    }

    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<JarFile, JarError> {
        let mut archive = ZipArchive::new(reader)?;
        let mut entries = BTreeMap::new();
        for index in 0..archive.len() {
            let mut file = archive.by_index(index)?;
            if file.is_dir() {
                continue;
            }
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)?;
            entries.insert(file.name().to_string(), data);
        }
        Ok(JarFile { entries })
    }

    pub fn write_to(&self, path: &Path) -> Result<(), JarError> {
        self.to_writer(File::create(path)?)
    }

    pub fn to_writer<W: Write + Seek>(&self, writer: W) -> Result<(), JarError> {
        let mut zip = ZipWriter::new(writer);
        let options = SimpleFileOptions::default();
        for (name, data) in &self.entries {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(data)?;
        }
        zip.finish()?;
        Ok(())
    }

    pub fn entry(&self, name: &str) -> Option<&[u8]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    pub fn set_entry(&mut self, name: &str, data: Vec<u8>) {
        self.entries.insert(name.to_string(), data);
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries
            .iter()
            .map(|(name, data)| (name.as_str(), data.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Surgeon {
    /// Rewrite every `.class` entry the rule set targets, in place. Returns
    /// how many entries changed.
    pub fn rewrite_jar(&self, jar: &mut JarFile) -> Result<usize, SurgeryError> {
        let targeted: Vec<String> = jar
            .entries
            .keys()
            .filter(|name| name.ends_with(".class"))
            .cloned()
            .collect();

        let mut rewritten = 0;
        for entry_name in targeted {
            let Some(class_name) = entry_name.strip_suffix(".class") else {
                continue;
            };
            let Some(bytes) = jar.entries.get(&entry_name) else {
                continue;
            };
            if let Some(patched) = self.rewrite_class(class_name, bytes)? {
                info!("rewrote jar entry {entry_name}");
                jar.entries.insert(entry_name, patched);
                rewritten += 1;
            }
        }
        Ok(rewritten)
    }
}
