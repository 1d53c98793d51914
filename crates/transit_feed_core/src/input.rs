use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use zip::result::ZipError;
use zip::ZipArchive;

use crate::problems::Problem;

#[derive(Debug, thiserror::Error)]
pub enum FeedInputError {
    #[error("feed not found: {0}")]
    NotFound(PathBuf),
    #[error("unknown feed format: {0}")]
    UnknownFormat(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] ZipError),
}

impl FeedInputError {
    /// The problem a loader reports when the container itself is unusable.
    pub fn to_problem(&self, feed_name: &str) -> Problem {
        match self {
            FeedInputError::NotFound(_) => Problem::feed_not_found(feed_name),
            FeedInputError::UnknownFormat(_) | FeedInputError::Zip(_) => {
                Problem::unknown_format(feed_name)
            }
            FeedInputError::Io(err) => {
                Problem::other(format!("Couldn't read feed {feed_name}: {err}"))
            }
        }
    }
}

/// A feed container: a directory, a zip archive, or a set of in-memory tables.
pub enum FeedInput {
    Directory(PathBuf),
    Zip {
        name: String,
        archive: ZipArchive<Cursor<Vec<u8>>>,
    },
    Memory(BTreeMap<String, Vec<u8>>),
}

impl FeedInput {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FeedInputError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FeedInputError::NotFound(path.to_path_buf()));
        }
        if path.is_dir() {
            return Ok(FeedInput::Directory(path.to_path_buf()));
        }
        if path.is_file() {
            let mut bytes = Vec::new();
            File::open(path)?.read_to_end(&mut bytes)?;
            return Self::from_zip_bytes(path.display().to_string(), bytes)
                .map_err(|_| FeedInputError::UnknownFormat(path.to_path_buf()));
        }
        Err(FeedInputError::UnknownFormat(path.to_path_buf()))
    }

    pub fn from_zip_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, FeedInputError> {
        let archive = ZipArchive::new(Cursor::new(bytes))?;
        Ok(FeedInput::Zip {
            name: name.into(),
            archive,
        })
    }

    pub fn from_tables<I, N, B>(tables: I) -> Self
    where
        I: IntoIterator<Item = (N, B)>,
        N: Into<String>,
        B: Into<Vec<u8>>,
    {
        FeedInput::Memory(
            tables
                .into_iter()
                .map(|(name, bytes)| (name.into(), bytes.into()))
                .collect(),
        )
    }

    pub fn display_name(&self) -> String {
        match self {
            FeedInput::Directory(path) => path.display().to_string(),
            FeedInput::Zip { name, .. } => name.clone(),
            FeedInput::Memory(_) => "<memory>".to_string(),
        }
    }

    /// Names of all entries, including ones the engine does not recognize.
    pub fn file_names(&self) -> Result<Vec<String>, FeedInputError> {
        match self {
            FeedInput::Directory(path) => {
                let mut names = Vec::new();
                for entry in fs::read_dir(path)? {
                    names.push(entry?.file_name().to_string_lossy().into_owned());
                }
                names.sort();
                Ok(names)
            }
            FeedInput::Zip { archive, .. } => {
                Ok(archive.file_names().map(str::to_string).collect())
            }
            FeedInput::Memory(tables) => Ok(tables.keys().cloned().collect()),
        }
    }

    pub fn has_file(&self, name: &str) -> bool {
        match self {
            FeedInput::Directory(path) => path.join(name).is_file(),
            FeedInput::Zip { archive, .. } => archive.file_names().any(|entry| entry == name),
            FeedInput::Memory(tables) => tables.contains_key(name),
        }
    }

    /// Raw bytes of `name`, or `None` when the container has no such table.
    pub fn read_file(&mut self, name: &str) -> Result<Option<Vec<u8>>, FeedInputError> {
        match self {
            FeedInput::Directory(path) => {
                let file_path = path.join(name);
                if !file_path.is_file() {
                    return Ok(None);
                }
                Ok(Some(fs::read(file_path)?))
            }
            FeedInput::Zip { archive, .. } => {
                let mut file = match archive.by_name(name) {
                    Ok(file) => file,
                    Err(ZipError::FileNotFound) => return Ok(None),
                    Err(err) => return Err(err.into()),
                };
                let mut bytes = Vec::new();
                file.read_to_end(&mut bytes)?;
                Ok(Some(bytes))
            }
            FeedInput::Memory(tables) => Ok(tables.get(name).cloned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn missing_path_is_not_found() {
        let err = FeedInput::open("/definitely/not/a/feed.zip")
            .err()
            .expect("missing feed");
        assert!(matches!(err, FeedInputError::NotFound(_)));
        let problem = err.to_problem("feed.zip");
        assert_eq!(problem.message, "Couldn't find a feed named feed.zip");
    }

    #[test]
    fn garbage_file_is_unknown_format() {
        let path = temp_path("garbage.zip");
        fs::write(&path, b"this is not a zip").expect("write file");
        let err = FeedInput::open(&path).err().expect("bad zip");
        assert!(matches!(err, FeedInputError::UnknownFormat(_)));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn reads_tables_from_zip() {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            let options = zip::write::FileOptions::default();
            writer.start_file("agency.txt", options).expect("start");
            writer.write_all(b"agency_name\nDemo\n").expect("write");
            writer.finish().expect("finish");
        }
        let mut input =
            FeedInput::from_zip_bytes("demo.zip", buffer.into_inner()).expect("zip input");
        assert_eq!(input.file_names().unwrap(), vec!["agency.txt".to_string()]);
        assert!(input.has_file("agency.txt"));
        assert_eq!(
            input.read_file("agency.txt").unwrap().as_deref(),
            Some(&b"agency_name\nDemo\n"[..])
        );
        assert!(input.read_file("stops.txt").unwrap().is_none());
    }

    fn temp_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("input_{}_{}_{}", std::process::id(), nanos, name))
    }
}
