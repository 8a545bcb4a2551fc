use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Append-only line log. Concurrent appends are serialized on the file handle, so each
/// line lands whole.
pub struct LogFile {
    path: PathBuf,
    file: Mutex<File>,
}

impl LogFile {
    /// Deletes whatever sits at `path` and starts an empty log in its place.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<LogFile> {
        let path = path.as_ref().to_path_buf();

        match fs::remove_file(&path) {
            Ok(()) => debug!("removed previous log at {}", path.display()),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)?;
        info!("logging requests to {}", path.display());

        Ok(LogFile {
            path,
            file: Mutex::new(file),
        })
    }

    #[cfg(test)]
    pub(crate) fn from_file(path: PathBuf, file: File) -> LogFile {
        LogFile {
            path,
            file: Mutex::new(file),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, line: &str) -> io::Result<()> {
        let mut entry = String::with_capacity(line.len() + 1);
        entry.push_str(line);
        entry.push('\n');

        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(entry.as_bytes())
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Reads the persisted lines back, without their trailing newlines.
    pub fn entries(&self) -> io::Result<Vec<String>> {
        let contents = fs::read_to_string(&self.path)?;
        Ok(contents.lines().map(String::from).collect())
    }
}
