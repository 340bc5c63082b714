//! Host filesystem adapter over `std::fs`, rooted at the serving
//! directory.

use std::{
    fs,
    io::{self, Read, Seek, SeekFrom},
    path::PathBuf,
};

use tether_proto::{NetError, NodeType, OpenMode};
use tracing::debug;

use crate::{
    fs::FileInfo,
    serve::{HostDir, HostFile, HostFs, HostNode},
};

fn translate_io(e: &io::Error) -> NetError {
    match e.kind() {
        io::ErrorKind::NotFound => NetError::NotFound,
        io::ErrorKind::PermissionDenied => NetError::AccessDenied,
        io::ErrorKind::IsADirectory => NetError::NotAFile,
        _ => NetError::IoError,
    }
}

pub struct NativeFs {
    root: PathBuf,
}

impl NativeFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        if path.is_empty() { self.root.clone() } else { self.root.join(path) }
    }
}

impl HostFs for NativeFs {
    type File = NativeFile;
    type Dir = NativeDir;

    fn open(&mut self, path: &str, mode: OpenMode) -> Result<HostNode<NativeFile, NativeDir>, NetError> {
        let native = self.resolve(path);
        debug!("open \"{path}\" => \"{}\"", native.display());

        // A read-side open may name a directory; probe before opening.
        if !mode.contains(OpenMode::WRITE) {
            let meta = fs::metadata(&native).map_err(|_| NetError::NotFound)?;
            if meta.is_dir() {
                return Ok(HostNode::Dir(NativeDir { path: native, iter: None }));
            }
        }

        if !mode.intersects(OpenMode::READ | OpenMode::WRITE) {
            return Err(NetError::InvalidValue);
        }

        let mut opts = fs::OpenOptions::new();
        opts.read(mode.contains(OpenMode::READ));
        opts.write(mode.contains(OpenMode::WRITE));
        if mode.contains(OpenMode::CREATE) {
            opts.create(true);
        }
        let file = opts.open(&native).map_err(|e| translate_io(&e))?;
        let size = file.metadata().map_err(|e| translate_io(&e))?.len() as u32;
        Ok(HostNode::File(NativeFile { file, size }))
    }
}

pub struct NativeFile {
    file: fs::File,
    size: u32,
}

impl HostFile for NativeFile {
    fn size(&self) -> u32 {
        self.size
    }

    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize, NetError> {
        self.file.seek(SeekFrom::Start(u64::from(offset))).map_err(|e| translate_io(&e))?;
        self.file.read(buf).map_err(|e| translate_io(&e))
    }
}

pub struct NativeDir {
    path: PathBuf,
    iter: Option<fs::ReadDir>,
}

impl HostDir for NativeDir {
    fn rewind(&mut self) -> Result<(), NetError> {
        self.iter = None;
        Ok(())
    }

    fn next_entry(&mut self) -> Result<Option<FileInfo>, NetError> {
        let iter = match self.iter.as_mut() {
            Some(iter) => iter,
            None => {
                let fresh = fs::read_dir(&self.path).map_err(|e| translate_io(&e))?;
                self.iter.insert(fresh)
            }
        };
        match iter.next() {
            None => Ok(None),
            Some(Err(e)) => Err(translate_io(&e)),
            Some(Ok(entry)) => {
                let meta = entry.metadata().map_err(|e| translate_io(&e))?;
                Ok(Some(FileInfo {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    node_type: if meta.is_dir() { NodeType::Directory } else { NodeType::File },
                    size: meta.len() as u32,
                }))
            }
        }
    }
}
