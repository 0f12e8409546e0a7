use flate2::read::GzDecoder;

use std::{fs::File, io::Read, path::Path};

/// Input file descriptor, gzip aware
pub enum FileDescriptor {
    Plain(File),
    Gzip(GzDecoder<File>),
}

impl Read for FileDescriptor {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(r) => r.read(buf),
            Self::Gzip(r) => r.read(buf),
        }
    }
}

impl FileDescriptor {
    pub fn open(path: &Path, gzip: bool) -> std::io::Result<Self> {
        let fd = File::open(path)?;

        if gzip {
            Ok(Self::Gzip(GzDecoder::new(fd)))
        } else {
            Ok(Self::Plain(fd))
        }
    }
}
