//! Raw inputs: format dispatch, byte access and text decoding
use std::{
    io::Read,
    path::{Path, PathBuf},
    str::FromStr,
};

use log::debug;

pub mod fd;

use fd::FileDescriptor;

/// Known input formats
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FormatKind {
    Rinex,
    Nmea,
    Unknown,
}

impl std::fmt::Display for FormatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rinex => write!(f, "rinex"),
            Self::Nmea => write!(f, "nmea"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for FormatKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rinex" | "obs" => Ok(Self::Rinex),
            "nmea" => Ok(Self::Nmea),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown format \"{}\"", other)),
        }
    }
}

impl FormatKind {
    /// Infers the [FormatKind] from a file name. A `.gz` suffix is
    /// ignored, so is the case.
    pub fn from_filename(filename: &str) -> Self {
        let lowercase = filename.to_ascii_lowercase();
        let name = lowercase.strip_suffix(".gz").unwrap_or(&lowercase);

        let extension = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();

        match extension {
            "obs" | "rnx" => Self::Rinex,
            "nmea" => Self::Nmea,
            ext if is_rinex_v2_obs(ext) => Self::Rinex,
            _ => Self::Unknown,
        }
    }
}

/// RINEX V2 short observation extension: YYo
fn is_rinex_v2_obs(extension: &str) -> bool {
    let bytes = extension.as_bytes();
    bytes.len() == 3 && bytes[0].is_ascii_digit() && bytes[1].is_ascii_digit() && bytes[2] == b'o'
}

/// Supported text [Encoding]s
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Ascii,
    Latin1,
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Utf8 => write!(f, "utf-8"),
            Self::Ascii => write!(f, "ascii"),
            Self::Latin1 => write!(f, "latin1"),
        }
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "ascii" | "us-ascii" => Ok(Self::Ascii),
            "latin1" | "latin-1" | "iso-8859-1" => Ok(Self::Latin1),
            other => Err(format!("unsupported encoding \"{}\"", other)),
        }
    }
}

impl Encoding {
    /// Strict decoding
    pub fn decode(&self, bytes: &[u8]) -> Option<String> {
        match self {
            Self::Utf8 => std::str::from_utf8(bytes).ok().map(|s| s.to_string()),
            Self::Ascii => {
                if bytes.is_ascii() {
                    Some(bytes.iter().map(|b| *b as char).collect())
                } else {
                    None
                }
            },
            Self::Latin1 => Some(bytes.iter().map(|b| *b as char).collect()),
        }
    }
}

/// Decodes these bytes with the first [Encoding] that succeeds.
/// Falls back to UTF-8 with invalid sequences dropped, in which case
/// the returned [Encoding] is None.
pub fn decode(bytes: &[u8], encodings: &[Encoding]) -> (String, Option<Encoding>) {
    for encoding in encodings {
        if let Some(mut text) = encoding.decode(bytes) {
            if text.starts_with('\u{feff}') {
                text.remove(0);
            }
            return (text, Some(*encoding));
        }
    }

    let mut text = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
    }

    if text.starts_with('\u{feff}') {
        text.remove(0);
    }

    (text, None)
}

/// Reads and decodes an entire file
pub fn read_text(path: &Path, gzip: bool, encodings: &[Encoding]) -> std::io::Result<String> {
    let mut bytes = Vec::new();
    FileDescriptor::open(path, gzip)?.read_to_end(&mut bytes)?;

    let (text, encoding) = decode(&bytes, encodings);

    match encoding {
        Some(encoding) => debug!("{} - decoded as {}", path.display(), encoding),
        None => debug!(
            "{} - best effort decoding, invalid sequences dropped",
            path.display()
        ),
    }

    Ok(text)
}

/// Raw input handed over by the producer. Read only.
#[derive(Debug, Clone, PartialEq)]
pub struct RawInput {
    /// File location
    path: PathBuf,

    /// Declared (original) file name
    filename: String,

    /// [FormatKind]
    format: FormatKind,

    /// Gzip compressed content
    gzip: bool,

    /// Artifact name override
    stem: Option<String>,
}

impl RawInput {
    /// Creates a [RawInput], format is inferred from the file name.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        Self {
            format: FormatKind::from_filename(&filename),
            gzip: filename.to_ascii_lowercase().ends_with(".gz"),
            filename,
            path,
            stem: None,
        }
    }

    /// Copies and returns with declared file name, which drives format inference.
    pub fn with_filename(&self, filename: &str) -> Self {
        let mut s = self.clone();
        s.format = FormatKind::from_filename(filename);
        s.gzip = filename.to_ascii_lowercase().ends_with(".gz");
        s.filename = filename.to_string();
        s
    }

    /// Copies and returns with declared [FormatKind]
    pub fn with_format(&self, format: FormatKind) -> Self {
        let mut s = self.clone();
        s.format = format;
        s
    }

    /// Copies and returns with artifacts named after `stem`
    pub fn with_artifact_stem(&self, stem: &str) -> Self {
        let mut s = self.clone();
        s.stem = Some(stem.to_string());
        s
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn format(&self) -> FormatKind {
        self.format
    }

    pub fn is_gzip(&self) -> bool {
        self.gzip
    }

    /// Opens a new [FileDescriptor]
    pub fn open(&self) -> std::io::Result<FileDescriptor> {
        FileDescriptor::open(&self.path, self.gzip)
    }

    /// Decompressed bytes
    pub fn bytes(&self) -> std::io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.open()?.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Decoded text, see [decode]
    pub fn text(&self, encodings: &[Encoding]) -> std::io::Result<String> {
        read_text(&self.path, self.gzip, encodings)
    }

    /// File name without compression nor format extension
    pub fn basename(&self) -> String {
        let name = self.uncompressed_name();

        Path::new(name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| name.to_string())
    }

    /// File name without compression extension
    pub fn uncompressed_name(&self) -> &str {
        self.filename
            .strip_suffix(".gz")
            .or_else(|| self.filename.strip_suffix(".GZ"))
            .unwrap_or(&self.filename)
    }

    /// Artifacts are named after this stem, [Self::basename] by default
    pub fn artifact_stem(&self) -> String {
        self.stem.clone().unwrap_or_else(|| self.basename())
    }

    fn artifact_dir(&self, prefix: Option<&Path>) -> PathBuf {
        match prefix {
            Some(prefix) => prefix.to_path_buf(),
            None => self
                .path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_default(),
        }
    }

    /// Canonical artifact: `<basename>.jsonl`, never the input itself
    pub fn canonical_artifact(&self, prefix: Option<&Path>) -> PathBuf {
        let dir = self.artifact_dir(prefix);
        let basename = self.artifact_stem();

        let path = dir.join(format!("{}.jsonl", basename));

        if path == self.path {
            dir.join(format!("{}.canonical.jsonl", basename))
        } else {
            path
        }
    }

    /// Location artifact: `<basename>.location.jsonl`
    pub fn location_artifact(&self, prefix: Option<&Path>) -> PathBuf {
        let dir = self.artifact_dir(prefix);
        dir.join(format!("{}.location.jsonl", self.artifact_stem()))
    }
}
