/// Encoding Converter
///
/// Transcodes the text of a file between legacy code pages and Unicode. For
/// DBF files only the data region is transcoded: the header (whose length is
/// stored at offset 8) passes through byte-for-byte so field descriptors stay
/// valid.
///
/// Decoding is strict first. If the source bytes are not valid in the source
/// code page, or the text cannot be represented in the target code page, the
/// conversion falls back to a lossy pass with placeholder characters and logs
/// a warning. The report says whether that happened.
///
/// # Examples
///
/// ```
/// use dbf_commander::codepage::{transcode, Codepage};
///
/// let latin = [b'S', b'\xE3', b'o'];
/// let out = transcode(&latin, Codepage::Latin1, Codepage::Utf8);
/// assert_eq!(out.bytes, "São".as_bytes());
/// assert!(!out.lossy);
/// ```

use crate::backup::{create_backup, write_atomically};
use crate::dbf::{header_length, is_dbf_path};
use crate::error::ConversionError;
use encoding::all::{ISO_8859_1, UTF_8, WINDOWS_1252};
use encoding::{DecoderTrap, EncoderTrap, EncodingRef};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Bytes that Windows-1252 leaves unassigned
const CP1252_UNASSIGNED: [u8; 5] = [0x81, 0x8D, 0x8F, 0x90, 0x9D];

/// Code page 437 (original IBM PC), bytes 0x80..=0xFF
const CP437_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å',
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ',
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»',
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐',
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧',
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀',
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩',
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{00A0}',
];

/// Supported code pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codepage {
    /// Windows ANSI (Western European)
    Cp1252,
    /// DOS OEM (US)
    Cp437,
    Utf8,
    /// ISO-8859-1
    Latin1,
}

impl Codepage {
    pub const ALL: [Codepage; 4] = [Codepage::Cp1252, Codepage::Cp437, Codepage::Utf8, Codepage::Latin1];

    pub fn label(&self) -> &'static str {
        match self {
            Codepage::Cp1252 => "cp1252",
            Codepage::Cp437 => "cp437",
            Codepage::Utf8 => "utf-8",
            Codepage::Latin1 => "latin1",
        }
    }

    /// Code page named by a DBF header's language driver byte (offset 29)
    pub fn from_language_driver(byte: u8) -> Option<Codepage> {
        match byte {
            0x01 => Some(Codepage::Cp437),
            0x03 | 0x57 => Some(Codepage::Cp1252),
            0xF0 => Some(Codepage::Utf8),
            _ => None,
        }
    }

    /// Code page DBF records are stored in. DBF has no Latin-1 mark, so
    /// Latin-1 tables are kept as cp1252, its superset for printable text.
    pub fn for_records(&self) -> Codepage {
        match self {
            Codepage::Latin1 => Codepage::Cp1252,
            cp => *cp,
        }
    }

    /// Byte length of `text` once encoded, if every character is representable
    pub fn encoded_len(&self, text: &str) -> Result<usize, String> {
        if text.is_ascii() {
            return Ok(text.len());
        }
        self.encode(text).map(|bytes| bytes.len())
    }

    fn table(&self) -> Option<EncodingRef> {
        match self {
            Codepage::Cp1252 => Some(WINDOWS_1252),
            Codepage::Utf8 => Some(UTF_8),
            Codepage::Latin1 => Some(ISO_8859_1),
            Codepage::Cp437 => None,
        }
    }

    /// Strict decode; fails on any byte sequence the code page does not define
    pub fn decode(&self, bytes: &[u8]) -> Result<String, String> {
        if *self == Codepage::Cp1252 {
            if let Some(pos) = bytes.iter().position(|b| CP1252_UNASSIGNED.contains(b)) {
                return Err(format!("byte 0x{:02X} at position {} is undefined in cp1252", bytes[pos], pos));
            }
        }
        match self.table() {
            Some(enc) => enc.decode(bytes, DecoderTrap::Strict).map_err(|e| e.into_owned()),
            None => Ok(decode_cp437(bytes)),
        }
    }

    /// Decode replacing undefined sequences with U+FFFD
    pub fn decode_lossy(&self, bytes: &[u8]) -> String {
        match self.table() {
            Some(enc) => {
                let text = enc
                    .decode(bytes, DecoderTrap::Replace)
                    .unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned());
                if *self == Codepage::Cp1252 {
                    text.chars()
                        .map(|c| if is_cp1252_hole(c) { '\u{FFFD}' } else { c })
                        .collect()
                } else {
                    text
                }
            }
            None => decode_cp437(bytes),
        }
    }

    /// Strict encode; fails on any character the code page cannot represent
    pub fn encode(&self, text: &str) -> Result<Vec<u8>, String> {
        if *self == Codepage::Cp1252 {
            if let Some(c) = text.chars().find(|&c| is_cp1252_hole(c)) {
                return Err(format!("character U+{:04X} cannot be encoded in cp1252", c as u32));
            }
        }
        match self.table() {
            Some(enc) => enc.encode(text, EncoderTrap::Strict).map_err(|e| e.into_owned()),
            None => encode_cp437(text, None),
        }
    }

    /// Encode replacing unrepresentable characters with '?'
    pub fn encode_lossy(&self, text: &str) -> Vec<u8> {
        match self.table() {
            Some(enc) => {
                let cleaned: String = if *self == Codepage::Cp1252 {
                    text.chars().map(|c| if is_cp1252_hole(c) { '?' } else { c }).collect()
                } else {
                    text.to_string()
                };
                enc.encode(&cleaned, EncoderTrap::Replace)
                    .unwrap_or_else(|_| cleaned.bytes().map(|b| if b.is_ascii() { b } else { b'?' }).collect())
            }
            None => encode_cp437(text, Some(b'?')).unwrap_or_default(),
        }
    }
}

fn is_cp1252_hole(c: char) -> bool {
    (c as u32) < 0x100 && CP1252_UNASSIGNED.contains(&(c as u32 as u8))
}

fn decode_cp437(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if b < 0x80 { b as char } else { CP437_HIGH[(b - 0x80) as usize] })
        .collect()
}

fn encode_cp437(text: &str, replacement: Option<u8>) -> Result<Vec<u8>, String> {
    text.chars()
        .map(|c| {
            if c.is_ascii() {
                return Ok(c as u8);
            }
            match CP437_HIGH.iter().position(|&h| h == c) {
                Some(pos) => Ok(0x80 + pos as u8),
                None => replacement.ok_or_else(|| format!("character U+{:04X} cannot be encoded in cp437", c as u32)),
            }
        })
        .collect()
}

impl fmt::Display for Codepage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Codepage {
    type Err = ConversionError;

    /// Accepts the code page names and the ANSI/OEM aliases
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "cp1252" | "windows-1252" | "ansi" => Ok(Codepage::Cp1252),
            "cp437" | "ibm437" | "oem" | "dos" => Ok(Codepage::Cp437),
            "utf8" | "utf-8" => Ok(Codepage::Utf8),
            "latin1" | "latin-1" | "iso-8859-1" | "iso8859-1" => Ok(Codepage::Latin1),
            _ => Err(ConversionError::UnknownCodepage(s.to_string())),
        }
    }
}

/// Result of transcoding a byte region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcoded {
    pub bytes: Vec<u8>,
    /// True if any placeholder was substituted while decoding or encoding
    pub lossy: bool,
}

/// Transcodes `data` from one code page to another.
pub fn transcode(data: &[u8], from: Codepage, to: Codepage) -> Transcoded {
    let (text, lossy_decode) = match from.decode(data) {
        Ok(text) => (text, false),
        Err(reason) => {
            warn!("Strict {} decode failed ({}); falling back to lossy decoding", from, reason);
            (from.decode_lossy(data), true)
        }
    };
    let (bytes, lossy_encode) = match to.encode(&text) {
        Ok(bytes) => (bytes, false),
        Err(reason) => {
            warn!("Strict {} encode failed ({}); unrepresentable characters replaced", to, reason);
            (to.encode_lossy(&text), true)
        }
    };
    Transcoded {
        bytes,
        lossy: lossy_decode || lossy_encode,
    }
}

/// Transcodes a whole file image, keeping a DBF header intact.
///
/// Returns the new image and the number of leading bytes passed through.
pub fn transcode_file_bytes(
    content: &[u8],
    is_dbf: bool,
    from: Codepage,
    to: Codepage,
) -> Result<(Vec<u8>, usize, bool), ConversionError> {
    let header_len = if is_dbf {
        header_length(content).map_err(ConversionError::InvalidHeader)?
    } else {
        0
    };

    let (header, data) = content.split_at(header_len);
    let converted = transcode(data, from, to);
    if is_dbf && converted.bytes.len() != data.len() {
        warn!(
            "Data region changed from {} to {} bytes; fixed-width records no longer line up",
            data.len(),
            converted.bytes.len()
        );
    }

    let mut out = Vec::with_capacity(header.len() + converted.bytes.len());
    out.extend_from_slice(header);
    out.extend_from_slice(&converted.bytes);
    Ok((out, header_len, converted.lossy))
}

/// Outcome of a file conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionReport {
    pub path: PathBuf,
    pub backup: Option<PathBuf>,
    pub from: Codepage,
    pub to: Codepage,
    /// Bytes passed through untouched (the DBF header; 0 for other files)
    pub header_length: usize,
    pub bytes_before: usize,
    pub bytes_after: usize,
    pub lossy: bool,
}

/// Converts the file at `path` in place from `from` to `to`.
///
/// With `backup`, the file is first copied to a timestamped backup; if that
/// copy fails nothing is converted.
pub fn convert(path: &Path, from: Codepage, to: Codepage, backup: bool) -> Result<ConversionReport, ConversionError> {
    if !path.exists() {
        return Err(ConversionError::FileNotFound(path.to_path_buf()));
    }

    let content = std::fs::read(path)?;
    let is_dbf = is_dbf_path(path);
    let (converted, header_len, lossy) = transcode_file_bytes(&content, is_dbf, from, to)?;

    let backup_path = if backup {
        Some(create_backup(path).map_err(ConversionError::Backup)?)
    } else {
        None
    };

    write_atomically::<_, ConversionError>(path, |file| Ok(file.write_all(&converted)?))?;
    info!("Converted {} from {} to {}", path.display(), from, to);

    Ok(ConversionReport {
        path: path.to_path_buf(),
        backup: backup_path,
        from,
        to,
        header_length: header_len,
        bytes_before: content.len(),
        bytes_after: converted.len(),
        lossy,
    })
}

/// Guesses the code page of a file.
///
/// Tries UTF-8, then cp1252, then cp437 strictly and returns the first that
/// decodes cleanly. For DBF files only the data region is examined.
pub fn detect_encoding(path: &Path) -> Result<Codepage, ConversionError> {
    if !path.exists() {
        return Err(ConversionError::FileNotFound(path.to_path_buf()));
    }
    let content = std::fs::read(path)?;
    let data = if is_dbf_path(path) {
        header_length(&content).map(|hl| &content[hl..]).unwrap_or(&content[..])
    } else {
        &content[..]
    };
    Ok(detect_codepage(data))
}

/// Detection over raw bytes; falls back to latin1, which decodes anything
pub fn detect_codepage(data: &[u8]) -> Codepage {
    [Codepage::Utf8, Codepage::Cp1252, Codepage::Cp437]
        .into_iter()
        .find(|cp| cp.decode(data).is_ok())
        .unwrap_or(Codepage::Latin1)
}
