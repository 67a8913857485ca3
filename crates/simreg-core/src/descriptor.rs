//! Project and core descriptors.
//!
//! Descriptors are parsed from declarative JSON files at discovery time and
//! validated into typed values before anything else sees them. Unknown fields
//! in the files are ignored; a missing required field or a malformed address
//! rejects the whole descriptor.

use crate::error::SchemaError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Core descriptor file name inside each core directory.
pub const CORE_FILE: &str = "core.json";

/// Optional project descriptor file name inside each project directory.
pub const PROJECT_FILE: &str = "project.json";

/// A buildable firmware project discovered in the workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectDescriptor {
    /// Project name (directory name).
    pub name: String,

    /// Project source directory.
    pub dir: PathBuf,

    /// Declared target triple; `None` means the toolchain default applies.
    pub target: Option<String>,
}

/// Memory layout of a core's addressable RAM.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryLayout {
    /// First addressable byte.
    pub base_address: u32,

    /// RAM size in bytes.
    pub size_bytes: u32,

    /// Word size in bytes (width of one memory-image line).
    pub word_size: u32,
}

impl MemoryLayout {
    /// One past the last addressable RAM byte.
    pub fn end_address(&self) -> u64 {
        u64::from(self.base_address) + u64::from(self.size_bytes)
    }

    /// Whether `addr` falls inside the RAM region.
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.base_address && u64::from(addr) < self.end_address()
    }
}

/// A pluggable soft-core CPU model plus its memory and IO layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoreDescriptor {
    /// Core name (directory name).
    pub name: String,

    /// Human-readable description.
    pub description: String,

    /// Core directory holding the HDL sources.
    pub dir: PathBuf,

    /// HDL source files, relative to the core directory.
    pub verilog_files: Vec<PathBuf>,

    /// Simulator backend identifier (e.g. "iverilog").
    pub simulator: String,

    /// Addressable RAM layout.
    pub memory: MemoryLayout,

    /// Write-triggered single-byte output register address.
    pub uart_base: u32,
}

// Raw file schemas. Serde's default behavior gives the required policy:
// unknown fields are ignored, missing required fields fail the parse.

#[derive(Debug, Deserialize)]
struct RawCoreFile {
    name: String,
    #[serde(default)]
    description: String,
    verilog_files: Vec<PathBuf>,
    simulator: String,
    memory: RawMemory,
    uart: RawUart,
}

#[derive(Debug, Deserialize)]
struct RawMemory {
    base_address: String,
    size: String,
    #[serde(default = "default_word_size")]
    word_size: u32,
}

#[derive(Debug, Deserialize)]
struct RawUart {
    base_address: String,
}

#[derive(Debug, Deserialize)]
struct RawProjectFile {
    #[serde(default)]
    target: Option<String>,
}

fn default_word_size() -> u32 {
    4
}

/// Parse a `"0x…"` hex address literal.
pub fn parse_address(file: &str, value: &str) -> Result<u32, SchemaError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| SchemaError::BadAddress {
            file: file.to_string(),
            value: value.to_string(),
        })?;
    u32::from_str_radix(digits, 16).map_err(|_| SchemaError::BadAddress {
        file: file.to_string(),
        value: value.to_string(),
    })
}

/// Parse a `"64K"`-style size literal into bytes.
///
/// Accepts a decimal byte count with an optional K/M/G binary suffix,
/// case-insensitive.
pub fn parse_size(file: &str, value: &str) -> Result<u32, SchemaError> {
    let bad = || SchemaError::BadSize {
        file: file.to_string(),
        value: value.to_string(),
    };

    let trimmed = value.trim();
    let (digits, multiplier) = match trimmed.chars().last() {
        Some('k') | Some('K') => (&trimmed[..trimmed.len() - 1], 1u64 << 10),
        Some('m') | Some('M') => (&trimmed[..trimmed.len() - 1], 1u64 << 20),
        Some('g') | Some('G') => (&trimmed[..trimmed.len() - 1], 1u64 << 30),
        Some(c) if c.is_ascii_digit() => (trimmed, 1u64),
        _ => return Err(bad()),
    };

    let count: u64 = digits.parse().map_err(|_| bad())?;
    let bytes = count.checked_mul(multiplier).ok_or_else(bad)?;
    u32::try_from(bytes).map_err(|_| bad())
}

impl CoreDescriptor {
    /// Parse and validate one core descriptor file.
    ///
    /// `dir` is the core directory; its name becomes the canonical core name
    /// regardless of the `name` field in the file.
    pub fn parse(dir: &Path, contents: &str) -> Result<Self, SchemaError> {
        let file = dir.join(CORE_FILE).display().to_string();
        let raw: RawCoreFile =
            serde_json::from_str(contents).map_err(|e| SchemaError::Malformed {
                file: file.clone(),
                message: e.to_string(),
            })?;

        if raw.verilog_files.is_empty() {
            return Err(SchemaError::Malformed {
                file,
                message: "verilog_files must not be empty".to_string(),
            });
        }

        if !matches!(raw.memory.word_size, 1 | 2 | 4 | 8) {
            return Err(SchemaError::BadWordSize {
                file,
                word_size: raw.memory.word_size,
            });
        }

        let memory = MemoryLayout {
            base_address: parse_address(&file, &raw.memory.base_address)?,
            size_bytes: parse_size(&file, &raw.memory.size)?,
            word_size: raw.memory.word_size,
        };
        let uart_base = parse_address(&file, &raw.uart.base_address)?;

        // The UART register is memory-mapped IO; it must sit outside RAM or
        // firmware stores to it would silently land in backing memory.
        if memory.contains(uart_base) {
            return Err(SchemaError::UartOverlapsRam {
                file,
                uart: uart_base,
                base: memory.base_address,
                end: memory.end_address(),
            });
        }

        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(raw.name);

        Ok(Self {
            name,
            description: raw.description,
            dir: dir.to_path_buf(),
            verilog_files: raw.verilog_files,
            simulator: raw.simulator,
            memory,
            uart_base,
        })
    }
}

impl ProjectDescriptor {
    /// Build a project descriptor for `dir`, reading `project.json` when
    /// present. A missing file yields a descriptor with defaults.
    pub fn parse(dir: &Path, contents: Option<&str>) -> Result<Self, SchemaError> {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let target = match contents {
            Some(text) => {
                let file = dir.join(PROJECT_FILE).display().to_string();
                let raw: RawProjectFile =
                    serde_json::from_str(text).map_err(|e| SchemaError::Malformed {
                        file,
                        message: e.to_string(),
                    })?;
                raw.target
            }
            None => None,
        };

        Ok(Self {
            name,
            dir: dir.to_path_buf(),
            target,
        })
    }
}
