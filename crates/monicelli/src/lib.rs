//! Monicelli: compile syntax trees to stack bytecode and run the result.
//!
//! This crate re-exports the toolchain crates and holds the small amount of
//! file handling shared by the command-line driver.

use std::io::{self, Write};
use std::path::Path;

pub use monicelli_ast as ast;
pub use monicelli_bytecode as bytecode;
pub use monicelli_compiler as compiler;
pub use monicelli_vm as vm;

/// Extension given to artifacts when no output path is chosen.
pub const ARTIFACT_EXTENSION: &str = "mcbc";

/// Write `bytes` to `path` through a temporary file in the same directory.
///
/// Readers of `path` see either the previous contents or the complete
/// artifact, never a partial write.
pub fn write_artifact(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Character index of a 1-based `line`/`column` position in `source`.
///
/// Report spans count characters, not bytes. A column past the end of its
/// line maps to the line's end; a line past the end of the text yields `None`.
pub fn source_offset(source: &str, line: u32, column: u32) -> Option<usize> {
    if line == 0 {
        return None;
    }
    let mut lines = source.split('\n');
    let mut start = 0;
    for _ in 1..line {
        start += lines.next()?.chars().count() + 1;
    }
    let text = lines.next()?;
    let column = column.saturating_sub(1) as usize;
    Some(start + column.min(text.chars().count()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_offset() {
        let source = "first\nsecond line\nthird";
        assert_eq!(source_offset(source, 1, 1), Some(0));
        assert_eq!(source_offset(source, 2, 1), Some(6));
        assert_eq!(source_offset(source, 2, 8), Some(13));
        assert_eq!(source_offset(source, 3, 99), Some(source.len()));
        assert_eq!(source_offset(source, 4, 1), None);
        assert_eq!(source_offset(source, 0, 1), None);
    }

    #[test]
    fn test_source_offset_counts_characters() {
        let source = "però x\nè y";
        assert_eq!(source_offset(source, 1, 6), Some(5));
        assert_eq!(source_offset(source, 2, 3), Some(9));
        assert_eq!(source_offset(source, 2, 9), Some(source.chars().count()));
    }

    #[test]
    fn test_write_artifact_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Main.mcbc");
        std::fs::write(&path, b"old").unwrap();
        write_artifact(&path, b"MCBC new").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"MCBC new");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
