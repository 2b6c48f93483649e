// source.rs — kernel source loading.
//
// The kernel is an input to the pipeline, not part of it: the device
// program is supplied as WGSL text and compiled at context construction.
// This module owns the "get the text" step. Three ways in:
//
//   KernelSource::from_path(..)   — read a .wgsl file (the normal route)
//   KernelSource::from_string(..) — text already in memory (tests, codegen)
//   KernelSource::builtin()       — the reference tracer embedded in the
//                                   binary via include_str!
//
// A missing or unreadable file is a configuration error, not a panic —
// the caller gets a `SourceRead` with the path attached.

use std::fs;
use std::path::Path;

use crate::error::TraceError;

/// Reference tracer kernel shipped with the crate. See
/// `src/shaders/token_trace.wgsl` for the binding contract.
const BUILTIN_KERNEL: &str = include_str!("shaders/token_trace.wgsl");

/// Owned kernel source text plus a label for logs and build diagnostics.
#[derive(Debug, Clone)]
pub struct KernelSource {
    text: String,
    label: String,
}

impl KernelSource {
    /// Read kernel source from a file.
    ///
    /// The whole file is pulled into an owned `String`; the context keeps
    /// it alive for its own lifetime so build diagnostics can quote it.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| TraceError::SourceRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(KernelSource {
            text,
            label: path.display().to_string(),
        })
    }

    /// Wrap in-memory kernel text. `label` appears in logs and wgpu
    /// object labels in place of a file name.
    pub fn from_string(text: impl Into<String>, label: impl Into<String>) -> Self {
        KernelSource {
            text: text.into(),
            label: label.into(),
        }
    }

    /// The reference tracer kernel embedded in this crate.
    pub fn builtin() -> Self {
        KernelSource {
            text: BUILTIN_KERNEL.to_string(),
            label: "builtin:token_trace.wgsl".to_string(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_path_reads_exact_contents() {
        let mut path = std::env::temp_dir();
        path.push("token_trace_source_test.wgsl");
        let contents = "@compute @workgroup_size(64)\nfn token_trace() {}\n";
        {
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(contents.as_bytes()).unwrap();
        }

        let src = KernelSource::from_path(&path).unwrap();
        assert_eq!(src.text(), contents);
        assert!(src.label().contains("token_trace_source_test.wgsl"));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_from_path_missing_file_is_source_read() {
        let err = KernelSource::from_path("/definitely/not/here.wgsl").unwrap_err();
        match &err {
            TraceError::SourceRead { path, .. } => {
                assert!(path.ends_with("here.wgsl"));
            }
            other => panic!("expected SourceRead, got {other:?}"),
        }
    }

    #[test]
    fn test_builtin_is_nonempty_and_names_entry_point() {
        let src = KernelSource::builtin();
        assert!(src.text().contains("fn token_trace"));
        assert!(src.text().contains("@workgroup_size(64"));
    }

    #[test]
    fn test_from_string_label() {
        let src = KernelSource::from_string("fn token_trace() {}", "inline-stub");
        assert_eq!(src.label(), "inline-stub");
        assert_eq!(src.text(), "fn token_trace() {}");
    }
}
