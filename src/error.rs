// error.rs — crate-wide error type.
//
// Failure policy: nothing in this crate terminates the process. Every
// setup fault (missing kernel source, no usable adapter, compile failure,
// bad geometry) and every runtime fault (transfer failure, dimension
// misuse) comes back as a `TraceError`, and the outermost caller decides
// whether to abort, retry, or fall back.
//
// Variants carry their diagnostics: `KernelBuild` keeps the driver's full
// build log, `SourceRead` keeps the path, `ShapeMismatch` keeps both sets
// of dimensions. `kind()` collapses the variants into the four coarse
// failure classes callers usually branch on.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Coarse failure classification.
///
/// `Configuration` and `DeviceBuild` faults mean the environment or the
/// kernel source is unusable — retrying the same call cannot succeed.
/// `Transfer` and `Dispatch` faults are per-call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Host-side setup fault: source file, adapter, device, or geometry.
    Configuration,
    /// The device rejected the kernel; the build log is attached.
    DeviceBuild,
    /// A host↔device buffer transfer failed.
    Transfer,
    /// Dimension misuse or argument-binding defect at dispatch time.
    Dispatch,
}

/// Errors from pipeline construction and trace execution.
#[derive(Debug)]
pub enum TraceError {
    /// No compute adapter was found on any backend.
    NoAdapter,
    /// The device request was rejected by the driver.
    DeviceRequest(wgpu::RequestDeviceError),
    /// The kernel source file could not be read.
    SourceRead { path: PathBuf, source: io::Error },
    /// Construction-time geometry is unusable (zero-sized image,
    /// contour table too narrow to hold a coordinate pair, ...).
    InvalidGeometry { detail: String },
    /// The kernel failed to compile or validate. `log` holds the
    /// driver's diagnostic output verbatim.
    KernelBuild { log: String },
    /// A blocking upload or download did not complete.
    Transfer { buffer: &'static str, detail: String },
    /// Host-side dimensions disagree with the pipeline's fixed geometry.
    /// Dimensions are `[width, height]`.
    ShapeMismatch {
        what: &'static str,
        expected: [u32; 2],
        actual: [u32; 2],
    },
}

impl TraceError {
    /// Map this error onto the coarse failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TraceError::NoAdapter
            | TraceError::DeviceRequest(_)
            | TraceError::SourceRead { .. }
            | TraceError::InvalidGeometry { .. } => ErrorKind::Configuration,
            TraceError::KernelBuild { .. } => ErrorKind::DeviceBuild,
            TraceError::Transfer { .. } => ErrorKind::Transfer,
            TraceError::ShapeMismatch { .. } => ErrorKind::Dispatch,
        }
    }
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceError::NoAdapter => write!(
                f,
                "no compute adapter found on any backend (check that a \
                 Vulkan/Metal/DX12 driver or a software rasterizer is installed)"
            ),
            TraceError::DeviceRequest(e) => write!(f, "device request failed: {e}"),
            TraceError::SourceRead { path, source } => {
                write!(f, "failed to read kernel source {}: {source}", path.display())
            }
            TraceError::InvalidGeometry { detail } => {
                write!(f, "invalid trace geometry: {detail}")
            }
            TraceError::KernelBuild { log } => {
                write!(f, "kernel build failed:\n{log}")
            }
            TraceError::Transfer { buffer, detail } => {
                write!(f, "transfer failed for {buffer} buffer: {detail}")
            }
            TraceError::ShapeMismatch { what, expected, actual } => write!(
                f,
                "{what} is {}x{}, pipeline was constructed for {}x{}",
                actual[0], actual[1], expected[0], expected[1]
            ),
        }
    }
}

impl std::error::Error for TraceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TraceError::DeviceRequest(e) => Some(e),
            TraceError::SourceRead { source, .. } => Some(source),
            _ => None,
        }
    }
}
