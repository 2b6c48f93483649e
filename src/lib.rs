// token-trace: GPU offload pipeline for row-parallel contour tracing.
//
// The crate is the orchestration layer around an externally supplied
// compute kernel: device acquisition, kernel build, buffer lifecycle,
// dispatch with profiling, and timed host↔device transfers. The tracing
// algorithm itself lives in the kernel (a reference WGSL implementation
// ships in src/shaders/); the host treats it as a named entry point with
// a fixed binding contract.
//
// Typical use: build a `TracePipeline` once per image geometry, then
// call `trace()` per frame, summing the returned `TimeProfile`s to
// benchmark across a sequence.

pub mod context;
pub mod error;
pub mod image;
pub mod pipeline;
pub mod profile;
pub mod source;
pub mod table;

pub use context::{AdapterInfo, ComputeContext};
pub use error::{ErrorKind, TraceError};
pub use image::{GrayImage, RgbImage};
pub use pipeline::{TraceGeometry, TracePipeline, KERNEL_ENTRY_POINT, WORK_GROUP_SIZE};
pub use profile::{CompletionToken, TimeProfile};
pub use source::KernelSource;
pub use table::{Contour, ContourTable, TableDecodeError};
