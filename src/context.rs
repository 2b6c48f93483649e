// context.rs — the compute context: device acquisition, kernel build,
// and blocking buffer transfers.
//
// This is the base capability the trace pipeline is built on. It owns
// the wgpu instance, adapter, device, queue, and the compiled shader
// module, plus the kernel source text for the module's lifetime.
// Construction either returns a fully live context or an error with
// everything already released — there is no partially initialized state
// to observe.
//
// ADAPTER SELECTION
// ──────────────────
// Tiered: prefer a CPU-class adapter when one is exposed (a software
// rasterizer such as llvmpipe keeps the pipeline runnable on headless
// machines, and the tracing workload is small enough that this is the
// tuning target), otherwise take the first adapter of any type. Every
// enumerated adapter is logged so the selection is diagnosable.
//
// TRANSFER PRIMITIVES
// ────────────────────
// `upload_buffer` / `download_buffer` are the only host↔device data
// paths. Both block until the device has durably accepted/produced the
// bytes (submit + poll(Wait)) and both report a `CompletionToken`
// measured on the host clock — transfers have no device-side timestamp
// hook, unlike compute passes. They are `pub(crate)`: raw device buffer
// handles only mean something to the pipeline that allocated them with
// matching geometry, so the capability is not public API.

use std::borrow::Cow;
use std::sync::mpsc;

use crate::error::TraceError;
use crate::profile::{CompletionToken, HostSpan};
use crate::source::KernelSource;

/// Copy sizes and buffer sizes must be multiples of this (wgpu rule).
const COPY_ALIGNMENT: u64 = wgpu::COPY_BUFFER_ALIGNMENT;

/// Round `size` up to the next copy-alignment boundary.
pub(crate) fn align_copy_size(size: u64) -> u64 {
    (size + COPY_ALIGNMENT - 1) / COPY_ALIGNMENT * COPY_ALIGNMENT
}

/// Pad `data` with zeros up to copy alignment. Borrows when already
/// aligned; uploads see the padded length, the buffer tail stays zero.
pub(crate) fn pad_to_copy_alignment(data: &[u8]) -> Cow<'_, [u8]> {
    let padded = align_copy_size(data.len() as u64) as usize;
    if padded == data.len() {
        Cow::Borrowed(data)
    } else {
        let mut v = Vec::with_capacity(padded);
        v.extend_from_slice(data);
        v.resize(padded, 0);
        Cow::Owned(v)
    }
}

/// Adapter identity, cached for logs and error messages.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl std::fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.name, self.backend, self.device_type)
    }
}

/// A device storage buffer plus the logical byte size it was allocated
/// for. The underlying allocation is padded to copy alignment; transfer
/// bounds are checked against the logical size.
#[derive(Debug)]
pub(crate) struct DeviceBuffer {
    raw: wgpu::Buffer,
    /// Requested size in bytes (before padding). Uploads and downloads
    /// must fit within this.
    logical_size: u64,
    /// Name used in error messages and wgpu labels.
    label: &'static str,
}

impl DeviceBuffer {
    pub(crate) fn raw(&self) -> &wgpu::Buffer {
        &self.raw
    }
}

/// The compute context. Created once per pipeline; dropped with it.
///
/// # Field drop order
/// Rust drops fields in declaration order; `_instance` is declared last
/// so the `wgpu::Instance` outlives the device-level objects that
/// reference it.
#[derive(Debug)]
pub struct ComputeContext {
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    pub(crate) module: wgpu::ShaderModule,
    adapter_info: AdapterInfo,
    /// Owned kernel source, kept for the context's lifetime.
    source: KernelSource,
    /// Nanoseconds per device timestamp tick, when the adapter supports
    /// timestamp queries. `None` means kernel timing falls back to the
    /// host clock.
    timestamp_period: Option<f32>,
    _instance: wgpu::Instance,
}

impl ComputeContext {
    /// Acquire a device and build the kernel.
    ///
    /// # Errors
    /// - [`TraceError::NoAdapter`] — nothing to run on;
    /// - [`TraceError::DeviceRequest`] — the driver refused the device;
    /// - [`TraceError::KernelBuild`] — the kernel failed validation; the
    ///   error carries the driver's build log.
    pub fn new(source: KernelSource) -> Result<Self, TraceError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let mut adapters = instance.enumerate_adapters(wgpu::Backends::all());
        if adapters.is_empty() {
            return Err(TraceError::NoAdapter);
        }
        for a in &adapters {
            let info = a.get_info();
            tracing::debug!(
                name = %info.name,
                backend = ?info.backend,
                device_type = ?info.device_type,
                "enumerated adapter"
            );
        }

        // Tier 1: CPU-class. Tier 2: whatever comes first.
        let pick = adapters
            .iter()
            .position(|a| a.get_info().device_type == wgpu::DeviceType::Cpu)
            .unwrap_or(0);
        let adapter = adapters.swap_remove(pick);

        let raw_info = adapter.get_info();
        let adapter_info = AdapterInfo {
            name: raw_info.name,
            device_type: raw_info.device_type,
            backend: raw_info.backend,
        };
        tracing::info!(adapter = %adapter_info, "selected compute adapter");

        // Timestamp queries give device-side kernel timing; request the
        // feature only where the adapter offers it.
        let has_timestamps = adapter.features().contains(wgpu::Features::TIMESTAMP_QUERY);
        let required_features = if has_timestamps {
            wgpu::Features::TIMESTAMP_QUERY
        } else {
            tracing::info!("adapter lacks TIMESTAMP_QUERY; kernel timing uses the host clock");
            wgpu::Features::empty()
        };

        let (device, queue): (wgpu::Device, wgpu::Queue) = pollster::block_on(
            adapter.request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("token-trace"),
                    required_features,
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            ),
        )
        .map_err(TraceError::DeviceRequest)?;

        let timestamp_period = has_timestamps.then(|| queue.get_timestamp_period());

        // Build the kernel inside a validation error scope so compile
        // failures surface as a captured build log instead of an
        // uncaptured-error callback.
        tracing::debug!(kernel = source.label(), "building kernel");
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(source.label()),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source.text())),
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            let log = err.to_string();
            tracing::error!(kernel = source.label(), "kernel build failed:\n{log}");
            return Err(TraceError::KernelBuild { log });
        }
        tracing::debug!(kernel = source.label(), "kernel built");

        Ok(ComputeContext {
            device,
            queue,
            module,
            adapter_info,
            source,
            timestamp_period,
            _instance: instance,
        })
    }

    pub fn adapter_info(&self) -> &AdapterInfo {
        &self.adapter_info
    }

    /// Label of the kernel source this context was built from.
    pub fn kernel_label(&self) -> &str {
        self.source.label()
    }

    /// Nanoseconds per device timestamp tick, if timestamp queries are
    /// available.
    pub(crate) fn timestamp_period(&self) -> Option<f32> {
        self.timestamp_period
    }

    /// Allocate a zero-initialized storage buffer of `logical_size`
    /// bytes (padded internally to copy alignment).
    pub(crate) fn create_storage_buffer(
        &self,
        label: &'static str,
        logical_size: u64,
    ) -> DeviceBuffer {
        let raw = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: align_copy_size(logical_size),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        DeviceBuffer { raw, logical_size, label }
    }

    /// Allocate a uniform buffer initialized with `contents`.
    pub(crate) fn create_uniform_buffer(
        &self,
        label: &'static str,
        contents: &[u8],
    ) -> wgpu::Buffer {
        use wgpu::util::DeviceExt;
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage: wgpu::BufferUsages::UNIFORM,
        })
    }

    /// Blocking host→device write of `data` into `buffer`.
    ///
    /// Returns a host-clock completion token covering staging, submit,
    /// and the wait for the device to drain the queue.
    ///
    /// # Errors
    /// [`TraceError::Transfer`] if `data` exceeds the buffer's logical
    /// capacity.
    pub(crate) fn upload_buffer(
        &self,
        buffer: &DeviceBuffer,
        data: &[u8],
    ) -> Result<CompletionToken, TraceError> {
        if data.len() as u64 > buffer.logical_size {
            return Err(TraceError::Transfer {
                buffer: buffer.label,
                detail: format!(
                    "upload of {} bytes exceeds capacity {}",
                    data.len(),
                    buffer.logical_size
                ),
            });
        }
        tracing::trace!(buffer = buffer.label, bytes = data.len(), "upload");

        let span = HostSpan::begin();
        let padded = pad_to_copy_alignment(data);
        self.queue.write_buffer(buffer.raw(), 0, &padded);
        // write_buffer stages; an empty submit flushes it to the device.
        self.queue.submit(std::iter::empty::<wgpu::CommandBuffer>());
        self.device.poll(wgpu::Maintain::Wait);
        Ok(span.finish())
    }

    /// Blocking device→host read of `dst.len()` bytes from `buffer`.
    ///
    /// Returns a host-clock completion token covering the copy, map,
    /// and wait.
    ///
    /// # Errors
    /// [`TraceError::Transfer`] if `dst` exceeds the buffer's logical
    /// capacity or the readback map fails.
    pub(crate) fn download_buffer(
        &self,
        buffer: &DeviceBuffer,
        dst: &mut [u8],
    ) -> Result<CompletionToken, TraceError> {
        if dst.len() as u64 > buffer.logical_size {
            return Err(TraceError::Transfer {
                buffer: buffer.label,
                detail: format!(
                    "download of {} bytes exceeds capacity {}",
                    dst.len(),
                    buffer.logical_size
                ),
            });
        }
        tracing::trace!(buffer = buffer.label, bytes = dst.len(), "download");

        let span = HostSpan::begin();
        let copy_size = align_copy_size(dst.len() as u64);
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("token-trace readback"),
            size: copy_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("token-trace download"),
            });
        encoder.copy_buffer_to_buffer(buffer.raw(), 0, &readback, 0, copy_size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| TraceError::Transfer {
                buffer: buffer.label,
                detail: "readback map callback never fired".into(),
            })?
            .map_err(|e| TraceError::Transfer {
                buffer: buffer.label,
                detail: format!("readback map failed: {e}"),
            })?;

        let mapped = slice.get_mapped_range();
        dst.copy_from_slice(&mapped[..dst.len()]);
        drop(mapped);
        readback.unmap();

        Ok(span.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- Pure helpers (no GPU) ---------------------------------------------

    #[test]
    fn test_align_copy_size() {
        assert_eq!(align_copy_size(0), 0);
        assert_eq!(align_copy_size(1), 4);
        assert_eq!(align_copy_size(4), 4);
        assert_eq!(align_copy_size(5), 8);
        assert_eq!(align_copy_size(100), 100);
        assert_eq!(align_copy_size(101), 104);
    }

    #[test]
    fn test_pad_borrows_when_aligned() {
        let data = [1u8, 2, 3, 4];
        assert!(matches!(pad_to_copy_alignment(&data), Cow::Borrowed(_)));
    }

    #[test]
    fn test_pad_extends_with_zeros() {
        let data = [9u8, 8, 7];
        let padded = pad_to_copy_alignment(&data);
        assert_eq!(&*padded, &[9, 8, 7, 0]);
    }

    // ---- GPU tests ----------------------------------------------------------
    // Gated: they need a real compute adapter (even a software one).
    //   cargo test -- --include-ignored

    #[test]
    #[ignore = "requires a compute adapter"]
    fn test_context_builds_reference_kernel() {
        let ctx = ComputeContext::new(KernelSource::builtin())
            .expect("context construction should succeed with the builtin kernel");
        assert_eq!(ctx.kernel_label(), "builtin:token_trace.wgsl");
    }

    #[test]
    #[ignore = "requires a compute adapter"]
    fn test_bad_kernel_yields_build_log() {
        let src = KernelSource::from_string("fn token_trace( {", "broken.wgsl");
        let err = ComputeContext::new(src).unwrap_err();
        match err {
            TraceError::KernelBuild { log } => assert!(!log.is_empty()),
            other => panic!("expected KernelBuild, got {other:?}"),
        }
    }

    #[test]
    #[ignore = "requires a compute adapter"]
    fn test_upload_download_round_trip() {
        let ctx = ComputeContext::new(KernelSource::builtin()).unwrap();
        // 27 bytes: deliberately not copy-aligned.
        let data: Vec<u8> = (0u8..27).collect();
        let buf = ctx.create_storage_buffer("round-trip", data.len() as u64);

        let ul = ctx.upload_buffer(&buf, &data).unwrap();
        let mut out = vec![0u8; data.len()];
        let dl = ctx.download_buffer(&buf, &mut out).unwrap();

        assert_eq!(out, data, "round-trip mismatch");
        assert!(ul.duration_secs() >= 0.0);
        assert!(dl.duration_secs() >= 0.0);
    }

    #[test]
    #[ignore = "requires a compute adapter"]
    fn test_oversized_upload_is_transfer_error() {
        let ctx = ComputeContext::new(KernelSource::builtin()).unwrap();
        let buf = ctx.create_storage_buffer("small", 8);
        let err = ctx.upload_buffer(&buf, &[0u8; 16]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Transfer);
    }
}
