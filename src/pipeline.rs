// pipeline.rs — the trace pipeline: fixed buffer set, kernel binding,
// dispatch geometry, and the end-to-end trace operation.
//
// Construct once per image geometry; call `trace()` per frame. The
// device buffers are sized at construction from the declared image and
// contour-table dimensions and never resized — `trace()` checks every
// host-side argument against that geometry before touching the device.
//
// DISPATCH GEOMETRY
// ──────────────────
// The kernel processes one image row per work-item with a fixed
// work-group size of 64. Work-items are rounded up to the smallest
// multiple of 64 covering the row count; the kernel guards invocations
// past the last row. Row-parallelism bounds synchronization to
// within-row state plus one shared atomic counter for contour-table
// slot assignment.
//
// ORDERING
// ─────────
// One in-order queue, program-order submission, blocking at each stage:
// uploads complete before the kernel is submitted, the kernel completes
// (poll Wait) before either download is encoded. No overlap across
// trace() calls is attempted.

use std::sync::mpsc;

use crate::context::{ComputeContext, DeviceBuffer};
use crate::error::TraceError;
use crate::image::{GrayImage, RgbImage};
use crate::profile::{CompletionToken, HostSpan, TimeProfile};
use crate::source::KernelSource;
use crate::table::ContourTable;

/// Fixed work-group size; the kernel's `@workgroup_size` must match.
pub const WORK_GROUP_SIZE: u32 = 64;

/// Entry point the kernel must export.
pub const KERNEL_ENTRY_POINT: &str = "token_trace";

/// Bytes per token-scratch entry: six 32-bit words
/// (state, hist, origin row, origin col, id, cursor).
const TOKEN_ENTRY_SIZE: u64 = 24;

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// The dimensions a pipeline is constructed for. All buffer sizes and
/// dispatch parameters derive from these four numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceGeometry {
    /// Image width in pixels (columns).
    pub img_width: u32,
    /// Image height in pixels (rows). One work-item per row.
    pub img_height: u32,
    /// Contour-table cells per row: 1 count cell + coordinate capacity.
    pub table_width: u32,
    /// Contour-table rows (contour slots).
    pub table_height: u32,
}

impl TraceGeometry {
    /// Validate and freeze a geometry.
    ///
    /// # Errors
    /// [`TraceError::InvalidGeometry`] for a zero-sized image or table,
    /// or a table too narrow to hold a single coordinate pair.
    pub fn new(
        img_width: u32,
        img_height: u32,
        table_width: u32,
        table_height: u32,
    ) -> Result<Self, TraceError> {
        if img_width == 0 || img_height == 0 {
            return Err(TraceError::InvalidGeometry {
                detail: format!("image must be nonzero, got {img_width}x{img_height}"),
            });
        }
        if table_height == 0 {
            return Err(TraceError::InvalidGeometry {
                detail: "contour table must have at least one row".into(),
            });
        }
        if table_width < 3 {
            return Err(TraceError::InvalidGeometry {
                detail: format!(
                    "contour table width {table_width} cannot hold a count cell \
                     plus a coordinate pair (minimum 3)"
                ),
            });
        }
        Ok(TraceGeometry { img_width, img_height, table_width, table_height })
    }

    /// Number of work-groups dispatched: `ceil(rows / WORK_GROUP_SIZE)`.
    pub fn workgroup_count(&self) -> u32 {
        (self.img_height + WORK_GROUP_SIZE - 1) / WORK_GROUP_SIZE
    }

    /// Total work-items: the smallest multiple of [`WORK_GROUP_SIZE`]
    /// that covers every image row.
    pub fn work_item_count(&self) -> u32 {
        self.workgroup_count() * WORK_GROUP_SIZE
    }

    fn binary_image_bytes(&self) -> u64 {
        self.img_width as u64 * self.img_height as u64
    }

    fn debug_image_bytes(&self) -> u64 {
        3 * self.binary_image_bytes()
    }

    fn token_bytes(&self) -> u64 {
        self.img_height as u64 * TOKEN_ENTRY_SIZE
    }

    fn table_bytes(&self) -> u64 {
        4 * self.table_width as u64 * self.table_height as u64
    }
}

/// Scalar kernel arguments, laid out to match the WGSL `TraceParams`
/// uniform exactly.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct TraceParams {
    img_rows: u32,
    img_cols: u32,
    tbl_rows: u32,
    tbl_cols: u32,
}

// ---------------------------------------------------------------------------
// Kernel timer
// ---------------------------------------------------------------------------

/// Device-side kernel timing via a two-entry timestamp query set.
/// Present only when the adapter has `TIMESTAMP_QUERY`.
#[derive(Debug)]
struct KernelTimer {
    query_set: wgpu::QuerySet,
    resolve: wgpu::Buffer,
    readback: wgpu::Buffer,
    /// Nanoseconds per timestamp tick.
    period: f32,
}

impl KernelTimer {
    fn new(ctx: &ComputeContext, period: f32) -> Self {
        let query_set = ctx.device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("kernel timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: 2,
        });
        let resolve = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kernel timestamp resolve"),
            size: 16,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let readback = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kernel timestamp readback"),
            size: 16,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        KernelTimer { query_set, resolve, readback, period }
    }

    fn pass_timestamps(&self) -> wgpu::ComputePassTimestampWrites<'_> {
        wgpu::ComputePassTimestampWrites {
            query_set: &self.query_set,
            beginning_of_pass_write_index: Some(0),
            end_of_pass_write_index: Some(1),
        }
    }

    fn encode_resolve(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.resolve_query_set(&self.query_set, 0..2, &self.resolve, 0);
        encoder.copy_buffer_to_buffer(&self.resolve, 0, &self.readback, 0, 16);
    }

    /// Read back the pass timestamps, scaled to nanoseconds.
    fn read(&self, ctx: &ComputeContext) -> Result<CompletionToken, TraceError> {
        let slice = self.readback.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        ctx.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| TraceError::Transfer {
                buffer: "kernel timestamps",
                detail: "map callback never fired".into(),
            })?
            .map_err(|e| TraceError::Transfer {
                buffer: "kernel timestamps",
                detail: format!("map failed: {e}"),
            })?;

        let mapped = slice.get_mapped_range();
        let ticks: [u64; 2] = [
            u64::from_le_bytes(mapped[0..8].try_into().unwrap()),
            u64::from_le_bytes(mapped[8..16].try_into().unwrap()),
        ];
        drop(mapped);
        self.readback.unmap();

        let start_ns = (ticks[0] as f64 * self.period as f64) as u64;
        let end_ns = (ticks[1] as f64 * self.period as f64) as u64;
        Ok(CompletionToken::from_device_ns(start_ns, end_ns))
    }
}

// ---------------------------------------------------------------------------
// TracePipeline
// ---------------------------------------------------------------------------

/// The contour-trace offload pipeline.
///
/// Owns a [`ComputeContext`] plus the fixed device buffer set:
/// binary image, debug image, token scratch, atomic slot counter, and
/// contour table. Kernel bindings follow the contract order
/// (bindings 0..=5); the scalar arguments travel in a params uniform
/// written once at construction, since the geometry never changes.
///
/// # Example
/// ```no_run
/// use token_trace::{ContourTable, GrayImage, TracePipeline};
///
/// let pipeline = TracePipeline::new("token_trace.wgsl", 640, 480, 257, 32)?;
/// let frame = GrayImage::new(640, 480);
/// let mut table = ContourTable::new(257, 32);
/// let profile = pipeline.trace(&frame, None, &mut table)?;
/// println!("{profile}");
/// # Ok::<(), token_trace::TraceError>(())
/// ```
#[derive(Debug)]
pub struct TracePipeline {
    ctx: ComputeContext,
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    bin_img: DeviceBuffer,
    dbg_img: DeviceBuffer,
    table: DeviceBuffer,
    counter: DeviceBuffer,
    timer: Option<KernelTimer>,
    geom: TraceGeometry,
}

impl TracePipeline {
    /// Build a pipeline from a kernel source file.
    pub fn new(
        source_path: impl AsRef<std::path::Path>,
        img_width: u32,
        img_height: u32,
        table_width: u32,
        table_height: u32,
    ) -> Result<Self, TraceError> {
        let source = KernelSource::from_path(source_path)?;
        Self::with_source(source, img_width, img_height, table_width, table_height)
    }

    /// Build a pipeline from already-loaded kernel source.
    pub fn with_source(
        source: KernelSource,
        img_width: u32,
        img_height: u32,
        table_width: u32,
        table_height: u32,
    ) -> Result<Self, TraceError> {
        let geom = TraceGeometry::new(img_width, img_height, table_width, table_height)?;
        let ctx = ComputeContext::new(source)?;

        let bin_img = ctx.create_storage_buffer("binary image", geom.binary_image_bytes());
        let dbg_img = ctx.create_storage_buffer("debug image", geom.debug_image_bytes());
        let tokens = ctx.create_storage_buffer("token scratch", geom.token_bytes());
        let counter = ctx.create_storage_buffer("slot counter", 4);
        let table = ctx.create_storage_buffer("contour table", geom.table_bytes());

        let params = TraceParams {
            img_rows: geom.img_height,
            img_cols: geom.img_width,
            tbl_rows: geom.table_height,
            tbl_cols: geom.table_width,
        };
        let params_buf = ctx.create_uniform_buffer("trace params", bytemuck::bytes_of(&params));

        let storage_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bgl = ctx.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("token_trace bindings"),
            entries: &[
                // Contract order: binary image, debug image, token
                // scratch, scalar params, slot counter, contour table.
                storage_entry(0),
                storage_entry(1),
                storage_entry(2),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage_entry(4),
                storage_entry(5),
            ],
        });

        let pipeline_layout =
            ctx.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("token_trace layout"),
                bind_group_layouts: &[&bgl],
                push_constant_ranges: &[],
            });

        // Entry-point resolution and binding validation happen here;
        // capture the failure as a build error with the driver's log.
        ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = ctx.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(KERNEL_ENTRY_POINT),
            layout: Some(&pipeline_layout),
            module: &ctx.module,
            entry_point: KERNEL_ENTRY_POINT,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });
        if let Some(err) = pollster::block_on(ctx.device.pop_error_scope()) {
            let log = err.to_string();
            tracing::error!(
                entry_point = KERNEL_ENTRY_POINT,
                "pipeline creation failed:\n{log}"
            );
            return Err(TraceError::KernelBuild { log });
        }

        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("token_trace bindings"),
            layout: &bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: bin_img.raw().as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: dbg_img.raw().as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: tokens.raw().as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: params_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: counter.raw().as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: table.raw().as_entire_binding() },
            ],
        });

        let timer = ctx.timestamp_period().map(|period| KernelTimer::new(&ctx, period));
        tracing::info!(
            adapter = %ctx.adapter_info(),
            img_width = geom.img_width,
            img_height = geom.img_height,
            table_width = geom.table_width,
            table_height = geom.table_height,
            device_timestamps = timer.is_some(),
            "trace pipeline ready"
        );

        Ok(TracePipeline {
            ctx,
            pipeline,
            bind_group,
            bin_img,
            dbg_img,
            table,
            counter,
            timer,
            geom,
        })
    }

    pub fn geometry(&self) -> TraceGeometry {
        self.geom
    }

    pub fn context(&self) -> &ComputeContext {
        &self.ctx
    }

    /// Whether kernel timing comes from device timestamp queries
    /// (otherwise: host wall-clock around submit-and-wait).
    pub fn uses_device_timestamps(&self) -> bool {
        self.timer.is_some()
    }

    /// Run one trace: upload the image, reset the slot counter, execute
    /// the kernel, download the results.
    ///
    /// `debug` is downloaded only when provided; the contour table is
    /// always downloaded. The returned profile covers the two uploads
    /// (one span), the kernel, and the table download.
    ///
    /// # Errors
    /// [`TraceError::ShapeMismatch`] when any argument disagrees with
    /// the constructed geometry; [`TraceError::Transfer`] when a
    /// blocking transfer fails.
    pub fn trace(
        &self,
        input: &GrayImage,
        mut debug: Option<&mut RgbImage>,
        table: &mut ContourTable,
    ) -> Result<TimeProfile, TraceError> {
        self.check_shape("input image", [input.width(), input.height()],
                         [self.geom.img_width, self.geom.img_height])?;
        if let Some(dbg) = debug.as_deref() {
            self.check_shape("debug image", [dbg.width(), dbg.height()],
                             [self.geom.img_width, self.geom.img_height])?;
        }
        self.check_shape("contour table", [table.width(), table.height()],
                         [self.geom.table_width, self.geom.table_height])?;

        // Upload: image bytes, then the counter reset. One span covers
        // both transfers, so the reported upload time is their sum.
        let ul_span = HostSpan::begin();
        self.ctx.upload_buffer(&self.bin_img, input.as_bytes())?;
        self.ctx.upload_buffer(&self.counter, &0u32.to_le_bytes())?;
        let ul_token = ul_span.finish();

        // Kernel dispatch. The table buffer is cleared device-side
        // first so unused rows read back zero on every call, not just
        // the first one on a fresh allocation.
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("token_trace dispatch"),
            });
        encoder.clear_buffer(self.table.raw(), 0, None);
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(KERNEL_ENTRY_POINT),
                timestamp_writes: self.timer.as_ref().map(|t| t.pass_timestamps()),
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.dispatch_workgroups(self.geom.workgroup_count(), 1, 1);
        }
        if let Some(timer) = &self.timer {
            timer.encode_resolve(&mut encoder);
        }

        let k_span = HostSpan::begin();
        self.ctx.queue.submit(std::iter::once(encoder.finish()));
        self.ctx.device.poll(wgpu::Maintain::Wait);
        let k_host = k_span.finish();

        let k_token = match &self.timer {
            Some(timer) => timer.read(&self.ctx)?,
            None => k_host,
        };

        // Downloads: debug image (when requested, untimed), then the
        // contour table (timed).
        if let Some(dbg) = debug.as_deref_mut() {
            let _ = self.ctx.download_buffer(&self.dbg_img, dbg.as_bytes_mut())?;
        }
        let dl_token = self.ctx.download_buffer(&self.table, table.as_bytes_mut())?;

        Ok(TimeProfile::from_tokens(Some(ul_token), Some(k_token), Some(dl_token)))
    }

    fn check_shape(
        &self,
        what: &'static str,
        actual: [u32; 2],
        expected: [u32; 2],
    ) -> Result<(), TraceError> {
        if actual != expected {
            return Err(TraceError::ShapeMismatch { what, expected, actual });
        }
        Ok(())
    }
}
