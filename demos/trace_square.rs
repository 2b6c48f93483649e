// demos/trace_square.rs — minimal end-to-end demo.
//
// Builds a 10×10 frame with a 3×3 foreground square, traces it with the
// reference kernel, and prints the timing profile plus the decoded
// contour. Run with:
//
//   cargo run --example trace_square
//
// Set RUST_LOG=debug to see adapter enumeration and kernel build steps.

use token_trace::{ContourTable, GrayImage, KernelSource, RgbImage, TracePipeline};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let pipeline = TracePipeline::with_source(KernelSource::builtin(), 10, 10, 17, 4)?;
    println!("adapter: {}", pipeline.context().adapter_info());
    println!("device timestamps: {}", pipeline.uses_device_timestamps());

    let mut frame = GrayImage::new(10, 10);
    for y in 3..=5 {
        for x in 3..=5 {
            frame.set(x, y, 255);
        }
    }

    let mut debug = RgbImage::new(10, 10);
    let mut table = ContourTable::new(17, 4);
    let profile = pipeline.trace(&frame, Some(&mut debug), &mut table)?;

    println!("{profile}");
    for (i, contour) in table.contours()?.iter().enumerate() {
        let points: Vec<String> = contour
            .points
            .iter()
            .map(|(r, c)| format!("({r},{c})"))
            .collect();
        println!("contour {i}: {} points: {}", contour.points.len(), points.join(" "));
    }

    // ASCII rendering of the debug image: '#' boundary, 'o' interior,
    // '.' background.
    for y in 0..10 {
        let line: String = (0..10)
            .map(|x| match debug.get(x, y) {
                [255, 0, 0] => '#',
                [255, 255, 255] => 'o',
                _ => '.',
            })
            .collect();
        println!("{line}");
    }

    Ok(())
}
