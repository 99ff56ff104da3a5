//! Screen capture bridge.
//!
//! Captures one display on a dedicated thread, crops it to the configured
//! region, resamples to the output size, and hands frames to the stream loop
//! through a [`FrameHandoff`]. scrap delivers BGRA bytes, which read as a
//! native-endian word put red in bits 16-23: exactly [`PixelFormat::Rgba8888`].

use scrap::{Capturer, Display};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{CapturedFrame, FrameConsumer, FrameHandoff, FrameProducer, PublishOutcome};
use crate::config::CaptureTarget;
use crate::error::{MirrorError, Result};
use crate::frame::PixelFormat;

const BGRA_BYTES: usize = 4;
const NOT_READY_BACKOFF: Duration = Duration::from_millis(5);
const ERROR_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayInfo {
    pub index: usize,
    pub width: usize,
    pub height: usize,
}

/// Enumerate displays the capturer can see.
pub fn list_displays() -> Result<Vec<DisplayInfo>> {
    let displays = Display::all().map_err(|e| MirrorError::Capture(e.to_string()))?;
    Ok(displays
        .iter()
        .enumerate()
        .map(|(index, d)| DisplayInfo {
            index,
            width: d.width(),
            height: d.height(),
        })
        .collect())
}

fn select_display(index: usize) -> Result<Display> {
    let mut displays = Display::all().map_err(|e| MirrorError::Capture(e.to_string()))?;
    if index >= displays.len() {
        return Err(MirrorError::Capture(format!(
            "display {} not found ({} available)",
            index,
            displays.len()
        )));
    }
    Ok(displays.swap_remove(index))
}

/// Source rectangle on the display and the size frames are delivered at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub src_x: usize,
    pub src_y: usize,
    pub src_w: usize,
    pub src_h: usize,
    pub out_w: usize,
    pub out_h: usize,
}

impl Geometry {
    /// Resolve a capture target against the actual display size.
    ///
    /// The region is clipped to the display. When only one output dimension
    /// is given, the other follows the region's aspect ratio.
    pub fn resolve(display_w: usize, display_h: usize, target: &CaptureTarget) -> Result<Self> {
        let (src_x, src_y, src_w, src_h) = match target.region {
            Some(r) => {
                let x = r.x as usize;
                let y = r.y as usize;
                if x >= display_w || y >= display_h {
                    return Err(MirrorError::Capture(format!(
                        "region origin ({}, {}) outside {}x{} display",
                        x, y, display_w, display_h
                    )));
                }
                let w = (r.width as usize).min(display_w - x);
                let h = (r.height as usize).min(display_h - y);
                (x, y, w, h)
            }
            None => (0, 0, display_w, display_h),
        };
        if src_w == 0 || src_h == 0 {
            return Err(MirrorError::Capture("empty capture region".into()));
        }

        let scale =
            |num: usize, a: usize, b: usize| ((num as u64 * a as u64) / b as u64).max(1) as usize;
        let (out_w, out_h) = match (target.output_width, target.output_height) {
            (Some(w), Some(h)) => (w as usize, h as usize),
            (Some(w), None) => (w as usize, scale(w as usize, src_h, src_w)),
            (None, Some(h)) => (scale(h as usize, src_w, src_h), h as usize),
            (None, None) => (src_w, src_h),
        };

        Ok(Self {
            src_x,
            src_y,
            src_w,
            src_h,
            out_w,
            out_h,
        })
    }

    fn is_identity(&self, display_w: usize, display_h: usize) -> bool {
        self.src_x == 0
            && self.src_y == 0
            && self.src_w == display_w
            && self.src_h == display_h
            && self.out_w == self.src_w
            && self.out_h == self.src_h
    }
}

/// Crop and nearest-neighbour resample a BGRA frame.
pub fn crop_and_resample(bgra: &[u8], stride: usize, geom: &Geometry) -> CapturedFrame {
    let mut out = Vec::with_capacity(geom.out_w * geom.out_h * BGRA_BYTES);

    for y in 0..geom.out_h {
        let src_y = geom.src_y + (y * geom.src_h) / geom.out_h;
        for x in 0..geom.out_w {
            let src_x = geom.src_x + (x * geom.src_w) / geom.out_w;
            let offset = src_y * stride + src_x * BGRA_BYTES;
            match bgra.get(offset..offset + BGRA_BYTES) {
                Some(px) => out.extend_from_slice(px),
                None => out.extend_from_slice(&[0, 0, 0, 0]),
            }
        }
    }

    CapturedFrame {
        width: geom.out_w as u32,
        height: geom.out_h as u32,
        row_stride: (geom.out_w * BGRA_BYTES) as u32,
        format: PixelFormat::Rgba8888,
        data: out,
    }
}

/// Running capture thread. Stops when dropped.
pub struct ScreenCapture {
    running: Arc<AtomicBool>,
    consumer: Option<FrameConsumer>,
}

impl ScreenCapture {
    /// Start capturing the display named by `target`.
    pub fn start(target: CaptureTarget) -> Result<Self> {
        // Fail early on a bad display or region; the capturer itself is
        // created on the capture thread because it is not Send.
        let display = select_display(target.display)?;
        let geometry = Geometry::resolve(display.width(), display.height(), &target)?;
        drop(display);

        tracing::info!(
            display = target.display,
            src_w = geometry.src_w,
            src_h = geometry.src_h,
            out_w = geometry.out_w,
            out_h = geometry.out_h,
            "starting screen capture"
        );

        let running = Arc::new(AtomicBool::new(true));
        let (producer, consumer) = FrameHandoff::channel();

        let running_clone = running.clone();
        std::thread::Builder::new()
            .name("screen-capture".into())
            .spawn(move || {
                let display = match select_display(target.display) {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::error!(error = %e, "screen capture: no display");
                        return;
                    }
                };
                let w = display.width();
                let h = display.height();
                let capturer = match Capturer::new(display) {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::error!(error = %e, "screen capture: failed to start");
                        return;
                    }
                };
                capture_loop(capturer, w, h, geometry, producer, running_clone);
            })
            .map_err(|e| MirrorError::Capture(e.to_string()))?;

        Ok(Self {
            running,
            consumer: Some(consumer),
        })
    }

    /// Take the consuming end of the handoff (can only be called once).
    pub fn take_source(&mut self) -> Option<FrameConsumer> {
        self.consumer.take()
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

impl Drop for ScreenCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    mut capturer: Capturer,
    src_w: usize,
    src_h: usize,
    geometry: Geometry,
    producer: FrameProducer,
    running: Arc<AtomicBool>,
) {
    let identity = geometry.is_identity(src_w, src_h);

    while running.load(Ordering::Relaxed) {
        // a frame is pending or still held by the stream loop
        if !producer.wants_frame() {
            if producer.is_closed() {
                break;
            }
            std::thread::sleep(NOT_READY_BACKOFF);
            continue;
        }

        match capturer.frame() {
            Ok(frame) => {
                // stride may include padding
                let stride = frame.len() / src_h;
                let captured = if identity {
                    CapturedFrame {
                        width: src_w as u32,
                        height: src_h as u32,
                        row_stride: stride as u32,
                        format: PixelFormat::Rgba8888,
                        data: frame[..stride * src_h].to_vec(),
                    }
                } else {
                    crop_and_resample(&frame, stride, &geometry)
                };

                match producer.publish(captured) {
                    PublishOutcome::Accepted => {}
                    PublishOutcome::Dropped => std::thread::sleep(NOT_READY_BACKOFF),
                    PublishOutcome::Closed => break,
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(NOT_READY_BACKOFF);
            }
            Err(e) => {
                tracing::warn!(error = %e, "screen capture error, retrying");
                std::thread::sleep(ERROR_BACKOFF);
            }
        }
    }

    tracing::debug!("capture loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Rect;

    fn target(region: Option<Rect>, w: Option<u32>, h: Option<u32>) -> CaptureTarget {
        CaptureTarget {
            display: 0,
            region,
            output_width: w,
            output_height: h,
        }
    }

    #[test]
    fn test_geometry_defaults_to_full_display() {
        let g = Geometry::resolve(1920, 1080, &target(None, None, None)).unwrap();
        assert_eq!((g.src_w, g.src_h, g.out_w, g.out_h), (1920, 1080, 1920, 1080));
        assert!(g.is_identity(1920, 1080));
    }

    #[test]
    fn test_geometry_keeps_aspect_with_one_dimension() {
        let g = Geometry::resolve(1920, 1080, &target(None, Some(960), None)).unwrap();
        assert_eq!((g.out_w, g.out_h), (960, 540));

        let g = Geometry::resolve(1920, 1080, &target(None, None, Some(270))).unwrap();
        assert_eq!((g.out_w, g.out_h), (480, 270));
    }

    #[test]
    fn test_geometry_clips_region() {
        let region = Rect {
            x: 100,
            y: 50,
            width: 5000,
            height: 20,
        };
        let g = Geometry::resolve(640, 480, &target(Some(region), None, None)).unwrap();
        assert_eq!((g.src_x, g.src_y, g.src_w, g.src_h), (100, 50, 540, 20));
        assert!(!g.is_identity(640, 480));

        let outside = Rect {
            x: 640,
            y: 0,
            width: 10,
            height: 10,
        };
        assert!(Geometry::resolve(640, 480, &target(Some(outside), None, None)).is_err());
    }

    #[test]
    fn test_crop_and_resample() {
        // 4x2 display, each pixel tagged with its index in the blue byte, stride padded by 4
        let stride = 4 * 4 + 4;
        let mut bgra = vec![0u8; stride * 2];
        for y in 0..2 {
            for x in 0..4 {
                bgra[y * stride + x * 4] = (y * 4 + x) as u8;
            }
        }
        let geom = Geometry {
            src_x: 2,
            src_y: 0,
            src_w: 2,
            src_h: 2,
            out_w: 1,
            out_h: 2,
        };
        let frame = crop_and_resample(&bgra, stride, &geom);
        assert_eq!((frame.width, frame.height, frame.row_stride), (1, 2, 4));
        assert_eq!(frame.format, PixelFormat::Rgba8888);
        assert_eq!(frame.data[0], 2);
        assert_eq!(frame.data[4], 6);
    }
}
