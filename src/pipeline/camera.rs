use std::{sync::atomic::Ordering, time::Instant};

use anyhow::{Result, anyhow};
use crossbeam_channel::Sender;
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraFormat, CameraIndex, CameraInfo, FrameFormat, RequestedFormat,
        RequestedFormatType, Resolution,
    },
};

use super::{CaptureStream, FrameSource};
use crate::{config::CaptureRequest, types::Frame};

const TARGET_FPS: u32 = 30;

#[derive(Clone, Debug)]
pub struct CameraDevice {
    pub index: CameraIndex,
    pub label: String,
}

pub fn available_cameras() -> Result<Vec<CameraDevice>> {
    let cameras = query(ApiBackend::Auto)?;
    Ok(cameras
        .into_iter()
        .map(|info| CameraDevice {
            index: info.index().clone(),
            label: format_camera_label(&info),
        })
        .collect())
}

fn format_camera_label(info: &CameraInfo) -> String {
    info.human_name()
}

fn requested_formats(request: CaptureRequest) -> [RequestedFormat<'static>; 3] {
    let resolution = Resolution::new(request.width, request.height);
    [
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(CameraFormat::new(
            resolution,
            FrameFormat::MJPEG,
            TARGET_FPS,
        ))),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(CameraFormat::new(
            resolution,
            FrameFormat::YUYV,
            TARGET_FPS,
        ))),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

fn build_camera(index: &CameraIndex, request: CaptureRequest) -> Result<Camera> {
    let mut last_err = None;

    for requested in requested_formats(request) {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
}

/// Live webcam capture.
pub struct NokhwaCamera {
    index: CameraIndex,
}

impl NokhwaCamera {
    pub fn new(index: u32) -> Self {
        Self {
            index: CameraIndex::Index(index),
        }
    }
}

impl FrameSource for NokhwaCamera {
    fn start(&mut self, request: CaptureRequest, frame_tx: Sender<Frame>) -> Result<CaptureStream> {
        // Fail fast before spawning the capture thread.
        drop(build_camera(&self.index, request)?);

        let index = self.index.clone();
        Ok(CaptureStream::spawn(false, move |stop| {
            let mut camera = match build_camera(&index, request) {
                Ok(cam) => cam,
                Err(err) => {
                    log::error!("failed to open camera: {err:?}");
                    return;
                }
            };
            log::info!("camera streaming at {}", camera.resolution());

            let mut sequence = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let frame = match camera.frame() {
                    Ok(frame) => frame,
                    Err(err) => {
                        log::warn!("camera frame read failed: {err:?}");
                        continue;
                    }
                };

                let decoded = match frame.decode_image::<RgbFormat>() {
                    Ok(img) => img,
                    Err(err) => {
                        log::warn!("failed to decode camera frame: {err:?}");
                        continue;
                    }
                };

                let (width, height) = decoded.dimensions();
                let rgb = decoded.into_raw();
                if rgb.is_empty() {
                    continue;
                }

                let mut rgba = Vec::with_capacity(rgb.len() / 3 * 4);
                for chunk in rgb.chunks_exact(3) {
                    rgba.extend_from_slice(&[chunk[0], chunk[1], chunk[2], 255]);
                }

                let frame = Frame {
                    rgba,
                    width,
                    height,
                    sequence,
                    timestamp: Instant::now(),
                };
                sequence += 1;

                // Drop the frame if the session is still busy with the last one.
                if let Err(crossbeam_channel::TrySendError::Disconnected(_)) = frame_tx.try_send(frame) {
                    break;
                }
            }

            if let Err(err) = camera.stop_stream() {
                log::warn!("failed to stop camera stream: {err:?}");
            }
        }))
    }
}
