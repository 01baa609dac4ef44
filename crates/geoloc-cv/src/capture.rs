//! OpenCV `VideoCapture` backend for live streams, files and devices

use image::RgbImage;
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture},
};
use tracing::info;

use crate::source::VideoBackend;
use crate::{CvError, CvResult};

/// Reads frames through OpenCV. Accepts anything `VideoCapture` does: a
/// device index ("0"), a file path or a stream URL such as `rtmp://...`.
pub struct OpenCvCapture {
    capture: VideoCapture,
    uri: String,
    resolution: Option<(u32, u32)>,
}

impl OpenCvCapture {
    pub fn open(uri: &str) -> CvResult<Self> {
        let capture = match uri.parse::<i32>() {
            Ok(index) => VideoCapture::new(index, videoio::CAP_ANY),
            Err(_) => VideoCapture::from_file(uri, videoio::CAP_ANY),
        }
        .map_err(|e| CvError::connectivity(format!("cannot open {}: {}", uri, e)))?;

        if !capture.is_opened()? {
            return Err(CvError::connectivity(format!("cannot open {}", uri)));
        }

        let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH)?;
        let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT)?;
        info!("Opened video {} at {}x{}", uri, width, height);

        // Some streams only learn their size on the first read and report 0
        let resolution = (width > 0.0 && height > 0.0).then(|| (width as u32, height as u32));

        Ok(Self {
            capture,
            uri: uri.to_string(),
            resolution,
        })
    }
}

impl VideoBackend for OpenCvCapture {
    fn describe(&self) -> String {
        format!("opencv ({})", self.uri)
    }

    fn grab(&mut self) -> CvResult<Option<RgbImage>> {
        let mut bgr = Mat::default();
        let got_frame = self
            .capture
            .read(&mut bgr)
            .map_err(|e| CvError::transient_read(e.to_string()))?;

        // OpenCV reports end of file and a closed stream the same way
        if !got_frame {
            return Ok(None);
        }
        if bgr.empty() {
            return Err(CvError::transient_read("empty frame"));
        }

        let mut rgb = Mat::default();
        imgproc::cvt_color(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

        let (width, height) = (rgb.cols() as u32, rgb.rows() as u32);
        let bytes = rgb.data_bytes()?.to_vec();
        RgbImage::from_raw(width, height, bytes)
            .map(Some)
            .ok_or_else(|| CvError::frame_processing("frame buffer size mismatch"))
    }

    fn resolution(&self) -> Option<(u32, u32)> {
        self.resolution
    }
}

impl Drop for OpenCvCapture {
    fn drop(&mut self) {
        let _ = self.capture.release();
    }
}
