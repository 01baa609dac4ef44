//! Pixel-to-ground georeferencing
//!
//! A pixel is turned into a camera ray, rotated through the camera mount
//! into the airframe and through the vehicle attitude into north-east-down.
//! The ray's bearing and look-down angle then give a ground range from the
//! vehicle, assuming flat terrain at the vehicle's reference altitude, and
//! the WGS-84 direct geodesic gives the coordinate.

use nalgebra::{Matrix3, Rotation3, Vector3};
use tracing::trace;

use crate::config::CameraConfig;
use crate::{CvError, CvResult};
use geoloc_core::{GeoPoint, GeoPosition, Observation, PoseSample, normalize_bearing};

/// Ray components smaller than this are treated as exactly zero
const SNAP_EPSILON: f64 = 1e-3;

/// Floor under the configured horizon margin; flatter rays never meet the ground
const HORIZON_EPSILON_DEG: f64 = 1e-6;

/// Full geometric result for one pixel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub position: GeoPosition,
    /// Bearing of the ray, degrees clockwise from true north
    pub azimuth_deg: f64,
    /// Angle between the ray and straight down
    pub off_nadir_deg: f64,
    pub slant_range_m: f64,
    pub ground_range_m: f64,
}

/// Projects image observations to geodetic coordinates
#[derive(Debug, Clone)]
pub struct Georeferencer {
    camera: CameraConfig,
    /// Camera optical frame to body frame, mount angles included
    camera_to_body: Rotation3<f64>,
}

impl Georeferencer {
    pub fn new(camera: CameraConfig) -> CvResult<Self> {
        camera.validate()?;

        // camera: x right, y down, z along the optical axis
        // body:   x forward, y right, z down
        let axes = Rotation3::from_matrix_unchecked(Matrix3::new(
            0.0, 0.0, 1.0, //
            1.0, 0.0, 0.0, //
            0.0, 1.0, 0.0,
        ));
        let mount = Rotation3::from_euler_angles(
            0.0,
            camera.mount_pitch_deg.to_radians(),
            camera.mount_yaw_deg.to_radians(),
        );

        Ok(Self {
            camera,
            camera_to_body: mount * axes,
        })
    }

    pub fn camera(&self) -> &CameraConfig {
        &self.camera
    }

    /// Ground coordinate of an observation seen in a `width` x `height` frame
    pub fn project(
        &self,
        observation: &Observation,
        width: u32,
        height: u32,
        pose: Option<&PoseSample>,
    ) -> CvResult<GeoPoint> {
        let pose = pose.ok_or_else(|| CvError::insufficient_pose("no pose available"))?;
        let projection =
            self.project_pixel(observation.pixel_x, observation.pixel_y, width, height, pose)?;

        Ok(GeoPoint::new(projection.position.latitude, projection.position.longitude)
            .with_color(observation.color_class.clone()))
    }

    pub fn project_pixel(
        &self,
        pixel_x: f64,
        pixel_y: f64,
        width: u32,
        height: u32,
        pose: &PoseSample,
    ) -> CvResult<Projection> {
        if width == 0 || height == 0 {
            return Err(CvError::frame_processing("frame has zero size"));
        }
        validate_pose(pose)?;

        let ray = self.world_ray(pixel_x, pixel_y, width, height, pose);

        let horizontal = ray.x.hypot(ray.y);
        let azimuth = normalize_bearing(ray.y.atan2(ray.x).to_degrees());
        let elevation = (-ray.z).atan2(horizontal);
        let off_nadir = std::f64::consts::FRAC_PI_2 + elevation;
        let off_nadir_deg = off_nadir.to_degrees();

        let margin_deg = self.camera.horizon_margin_deg.max(HORIZON_EPSILON_DEG);
        if !off_nadir_deg.is_finite() || off_nadir_deg >= 90.0 - margin_deg {
            return Err(CvError::DegenerateGeometry { off_nadir_deg });
        }
        if let Some(limit_deg) = self.camera.max_off_nadir_deg {
            if off_nadir_deg > limit_deg {
                return Err(CvError::OffNadirExceeded {
                    off_nadir_deg,
                    limit_deg,
                });
            }
        }

        let slant_range_m = pose.altitude / off_nadir.cos();
        let ground_range_m = slant_range_m * off_nadir.sin();
        if let Some(max_range_m) = self.camera.max_ground_range_m {
            if ground_range_m > max_range_m {
                return Err(CvError::DegenerateGeometry { off_nadir_deg });
            }
        }
        let position = pose.position().destination(ground_range_m, azimuth);

        trace!(
            "pixel ({:.1}, {:.1}) -> az {:.2} deg, off-nadir {:.2} deg, ground {:.2} m",
            pixel_x, pixel_y, azimuth, off_nadir_deg, ground_range_m
        );

        Ok(Projection {
            position,
            azimuth_deg: azimuth,
            off_nadir_deg,
            slant_range_m,
            ground_range_m,
        })
    }

    /// Ray through the pixel expressed in north-east-down
    fn world_ray(&self, pixel_x: f64, pixel_y: f64, width: u32, height: u32, pose: &PoseSample) -> Vector3<f64> {
        let f = self.camera.focal_length_px;
        let cx = width as f64 / 2.0;
        let cy = height as f64 / 2.0;

        let camera_ray = snap(Vector3::new((pixel_x - cx) / f, (pixel_y - cy) / f, 1.0));
        let body_ray = snap(self.camera_to_body * camera_ray);

        let vehicle = if self.camera.use_pitch_roll {
            Rotation3::from_euler_angles(
                pose.roll.to_radians(),
                pose.pitch.to_radians(),
                pose.yaw.to_radians(),
            )
        } else {
            Rotation3::from_euler_angles(0.0, 0.0, pose.yaw.to_radians())
        };

        snap(vehicle * body_ray)
    }
}

fn validate_pose(pose: &PoseSample) -> CvResult<()> {
    let values = [
        pose.latitude,
        pose.longitude,
        pose.altitude,
        pose.yaw,
        pose.pitch,
        pose.roll,
    ];
    if values.iter().any(|v| !v.is_finite()) {
        return Err(CvError::insufficient_pose("pose contains non-finite values"));
    }
    if !pose.position().is_valid() {
        return Err(CvError::insufficient_pose(format!(
            "pose position out of range: {}, {}",
            pose.latitude, pose.longitude
        )));
    }
    if pose.altitude <= 0.0 {
        return Err(CvError::insufficient_pose(format!(
            "altitude {:.2} m is not above the ground",
            pose.altitude
        )));
    }
    Ok(())
}

fn snap(v: Vector3<f64>) -> Vector3<f64> {
    v.map(|c| if c.abs() < SNAP_EPSILON { 0.0 } else { c })
}

// ============================================================================
// TESTS
// ============================================================================
