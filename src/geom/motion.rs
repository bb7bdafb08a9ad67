//! Keyframed transforms for motion blur.
//!
//! A [`MotionSystem`] holds a strictly increasing list of keyframe times and
//! one local-to-world transform per keyframe. Between two keyframes the
//! transform is decomposed into translation, rotation and scale:
//! translation and scale are interpolated linearly, rotation spherically.

use crate::util::{BBox3f, Error, Mat4, Quat, Result, Vec3, Vec4};

/// Samples taken per segment when bounding a moving box.
pub const MOTION_BOUND_SAMPLES: u32 = 1024;

/// Translation/rotation/scale split of an affine matrix.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Decomposed {
    scale: Vec3,
    rotation: Quat,
    translation: Vec3,
}

impl Decomposed {
    fn from_matrix(m: &Mat4) -> Result<Self> {
        if m.row(3) != Vec4::W {
            return Err(Error::InvalidMotion("projective transforms cannot be interpolated".into()));
        }
        let det = m.determinant();
        if det == 0.0 || !det.is_finite() {
            return Err(Error::SingularTransform);
        }
        let (scale, rotation, translation) = m.to_scale_rotation_translation();
        Ok(Self {
            scale,
            rotation: rotation.normalize(),
            translation,
        })
    }
}

/// Interpolation between two keyframed transforms.
///
/// Outside `[start_time, end_time]` the sample clamps to the end matrices.
#[derive(Clone, Debug, PartialEq)]
pub struct InterpolatedTransform {
    pub start_time: f32,
    pub end_time: f32,
    pub start: Mat4,
    pub end: Mat4,
    start_d: Decomposed,
    end_d: Decomposed,
    has_translation: bool,
    has_rotation: bool,
    has_scale: bool,
    active: bool,
}

impl InterpolatedTransform {
    pub fn new(start_time: f32, end_time: f32, start: Mat4, end: Mat4) -> Result<Self> {
        let start_d = Decomposed::from_matrix(&start)?;
        let end_d = Decomposed::from_matrix(&end)?;

        let mut it = Self {
            start_time,
            end_time,
            start,
            end,
            start_d,
            end_d,
            has_translation: false,
            has_rotation: false,
            has_scale: false,
            active: false,
        };
        if start_time == end_time {
            return Ok(it);
        }

        it.has_translation = start_d.translation != end_d.translation;
        it.has_scale = start_d.scale != end_d.scale;
        it.has_rotation = (start_d.rotation.dot(end_d.rotation).abs() - 1.0).abs() >= 1e-6;
        it.active = it.has_translation || it.has_scale || it.has_rotation;
        Ok(it)
    }

    /// Whether the two keyframes actually differ.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Local-to-world matrix at `time`.
    pub fn sample(&self, time: f32) -> Mat4 {
        if !self.active || time <= self.start_time {
            return self.start;
        }
        if time >= self.end_time {
            return self.end;
        }

        let le = (time - self.start_time) / (self.end_time - self.start_time);
        let translation = self.start_d.translation.lerp(self.end_d.translation, le);

        if self.has_translation && !(self.has_scale || self.has_rotation) {
            let mut m = self.start;
            m.w_axis = translation.extend(1.0);
            return m;
        }

        let rotation = if self.has_rotation {
            self.start_d.rotation.slerp(self.end_d.rotation, le)
        } else {
            self.start_d.rotation
        };
        let scale = self.start_d.scale.lerp(self.end_d.scale, le);
        Mat4::from_scale_rotation_translation(scale, rotation, translation)
    }

    /// Union of `bbox` transformed at uniformly spaced times.
    pub fn bound(&self, bbox: &BBox3f) -> BBox3f {
        if !self.active {
            return bbox.transformed(&self.start);
        }
        let mut result = BBox3f::EMPTY;
        let n = MOTION_BOUND_SAMPLES as f32;
        for i in 0..=MOTION_BOUND_SAMPLES {
            let t = self.start_time + (i as f32 / n) * (self.end_time - self.start_time);
            result.expand_by_box(&bbox.transformed(&self.sample(t)));
        }
        result
    }
}

/// Keyframed sequence of local-to-world transforms.
#[derive(Clone, Debug, PartialEq)]
pub struct MotionSystem {
    times: Vec<f32>,
    segments: Vec<InterpolatedTransform>,
}

impl MotionSystem {
    /// Build from keyframe times and transforms of equal length.
    ///
    /// Times must be strictly increasing; every transform must be an
    /// invertible affine matrix.
    pub fn new(times: Vec<f32>, transforms: Vec<Mat4>) -> Result<Self> {
        if times.is_empty() {
            return Err(Error::InvalidMotion("no keyframes".into()));
        }
        if times.len() != transforms.len() {
            return Err(Error::InvalidMotion(format!(
                "{} times for {} transforms",
                times.len(),
                transforms.len()
            )));
        }
        if times.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(Error::InvalidMotion("keyframe times must be strictly increasing".into()));
        }

        let segments = if times.len() == 1 {
            vec![InterpolatedTransform::new(times[0], times[0], transforms[0], transforms[0])?]
        } else {
            times
                .windows(2)
                .zip(transforms.windows(2))
                .map(|(t, m)| InterpolatedTransform::new(t[0], t[1], m[0], m[1]))
                .collect::<Result<Vec<_>>>()?
        };

        Ok(Self { times, segments })
    }

    /// A static system holding one transform.
    pub fn from_transform(m: Mat4) -> Result<Self> {
        Self::new(vec![0.0], vec![m])
    }

    #[inline]
    pub fn times(&self) -> &[f32] {
        &self.times
    }

    #[inline]
    pub fn segments(&self) -> &[InterpolatedTransform] {
        &self.segments
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.times.len() <= 1
    }

    #[inline]
    pub fn start_time(&self) -> f32 {
        self.times[0]
    }

    #[inline]
    pub fn end_time(&self) -> f32 {
        self.times[self.times.len() - 1]
    }

    fn segment_for(&self, time: f32) -> &InterpolatedTransform {
        // Upper bound: number of keyframes at or before `time`.
        let upper = self.times.partition_point(|&t| t <= time);
        let index = upper.clamp(1, self.segments.len()) - 1;
        &self.segments[index]
    }

    /// Local-to-world matrix at `time`.
    #[inline]
    pub fn sample(&self, time: f32) -> Mat4 {
        self.segment_for(time).sample(time)
    }

    /// World-to-local matrix at `time`.
    #[inline]
    pub fn sample_inverse(&self, time: f32) -> Mat4 {
        self.sample(time).inverse()
    }

    /// World-space bound of a local box over the whole motion.
    pub fn bound(&self, bbox: &BBox3f) -> BBox3f {
        self.segments
            .iter()
            .fold(BBox3f::EMPTY, |acc, s| acc.union(&s.bound(bbox)))
    }
}
