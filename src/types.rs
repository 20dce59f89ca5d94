//! Plain value types shared between the client, native and render sides.

use std::ops::BitOr;

use ash::vk;
use nalgebra::{UnitQuaternion, Vector2, Vector3};

/// Field of view as four angles in radians. Left and down are negative for a centered view.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Fov {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

impl Fov {
    pub const fn new(angle_left: f32, angle_right: f32, angle_up: f32, angle_down: f32) -> Self {
        Self { angle_left, angle_right, angle_up, angle_down }
    }

    pub fn symmetric(half_angle: f32) -> Self {
        Self::new(-half_angle, half_angle, half_angle, -half_angle)
    }

    /// Returns the tangents in left, right, up, down order.
    pub fn tangents(&self) -> [f64; 4] {
        [
            (self.angle_left as f64).tan(),
            (self.angle_right as f64).tan(),
            (self.angle_up as f64).tan(),
            (self.angle_down as f64).tan(),
        ]
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Pose {
    pub orientation: UnitQuaternion<f32>,
    pub position: Vector3<f32>,
}

impl Pose {
    pub fn identity() -> Self {
        Self {
            orientation: UnitQuaternion::identity(),
            position: Vector3::zeros(),
        }
    }

    pub fn new(orientation: UnitQuaternion<f32>, position: Vector3<f32>) -> Self {
        Self { orientation, position }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

/// Per channel sample position produced by a distortion function.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct UvTriplet {
    pub r: Vector2<f32>,
    pub g: Vector2<f32>,
    pub b: Vector2<f32>,
}

impl UvTriplet {
    pub fn splat(uv: Vector2<f32>) -> Self {
        Self { r: uv, g: uv, b: uv }
    }

    pub fn channel(&self, channel: usize) -> Vector2<f32> {
        match channel {
            0 => self.r,
            1 => self.g,
            _ => self.b,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl NormalizedRect {
    pub const FULL: NormalizedRect = NormalizedRect { x: 0.0, y: 0.0, w: 1.0, h: 1.0 };

    pub const fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.x, self.y, self.w, self.h]
    }
}

/// A pixel rectangle inside a target image.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RenderViewport {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl RenderViewport {
    pub const fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn to_ivec4(&self) -> [i32; 4] {
        [self.x as i32, self.y as i32, self.w as i32, self.h as i32]
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Opaque,
    Additive,
    AlphaBlend,
}

macro_rules! flag_set {
    ($name:ident : $($flag:ident = $bit:expr),+ $(,)?) => {
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
        pub struct $name(u32);

        impl $name {
            $(pub const $flag: $name = $name($bit);)+

            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn from_raw(bits: u32) -> Self {
                Self(bits)
            }

            pub const fn as_raw(&self) -> u32 {
                self.0
            }

            pub const fn contains(&self, other: Self) -> bool {
                (self.0 & other.0) == other.0
            }

            pub const fn intersects(&self, other: Self) -> bool {
                (self.0 & other.0) != 0
            }
        }

        impl BitOr for $name {
            type Output = $name;

            fn bitor(self, rhs: Self) -> Self::Output {
                $name(self.0 | rhs.0)
            }
        }
    };
}

flag_set!(SwapchainUsageBits:
    COLOR = 0x1,
    DEPTH_STENCIL = 0x2,
    UNORDERED_ACCESS = 0x4,
    TRANSFER_SRC = 0x8,
    TRANSFER_DST = 0x10,
    SAMPLED = 0x20,
    MUTABLE_FORMAT = 0x40,
    INPUT_ATTACHMENT = 0x80,
);

flag_set!(SwapchainCreateFlags:
    PROTECTED_CONTENT = 0x1,
    STATIC_IMAGE = 0x2,
);

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SwapchainCreateInfo {
    pub create: SwapchainCreateFlags,
    pub bits: SwapchainUsageBits,
    pub format: vk::Format,
    pub sample_count: u32,
    pub width: u32,
    pub height: u32,
    pub face_count: u32,
    pub array_size: u32,
    pub mip_count: u32,
}

impl SwapchainCreateInfo {
    /// A single layer color swapchain suited for projection layers.
    pub fn color(format: vk::Format, width: u32, height: u32) -> Self {
        Self {
            create: SwapchainCreateFlags::empty(),
            bits: SwapchainUsageBits::COLOR | SwapchainUsageBits::SAMPLED,
            format,
            sample_count: 1,
            width,
            height,
            face_count: 1,
            array_size: 1,
            mip_count: 1,
        }
    }

    pub fn layer_count(&self) -> u32 {
        self.face_count.max(1) * self.array_size.max(1)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameTiming {
    pub frame_id: i64,
    pub predicted_display_time_ns: u64,
    pub predicted_display_period_ns: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompositorEvent {
    SessionState { visible: bool, focused: bool },
    LossPending,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LayerFlags {
    pub flip_y: bool,
    pub unpremultiplied_alpha: bool,
    pub view_space: bool,
}

/// A region of one image of a swapchain. `S` is the swapchain reference of the side that holds
/// the layer, a client swapchain before commit and a native swapchain afterwards.
#[derive(Clone, Debug)]
pub struct SubImage<S> {
    pub swapchain: S,
    pub image_index: u32,
    pub array_index: u32,
    pub rect: RenderViewport,
    pub norm_rect: NormalizedRect,
}

impl<S> SubImage<S> {
    pub fn try_map<T, E>(self, f: &mut impl FnMut(S) -> Result<T, E>) -> Result<SubImage<T>, E> {
        Ok(SubImage {
            swapchain: f(self.swapchain)?,
            image_index: self.image_index,
            array_index: self.array_index,
            rect: self.rect,
            norm_rect: self.norm_rect,
        })
    }
}

#[derive(Clone, Debug)]
pub struct ProjectionView<S> {
    pub sub: SubImage<S>,
    pub fov: Fov,
    pub pose: Pose,
}

#[derive(Clone, Debug)]
pub struct DepthView<S> {
    pub sub: SubImage<S>,
    pub min_depth: f32,
    pub max_depth: f32,
    pub near_z: f32,
    pub far_z: f32,
}

#[derive(Clone, Debug)]
pub struct StereoProjectionData<S> {
    pub flags: LayerFlags,
    pub views: [ProjectionView<S>; 2],
}

#[derive(Clone, Debug)]
pub struct StereoProjectionDepthData<S> {
    pub flags: LayerFlags,
    pub views: [ProjectionView<S>; 2],
    pub depth: [DepthView<S>; 2],
}

#[derive(Clone, Debug)]
pub struct QuadData<S> {
    pub flags: LayerFlags,
    pub sub: SubImage<S>,
    pub pose: Pose,
    pub size: Vector2<f32>,
}

#[derive(Clone, Debug)]
pub struct CubeData<S> {
    pub flags: LayerFlags,
    pub sub: SubImage<S>,
    pub orientation: UnitQuaternion<f32>,
}

#[derive(Clone, Debug)]
pub struct CylinderData<S> {
    pub flags: LayerFlags,
    pub sub: SubImage<S>,
    pub pose: Pose,
    pub radius: f32,
    pub central_angle: f32,
    pub aspect_ratio: f32,
}

#[derive(Clone, Debug)]
pub struct Equirect1Data<S> {
    pub flags: LayerFlags,
    pub sub: SubImage<S>,
    pub pose: Pose,
    pub radius: f32,
    pub scale: Vector2<f32>,
    pub bias: Vector2<f32>,
}

#[derive(Clone, Debug)]
pub struct Equirect2Data<S> {
    pub flags: LayerFlags,
    pub sub: SubImage<S>,
    pub pose: Pose,
    pub radius: f32,
    pub central_horizontal_angle: f32,
    pub upper_vertical_angle: f32,
    pub lower_vertical_angle: f32,
}

#[derive(Clone, Debug)]
pub enum Layer<S> {
    StereoProjection(StereoProjectionData<S>),
    StereoProjectionDepth(StereoProjectionDepthData<S>),
    Quad(QuadData<S>),
    Cube(CubeData<S>),
    Cylinder(CylinderData<S>),
    Equirect1(Equirect1Data<S>),
    Equirect2(Equirect2Data<S>),
}

impl<S> ProjectionView<S> {
    fn try_map<T, E>(self, f: &mut impl FnMut(S) -> Result<T, E>) -> Result<ProjectionView<T>, E> {
        Ok(ProjectionView { sub: self.sub.try_map(f)?, fov: self.fov, pose: self.pose })
    }
}

impl<S> DepthView<S> {
    fn try_map<T, E>(self, f: &mut impl FnMut(S) -> Result<T, E>) -> Result<DepthView<T>, E> {
        Ok(DepthView {
            sub: self.sub.try_map(f)?,
            min_depth: self.min_depth,
            max_depth: self.max_depth,
            near_z: self.near_z,
            far_z: self.far_z,
        })
    }
}

impl<S> Layer<S> {
    /// Replaces every swapchain reference of the layer.
    pub fn try_map<T, E>(self, mut f: impl FnMut(S) -> Result<T, E>) -> Result<Layer<T>, E> {
        let f = &mut f;
        Ok(match self {
            Layer::StereoProjection(data) => {
                let [l, r] = data.views;
                Layer::StereoProjection(StereoProjectionData { flags: data.flags, views: [l.try_map(f)?, r.try_map(f)?] })
            }
            Layer::StereoProjectionDepth(data) => {
                let [l, r] = data.views;
                let [dl, dr] = data.depth;
                Layer::StereoProjectionDepth(StereoProjectionDepthData {
                    flags: data.flags,
                    views: [l.try_map(f)?, r.try_map(f)?],
                    depth: [dl.try_map(f)?, dr.try_map(f)?],
                })
            }
            Layer::Quad(data) => Layer::Quad(QuadData { flags: data.flags, sub: data.sub.try_map(f)?, pose: data.pose, size: data.size }),
            Layer::Cube(data) => Layer::Cube(CubeData { flags: data.flags, sub: data.sub.try_map(f)?, orientation: data.orientation }),
            Layer::Cylinder(data) => Layer::Cylinder(CylinderData {
                flags: data.flags,
                sub: data.sub.try_map(f)?,
                pose: data.pose,
                radius: data.radius,
                central_angle: data.central_angle,
                aspect_ratio: data.aspect_ratio,
            }),
            Layer::Equirect1(data) => Layer::Equirect1(Equirect1Data {
                flags: data.flags,
                sub: data.sub.try_map(f)?,
                pose: data.pose,
                radius: data.radius,
                scale: data.scale,
                bias: data.bias,
            }),
            Layer::Equirect2(data) => Layer::Equirect2(Equirect2Data {
                flags: data.flags,
                sub: data.sub.try_map(f)?,
                pose: data.pose,
                radius: data.radius,
                central_horizontal_angle: data.central_horizontal_angle,
                upper_vertical_angle: data.upper_vertical_angle,
                lower_vertical_angle: data.lower_vertical_angle,
            }),
        })
    }

    /// Returns the stereo views of a projection layer.
    pub fn projection_views(&self) -> Option<&[ProjectionView<S>; 2]> {
        match self {
            Layer::StereoProjection(data) => Some(&data.views),
            Layer::StereoProjectionDepth(data) => Some(&data.views),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(id: u32) -> SubImage<u32> {
        SubImage {
            swapchain: id,
            image_index: 0,
            array_index: 0,
            rect: RenderViewport::new(0, 0, 16, 16),
            norm_rect: NormalizedRect::FULL,
        }
    }

    #[test]
    fn usage_bits() {
        let bits = SwapchainUsageBits::COLOR | SwapchainUsageBits::SAMPLED;
        assert!(bits.contains(SwapchainUsageBits::COLOR));
        assert!(bits.intersects(SwapchainUsageBits::SAMPLED | SwapchainUsageBits::DEPTH_STENCIL));
        assert!(!bits.contains(SwapchainUsageBits::DEPTH_STENCIL));
    }

    #[test]
    fn layer_map_replaces_every_swapchain() {
        let layer = Layer::StereoProjectionDepth(StereoProjectionDepthData {
            flags: LayerFlags::default(),
            views: [
                ProjectionView { sub: sub(1), fov: Fov::symmetric(0.5), pose: Pose::identity() },
                ProjectionView { sub: sub(2), fov: Fov::symmetric(0.5), pose: Pose::identity() },
            ],
            depth: [
                DepthView { sub: sub(3), min_depth: 0.0, max_depth: 1.0, near_z: 0.1, far_z: 100.0 },
                DepthView { sub: sub(4), min_depth: 0.0, max_depth: 1.0, near_z: 0.1, far_z: 100.0 },
            ],
        });

        let mut seen = Vec::new();
        let mapped = layer.try_map(|id| -> Result<u32, ()> { seen.push(id); Ok(id * 10) }).unwrap();
        assert_eq!(seen, vec![1, 2, 3, 4]);

        let views = mapped.projection_views().unwrap();
        assert_eq!(views[0].sub.swapchain, 10);
        assert_eq!(views[1].sub.swapchain, 20);
    }

    #[test]
    fn layer_map_propagates_errors() {
        let layer = Layer::Quad(QuadData { flags: LayerFlags::default(), sub: sub(7), pose: Pose::identity(), size: Vector2::new(1.0, 1.0) });
        let result = layer.try_map(|_| -> Result<u32, &'static str> { Err("unknown") });
        assert_eq!(result.err(), Some("unknown"));
    }
}
