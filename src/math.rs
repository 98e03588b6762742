//! Math types for RailSonic

use crate::source::SoundAnchor;
use std::rc::{Rc, Weak};

pub use glam::{Quat, Vec3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub fn identity() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
        }
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * (-Vec3::Z)
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    /// Expresses a world-space offset from this pose in the pose's local axes.
    pub fn to_local(&self, offset: Vec3) -> Vec3 {
        self.rotation.inverse() * offset
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

/// The "ears" of the simulation, fed once per frame from the camera.
///
/// `velocity` drives the speed-dependent outer radius of the linear model.
/// `interior` names the car the camera currently sits in, if any; sounds of
/// every other parent are heard at half their radius while it is set.
#[derive(Clone, Default)]
pub struct Listener {
    pub pose: Pose,
    pub velocity: Vec3,
    pub interior: Option<Weak<dyn SoundAnchor>>,
}

impl Listener {
    pub fn new(pose: Pose) -> Self {
        Self {
            pose,
            velocity: Vec3::ZERO,
            interior: None,
        }
    }

    pub fn position(&self) -> Vec3 {
        self.pose.position
    }

    pub fn speed(&self) -> f32 {
        self.velocity.length()
    }

    pub fn set_interior(&mut self, car: Option<&Rc<dyn SoundAnchor>>) {
        self.interior = car.map(Rc::downgrade);
    }

    /// Whether the camera is inside a car other than `parent`.
    pub(crate) fn is_outside_of(&self, parent: Option<&Weak<dyn SoundAnchor>>) -> bool {
        match (&self.interior, parent) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(car), Some(parent)) => !std::ptr::addr_eq(car.as_ptr(), parent.as_ptr()),
        }
    }
}
