//! A scene's mesh list and the accelerators built over it.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{new_accelerator, Accelerator, AcceleratorConfig, AcceleratorType, DeviceDescription};
use crate::geom::{Mesh, MeshType};
use crate::util::{BBox3f, Error, Result};

/// Meshes to intersect, plus one lazily built accelerator per type.
///
/// Mesh indices reported by hits are the indices returned by [`add`].
///
/// [`add`]: DataSet::add
pub struct DataSet {
    config: AcceleratorConfig,
    meshes: Vec<Arc<Mesh>>,
    total_vertex_count: usize,
    total_triangle_count: usize,
    bbox: BBox3f,
    has_instances: bool,
    has_motion: bool,
    accels: HashMap<AcceleratorType, Box<dyn Accelerator>>,
}

impl DataSet {
    pub fn new(config: AcceleratorConfig) -> Self {
        Self {
            config,
            meshes: Vec::new(),
            total_vertex_count: 0,
            total_triangle_count: 0,
            bbox: BBox3f::EMPTY,
            has_instances: false,
            has_motion: false,
            accels: HashMap::new(),
        }
    }

    /// Append a mesh and return its index.
    ///
    /// Accelerators built before the call no longer cover the mesh list
    /// and are dropped.
    pub fn add(&mut self, mesh: Arc<Mesh>) -> u32 {
        if !self.accels.is_empty() {
            warn!(
                cached = self.accels.len(),
                "mesh added after accelerators were built, dropping them"
            );
            self.accels.clear();
        }
        self.total_vertex_count += mesh.vertex_count();
        self.total_triangle_count += mesh.triangle_count();
        self.bbox.expand_by_box(&mesh.bbox());
        match mesh.mesh_type() {
            MeshType::Triangle => {}
            MeshType::Instance => self.has_instances = true,
            MeshType::Motion => self.has_motion = true,
        }
        self.meshes.push(mesh);
        (self.meshes.len() - 1) as u32
    }

    #[inline]
    pub fn config(&self) -> &AcceleratorConfig {
        &self.config
    }

    #[inline]
    pub fn meshes(&self) -> &[Arc<Mesh>] {
        &self.meshes
    }

    #[inline]
    pub fn total_vertex_count(&self) -> usize {
        self.total_vertex_count
    }

    #[inline]
    pub fn total_triangle_count(&self) -> usize {
        self.total_triangle_count
    }

    /// World box of every mesh as of the last `add` or update.
    #[inline]
    pub fn bbox(&self) -> BBox3f {
        self.bbox
    }

    #[inline]
    pub fn has_instances(&self) -> bool {
        self.has_instances
    }

    #[inline]
    pub fn has_motion(&self) -> bool {
        self.has_motion
    }

    /// Concrete accelerator type for `device`.
    ///
    /// A configured type other than `Auto` always wins. Otherwise two-level
    /// hierarchies are picked when the scene has instances or motion: MQBVH
    /// on the host, MBVH on hardware devices.
    pub fn accelerator_type_for(&self, device: &DeviceDescription) -> AcceleratorType {
        if self.config.accel_type != AcceleratorType::Auto {
            return self.config.accel_type;
        }
        let two_level = self.has_instances || self.has_motion;
        match (device.kind.is_hardware(), two_level) {
            (false, true) => AcceleratorType::Mqbvh,
            (false, false) => AcceleratorType::Qbvh,
            (true, true) => AcceleratorType::Mbvh,
            (true, false) => AcceleratorType::Bvh,
        }
    }

    /// Build on first request, then return the cached accelerator.
    ///
    /// `Auto` is resolved for the host device.
    pub fn get_accelerator(&mut self, accel_type: AcceleratorType) -> Result<&dyn Accelerator> {
        let accel_type = match accel_type {
            AcceleratorType::Auto => self.accelerator_type_for(&DeviceDescription::native()),
            ty => ty,
        };
        if !self.accels.contains_key(&accel_type) {
            debug!(%accel_type, meshes = self.meshes.len(), "building accelerator");
            let mut accel = new_accelerator(accel_type, &self.config)?;
            accel.init(
                &self.meshes,
                self.total_vertex_count,
                self.total_triangle_count,
            )?;
            self.accels.insert(accel_type, accel);
        }
        self.accels
            .get(&accel_type)
            .map(|a| &**a)
            .ok_or_else(|| Error::other(format!("{accel_type} accelerator missing from cache")))
    }

    /// An already built accelerator, if any.
    pub fn accelerator(&self, accel_type: AcceleratorType) -> Option<&dyn Accelerator> {
        self.accels.get(&accel_type).map(|a| &**a)
    }

    /// Whether every cached accelerator can be updated in place.
    pub fn does_all_accelerators_support_update(&self) -> bool {
        self.accels.values().all(|a| a.does_support_update())
    }

    /// Refresh every cached accelerator after mesh transforms changed.
    ///
    /// Fails before touching anything when one of them cannot update.
    pub fn update_accelerators(&mut self) -> Result<()> {
        if let Some(accel) = self.accels.values().find(|a| !a.does_support_update()) {
            return Err(Error::UpdateNotSupported(accel.accel_type()));
        }
        self.bbox = self
            .meshes
            .iter()
            .fold(BBox3f::EMPTY, |acc, m| acc.union(&m.bbox()));
        for accel in self.accels.values_mut() {
            accel.update()?;
        }
        info!(accelerators = self.accels.len(), "accelerators updated");
        Ok(())
    }
}
