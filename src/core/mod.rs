//! Core layer - the accelerator contract and what surrounds it.
//!
//! This module provides:
//! - [`Accelerator`] - lifecycle and query trait implemented by every index
//! - [`AcceleratorType`] / [`new_accelerator`] - kinds and the factory
//! - [`AcceleratorConfig`] - serde-backed build parameters
//! - [`DeviceDescription`] / [`HardwareKernel`] - device data contracts
//! - [`DataSet`] - a mesh list with lazily built accelerators

mod accelerator;
mod config;
mod dataset;
mod device;

pub use accelerator::{new_accelerator, Accelerator, AcceleratorType};
pub use config::{
    AcceleratorConfig, BvhBuilderKind, BvhParams, MbvhParams, MqbvhParams, QbvhParams,
    QBVH_MAX_LEAF_PRIMS,
};
pub use dataset::DataSet;
pub use device::{DeviceDescription, DeviceKind, HardwareKernel, KernelBuffer};

pub(crate) use accelerator::check_totals;
