//! Device descriptions and hardware-kernel data contracts.
//!
//! Kernel source generation is not part of this crate. A
//! [`HardwareKernel`] carries what a kernel needs to agree on with the host:
//! the node and primitive arrays as raw bytes in their exact in-memory
//! layout, plus the defines that size the traversal.

use tracing::warn;

/// Kind of intersection device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Host CPU traversal.
    Native,
    OpenCl,
    Cuda,
}

impl DeviceKind {
    /// True for devices that run an uploaded kernel.
    #[inline]
    pub fn is_hardware(&self) -> bool {
        !matches!(self, Self::Native)
    }
}

/// What a scheduler knows about a device when picking a backend.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceDescription {
    pub name: String,
    pub kind: DeviceKind,
    /// Largest single buffer the device accepts, in bytes.
    pub max_memory_alloc_size: u64,
    pub compute_units: u32,
}

impl DeviceDescription {
    /// The host CPU.
    pub fn native() -> Self {
        Self {
            name: "Native".to_string(),
            kind: DeviceKind::Native,
            max_memory_alloc_size: u64::MAX,
            compute_units: std::thread::available_parallelism().map_or(1, |n| n.get() as u32),
        }
    }

    /// A GPU-style device.
    pub fn hardware(name: impl Into<String>, kind: DeviceKind, max_memory_alloc_size: u64) -> Self {
        Self {
            name: name.into(),
            kind,
            max_memory_alloc_size,
            compute_units: 1,
        }
    }
}

/// One named upload buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct KernelBuffer {
    pub name: String,
    pub data: Vec<u8>,
}

/// Host-side data for a hardware intersection kernel.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HardwareKernel {
    /// Kernel entry point family, e.g. `"qbvh"`.
    pub name: String,
    pub defines: Vec<(String, String)>,
    pub buffers: Vec<KernelBuffer>,
}

impl HardwareKernel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a define.
    pub fn with_define(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.defines.push((key.into(), value.to_string()));
        self
    }

    /// Add a buffer from a slice of plain-old-data records.
    pub fn with_buffer<T: bytemuck::Pod>(mut self, name: impl Into<String>, records: &[T]) -> Self {
        self.buffers.push(KernelBuffer {
            name: name.into(),
            data: bytemuck::cast_slice(records).to_vec(),
        });
        self
    }

    pub fn define(&self, key: &str) -> Option<&str> {
        self.defines
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn buffer(&self, name: &str) -> Option<&KernelBuffer> {
        self.buffers.iter().find(|b| b.name == name)
    }

    pub fn total_size(&self) -> usize {
        self.buffers.iter().map(|b| b.data.len()).sum()
    }

    /// False when any buffer is larger than the device accepts.
    pub fn can_run_on(&self, device: &DeviceDescription) -> bool {
        for b in &self.buffers {
            if b.data.len() as u64 > device.max_memory_alloc_size {
                warn!(
                    device = %device.name,
                    buffer = %b.name,
                    size_kb = b.data.len() / 1024,
                    limit_kb = device.max_memory_alloc_size / 1024,
                    "{} buffer is too big for device",
                    self.name
                );
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_buffers() {
        let k = HardwareKernel::new("test")
            .with_define("STACK_SIZE", 64)
            .with_buffer("words", &[1u32, 2, 3]);
        assert_eq!(k.define("STACK_SIZE"), Some("64"));
        assert_eq!(k.buffer("words").unwrap().data.len(), 12);
        assert_eq!(k.total_size(), 12);
    }

    #[test]
    fn test_can_run_on() {
        let k = HardwareKernel::new("test").with_buffer("big", &[0u8; 4096]);
        let small = DeviceDescription::hardware("tiny", DeviceKind::OpenCl, 1024);
        let large = DeviceDescription::hardware("big", DeviceKind::Cuda, 1 << 20);
        assert!(!k.can_run_on(&small));
        assert!(k.can_run_on(&large));
        assert!(!DeviceDescription::native().kind.is_hardware());
    }
}
