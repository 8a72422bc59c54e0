use thiserror::Error;

use crate::device::Device;

/// Error reported by a [`DeviceFactory`] that refuses to realize a device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct FactoryError(pub String);

impl FactoryError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// The bridge to the device models.
///
/// The topology builder decides *where* a device goes and *what* it is wired to; the factory
/// instantiates the model behind it. `realize` is called once per device, after every resource
/// check has passed and before anything is committed, so an error leaves the topology unchanged.
pub trait DeviceFactory {
    fn realize(&mut self, device: &Device) -> Result<(), FactoryError>;
}

/// Factory that accepts every device without instantiating anything.
///
/// Useful for dry runs that only need the resulting topology.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllFactory;

impl DeviceFactory for AcceptAllFactory {
    fn realize(&mut self, _device: &Device) -> Result<(), FactoryError> {
        Ok(())
    }
}

impl<F: DeviceFactory + ?Sized> DeviceFactory for &mut F {
    fn realize(&mut self, device: &Device) -> Result<(), FactoryError> {
        (**self).realize(device)
    }
}
