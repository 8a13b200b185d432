pub mod bluez;
pub mod decoder;
pub mod device;
pub mod history;
#[cfg(test)]
pub mod mock;
pub mod transport;
pub mod uuids;

pub use bluez::BluezTransport;
pub use device::Aranet4;
