pub mod clint;
pub mod plic;
pub mod ram;
pub mod uart;
pub mod virtio;

pub use clint::Clint;
pub use plic::Plic;
pub use ram::Ram;
pub use uart::Uart;
pub use virtio::Virtio;
