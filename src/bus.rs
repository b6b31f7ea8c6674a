use crate::{EmuError, Result, Status};
use std::cell::RefCell;
use std::rc::Rc;

/// Capability every bus-mapped peripheral implements. Addresses are
/// device-relative; the bus performs the absolute-to-relative translation.
pub trait Device {
    fn read(&mut self, addr: u64) -> u8;
    fn write(&mut self, addr: u64, data: u8);
}

/// Shared device handle. The bus keeps clones of these; the machine driver
/// owns the devices for the emulator's whole lifetime.
pub type SharedDevice = Rc<RefCell<dyn Device>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusResult {
    pub data: u8,
    pub status: Status,
}

impl BusResult {
    fn ok(data: u8) -> Self {
        Self {
            data,
            status: Status::Aok,
        }
    }

    fn fault() -> Self {
        Self {
            data: 0,
            status: Status::Adr,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Aok
    }
}

struct Mapping {
    device: SharedDevice,
    start: u64,
    end: u64, // exclusive
}

/// Address-decode fabric. Mappings are scanned in registration order and the
/// first hit wins; overlapping registrations are accepted and never
/// re-ordered.
#[derive(Default)]
pub struct Bus {
    mappings: Vec<Mapping>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_device(&mut self, device: SharedDevice, start: u64, end: u64) -> Result<()> {
        if start >= end {
            return Err(EmuError::InvalidMapping { start, end });
        }
        self.mappings.push(Mapping { device, start, end });
        Ok(())
    }

    fn find_mapping(&self, addr: u64) -> Option<&Mapping> {
        self.mappings
            .iter()
            .find(|mapping| addr >= mapping.start && addr < mapping.end)
    }

    /// A miss reads as `{0, ADR}`. A device whose cell is already mutably
    /// borrowed (a sprite fetch aimed at the PPU's own window) reports the
    /// same fault instead of panicking.
    pub fn read(&self, addr: u64) -> BusResult {
        let Some(mapping) = self.find_mapping(addr) else {
            return BusResult::fault();
        };
        match mapping.device.try_borrow_mut() {
            Ok(mut device) => BusResult::ok(device.read(addr - mapping.start)),
            Err(_) => BusResult::fault(),
        }
    }

    /// A miss performs no write anywhere; it is observable only through the
    /// returned status.
    pub fn write(&self, addr: u64, data: u8) -> BusResult {
        let Some(mapping) = self.find_mapping(addr) else {
            return BusResult::fault();
        };
        match mapping.device.try_borrow_mut() {
            Ok(mut device) => {
                device.write(addr - mapping.start, data);
                BusResult::ok(data)
            }
            Err(_) => BusResult::fault(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScratchDevice {
        bytes: Vec<u8>,
    }

    impl ScratchDevice {
        fn shared(size: usize, fill: u8) -> Rc<RefCell<ScratchDevice>> {
            Rc::new(RefCell::new(ScratchDevice {
                bytes: vec![fill; size],
            }))
        }
    }

    impl Device for ScratchDevice {
        fn read(&mut self, addr: u64) -> u8 {
            self.bytes[addr as usize]
        }

        fn write(&mut self, addr: u64, data: u8) {
            self.bytes[addr as usize] = data;
        }
    }

    #[test]
    fn registration_rejects_empty_range() {
        let mut bus = Bus::new();
        let dev = ScratchDevice::shared(4, 0);
        assert!(bus.register_device(dev.clone(), 0x10, 0x10).is_err());
        assert!(bus.register_device(dev.clone(), 0x10, 0x08).is_err());
        assert!(bus.register_device(dev, 0x10, 0x14).is_ok());
    }

    #[test]
    fn read_translates_to_relative_address() {
        let mut bus = Bus::new();
        let dev = ScratchDevice::shared(4, 0);
        dev.borrow_mut().bytes[2] = 0xAB;
        bus.register_device(dev, 0x100, 0x104).unwrap();

        let hit = bus.read(0x102);
        assert!(hit.is_ok());
        assert_eq!(hit.data, 0xAB);
    }

    #[test]
    fn miss_faults_without_side_effects() {
        let mut bus = Bus::new();
        let dev = ScratchDevice::shared(4, 0x55);
        bus.register_device(dev.clone(), 0x100, 0x104).unwrap();

        assert_eq!(bus.read(0x0FF), BusResult::fault());
        assert_eq!(bus.read(0x104), BusResult::fault());
        assert_eq!(bus.write(0x104, 0xEE), BusResult::fault());
        assert_eq!(dev.borrow().bytes, vec![0x55; 4]);
    }

    #[test]
    fn write_hits_land_and_echo_the_byte() {
        let mut bus = Bus::new();
        let dev = ScratchDevice::shared(4, 0);
        bus.register_device(dev.clone(), 0x20, 0x24).unwrap();

        let result = bus.write(0x23, 0x7F);
        assert!(result.is_ok());
        assert_eq!(result.data, 0x7F);
        assert_eq!(dev.borrow().bytes[3], 0x7F);
    }

    #[test]
    fn overlapping_mappings_resolve_to_first_registered() {
        let mut bus = Bus::new();
        let first = ScratchDevice::shared(8, 0x11);
        let second = ScratchDevice::shared(8, 0x22);
        bus.register_device(first, 0x00, 0x08).unwrap();
        bus.register_device(second.clone(), 0x04, 0x0C).unwrap();

        assert_eq!(bus.read(0x04).data, 0x11);
        // The second device still answers past the first mapping's end.
        assert_eq!(bus.read(0x08).data, 0x22);

        bus.write(0x05, 0xEE);
        assert_eq!(second.borrow().bytes, vec![0x22; 8]);
    }

    #[test]
    fn borrowed_device_reads_as_address_fault() {
        let mut bus = Bus::new();
        let dev = ScratchDevice::shared(4, 0x33);
        bus.register_device(dev.clone(), 0x00, 0x04).unwrap();

        let guard = dev.borrow_mut();
        assert_eq!(bus.read(0x00), BusResult::fault());
        assert_eq!(bus.write(0x00, 0x01), BusResult::fault());
        drop(guard);
        assert_eq!(bus.read(0x00).data, 0x33);
    }
}
