use super::{DeviceProfile, OperationCatalog};

/// Any 27.007 compliant modem
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericModem;

impl DeviceProfile for GenericModem {
    fn name(&self) -> &'static str {
        "generic"
    }
}

impl OperationCatalog for GenericModem {}
