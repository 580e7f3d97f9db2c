//! Qualcomm MSM chipsets

use super::{DeviceProfile, OperationCatalog};
use crate::mediator::{ActivateContextMediator, Mediator};
use crate::operation::ContextRequest;

/// Context 1 has to be named in the data dial
pub const MSM_DATA_DIAL: &str = "*99***1#";

#[derive(Debug, Clone, Default)]
pub struct QualcommMsm;

impl QualcommMsm {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceProfile for QualcommMsm {
    fn name(&self) -> &'static str {
        "qualcomm_msm"
    }
}

impl OperationCatalog for QualcommMsm {
    fn activate_context(&self, request: ContextRequest) -> Box<dyn Mediator> {
        Box::new(ActivateContextMediator::new(request, MSM_DATA_DIAL))
    }
}
