//! TI Calypso chipsets
//!
//! The Calypso reports call progress through `%CPI` and signal changes
//! through `%CSQ`, which replace the ring and caller id notifications of
//! standard devices.

use super::{DeviceProfile, GenericModem, OperationCatalog};
use crate::command::CommandSpec;
use crate::unsolicited::{NotificationTable, NotificationTag};

#[derive(Debug, Clone, Default)]
pub struct TiCalypso {
    base: GenericModem,
}

impl TiCalypso {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceProfile for TiCalypso {
    fn name(&self) -> &'static str {
        "ti_calypso"
    }

    fn notifications(&self) -> NotificationTable {
        let mut table = self.base.notifications();
        table.remove_tag(NotificationTag::CallRing);
        table.remove_tag(NotificationTag::CallerId);
        table.insert("%CPI:", NotificationTag::CallProgress);
        table.insert("%CSQ:", NotificationTag::SignalQuality);
        table
    }

    fn init_commands(&self) -> Vec<CommandSpec> {
        let mut commands = self.base.init_commands();
        commands.push(CommandSpec::new("%CPI=3"));
        commands.push(CommandSpec::new("%CSQ=1"));
        commands
    }
}

impl OperationCatalog for TiCalypso {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_progress_replaces_caller_id() {
        let table = TiCalypso::new().notifications();
        assert_eq!(table.lookup("%CPI: 1,0,0,0,1,0"), Some(NotificationTag::CallProgress));
        assert_eq!(table.lookup("%CSQ: 20,99,1"), Some(NotificationTag::SignalQuality));
        assert_eq!(table.lookup("+CLIP: \"123\",129"), None);
        assert_eq!(table.lookup("RING"), Some(NotificationTag::Ring));
    }

    #[test]
    fn init_enables_reports() {
        let init = TiCalypso::new().init_commands();
        let last: Vec<&str> = init.iter().rev().take(2).map(|c| c.text()).collect();
        assert_eq!(last, vec!["%CSQ=1", "%CPI=3"]);
    }
}
