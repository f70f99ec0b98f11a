use serde::Serialize;

/// Point-in-time view of the flow-control registers, published to the host every loop iteration
/// for status registers and debugger UIs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FifoStatus {
    pub base: u32,
    pub end: u32,
    pub read_pointer: u32,
    pub write_pointer: u32,
    pub safe_read_pointer: u32,
    pub distance: i64,
    pub read_enabled: bool,
    pub breakpoint_enabled: bool,
    pub breakpoint: u32,
    pub link_enabled: bool,
    pub is_reading: bool,
    pub at_breakpoint: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum ConsumerState {
    Stopped = 0,
    Running = 1,
    StalledAtBreakpoint = 2,
    PausedExternally = 3,
}

impl ConsumerState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Running,
            2 => Self::StalledAtBreakpoint,
            3 => Self::PausedExternally,
            _ => Self::Stopped,
        }
    }
}
