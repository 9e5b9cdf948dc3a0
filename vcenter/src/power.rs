//! Power operations accepted by the client.

use core::fmt;
use std::str::FromStr;

use crate::error::VcError;

/// Operation names accepted by [`PowerOp::from_str`], in display order.
pub const SUPPORTED_OPERATIONS: &str = "start, shutdown, restart, poweroff";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerOp {
    /// Power on unless already on.
    Start,
    /// Graceful guest shutdown through guest tools.
    Shutdown,
    /// Guest reboot, or hard off/on when tools are unavailable.
    Restart,
    /// Hard power off.
    PowerOff,
}

impl PowerOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerOp::Start => "start",
            PowerOp::Shutdown => "shutdown",
            PowerOp::Restart => "restart",
            PowerOp::PowerOff => "poweroff",
        }
    }
}

impl fmt::Display for PowerOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerOp {
    type Err = VcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(PowerOp::Start),
            "shutdown" => Ok(PowerOp::Shutdown),
            "restart" => Ok(PowerOp::Restart),
            "poweroff" => Ok(PowerOp::PowerOff),
            other => Err(VcError::InvalidOperation(other.to_string())),
        }
    }
}

/// How a successful power action completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerOutcome {
    /// Nothing to do; the VM was already in the requested state.
    AlreadyInState,
    /// The platform task ran to success.
    Completed,
    /// A guest request was issued; completion is not tracked.
    Initiated,
}
