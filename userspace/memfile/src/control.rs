// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fixed-size control surface (get/set size, get/set sealed).

use crate::{Memfile, Result};

/// Control request carrying a fixed-size argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Query the current size.
    GetSize,
    /// Resize to the given byte count.
    SetSize(u64),
    /// Query the sealed flag.
    GetSealed,
    /// Request the given sealed state.
    SetSealed(bool),
}

/// Reply to a [`Control`] request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlReply {
    /// Current size in bytes.
    Size(u64),
    /// Current sealed flag.
    Sealed(bool),
    /// The setter completed.
    Done,
}

impl Memfile {
    /// Executes one control request.
    pub fn control(&self, request: Control) -> Result<ControlReply> {
        match request {
            Control::GetSize => Ok(ControlReply::Size(self.size())),
            Control::SetSize(size) => self.resize(size).map(|()| ControlReply::Done),
            Control::GetSealed => Ok(ControlReply::Sealed(self.is_sealed())),
            Control::SetSealed(want) => self.seal(want).map(|()| ControlReply::Done),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn control_surface_matches_direct_calls() {
        let sp = Memfile::new(Some("ctl"), 0).unwrap();
        assert_eq!(sp.control(Control::SetSize(32)), Ok(ControlReply::Done));
        assert_eq!(sp.control(Control::GetSize), Ok(ControlReply::Size(32)));
        assert_eq!(sp.control(Control::SetSealed(true)), Ok(ControlReply::Done));
        assert_eq!(sp.control(Control::GetSealed), Ok(ControlReply::Sealed(true)));
        assert_eq!(sp.control(Control::SetSealed(true)), Err(Error::AlreadyDone));
        assert_eq!(sp.control(Control::SetSize(32)), Err(Error::AlreadyDone));
        assert_eq!(sp.control(Control::SetSize(8)), Err(Error::PermissionDenied));
    }

    #[test]
    fn set_sealed_with_second_holder_is_busy() {
        let sp = Memfile::new(None, 1).unwrap();
        let _peer = sp.clone();
        assert_eq!(sp.control(Control::SetSealed(true)), Err(Error::Busy));
    }
}
