// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! System module - host access backends.

mod host;
pub mod mock;
mod traits;

pub use host::HostSystem;
pub use mock::MockSystem;
pub use traits::*;
