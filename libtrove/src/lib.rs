//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

#[allow(clippy::result_large_err)]
pub mod deps;
pub mod job;
pub mod local;
pub mod repository;
pub mod source;
pub mod trove;
#[allow(clippy::result_large_err)]
pub mod update;
pub mod versions;

pub use job::{Job, JobSet, PinMapping};
pub use trove::{Trove, TroveTuple, VersionFlavor};
pub use update::{
    apply_update, parse_change_items, ChangeItem, PlanningContext, UpdateError, UpdateItem,
    UpdateJob, UpdateOptions, UpdatePlanner,
};
