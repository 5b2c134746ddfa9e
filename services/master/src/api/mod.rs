//! Master API.
//!
//! Operations used by external tooling to mutate cell state. Each one
//! writes the resource record first, then enqueues an event marker naming
//! the resource kind so the master reloads the narrowest part of its model.
//! Writes use `check_content`, and no marker is sent when nothing changed.
//!
//! Validation failures are raised before anything is written. A missing
//! resource is an empty result, never an error, except where an update
//! needs an existing record.

pub mod allocations;
pub mod apps;
pub mod buckets;
pub mod events;
pub mod identity;
pub mod monitors;
pub mod quotas;
pub mod servers;

pub use allocations::{get_allocations, update_allocations};
pub use apps::{
    create_apps, delete_apps, get_app, get_apps_blacklist, get_scheduled_stats, list_running,
    list_scheduled, update_app_priorities, update_apps_blacklist,
};
pub use buckets::{
    cell_buckets, cell_insert_bucket, cell_remove_bucket, create_bucket, delete_bucket,
    delete_partition, get_bucket, get_partition, list_buckets, list_partitions, update_partition,
};
pub use events::create_event;
pub use identity::{
    delete_identity_group, get_identity_group, list_identity_groups, update_identity_group,
};
pub use monitors::{
    appmonitor_failed, appmonitor_succeeded, delete_appmonitor, get_appmonitor,
    list_appmonitors, update_appmonitor, AppMonitorRecord, MonitorPolicy,
};
pub use servers::{
    blackout_server, clear_server_blackout, create_server, delete_server, freeze_server,
    get_server, list_blackedout_servers, list_reboots, list_servers, reboot_server,
    unfreeze_server, update_server_attrs, update_server_capacity, update_server_parent,
    update_server_state, update_server_traits, ServerAttrs,
};

use crate::trace::TracePublisher;

/// Trace source of API-originated transitions.
pub const SOURCE: &str = "api";

fn traces() -> TracePublisher {
    TracePublisher::new(SOURCE)
}
