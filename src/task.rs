//! Task spawning support.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#[allow(unused_imports)]
use defmt::{debug, error, info, trace, warn};

// Threading and tasks model
//
// The main loop runs directly in main(), on the thread mode executor, and
// owns the bus and the file system.  Its instruction handlers block on the
// SD card, so nothing else is run on that executor.
//
// The reset task runs on an interrupt executor, at a higher priority, so it
// can preempt the main loop whenever the host resets us.

/// Handles the result of spawning a task.
///
/// Spawning fails if too many instances of the task are already running.
/// Tasks are only spawned at start of day, so that's a bug, and the device
/// is reset.
///
/// Example:
/// ```ignore
/// spawn_or_reboot(spawner.spawn(my_task()), "my_task");
/// ```
pub fn spawn_or_reboot<E: defmt::Format>(spawn_result: Result<(), E>, task_name: &str) {
    match spawn_result {
        Ok(()) => debug!("Spawned task {}", task_name),
        Err(e) => {
            error!("Failed to spawn task: {}, error: {}", task_name, e);
            cortex_m::peripheral::SCB::sys_reset();
        }
    }
}
