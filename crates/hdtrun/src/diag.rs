//! # Diagnostics Channel
//!
//! Pulls human-readable strings out of the guest: the last error message and
//! the debug log. Both exports are optional. The strings only ever decorate a
//! status code the caller already has; nothing here decides control flow.

use crate::guest::Capability;
use crate::guest::DEBUG_LOG_SCRATCH_CAPACITY;
use crate::guest::ERROR_SCRATCH_CAPACITY;
use crate::guest::Guest;
use crate::guest::Region;
use crate::marshal;
use crate::marshal::Slot;

/// Reads the guest's last error message, if the guest exports one.
pub fn last_error<G: Guest + ?Sized>(guest: &mut G) -> marshal::Result<Option<String>> {
    if !guest.supports(Capability::LastError) {
        return Ok(None);
    }
    read_scratch(guest, ERROR_SCRATCH_CAPACITY, |guest, buf| guest.last_error(buf))
}

/// Drains the guest's debug log, if the guest exports one.
pub fn debug_log<G: Guest + ?Sized>(guest: &mut G) -> marshal::Result<Option<String>> {
    if !guest.supports(Capability::DebugLog) {
        return Ok(None);
    }
    read_scratch(guest, DEBUG_LOG_SCRATCH_CAPACITY, |guest, buf| guest.debug_log(buf))
}

/// Best-effort message for a failed guest call.
///
/// Also forwards any pending debug log to `tracing`. Failures while reading
/// diagnostics are logged and swallowed; the caller keeps its status code.
pub fn describe_failure<G: Guest + ?Sized>(guest: &mut G) -> Option<String> {
    match debug_log(guest) {
        Ok(Some(log)) => {
            for line in log.lines() {
                tracing::debug!(target: "hdtrun::guest", "{}", line);
            }
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "could not read guest debug log"),
    }

    match last_error(guest) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, "could not read guest error message");
            None
        }
    }
}

fn read_scratch<G, F>(guest: &mut G, capacity: u64, fetch: F) -> marshal::Result<Option<String>>
where
    G: Guest + ?Sized,
    F: FnOnce(&mut G, Region) -> crate::guest::Result<Option<u64>>,
{
    marshal::with_buffers(guest, &[Slot::Scratch(capacity)], |guest, regions| {
        let buf = regions[0];
        let written = match fetch(guest, buf)? {
            None | Some(0) => return Ok(None),
            Some(written) => written.min(buf.len),
        };
        let bytes = guest.read(Region::new(buf.ptr, written))?;
        let text = String::from_utf8_lossy(&bytes);
        let text = text.trim_end_matches('\0').trim_end();
        Ok((!text.is_empty()).then(|| text.to_string()))
    })
}
