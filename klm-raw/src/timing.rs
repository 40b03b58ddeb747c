//! Trigger-relative hit timing.
//!
//! All times are in ns and reduced modulo 1024, the span covered by the
//! 10 low bits the front ends keep.

/// Modulus of every trigger-relative time.
pub const TIME_MODULUS: i32 = 1024;

const TIME_MASK: u32 = 0x3FF;
const TTC_CTIME_MASK: u32 = 0x07FF_FFFF;

/// Trigger coarse time in ns from the 27-bit TTC counter (8 ns ticks).
#[inline]
#[must_use]
pub fn trigger_ctime(ttc_ctime: u32) -> u32 {
    (ttc_ctime & TTC_CTIME_MASK) << 3
}

/// TDC time relative to the trigger: `(tdc - trigger) mod 1024`. This is
/// the RPC hit time.
#[inline]
#[must_use]
pub fn rpc_time(tdc: u16, trigger: u32) -> u16 {
    (u32::from(tdc).wrapping_sub(trigger) & TIME_MASK) as u16
}

/// Scintillator time: `((ctime << 3) - trigger) mod 1024`.
#[inline]
#[must_use]
pub fn scint_time(ctime: u16, trigger: u32) -> u16 {
    ((u32::from(ctime) << 3).wrapping_sub(trigger) & TIME_MASK) as u16
}

/// Subtracts a per-sector offset and reduces into `[0, 1024)`.
#[inline]
#[must_use]
pub fn calibrate(time: u16, offset: i32) -> u16 {
    (i32::from(time) - offset).rem_euclid(TIME_MODULUS) as u16
}

/// True if `|calibrated - nominal| < window`.
#[inline]
#[must_use]
pub fn is_prompt(calibrated: u16, nominal: i32, window: i32) -> bool {
    (i32::from(calibrated) - nominal).abs() < window
}

/// Coarse-time fix for the early scintillator readout firmware, which
/// counted ctime at a quarter of the nominal rate relative to the trigger.
///
/// Computed in 16-bit wrapping arithmetic. Must be applied at most once.
#[inline]
#[must_use]
pub fn legacy_ctime(ctime: u16, trigger: u32) -> u16 {
    let trig_ctime = (trigger >> 3) as u16;
    trig_ctime.wrapping_sub(trig_ctime.wrapping_sub(ctime) << 2)
}

/// Signed offset in ns between the trigger and the revo9 marker held in
/// the high half of a buffer trailer, folded into `[-512, 512)`.
#[inline]
#[must_use]
pub fn revo9_offset(trigger: u32, trailer: u32) -> i16 {
    let revo9 = ((trailer >> 16) << 3) & 0xFFFF;
    let dt = (trigger.wrapping_sub(revo9) & TIME_MASK) as i16;
    if dt >= 0x200 {
        dt - 0x400
    } else {
        dt
    }
}
