//! Close-time schedule.
//!
//! Close times are recorded at a coarse resolution so that honest nodes
//! observing slightly different clocks still agree on the rounded value. The
//! resolution adapts: it coarsens while the network keeps disagreeing on
//! close times and tightens again while it agrees.

/// Permitted close-time resolutions, in seconds.
pub const CLOSE_RESOLUTIONS: [u8; 6] = [10, 20, 30, 60, 90, 120];

/// Resolution for the genesis ledger.
pub const DEFAULT_CLOSE_RESOLUTION: u8 = 30;

/// Move to a coarser resolution every this many ledgers while disagreeing.
const RAISE_RESOLUTION_EVERY: u32 = 8;

/// Move to a finer resolution every this many ledgers while agreeing.
const LOWER_RESOLUTION_EVERY: u32 = 1;

/// Resolution for the ledger at `sequence`, given the previous ledger's
/// resolution and whether its close time carried consensus.
pub fn next_close_resolution(previous: u8, previous_agree: bool, sequence: u32) -> u8 {
    debug_assert!(sequence != 0);
    let position = CLOSE_RESOLUTIONS.iter().position(|&r| r == previous);
    let position = match position {
        Some(position) => position,
        None => return previous,
    };

    if !previous_agree && sequence % RAISE_RESOLUTION_EVERY == 0 {
        if let Some(&coarser) = CLOSE_RESOLUTIONS.get(position + 1) {
            return coarser;
        }
    }
    if previous_agree && sequence % LOWER_RESOLUTION_EVERY == 0 && position > 0 {
        return CLOSE_RESOLUTIONS[position - 1];
    }
    previous
}

/// Round a close time to its resolution. Zero stays zero.
pub fn round_close_time(close_time: u32, resolution: u8) -> u32 {
    if close_time == 0 {
        return 0;
    }
    let resolution = u32::from(resolution);
    let shifted = close_time + resolution / 2;
    shifted - (shifted % resolution)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_is_idempotent() {
        for t in [1u32, 29, 30, 31, 500, 1000, 12345] {
            for r in CLOSE_RESOLUTIONS {
                let once = round_close_time(t, r);
                assert_eq!(round_close_time(once, r), once, "t={t} r={r}");
            }
        }
    }

    #[test]
    fn test_round_stays_close() {
        for t in [1u32, 29, 30, 31, 500, 1000, 12345] {
            for r in CLOSE_RESOLUTIONS {
                let rounded = round_close_time(t, r);
                let distance = rounded.abs_diff(t);
                assert!(distance <= u32::from(r) / 2, "t={t} r={r} -> {rounded}");
            }
        }
    }

    #[test]
    fn test_round_zero() {
        assert_eq!(round_close_time(0, 30), 0);
    }

    #[test]
    fn test_resolution_coarsens_on_disagreement() {
        // Only every eighth ledger.
        assert_eq!(next_close_resolution(30, false, 7), 30);
        assert_eq!(next_close_resolution(30, false, 8), 60);
        // Already coarsest stays.
        assert_eq!(next_close_resolution(120, false, 8), 120);
    }

    #[test]
    fn test_resolution_tightens_on_agreement() {
        assert_eq!(next_close_resolution(30, true, 5), 20);
        assert_eq!(next_close_resolution(20, true, 6), 10);
        // Already finest stays.
        assert_eq!(next_close_resolution(10, true, 7), 10);
    }

    #[test]
    fn test_unknown_resolution_passes_through() {
        assert_eq!(next_close_resolution(45, true, 3), 45);
    }
}
