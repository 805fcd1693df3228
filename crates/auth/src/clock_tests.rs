// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::*;

#[yare::parameterized(
    zero = { Duration::ZERO, 0 },
    sub_millisecond = { Duration::from_micros(999), 0 },
    ten_minutes = { Duration::from_secs(600), 600_000 },
    beyond_u64 = { Duration::MAX, u64::MAX },
)]
fn duration_ms_saturates(duration: Duration, expected: u64) {
    assert_eq!(duration_ms(duration), expected);
}

#[test]
fn system_clock_is_past_2023() {
    assert!(SystemClock.now_ms() > 1_672_531_200_000);
}
