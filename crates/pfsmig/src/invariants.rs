//! Debug assertion macros for pipeline invariants.
//!
//! Active only in debug builds; release builds pay nothing. The checks cover
//! the ring queue's index arithmetic and the owner's termination counter,
//! the two places where silent corruption would surface far from its cause.

/// Assert that occupancy never exceeds capacity.
///
/// **Invariant**: `0 <= size <= capacity`
macro_rules! debug_assert_occupancy {
    ($size:expr, $capacity:expr) => {
        debug_assert!(
            $size <= $capacity,
            "ring occupancy {} exceeds capacity {}",
            $size,
            $capacity
        )
    };
}

/// Assert that a ring index stays inside the buffer.
///
/// **Invariant**: `head, tail in [0, capacity)`
macro_rules! debug_assert_index_in_range {
    ($name:literal, $idx:expr, $capacity:expr) => {
        debug_assert!(
            $idx < $capacity,
            "ring {} index {} outside buffer of {} slots",
            $name,
            $idx,
            $capacity
        )
    };
}

/// Assert the head/tail/size relation of a partially filled ring.
///
/// **Invariant**: `size < capacity => size == (tail - head) mod capacity`
macro_rules! debug_assert_ring_consistent {
    ($head:expr, $tail:expr, $size:expr, $capacity:expr) => {
        debug_assert!(
            $size == $capacity
                || $size == ($tail + $capacity - $head) % $capacity,
            "ring state inconsistent: head={} tail={} size={} capacity={}",
            $head,
            $tail,
            $size,
            $capacity
        )
    };
}

/// Assert that an owner never counts more producer-finished notices than
/// there are producers.
///
/// **Invariant**: `producers_finished <= num_p`
macro_rules! debug_assert_fin_bound {
    ($seen:expr, $total:expr) => {
        debug_assert!(
            $seen <= $total,
            "saw {} producer-finished notices from {} producers",
            $seen,
            $total
        )
    };
}

pub(crate) use debug_assert_fin_bound;
pub(crate) use debug_assert_index_in_range;
pub(crate) use debug_assert_occupancy;
pub(crate) use debug_assert_ring_consistent;
