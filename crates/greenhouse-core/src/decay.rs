//! Decay arithmetic and death detection.
//!
//! Both functions are pure. The scheduler feeds [`decay_step`] to the
//! store's atomic delta and then asks [`died`] whether the committed update
//! crossed the alive-to-dead edge.
//!
//! A dead plant is refused by [`decay_step`] with
//! [`StoreError::AlreadyDead`], so the edge is one-way: once a plant has
//! died no later tick can report the transition again.

use greenhouse_types::{MIN_WATER, Plant, clamp_water};
use rust_decimal::Decimal;

use crate::store::StoreError;

/// Compute the next state of a living plant after one tick.
///
/// `next_water = max(0, water - decay_rate)` and the plant is dead when
/// the result is not strictly positive. A negative rate is treated as zero.
///
/// # Errors
///
/// Returns [`StoreError::AlreadyDead`] if the plant is already dead.
pub fn decay_step(plant: &Plant, decay_rate: Decimal) -> Result<Plant, StoreError> {
    if plant.is_dead {
        return Err(StoreError::AlreadyDead(plant.id));
    }
    let rate = decay_rate.max(Decimal::ZERO);
    let next_water = clamp_water(plant.current_water.saturating_sub(rate));
    let mut next = plant.clone();
    next.current_water = next_water;
    next.is_dead = next_water <= MIN_WATER;
    Ok(next)
}

/// Whether the transition from `previous` to `current` is a death.
pub const fn died(previous: &Plant, current: &Plant) -> bool {
    !previous.is_dead && current.is_dead
}
