use std::collections::HashMap;
use std::sync::OnceLock;

use crate::model::{ControlType, FuelType, Minutes, VehicleType};

/// Service duration when no table entry matches.
pub const DEFAULT_DURATION_MIN: Minutes = 45;

use ControlType::*;
use FuelType::*;
use VehicleType::*;

/// The duration grid, control → vehicle → fuel. Unlisted combinations fall
/// back to [`DEFAULT_DURATION_MIN`].
const DURATIONS: &[(ControlType, VehicleType, FuelType, Minutes)] = &[
    // Periodic inspections
    (Ctp, Vp, Essence, 35),
    (Ctp, Vp, Diesel, 40),
    (Ctp, Vp, Gpl, 45),
    (Ctp, Vp, Gnv, 45),
    (Ctp, Vp, Electrique, 30),
    (Ctp, Vp, Hybride, 40),
    (Ctp, Vl, Essence, 35),
    (Ctp, Vl, Diesel, 40),
    (Ctp, Vu, Essence, 40),
    (Ctp, Vu, Diesel, 45),
    (Ctp, Vu, Gpl, 50),
    (Ctp, L, Essence, 30),
    (Ctp, L, Electrique, 25),
    (Ctp, Pl, Diesel, 60),
    (Ctp, Tc, Diesel, 60),
    // Contre-visites are shorter: only the refused points are re-checked
    (Cv, Vp, Essence, 20),
    (Cv, Vp, Diesel, 20),
    (Cv, Vp, Gpl, 25),
    (Cv, Vl, Essence, 20),
    (Cv, Vu, Diesel, 25),
    (Cv, L, Essence, 15),
    (Cv, Pl, Diesel, 30),
    (Cv, Tc, Diesel, 30),
    // Voluntary inspections run the full periodic grid
    (Cvol, Vp, Essence, 35),
    (Cvol, Vp, Diesel, 40),
    (Cvol, Vu, Diesel, 45),
];

fn table() -> &'static HashMap<(ControlType, VehicleType, FuelType), Minutes> {
    static TABLE: OnceLock<HashMap<(ControlType, VehicleType, FuelType), Minutes>> =
        OnceLock::new();
    TABLE.get_or_init(|| {
        DURATIONS
            .iter()
            .map(|&(c, v, f, min)| ((c, v, f), min))
            .collect()
    })
}

/// Pure lookup: minutes of bay time for one inspection. Stable for identical
/// inputs; a miss returns the default rather than failing.
pub fn service_duration(control: ControlType, vehicle: VehicleType, fuel: FuelType) -> Minutes {
    table()
        .get(&(control, vehicle, fuel))
        .copied()
        .unwrap_or(DEFAULT_DURATION_MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_entry() {
        assert_eq!(service_duration(Ctp, Vp, Essence), 35);
        assert_eq!(service_duration(Ctp, Pl, Diesel), 60);
        assert_eq!(service_duration(Cv, Vp, Diesel), 20);
    }

    #[test]
    fn unmapped_falls_back_to_default() {
        // No electric heavy-goods entry in the grid
        assert_eq!(service_duration(Ctp, Pl, Electrique), DEFAULT_DURATION_MIN);
        assert_eq!(service_duration(Cv, Tc, Gnv), DEFAULT_DURATION_MIN);
    }

    #[test]
    fn idempotent() {
        let first = service_duration(Ctp, Vu, Gpl);
        for _ in 0..100 {
            assert_eq!(service_duration(Ctp, Vu, Gpl), first);
        }
    }
}
