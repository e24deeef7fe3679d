use crate::model::{FuelType, Qualification, StaffEntry, VehicleType};

/// Qualifications a contrôleur must hold for a vehicle/fuel combination.
///
/// VP/VL/VU need the light-vehicle agrément, L the moto one, PL/TC the
/// heavy one. Gas fuels (GPL/GNV) additionally need the gas agrément.
pub fn required_qualifications(vehicle: VehicleType, fuel: FuelType) -> Vec<Qualification> {
    let base = match vehicle {
        VehicleType::Vp | VehicleType::Vl | VehicleType::Vu => Qualification::Vl,
        VehicleType::L => Qualification::L,
        VehicleType::Pl | VehicleType::Tc => Qualification::Pl,
    };
    let mut required = vec![base];
    if fuel.is_gas() {
        required.push(Qualification::Gaz);
    }
    required
}

/// A contrôleur qualifies iff the declared set is a superset of the required
/// one. An empty declared set counts as implicitly VL-qualified — and only
/// that, so it passes exactly when the requirement is the bare light-vehicle
/// agrément.
pub fn is_eligible(entry: &StaffEntry, required: &[Qualification]) -> bool {
    if entry.qualifications.is_empty() {
        return required == [Qualification::Vl];
    }
    required.iter().all(|q| entry.qualifications.contains(q))
}

/// Filter a day's staff entries down to those qualified for the request.
pub fn eligible_staff<'a>(
    entries: &'a [StaffEntry],
    required: &'a [Qualification],
) -> impl Iterator<Item = &'a StaffEntry> {
    entries.iter().filter(move |e| is_eligible(e, required))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn staff(quals: Vec<Qualification>) -> StaffEntry {
        StaffEntry {
            id: Ulid::new(),
            windows: Vec::new(),
            qualifications: quals,
        }
    }

    #[test]
    fn vehicle_class_mapping() {
        assert_eq!(
            required_qualifications(VehicleType::Vp, FuelType::Essence),
            vec![Qualification::Vl]
        );
        assert_eq!(
            required_qualifications(VehicleType::L, FuelType::Essence),
            vec![Qualification::L]
        );
        assert_eq!(
            required_qualifications(VehicleType::Tc, FuelType::Diesel),
            vec![Qualification::Pl]
        );
    }

    #[test]
    fn gas_fuel_appends_gaz() {
        assert_eq!(
            required_qualifications(VehicleType::Vp, FuelType::Gpl),
            vec![Qualification::Vl, Qualification::Gaz]
        );
        assert_eq!(
            required_qualifications(VehicleType::Pl, FuelType::Gnv),
            vec![Qualification::Pl, Qualification::Gaz]
        );
    }

    #[test]
    fn superset_check() {
        let e = staff(vec![Qualification::Vl, Qualification::Gaz]);
        assert!(is_eligible(&e, &[Qualification::Vl]));
        assert!(is_eligible(&e, &[Qualification::Vl, Qualification::Gaz]));
        assert!(!is_eligible(&e, &[Qualification::Pl]));
    }

    #[test]
    fn empty_set_is_implicitly_vl_only() {
        let e = staff(vec![]);
        assert!(is_eligible(&e, &[Qualification::Vl]));
        // Not for gas, not for heavy or moto classes
        assert!(!is_eligible(&e, &[Qualification::Vl, Qualification::Gaz]));
        assert!(!is_eligible(&e, &[Qualification::L]));
        assert!(!is_eligible(&e, &[Qualification::Pl]));
    }

    #[test]
    fn filters_staff_list() {
        let entries = vec![
            staff(vec![Qualification::Vl]),
            staff(vec![Qualification::Pl]),
            staff(vec![]),
        ];
        let required = required_qualifications(VehicleType::Vp, FuelType::Essence);
        assert_eq!(eligible_staff(&entries, &required).count(), 2);
        let required = required_qualifications(VehicleType::Pl, FuelType::Diesel);
        assert_eq!(eligible_staff(&entries, &required).count(), 1);
    }
}
