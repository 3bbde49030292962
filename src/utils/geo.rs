//! Utilidades geográficas

use crate::models::Position;

/// Radio medio de la Tierra en kilómetros
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Distancia de gran círculo entre dos posiciones (fórmula de Haversine), en km
pub fn haversine_km(a: &Position, b: &Position) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // min() evita NaN por redondeo cuando h supera 1 en puntos antipodales
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_point_is_zero() {
        let p = Position::new(-33.45, -70.66);
        assert_eq!(haversine_km(&p, &p), 0.0);
    }

    #[test]
    fn test_along_meridian() {
        // 10 km hacia el norte sobre el mismo meridiano
        let a = Position::new(48.8566, 2.3522);
        let b = Position::new(48.8566 + (10.0 / EARTH_RADIUS_KM).to_degrees(), 2.3522);
        assert!((haversine_km(&a, &b) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_paris_to_lyon() {
        let paris = Position::new(48.8566, 2.3522);
        let lyon = Position::new(45.7640, 4.8357);
        let d = haversine_km(&paris, &lyon);
        assert!((d - 392.0).abs() < 2.0, "distance was {}", d);
    }
}
